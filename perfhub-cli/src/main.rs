//! PerfHub CLI - Command-line client for PerfHub
//!
//! Signs in against the PerfHub API, checks permissions, and works with
//! notifications, including a live `watch` mode over the realtime channel

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use perfhub_applications::{
    FileCredentialStore, GuardDecision, NotificationRelay, RelayUpdate, SessionEvent,
    SessionManager,
};
use perfhub_core::{
    init_logging, log_operation_error, log_operation_start, log_operation_success,
    performance::measure_async, ClientConfig, LoginCredentials, Navigator, Notification,
    NotificationFilters, NotificationId, NotificationType, Priority,
};
use perfhub_web::{BroadcastQueryCache, HttpApiClient, WebSocketChannel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "perfhub")]
#[command(about = "Command-line client for PerfHub sessions and notifications")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in and store the credential
    Login {
        /// Account email
        #[arg(short, long)]
        email: String,

        /// Password (falls back to PERFHUB_PASSWORD)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// Sign out and forget the stored credential
    Logout,

    /// Show the signed-in user
    Whoami,

    /// Check permissions of the signed-in user
    Can {
        /// Permission tokens to check
        #[arg(required = true)]
        permissions: Vec<String>,

        /// Succeed when any of the permissions is held instead of all
        #[arg(long)]
        any: bool,
    },

    /// Work with notifications
    #[command(subcommand)]
    Notifications(NotificationCommands),

    /// Stream notifications until interrupted
    Watch {
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Manage configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,

        /// Initialize default configuration
        #[arg(long)]
        init: bool,

        /// Validate current configuration
        #[arg(long)]
        validate: bool,
    },
}

#[derive(Subcommand)]
enum NotificationCommands {
    /// List notifications
    List(ListArgs),

    /// Mark one notification as read
    Read { id: String },

    /// Mark every notification as read
    ReadAll,

    /// Delete a notification
    Delete { id: String },
}

#[derive(Args)]
struct ListArgs {
    /// Only unread notifications
    #[arg(long)]
    unread: bool,

    /// Filter by type, e.g. GOAL_ASSIGNED
    #[arg(long = "type")]
    notification_type: Option<NotificationType>,

    /// Filter by priority
    #[arg(long)]
    priority: Option<Priority>,

    #[arg(long)]
    skip: Option<u32>,

    #[arg(long, default_value = "50")]
    limit: u32,

    /// Case-insensitive search over title and message
    #[arg(long)]
    search: Option<String>,
}

impl ListArgs {
    fn filters(&self) -> NotificationFilters {
        NotificationFilters {
            unread_only: self.unread,
            notification_type: self.notification_type,
            priority: self.priority,
            skip: self.skip,
            limit: Some(self.limit),
        }
    }
}

/// A terminal has no routes; a redirect means the user must sign in again
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn replace(&self, route: &str) {
        info!(route = route, "Sign-in required");
    }
}

/// Wired services for one invocation
struct Client {
    session: SessionManager,
    relay: NotificationRelay,
    cache: Arc<BroadcastQueryCache>,
}

impl Client {
    fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let api = Arc::new(HttpApiClient::new(config.api.clone())?);
        let storage_dir = config
            .session
            .credential_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(FileCredentialStore::default_dir);
        let store = Arc::new(FileCredentialStore::new(storage_dir)?);

        let session = SessionManager::new(
            api.clone(),
            store,
            Arc::new(TerminalNavigator),
            config.session.clone(),
        );
        let cache = Arc::new(BroadcastQueryCache::default());
        let relay = NotificationRelay::new(
            session.clone(),
            Arc::new(WebSocketChannel::new(config.realtime.clone())),
            api,
            cache.clone(),
            config.notifications.clone(),
        );

        Ok(Self {
            session,
            relay,
            cache,
        })
    }

    /// Restore the stored session and require a signed-in user
    async fn require_user(&self) -> anyhow::Result<()> {
        self.session.start().await;
        match self.session.enforce_guard() {
            GuardDecision::Allow => Ok(()),
            GuardDecision::RedirectToLogin => {
                bail!("Not signed in. Run `perfhub login --email <email>` first")
            }
            GuardDecision::Pending { .. } => bail!("Session is still settling, try again"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = ClientConfig::load(Some(&config_path))
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    init_logging(&config.logging)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    debug!("Starting PerfHub CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Config {
            show,
            init,
            validate,
        } => handle_config(&config_path, show, init, validate),
        command => {
            let client = Client::new(&config)?;
            run(&client, command).await
        }
    }
}

async fn run(client: &Client, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Login { email, password } => handle_login(client, email, password).await,
        Commands::Logout => handle_logout(client).await,
        Commands::Whoami => handle_whoami(client).await,
        Commands::Can { permissions, any } => handle_can(client, &permissions, any).await,
        Commands::Notifications(command) => handle_notifications(client, command).await,
        Commands::Watch { duration } => handle_watch(client, duration).await,
        Commands::Config { .. } => Ok(()),
    }
}

/// Default configuration file location
fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|d| d.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("perfhub")
        .join("config.toml")
}

async fn handle_login(
    client: &Client,
    email: String,
    password: Option<String>,
) -> anyhow::Result<()> {
    let password = match password {
        Some(password) => password,
        None => std::env::var("PERFHUB_PASSWORD")
            .context("Pass --password or set PERFHUB_PASSWORD")?,
    };

    let response = client
        .session
        .login(&LoginCredentials::new(email, password))
        .await?;

    let user = client
        .session
        .current_user()
        .context("Login succeeded but no user was loaded")?;
    println!("Signed in as {}", user.display_name());
    if let Some(role) = client.session.role_name() {
        println!("Role: {}", role);
    }
    debug!(token_type = %response.token_type, "Credential stored");
    Ok(())
}

async fn handle_logout(client: &Client) -> anyhow::Result<()> {
    let mut state = client.session.subscribe();
    client.session.logout();

    // Give the detached remote logout its settle window before the process exits
    let settle = Duration::from_millis(client.session.config().logout_settle_ms + 1_000);
    let settled = tokio::time::timeout(settle, async {
        state.wait_for(|s| !s.logging_out).await.is_ok()
    })
    .await;
    if !matches!(settled, Ok(true)) {
        warn!("Logout did not settle in time");
    }

    println!("Signed out");
    Ok(())
}

async fn handle_whoami(client: &Client) -> anyhow::Result<()> {
    client.require_user().await?;
    let user = client.session.current_user().context("No signed-in user")?;
    let permissions = client.session.permissions();

    println!("User:         {} ({})", user.display_name(), user.id);
    if let Some(email) = &user.email {
        println!("Email:        {}", email);
    }
    println!(
        "Role:         {}",
        client.session.role_name().unwrap_or_else(|| "-".to_string())
    );
    println!(
        "Organization: {}",
        client
            .session
            .organization_name()
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Scope:        {}", user.scope);
    println!(
        "Superuser:    {}",
        if permissions.is_superuser() { "yes" } else { "no" }
    );
    println!("Permissions:  {}", permissions.tokens().join(", "));
    Ok(())
}

async fn handle_can(client: &Client, permissions: &[String], any: bool) -> anyhow::Result<()> {
    client.require_user().await?;
    let wanted: Vec<&str> = permissions.iter().map(String::as_str).collect();

    let granted = if any {
        client.session.has_any_permission(&wanted)
    } else {
        client.session.has_all_permissions(&wanted)
    };

    for permission in &wanted {
        let mark = if client.session.has_permission(permission) {
            "yes"
        } else {
            "no"
        };
        println!("{:<32} {}", permission, mark);
    }

    if !granted {
        bail!("Permission check failed");
    }
    Ok(())
}

async fn handle_notifications(
    client: &Client,
    command: NotificationCommands,
) -> anyhow::Result<()> {
    client.require_user().await?;
    let relay = &client.relay;

    match command {
        NotificationCommands::List(args) => {
            log_operation_start!("list_notifications", limit = args.limit);
            let filters = args.filters();
            let count = measure_async("list_notifications", relay.load_initial(&filters))
                .await
                .inspect_err(|e| {
                    log_operation_error!("list_notifications", e);
                })?;
            log_operation_success!("list_notifications", count = count);

            let notifications = match &args.search {
                Some(query) => relay.search(query).await,
                None => relay.notifications().await,
            };

            if notifications.is_empty() {
                println!("No notifications");
            }
            for notification in &notifications {
                print_notification(notification);
            }
            println!("Unread: {}", relay.unread_count().await);
        }
        NotificationCommands::Read { id } => {
            relay
                .submit_mark_as_read(&NotificationId::from(id.as_str()))
                .await?;
            println!("Marked {} as read", id);
        }
        NotificationCommands::ReadAll => {
            relay.submit_mark_all_as_read().await?;
            println!("Marked all notifications as read");
        }
        NotificationCommands::Delete { id } => {
            relay.submit_delete(&NotificationId::from(id.as_str())).await?;
            println!("Deleted {}", id);
        }
    }

    Ok(())
}

async fn handle_watch(client: &Client, duration: Option<u64>) -> anyhow::Result<()> {
    client.require_user().await?;

    let mut updates = client.relay.updates();
    let mut events = client.session.events();
    let mut invalidated = client.cache.subscribe();
    client.relay.start().await;
    println!("Watching notifications, press Ctrl-C to stop");

    let deadline = async {
        match duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Expired) => {
                    println!("Session expired, sign in again");
                    break;
                }
                Ok(SessionEvent::LoggedOut) => break,
                Ok(SessionEvent::LoggedIn { .. }) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            update = updates.recv() => match update {
                Ok(update) => print_update(&update),
                Err(RecvError::Lagged(skipped)) => warn!(skipped = skipped, "Dropped relay updates"),
                Err(RecvError::Closed) => break,
            },
            key = invalidated.recv() => match key {
                Ok(key) => debug!(key = %key, "Server data changed"),
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
        }
    }

    client.relay.stop().await;
    println!("Unread: {}", client.relay.unread_count().await);
    debug!(
        invalidations = client.cache.invalidation_count(),
        "Watch finished"
    );
    Ok(())
}

fn print_update(update: &RelayUpdate) {
    match update {
        RelayUpdate::Received(notification) => print_notification(notification),
        RelayUpdate::MarkedRead(id) => println!("  read      {}", id),
        RelayUpdate::AllMarkedRead => println!("  all notifications read"),
        RelayUpdate::Removed(id) => println!("  removed   {}", id),
        RelayUpdate::Loaded {
            count,
            unread_count,
        } => println!("Loaded {} notifications ({} unread)", count, unread_count),
        RelayUpdate::Cleared => println!("Notifications cleared"),
        RelayUpdate::Connection(true) => println!("Connected"),
        RelayUpdate::Connection(false) => println!("Disconnected"),
    }
}

fn print_notification(notification: &Notification) {
    let marker = if notification.is_read { " " } else { "*" };
    println!(
        "{} [{}] {} {:<8} {:<28} {}",
        marker,
        notification.id,
        notification.created_at.format("%Y-%m-%d %H:%M"),
        notification.priority,
        notification.notification_type,
        notification.title
    );
    if !notification.message.is_empty() {
        println!("      {}", notification.message);
    }
}

fn handle_config(
    config_path: &Path,
    show: bool,
    init: bool,
    validate: bool,
) -> anyhow::Result<()> {
    if init {
        if config_path.exists() {
            bail!("Configuration already exists at {:?}", config_path);
        }
        ClientConfig::default().save_to_file(config_path)?;
        println!("Configuration initialized at: {:?}", config_path);
    }

    if show {
        let config = ClientConfig::load(Some(config_path))?;
        println!("{}", toml::to_string_pretty(&config)?);
    }

    if validate {
        let config = ClientConfig::load(Some(config_path))?;
        config.validate()?;
        println!("Configuration is valid");
    }

    Ok(())
}
