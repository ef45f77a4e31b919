//! Core data types shared by the session, notification and transport layers

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use tracing::debug;

fn default_scope() -> String {
    "none".to_string()
}

/// Current-user record as returned by the auth service
///
/// Only the fields the client reasons about are typed; everything else the
/// server sends is preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "user_id")]
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role_name: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default = "default_scope", alias = "effective_scope")]
    pub scope: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl UserProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
            name: None,
            role_name: None,
            organization_name: None,
            permissions: Vec::new(),
            scope: default_scope(),
            extra: serde_json::Map::new(),
        }
    }

    /// Overlay the grants returned at login; grants the response omits keep the profile's own
    pub fn with_grants(mut self, permissions: Vec<String>, scope: Option<String>) -> Self {
        if !permissions.is_empty() {
            self.permissions = permissions;
        }
        if let Some(scope) = scope {
            self.scope = scope;
        }
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    /// Name to show in logs and prompts
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.email.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Login form input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Successful login payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

/// Bearer credential held by the credential store
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl Credential {
    /// Wrap a bearer token, reading its expiry from the JWT `exp` claim when present
    pub fn bearer(access_token: impl Into<String>) -> Self {
        let access_token = access_token.into();
        let expires_at = Self::jwt_expiry(&access_token);
        Self {
            access_token,
            token_type: default_token_type(),
            expires_at,
        }
    }

    pub fn from_login(response: &LoginResponse) -> Self {
        Self {
            token_type: response.token_type.clone(),
            ..Self::bearer(response.access_token.clone())
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Decode the `exp` claim without verifying the signature
    pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
        let payload = token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .ok()?;
        let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
        DateTime::from_timestamp(claim.exp?, 0)
    }

    /// A credential without a known expiry never expires locally
    pub fn is_expired_at(&self, now: DateTime<Utc>, leeway: Duration) -> bool {
        self.expires_at
            .map(|expires_at| expires_at <= now + leeway)
            .unwrap_or(false)
    }

    pub fn is_expired(&self, leeway: Duration) -> bool {
        self.is_expired_at(Utc::now(), leeway)
    }

    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Notification identifier; the server may send it as a string or an integer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for NotificationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Number(i64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(text) => Self(text),
            RawId::Number(number) => Self(number.to_string()),
        })
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NotificationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NotificationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<i64> for NotificationId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Notification category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    InitiativeAssigned,
    InitiativeApproved,
    InitiativeRejected,
    InitiativeStatusChanged,
    InitiativeSubmitted,
    InitiativeReviewed,
    InitiativeDeadlineApproaching,
    GoalAssigned,
    GoalApproved,
    GoalRejected,
    GoalProgressUpdated,
    GoalStatusChanged,
    GoalDeadlineApproaching,
    TaskAssigned,
    TaskSubmitted,
    TaskReviewed,
    TaskStatusChanged,
    TaskDeadlineApproaching,
    UserRoleChanged,
    UserStatusChanged,
    General,
    #[serde(other)]
    Unknown,
}

impl NotificationType {
    /// Resource whose cached data goes stale when this notification arrives
    pub fn resource(&self) -> Option<ResourceCategory> {
        use NotificationType::*;

        match self {
            InitiativeAssigned
            | InitiativeApproved
            | InitiativeRejected
            | InitiativeStatusChanged
            | InitiativeSubmitted
            | InitiativeReviewed
            | InitiativeDeadlineApproaching => Some(ResourceCategory::Initiatives),
            GoalAssigned
            | GoalApproved
            | GoalRejected
            | GoalProgressUpdated
            | GoalStatusChanged
            | GoalDeadlineApproaching => Some(ResourceCategory::Goals),
            TaskAssigned
            | TaskSubmitted
            | TaskReviewed
            | TaskStatusChanged
            | TaskDeadlineApproaching => Some(ResourceCategory::Tasks),
            UserRoleChanged | UserStatusChanged => Some(ResourceCategory::Users),
            General | Unknown => None,
        }
    }

    /// Cache keys to invalidate, generic notifications key first
    pub fn invalidation_keys(&self) -> Vec<QueryKey> {
        let mut keys = vec![QueryKey::notifications()];
        keys.extend(self.resource().map(|resource| resource.query_key()));
        keys
    }

    pub fn as_str(&self) -> &'static str {
        use NotificationType::*;

        match self {
            InitiativeAssigned => "INITIATIVE_ASSIGNED",
            InitiativeApproved => "INITIATIVE_APPROVED",
            InitiativeRejected => "INITIATIVE_REJECTED",
            InitiativeStatusChanged => "INITIATIVE_STATUS_CHANGED",
            InitiativeSubmitted => "INITIATIVE_SUBMITTED",
            InitiativeReviewed => "INITIATIVE_REVIEWED",
            InitiativeDeadlineApproaching => "INITIATIVE_DEADLINE_APPROACHING",
            GoalAssigned => "GOAL_ASSIGNED",
            GoalApproved => "GOAL_APPROVED",
            GoalRejected => "GOAL_REJECTED",
            GoalProgressUpdated => "GOAL_PROGRESS_UPDATED",
            GoalStatusChanged => "GOAL_STATUS_CHANGED",
            GoalDeadlineApproaching => "GOAL_DEADLINE_APPROACHING",
            TaskAssigned => "TASK_ASSIGNED",
            TaskSubmitted => "TASK_SUBMITTED",
            TaskReviewed => "TASK_REVIEWED",
            TaskStatusChanged => "TASK_STATUS_CHANGED",
            TaskDeadlineApproaching => "TASK_DEADLINE_APPROACHING",
            UserRoleChanged => "USER_ROLE_CHANGED",
            UserStatusChanged => "USER_STATUS_CHANGED",
            General => "GENERAL",
            Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let quoted = serde_json::Value::String(s.to_uppercase());
        match serde_json::from_value::<NotificationType>(quoted) {
            Ok(NotificationType::Unknown) | Err(_) => {
                Err(format!("Unknown notification type: {}", s))
            }
            Ok(kind) => Ok(kind),
        }
    }
}

/// Server resources that notifications can make stale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    Initiatives,
    Goals,
    Tasks,
    Users,
}

impl ResourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::Initiatives => "initiatives",
            ResourceCategory::Goals => "goals",
            ResourceCategory::Tasks => "tasks",
            ResourceCategory::Users => "users",
        }
    }

    pub fn query_key(&self) -> QueryKey {
        QueryKey::new(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Priority::Low => "LOW",
            Priority::Normal => "NORMAL",
            Priority::High => "HIGH",
            Priority::Urgent => "URGENT",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(Priority::Low),
            "NORMAL" => Ok(Priority::Normal),
            "HIGH" => Ok(Priority::High),
            "URGENT" => Ok(Priority::Urgent),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// Accepts RFC 3339 timestamps as well as the naive UTC form the backend emits
fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type", default = "default_notification_type")]
    pub notification_type: NotificationType,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub is_read: bool,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub action_url: Option<String>,
    #[serde(default)]
    pub triggered_by_name: Option<String>,
}

fn default_notification_type() -> NotificationType {
    NotificationType::General
}

impl Notification {
    pub fn new(
        id: impl Into<NotificationId>,
        title: impl Into<String>,
        notification_type: NotificationType,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            message: String::new(),
            notification_type,
            priority: Priority::Normal,
            is_read: false,
            created_at: Utc::now(),
            action_url: None,
            triggered_by_name: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn read(mut self) -> Self {
        self.is_read = true;
        self
    }

    /// Case-insensitive match against title and message
    pub fn matches_search(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        query.is_empty()
            || self.title.to_lowercase().contains(&query)
            || self.message.to_lowercase().contains(&query)
    }
}

/// Event pushed by the realtime channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    NewNotification { notification: Notification },
    MarkedRead { notification_id: NotificationId },
}

impl InboundEvent {
    /// Decode a channel frame; unrecognized tags and malformed payloads yield `None`
    pub fn from_json(text: &str) -> Option<Self> {
        match serde_json::from_str(text) {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(error = %e, "Ignoring unrecognized realtime frame");
                None
            }
        }
    }
}

/// Server-side filters for the notification list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationFilters {
    pub unread_only: bool,
    pub notification_type: Option<NotificationType>,
    pub priority: Option<Priority>,
    pub skip: Option<u32>,
    pub limit: Option<u32>,
}

impl NotificationFilters {
    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if self.unread_only {
            pairs.push(("unread_only", "true".to_string()));
        }
        if let Some(kind) = self.notification_type {
            pairs.push(("notification_type", kind.to_string()));
        }
        if let Some(priority) = self.priority {
            pairs.push(("priority", priority.to_string()));
        }
        if let Some(skip) = self.skip {
            pairs.push(("skip", skip.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationPage {
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub unread_count: u32,
}

/// Hierarchical cache key; a key invalidates every key it prefixes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new(root: impl Into<String>) -> Self {
        Self(vec![root.into()])
    }

    pub fn notifications() -> Self {
        Self::new("notifications")
    }

    pub fn with(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_prefix_of(&self, other: &QueryKey) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}
