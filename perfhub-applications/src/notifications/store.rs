//! Local notification state
//!
//! Newest-first list plus the unread counter. All mutations are local and
//! optimistic; none of them can fail.

use perfhub_core::{Notification, NotificationId};
use std::collections::VecDeque;

#[derive(Debug, Clone, Default)]
pub struct NotificationStore {
    notifications: VecDeque<Notification>,
    unread_count: u32,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.notifications.iter()
    }

    /// Owned copy of the list, newest first
    pub fn to_vec(&self) -> Vec<Notification> {
        self.notifications.iter().cloned().collect()
    }

    pub fn get(&self, id: &NotificationId) -> Option<&Notification> {
        self.notifications.iter().find(|n| &n.id == id)
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn unread_count(&self) -> u32 {
        self.unread_count
    }

    /// Prepend a notification, counting it when unread
    pub fn add(&mut self, notification: Notification) {
        if !notification.is_read {
            self.unread_count = self.unread_count.saturating_add(1);
        }
        self.notifications.push_front(notification);
    }

    /// Mark one entry read; returns whether an unread entry flipped
    pub fn mark_as_read(&mut self, id: &NotificationId) -> bool {
        match self
            .notifications
            .iter_mut()
            .find(|n| &n.id == id && !n.is_read)
        {
            Some(notification) => {
                notification.is_read = true;
                self.unread_count = self.unread_count.saturating_sub(1);
                true
            }
            None => false,
        }
    }

    /// Mark everything read; returns how many entries flipped
    pub fn mark_all_as_read(&mut self) -> usize {
        let mut flipped = 0;
        for notification in self.notifications.iter_mut().filter(|n| !n.is_read) {
            notification.is_read = true;
            flipped += 1;
        }
        self.unread_count = 0;
        flipped
    }

    /// Remove an entry; the counter only moves when it was unread
    pub fn remove(&mut self, id: &NotificationId) -> Option<Notification> {
        let index = self.notifications.iter().position(|n| &n.id == id)?;
        let removed = self.notifications.remove(index)?;
        if !removed.is_read {
            self.unread_count = self.unread_count.saturating_sub(1);
        }
        Some(removed)
    }

    /// Replace the list with a server page; the server's total seeds the counter
    pub fn set_initial(&mut self, notifications: Vec<Notification>, unread_count: u32) {
        self.notifications = notifications.into();
        self.unread_count = unread_count;
    }

    pub fn clear(&mut self) {
        self.notifications.clear();
        self.unread_count = 0;
    }

    /// Case-insensitive title/message search, newest first
    pub fn search(&self, query: &str) -> Vec<Notification> {
        self.notifications
            .iter()
            .filter(|n| n.matches_search(query))
            .cloned()
            .collect()
    }
}
