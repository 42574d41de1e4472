//! Notifications for downstream listeners.
//!
//! Tasks never call listeners directly. They emit typed notifications on a
//! feed; thumbnail generation, catalogue-record refresh and UI layers
//! subscribe and react on their own schedule.
//!
//! ```rust,ignore
//! let feed = NotificationFeed::new();
//! let rx = feed.subscribe();
//!
//! std::thread::spawn(move || {
//!     while let Ok(notification) = rx.recv() {
//!         println!("{}: {}", notification.kind(), notification.resource());
//!     }
//! });
//! ```

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

use crate::model::Resource;

/// A notification emitted by a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// An upload finished finalization.
    UploadComplete {
        /// The finalized resource.
        resource: Resource,
    },
    /// The resource's thumbnail should be regenerated.
    ThumbnailNeedsUpdate {
        /// The resource.
        resource: Resource,
        /// Fields that changed.
        changed_fields: Vec<String>,
    },
    /// A post-save reconciliation pass finished.
    PostSaveComplete {
        /// The reconciled resource.
        resource: Resource,
        /// Fields that changed.
        changed_fields: Vec<String>,
    },
}

impl Notification {
    /// Creates a thumbnail refresh notification for `thumbnail_url`.
    pub fn thumbnail_needs_update(resource: Resource) -> Self {
        Self::ThumbnailNeedsUpdate {
            resource,
            changed_fields: vec!["thumbnail_url".into()],
        }
    }

    /// Creates a post-save notification for `thumbnail_url`.
    pub fn post_save_complete(resource: Resource) -> Self {
        Self::PostSaveComplete {
            resource,
            changed_fields: vec!["thumbnail_url".into()],
        }
    }

    /// The resource the notification is about.
    pub fn resource(&self) -> &Resource {
        match self {
            Notification::UploadComplete { resource }
            | Notification::ThumbnailNeedsUpdate { resource, .. }
            | Notification::PostSaveComplete { resource, .. } => resource,
        }
    }

    /// Short name of the notification kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::UploadComplete { .. } => "upload_complete",
            Notification::ThumbnailNeedsUpdate { .. } => "thumbnail_needs_update",
            Notification::PostSaveComplete { .. } => "post_save_complete",
        }
    }
}

/// Fans notifications out to subscribers and keeps a bounded history.
pub struct NotificationFeed {
    subscribers: RwLock<Vec<Sender<Notification>>>,
    history: RwLock<Vec<(u64, Notification)>>,
    next_sequence: AtomicU64,
    max_history: usize,
}

impl NotificationFeed {
    /// Creates a new feed.
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            next_sequence: AtomicU64::new(1),
            max_history,
        }
    }

    /// Subscribes to all future notifications.
    pub fn subscribe(&self) -> Receiver<Notification> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a notification to every live subscriber.
    ///
    /// Returns the notification's sequence number.
    pub fn emit(&self, notification: Notification) -> u64 {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            sequence,
            kind = notification.kind(),
            resource_id = %notification.resource().id,
            "emitting notification"
        );

        {
            let mut history = self.history.write();
            history.push((sequence, notification.clone()));
            if history.len() > self.max_history {
                let to_remove = history.len() - self.max_history;
                history.drain(0..to_remove);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(notification.clone()).is_ok());
        sequence
    }

    /// Returns notifications with sequence > cursor, up to limit.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<(u64, Notification)> {
        self.history
            .read()
            .iter()
            .filter(|(seq, _)| *seq > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns every retained notification, oldest first.
    pub fn history(&self) -> Vec<Notification> {
        self.history.read().iter().map(|(_, n)| n.clone()).collect()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for NotificationFeed {
    fn default() -> Self {
        Self::new()
    }
}
