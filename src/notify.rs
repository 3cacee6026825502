//! Ephemeral user-facing notifications.
//!
//! Each notification with a duration owns one cancellable timer; dismissing
//! it early cancels the timer so nothing fires against a removed entry.
//! Timers are independent of the task that raised the notification.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type NotificationId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

/// Zero-argument follow-up effect attached to a notification.
pub type ActionEffect = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
pub struct NotificationAction {
    pub label: String,
    effect: ActionEffect,
}

impl NotificationAction {
    pub fn new(label: impl Into<String>, effect: ActionEffect) -> Self {
        Self {
            label: label.into(),
            effect,
        }
    }
}

impl std::fmt::Debug for NotificationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationAction")
            .field("label", &self.label)
            .finish()
    }
}

/// Read-only view handed to renderers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    pub message: String,
    pub severity: Severity,
    /// `None` for notifications that stay until dismissed.
    pub duration: Option<Duration>,
    pub actions: Vec<String>,
}

struct Entry {
    view: Notification,
    actions: Vec<NotificationAction>,
    timer: Option<CancellationToken>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
}

#[derive(Clone, Default)]
pub struct NotificationSink {
    inner: Arc<Mutex<Inner>>,
    next_id: Arc<AtomicU64>,
}

impl NotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Show a notification. With a duration, an expiry timer is spawned on
    /// the current tokio runtime.
    pub fn show(
        &self,
        message: impl Into<String>,
        severity: Severity,
        duration: Option<Duration>,
        actions: Vec<NotificationAction>,
    ) -> NotificationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let view = Notification {
            id,
            message: message.into(),
            severity,
            duration,
            actions: actions.iter().map(|a| a.label.clone()).collect(),
        };
        tracing::debug!("notification {} ({:?}): {}", id, severity, view.message);

        let timer = duration.map(|_| CancellationToken::new());
        self.lock().entries.push(Entry {
            view,
            actions,
            timer: timer.clone(),
        });

        // Spawned after the entry is visible so expiry can never run first.
        if let (Some(after), Some(token)) = (duration, timer) {
            let sink = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(after) => sink.expire(id),
                    _ = token.cancelled() => {}
                }
            });
        }
        id
    }

    pub fn info(&self, message: impl Into<String>, duration: Duration) -> NotificationId {
        self.show(message, Severity::Info, Some(duration), Vec::new())
    }

    pub fn error(&self, message: impl Into<String>, duration: Duration) -> NotificationId {
        self.show(message, Severity::Error, Some(duration), Vec::new())
    }

    /// Dismiss early. Returns false if the notification is already gone.
    pub fn dismiss(&self, id: NotificationId) -> bool {
        let entry = {
            let mut inner = self.lock();
            match inner.entries.iter().position(|e| e.view.id == id) {
                Some(index) => inner.entries.remove(index),
                None => return false,
            }
        };
        if let Some(timer) = entry.timer {
            timer.cancel();
        }
        true
    }

    fn expire(&self, id: NotificationId) {
        let mut inner = self.lock();
        inner.entries.retain(|e| e.view.id != id);
    }

    /// Current notifications in insertion order.
    pub fn list(&self) -> Vec<Notification> {
        self.lock().entries.iter().map(|e| e.view.clone()).collect()
    }

    /// Run the follow-up action at `index` of notification `id`.
    /// Returns false when there is no such notification or action.
    pub async fn trigger(&self, id: NotificationId, index: usize) -> bool {
        let effect = {
            let inner = self.lock();
            inner
                .entries
                .iter()
                .find(|e| e.view.id == id)
                .and_then(|e| e.actions.get(index))
                .map(|a| a.effect.clone())
        };
        match effect {
            Some(effect) => {
                effect().await;
                true
            }
            None => false,
        }
    }
}
