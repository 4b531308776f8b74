//! Server-side sync preferences.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::info;

use crate::session::SessionEvent;

/// Whether the scheduler commits and updates on its own.
///
/// Changing a preference publishes [`SessionEvent::PreferencesChanged`];
/// setting a value it already has does not.
#[derive(Debug)]
pub struct ServerPreferences {
    auto_commit: AtomicBool,
    auto_update: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl ServerPreferences {
    pub fn new(
        auto_commit: bool,
        auto_update: bool,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            auto_commit: AtomicBool::new(auto_commit),
            auto_update: AtomicBool::new(auto_update),
            events,
        }
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit.load(Ordering::SeqCst)
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update.load(Ordering::SeqCst)
    }

    /// Whether periodic ticks have anything to do.
    pub fn any_enabled(&self) -> bool {
        self.auto_commit() || self.auto_update()
    }

    pub fn set_auto_commit(&self, enabled: bool) {
        if self.auto_commit.swap(enabled, Ordering::SeqCst) != enabled {
            info!("Auto-commit {}", if enabled { "enabled" } else { "disabled" });
            self.publish();
        }
    }

    pub fn set_auto_update(&self, enabled: bool) {
        if self.auto_update.swap(enabled, Ordering::SeqCst) != enabled {
            info!("Auto-update {}", if enabled { "enabled" } else { "disabled" });
            self.publish();
        }
    }

    fn publish(&self) {
        // No subscribers is fine.
        let _ = self.events.send(SessionEvent::PreferencesChanged {
            auto_commit: self.auto_commit(),
            auto_update: self.auto_update(),
        });
    }
}
