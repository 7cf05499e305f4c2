// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connectivity signal.
//!
//! The platform layer pushes reachability changes in with
//! [`Connectivity::set_online`]; the engine's background tasks watch the
//! channel and replay the offline queue on every offline → online edge.

use tokio::sync::watch;
use tracing::info;

#[derive(Debug)]
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (tx, _) = watch::channel(initially_online);
        Self { tx }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// Publish reachability. Returns true if this was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "Connectivity changed");
            crate::metrics::set_online(online);
        }
        changed
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}
