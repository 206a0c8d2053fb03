//! Host Lifecycle Adapter
//!
//! Translates host signals (app visibility, network reachability) into
//! client calls:
//!
//! | Signal           | Effect                                              |
//! |------------------|-----------------------------------------------------|
//! | `Background`     | Heartbeat interval doubled, connection kept         |
//! | `Foreground`     | Normal heartbeat interval restored                  |
//! | `NetworkOffline` | Socket closed, reconnect intent kept                |
//! | `NetworkOnline`  | Immediate reconnect unless the client was closed    |
//!
//! Repeated signals are ignored, so hosts may forward raw platform
//! notifications without deduplicating them first.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::feed::StreamClient;

/// A host lifecycle notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleSignal {
    /// The host app became visible.
    Foreground,
    /// The host app was hidden.
    Background,
    /// Network reachability was restored.
    NetworkOnline,
    /// Network reachability was lost.
    NetworkOffline,
}

impl LifecycleSignal {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
            Self::NetworkOnline => "network_online",
            Self::NetworkOffline => "network_offline",
        }
    }
}

/// Applies lifecycle signals to one client.
pub struct LifecycleAdapter {
    client: StreamClient,
    foreground: bool,
    online: bool,
}

impl LifecycleAdapter {
    /// Adapter for `client`, assuming a visible app on a reachable network.
    #[must_use]
    pub const fn new(client: StreamClient) -> Self {
        Self {
            client,
            foreground: true,
            online: true,
        }
    }

    /// Apply one signal. Returns `false` when it repeated the current state.
    pub fn apply(&mut self, signal: LifecycleSignal) -> bool {
        let changed = match signal {
            LifecycleSignal::Foreground => !std::mem::replace(&mut self.foreground, true),
            LifecycleSignal::Background => std::mem::replace(&mut self.foreground, false),
            LifecycleSignal::NetworkOnline => !std::mem::replace(&mut self.online, true),
            LifecycleSignal::NetworkOffline => std::mem::replace(&mut self.online, false),
        };

        if !changed {
            tracing::trace!(signal = signal.as_str(), "Ignoring repeated lifecycle signal");
            return false;
        }

        tracing::debug!(signal = signal.as_str(), "Lifecycle signal");
        match signal {
            LifecycleSignal::Foreground => self.client.enter_foreground(),
            LifecycleSignal::Background => self.client.enter_background(),
            LifecycleSignal::NetworkOnline => self.client.network_online(),
            LifecycleSignal::NetworkOffline => self.client.network_offline(),
        }
        true
    }

    /// Consume signals from `rx` until cancelled or the sender is dropped.
    pub async fn run(mut self, mut rx: mpsc::Receiver<LifecycleSignal>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                signal = rx.recv() => match signal {
                    Some(signal) => {
                        self.apply(signal);
                    }
                    None => break,
                },
            }
        }
        tracing::debug!("Lifecycle adapter stopped");
    }
}
