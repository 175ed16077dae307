//! Platform signal plumbing.
//!
//! Hosts forward foreground/background transitions and connectivity
//! changes through one channel; [`spawn_signal_listener`] drains it into the
//! engine so there is a single global subscription point.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::FeedEngine;
use feedplay_core::{AppLifecycle, Connectivity};

/// A discrete signal delivered by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PlatformSignal {
    Lifecycle(AppLifecycle),
    Connectivity(Connectivity),
}

impl From<AppLifecycle> for PlatformSignal {
    fn from(state: AppLifecycle) -> Self {
        PlatformSignal::Lifecycle(state)
    }
}

impl From<Connectivity> for PlatformSignal {
    fn from(connectivity: Connectivity) -> Self {
        PlatformSignal::Connectivity(connectivity)
    }
}

/// Apply every signal received on `signals` to `engine` until the sending
/// side closes.
pub fn spawn_signal_listener(
    engine: FeedEngine,
    mut signals: mpsc::Receiver<PlatformSignal>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Platform signal listener started");
        while let Some(signal) = signals.recv().await {
            debug!(?signal, "Platform signal");
            engine.handle_signal(signal);
        }
        info!("Platform signal listener stopped (channel closed)");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_json_shape() {
        let json = serde_json::to_string(&PlatformSignal::Lifecycle(AppLifecycle::Background)).unwrap();
        assert_eq!(json, r#"{"kind":"lifecycle","value":"background"}"#);

        let parsed: PlatformSignal =
            serde_json::from_str(r#"{"kind":"connectivity","value":"unmetered"}"#).unwrap();
        assert_eq!(parsed, Connectivity::Unmetered.into());
    }
}
