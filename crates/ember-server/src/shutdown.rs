//! Relay shutdown: one token stops the listener, the dispatcher and every
//! session; the relay's own tasks then get a grace period.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Grace period for the listener and dispatcher after the token fires.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

/// The long-running tasks a started relay owns.
pub struct RelayTasks {
    /// `axum::serve` accept loop.
    pub listener: JoinHandle<()>,
    /// `Relay::run` event loop.
    pub dispatcher: JoinHandle<()>,
}

/// Shutdown signal shared by the listener, the dispatcher and every session.
///
/// Sessions end their read loop when the token fires. The dispatcher marks
/// every client closed, so later sends are dropped.
#[derive(Default)]
pub struct RelayShutdown {
    token: CancellationToken,
}

impl RelayShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// New upgrades are refused once this is true.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Fire the token and wait up to `grace` for the relay's tasks.
    ///
    /// A task still running after the grace period is aborted, and whatever
    /// it still had queued for clients is lost.
    pub async fn drain(&self, tasks: RelayTasks, grace: Option<Duration>) {
        let grace = grace.unwrap_or(DEFAULT_GRACE);
        self.trigger();
        info!(
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "draining relay tasks"
        );

        let RelayTasks {
            listener,
            dispatcher,
        } = tasks;
        let listener_abort = listener.abort_handle();
        let dispatcher_abort = dispatcher.abort_handle();

        let joined = tokio::time::timeout(grace, async {
            let _ = tokio::join!(listener, dispatcher);
        })
        .await;

        if joined.is_err() {
            warn!(
                listener_done = listener_abort.is_finished(),
                dispatcher_done = dispatcher_abort.is_finished(),
                "grace period of {grace:?} elapsed, aborting"
            );
            listener_abort.abort();
            dispatcher_abort.abort();
        }
    }
}
