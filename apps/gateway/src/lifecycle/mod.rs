//! Start/stop control over the two ways events reach the dispatcher.

pub mod http;
pub mod lambda;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

pub use http::HttpGateway;
pub use lambda::{Invocation, InvocationSource, LambdaGateway, LambdaRuntimeApi, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("gateway already started")]
    AlreadyStarted,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("listener failed: {0}")]
    Listener(#[from] std::io::Error),
}

impl LifecycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleError::AlreadyStarted => "already_started",
            LifecycleError::Runtime(_) => "runtime",
            LifecycleError::Listener(_) => "listener",
        }
    }
}

/// A delivery mechanism feeding the dispatcher.
///
/// `start` runs until the gateway stops and returns the loop's terminal
/// error, if any. `stop` may be called from another task; it returns once the
/// gateway has reached [`LifecycleState::Stopped`].
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn start(&self) -> Result<(), LifecycleError>;
    async fn stop(&self);
    fn state(&self) -> LifecycleState;
}

/// Shared state cell with change notification.
pub(crate) struct StateCell {
    tx: watch::Sender<LifecycleState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(LifecycleState::Idle);
        Self { tx }
    }

    pub(crate) fn get(&self) -> LifecycleState {
        *self.tx.borrow()
    }

    pub(crate) fn set(&self, state: LifecycleState) {
        self.tx.send_replace(state);
    }

    /// Moves `Idle` to `Running`; any other starting state is an error.
    pub(crate) fn begin(&self) -> Result<(), LifecycleError> {
        let mut started = false;
        self.tx.send_if_modified(|state| {
            if *state == LifecycleState::Idle {
                *state = LifecycleState::Running;
                started = true;
            }
            started
        });
        if started {
            Ok(())
        } else {
            Err(LifecycleError::AlreadyStarted)
        }
    }

    /// Requests a drain, or stops outright when nothing was started.
    pub(crate) fn request_stop(&self) {
        self.tx.send_if_modified(|state| match *state {
            LifecycleState::Idle => {
                *state = LifecycleState::Stopped;
                true
            }
            LifecycleState::Running => {
                *state = LifecycleState::Draining;
                true
            }
            _ => false,
        });
    }

    pub(crate) async fn wait_for(&self, wanted: LifecycleState) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only errors if dropped mid-wait.
        let _ = rx.wait_for(|state| *state == wanted).await;
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }
}
