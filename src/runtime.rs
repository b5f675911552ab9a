//! Runtime for serving sessions
//!
//! One [`SessionRuntime`] task per live transaction id keeps transitions for
//! that id strictly sequential; different ids run in parallel.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::cleaner::FieldCleaner;
use crate::screen::ScreenTree;
use crate::state_machine::{NewSession, Notification, Reply, TransitionError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};

/// Type alias for production manager with concrete storage
pub type ProductionManager = RuntimeManager<DatabaseStorage>;

const REQUEST_QUEUE: usize = 8;
const NOTIFICATION_BUFFER: usize = 256;
/// A runtime can retire between lookup and send; retry with a fresh one
const SEND_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("Session runtime for {0} is unavailable")]
    RuntimeGone(String),
}

/// One inbound request queued for a session runtime
pub struct SessionRequest {
    pub session: NewSession,
    pub raw: String,
    pub reply_tx: oneshot::Sender<Result<Reply, EngineError>>,
}

/// Handle to interact with a running session
pub struct SessionHandle {
    pub request_tx: mpsc::Sender<SessionRequest>,
    /// Held by whichever runtime currently owns the session
    pub writer: Arc<Mutex<()>>,
}

pub(crate) type Registry = Arc<RwLock<HashMap<String, SessionHandle>>>;

/// Manager for all session runtimes
pub struct RuntimeManager<S>
where
    S: Storage + Clone + 'static,
{
    tree: Arc<ScreenTree>,
    cleaner: Arc<dyn FieldCleaner>,
    hook: Arc<dyn PreTransitionHook>,
    storage: S,
    runtimes: Registry,
    notify_tx: broadcast::Sender<Notification>,
    idle_timeout: Duration,
}

impl<S> RuntimeManager<S>
where
    S: Storage + Clone + 'static,
{
    pub fn new(
        tree: Arc<ScreenTree>,
        cleaner: Arc<dyn FieldCleaner>,
        hook: Arc<dyn PreTransitionHook>,
        storage: S,
        idle_timeout: Duration,
    ) -> Self {
        let (notify_tx, _) = broadcast::channel(NOTIFICATION_BUFFER);
        Self {
            tree,
            cleaner,
            hook,
            storage,
            runtimes: Arc::new(RwLock::new(HashMap::new())),
            notify_tx,
            idle_timeout,
        }
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    #[allow(dead_code)] // API completeness
    pub fn tree(&self) -> &ScreenTree {
        &self.tree
    }

    /// Subscribe to completion notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notify_tx.subscribe()
    }

    /// Number of resident session runtimes
    #[allow(dead_code)] // Used by tests
    pub async fn active_sessions(&self) -> usize {
        self.runtimes.read().await.len()
    }

    /// Run one raw input through the session's runtime and wait for the reply
    pub async fn handle_input(
        &self,
        session: NewSession,
        raw: String,
    ) -> Result<Reply, EngineError> {
        let transaction_id = session.transaction_id.clone();
        let (reply_tx, reply_rx) = oneshot::channel();
        let mut request = SessionRequest {
            session,
            raw,
            reply_tx,
        };

        for _ in 0..SEND_ATTEMPTS {
            let request_tx = self.get_or_create(&transaction_id).await;
            match request_tx.send(request).await {
                Ok(()) => {
                    return match reply_rx.await {
                        Ok(result) => result,
                        Err(_) => Err(EngineError::RuntimeGone(transaction_id)),
                    };
                }
                Err(mpsc::error::SendError(returned)) => {
                    tracing::debug!(transaction_id = %transaction_id, "Session runtime retired, respawning");
                    request = returned;
                }
            }
        }

        Err(EngineError::RuntimeGone(transaction_id))
    }

    async fn get_or_create(&self, transaction_id: &str) -> mpsc::Sender<SessionRequest> {
        {
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(transaction_id) {
                if !handle.request_tx.is_closed() {
                    return handle.request_tx.clone();
                }
            }
        }

        let mut runtimes = self.runtimes.write().await;
        // Another request may have won the race for the write lock
        if let Some(handle) = runtimes.get(transaction_id) {
            if !handle.request_tx.is_closed() {
                return handle.request_tx.clone();
            }
        }

        // A closed handle may still be draining; its successor waits on the same writer
        let writer = runtimes
            .get(transaction_id)
            .map_or_else(|| Arc::new(Mutex::new(())), |h| Arc::clone(&h.writer));
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);
        let runtime = SessionRuntime::new(
            transaction_id.to_string(),
            Arc::clone(&self.tree),
            Arc::clone(&self.cleaner),
            Arc::clone(&self.hook),
            self.storage.clone(),
            request_rx,
            self.notify_tx.clone(),
            Arc::clone(&self.runtimes),
            Arc::clone(&writer),
            self.idle_timeout,
        );
        runtimes.insert(
            transaction_id.to_string(),
            SessionHandle {
                request_tx: request_tx.clone(),
                writer,
            },
        );
        drop(runtimes);

        tokio::spawn(runtime.run());
        request_tx
    }
}
