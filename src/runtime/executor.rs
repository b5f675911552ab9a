//! Session runtime executor

use super::traits::{HookDecision, PreTransitionHook, Storage};
use super::{EngineError, Registry, SessionRequest};

use crate::cleaner::FieldCleaner;
use crate::screen::ScreenTree;
use crate::state_machine::{
    transition, Effect, Event, NavContext, NewSession, Notification, Reply, SessionState,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};

/// Single writer for one transaction id
///
/// Requests are served strictly one at a time: hook, transition, effect
/// application and reply all finish before the next request is taken.
pub struct SessionRuntime<S>
where
    S: Storage + 'static,
{
    transaction_id: String,
    tree: Arc<ScreenTree>,
    cleaner: Arc<dyn FieldCleaner>,
    hook: Arc<dyn PreTransitionHook>,
    storage: S,
    /// Loaded from storage on the first request
    state: Option<SessionState>,
    request_rx: mpsc::Receiver<SessionRequest>,
    notify_tx: broadcast::Sender<Notification>,
    registry: Registry,
    writer: Arc<Mutex<()>>,
    idle_timeout: Duration,
}

impl<S> SessionRuntime<S>
where
    S: Storage + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transaction_id: String,
        tree: Arc<ScreenTree>,
        cleaner: Arc<dyn FieldCleaner>,
        hook: Arc<dyn PreTransitionHook>,
        storage: S,
        request_rx: mpsc::Receiver<SessionRequest>,
        notify_tx: broadcast::Sender<Notification>,
        registry: Registry,
        writer: Arc<Mutex<()>>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            transaction_id,
            tree,
            cleaner,
            hook,
            storage,
            state: None,
            request_rx,
            notify_tx,
            registry,
            writer,
            idle_timeout,
        }
    }

    pub async fn run(mut self) {
        // Wait out a predecessor that is still draining its queue
        let _writer = Arc::clone(&self.writer).lock_owned().await;
        tracing::debug!(transaction_id = %self.transaction_id, "Starting session runtime");

        loop {
            match tokio::time::timeout(self.idle_timeout, self.request_rx.recv()).await {
                Ok(Some(request)) => {
                    self.serve(request).await;
                    if self.is_completed() {
                        break;
                    }
                }
                // Manager dropped every sender
                Ok(None) => return,
                Err(_) => {
                    tracing::debug!(transaction_id = %self.transaction_id, "Session runtime idle");
                    break;
                }
            }
        }

        self.retire().await;
    }

    /// Deregister, serving whatever was queued before the channel closed.
    ///
    /// The drain runs outside the registry lock. A successor spawned for this
    /// id meanwhile blocks on the writer lock, which `run` still holds.
    async fn retire(mut self) {
        self.request_rx.close();
        while let Some(request) = self.request_rx.recv().await {
            self.serve(request).await;
        }

        let mut runtimes = self.registry.write().await;
        // Leave a successor's handle alone
        if runtimes
            .get(&self.transaction_id)
            .is_some_and(|handle| handle.request_tx.is_closed())
        {
            runtimes.remove(&self.transaction_id);
        }
        drop(runtimes);

        tracing::debug!(transaction_id = %self.transaction_id, "Session runtime stopped");
    }

    fn is_completed(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.session.completed)
    }

    async fn serve(&mut self, request: SessionRequest) {
        let SessionRequest {
            session,
            raw,
            reply_tx,
        } = request;

        let result = self.process(&session, raw).await;
        if let Err(e) = &result {
            tracing::error!(transaction_id = %self.transaction_id, error = %e, "Failed to process request");
        }
        let _ = reply_tx.send(result);
    }

    async fn process(&mut self, new: &NewSession, raw: String) -> Result<Reply, EngineError> {
        let state = match &self.state {
            Some(state) => state.clone(),
            None => self.load(new).await?,
        };

        let event = self.event_for(&state, raw).await;
        let ctx = NavContext::new(&self.tree, self.cleaner.as_ref());
        let result = transition(&ctx, &state, event)?;

        if let Err(e) = self.apply(state.session.id, &result.effects).await {
            // Part of the effects may have landed; reload on the next request
            self.state = None;
            return Err(e);
        }

        for notification in result.notifications() {
            // No subscribers is fine
            let _ = self.notify_tx.send(notification.clone());
        }

        tracing::info!(
            transaction_id = %self.transaction_id,
            action = %result.reply.action,
            depth = result.new_state.history.len(),
            "Request served"
        );
        self.state = Some(result.new_state);
        Ok(result.reply)
    }

    async fn load(&self, new: &NewSession) -> Result<SessionState, EngineError> {
        let session = self
            .storage
            .get_or_create(new)
            .await
            .map_err(EngineError::Storage)?;
        let history = self
            .storage
            .history(session.id)
            .await
            .map_err(EngineError::Storage)?;
        let submissions = self
            .storage
            .submissions(session.id)
            .await
            .map_err(EngineError::Storage)?;

        tracing::debug!(
            transaction_id = %self.transaction_id,
            depth = history.len(),
            completed = session.completed,
            "Loaded session"
        );
        Ok(SessionState {
            session,
            history,
            submissions,
        })
    }

    /// Consult the hook unless this is the first request or the session is over
    async fn event_for(&self, state: &SessionState, raw: String) -> Event {
        let at = Utc::now();
        let Some(current) = state.current() else {
            return Event::Input { raw, at };
        };
        if state.session.completed {
            return Event::Input { raw, at };
        }

        match self
            .hook
            .before_transition(current, &raw, &state.session)
            .await
        {
            HookDecision::Proceed => Event::Input { raw, at },
            HookDecision::Redirect(target) => {
                tracing::info!(transaction_id = %self.transaction_id, screen = %target, "Hook redirected request");
                Event::Redirect { target, raw, at }
            }
        }
    }

    async fn apply(&self, session_id: i64, effects: &[Effect]) -> Result<(), EngineError> {
        for effect in effects {
            let applied = match effect {
                Effect::RecordResponse { raw } => {
                    self.storage.record_response(session_id, raw).await
                }
                Effect::AppendHistory { entry } => {
                    self.storage.append_history(session_id, entry).await
                }
                Effect::PopHistory => self.storage.pop_history(session_id).await.map(|_| ()),
                Effect::OpenSubmission { ordinal, form } => {
                    self.storage
                        .open_submission(session_id, *ordinal, form)
                        .await
                }
                Effect::UpsertValue { ordinal, value } => {
                    self.storage.upsert_value(session_id, *ordinal, value).await
                }
                Effect::FinalizeSubmission { ordinal, outcome } => {
                    self.storage
                        .finalize_submission(session_id, *ordinal, *outcome)
                        .await
                }
                Effect::CompleteSession => self.storage.mark_completed(session_id).await,
                // Published once everything else is stored
                Effect::Notify(_) => Ok(()),
            };
            applied.map_err(EngineError::Storage)?;
        }
        Ok(())
    }
}
