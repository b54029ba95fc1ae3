//! The sync orchestrator: the engine's public entry points.
//!
//! The orchestrator wires the reconciler, the backfill engine, the gap
//! tracker and the send pipeline together, and owns the response handling
//! for every remote mutation.
//!
//! # Sync cycle
//!
//! ```text
//! list_conversations ──> reconcile ──> apply {add, update, delete}
//!                                            |
//!            backfill_many (capped, most recently updated first)
//! ```
//!
//! A cycle only reports success if the reconciliation writes and every
//! triggered backfill succeeded. Nothing already applied is rolled back,
//! and running the cycle again is safe.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use threadline_core::{
    reconcile, reconcile_single, CallRateLimiter, ConversationId, ConversationMeta,
    ConversationRecord, DeliveryStatus, EventId, IncomingEvent, MessageId, MessagePart,
    MessageRecord, MessageStatusRecord, ParticipantRecord, ProfileId, RemoteEvent,
};
use threadline_store::{LocalStore, PageApplied, PersistenceGateway, ReconcileApplied, StoreError};
use threadline_sync::{
    BackfillEngine, BackfillReport, BackfillSummary, GapCheck, MissingEventTracker,
    NewConversation, RemoteService, SyncError,
};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::send::{AttachmentInput, SendOutcome, SendPipeline};
use crate::session::Session;

/// Outcome of a sync cycle.
#[derive(Debug, Default)]
pub struct SyncReport {
    /// All three reconciliation sets were written.
    pub reconciled: bool,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub backfilled: Vec<BackfillReport>,
    pub failed: Vec<(ConversationId, SyncError)>,
    /// Over the per-cycle cap; picked up by a later cycle.
    pub deferred: Vec<ConversationId>,
    pub store_failures: Vec<StoreError>,
}

impl SyncReport {
    fn new(applied: ReconcileApplied, backfill: BackfillSummary) -> Self {
        Self {
            reconciled: applied.is_success(),
            added: applied.added,
            updated: applied.updated,
            deleted: applied.deleted,
            backfilled: backfill.completed,
            failed: backfill.failed,
            deferred: backfill.deferred,
            store_failures: applied.failures,
        }
    }

    pub fn success(&self) -> bool {
        self.reconciled && self.failed.is_empty()
    }

    /// The report itself, or the first thing that went wrong.
    pub fn into_result(mut self) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        if !self.store_failures.is_empty() {
            return Err(EngineError::Store(self.store_failures.remove(0)));
        }
        Err(EngineError::PartialSync {
            failed: self.failed.into_iter().map(|(id, _)| id).collect(),
        })
    }
}

/// What handling one pushed event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncomingOutcome {
    ConversationStored,
    ConversationDeleted,
    /// The event was contiguous with the store and applied directly.
    Applied(PageApplied),
    /// A background backfill was started. `to` is `None` for a full one.
    BackfillScheduled { from: EventId, to: Option<EventId> },
    /// The rate limiter refused the backfill; a later sync catches up.
    Throttled,
}

/// Background backfills drained by [`SyncOrchestrator::wait_for_background`].
#[derive(Debug, Default)]
pub struct BackgroundReport {
    pub completed: Vec<BackfillReport>,
    pub failed: Vec<(ConversationId, SyncError)>,
}

#[derive(Debug, Clone, Copy)]
enum BackfillJob {
    Full,
    Range { from: EventId, to: EventId },
}

type BackgroundTask = (ConversationId, threadline_sync::Result<BackfillReport>);

/// The sync engine.
pub struct SyncOrchestrator<R: RemoteService, S: LocalStore> {
    remote: Arc<R>,
    gateway: Arc<PersistenceGateway<S>>,
    backfill: BackfillEngine<R, S>,
    sender: SendPipeline<R, S>,
    tracker: MissingEventTracker,
    limiter: Mutex<CallRateLimiter>,
    background: Mutex<JoinSet<BackgroundTask>>,
    session: Session,
    config: EngineConfig,
}

impl<R, S> SyncOrchestrator<R, S>
where
    R: RemoteService + 'static,
    S: LocalStore + 'static,
{
    pub fn new(remote: Arc<R>, store: Arc<S>, session: Session, config: EngineConfig) -> Self {
        let gateway = Arc::new(PersistenceGateway::new(store));
        let backfill = BackfillEngine::new(
            Arc::clone(&remote),
            Arc::clone(&gateway),
            config.backfill.clone(),
        );
        let sender = SendPipeline::new(
            Arc::clone(&remote),
            Arc::clone(&gateway),
            config.send.clone(),
        );
        Self {
            remote,
            gateway,
            backfill,
            sender,
            tracker: MissingEventTracker::new(),
            limiter: Mutex::new(CallRateLimiter::new(config.rate_limit.clone())),
            background: Mutex::new(JoinSet::new()),
            session,
            config,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gateway(&self) -> &PersistenceGateway<S> {
        &self.gateway
    }

    pub fn store(&self) -> &S {
        self.gateway.store()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Reconcile every conversation against the remote list, then backfill.
    ///
    /// Besides the reconciled adds and updates, local conversations that
    /// are still uninitialized or behind the remote (left over from a capped
    /// or failed earlier cycle) are backfilled too.
    pub async fn synchronize_all(&self) -> Result<SyncReport> {
        self.session.ensure_active()?;

        let remote = self
            .remote
            .list_conversations()
            .await
            .into_result("list_conversations")?;
        let local = self.store().list_conversations().await?;

        let reconciliation = reconcile(&remote, &local);
        info!(
            add = reconciliation.to_add.len(),
            update = reconciliation.to_update.len(),
            delete = reconciliation.to_delete.len(),
            "reconciled conversations"
        );
        let applied = self.gateway.apply_reconciliation(&reconciliation).await;
        if applied.delete_ok {
            for id in &reconciliation.to_delete {
                self.tracker.forget(id).await;
            }
        }

        let deleted: BTreeSet<&ConversationId> = reconciliation.to_delete.iter().collect();
        let mut candidates = Vec::new();
        if applied.add_ok {
            candidates.extend(reconciliation.to_add.iter().cloned());
        }
        if applied.update_ok {
            candidates.extend(reconciliation.to_update.iter().cloned());
        }
        candidates.extend(
            local
                .into_iter()
                .filter(|r| !deleted.contains(&r.id))
                .filter(|r| !r.is_initialized() || r.is_behind_remote()),
        );

        let summary = self.backfill.backfill_many(candidates).await;
        let report = SyncReport::new(applied, summary);
        if !report.success() {
            warn!(
                failed = report.failed.len(),
                reconciled = report.reconciled,
                "sync cycle incomplete"
            );
        }
        Ok(report)
    }

    /// Sync one conversation, asking the remote only for its latest event.
    pub async fn synchronize_conversation(&self, id: &ConversationId) -> Result<SyncReport> {
        self.session.ensure_active()?;

        let local = match self.store().get_conversation(id).await? {
            Some(record) => record,
            None => self.fetch_conversation(id).await?,
        };
        let latest = self
            .remote
            .query_events(id, None, 1)
            .await
            .into_result("query_events")?;
        let remote_latest = latest
            .first()
            .map(|e| e.event_id)
            .unwrap_or(EventId::UNKNOWN);

        let reconciliation = reconcile_single(remote_latest, &local);
        let applied = self.gateway.apply_reconciliation(&reconciliation).await;

        let mut candidates = Vec::new();
        if applied.update_ok {
            candidates.extend(reconciliation.to_update.iter().cloned());
        }
        if candidates.is_empty() && (!local.is_initialized() || local.is_behind_remote()) {
            candidates.push(local);
        }
        let summary = self.backfill.backfill_many(candidates).await;
        Ok(SyncReport::new(applied, summary))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Push stream
    // ─────────────────────────────────────────────────────────────────────────

    /// Handle one event from the live push stream.
    pub async fn handle_incoming(&self, event: IncomingEvent) -> Result<IncomingOutcome> {
        self.session.ensure_active()?;

        match event {
            IncomingEvent::ConversationCreated(summary)
            | IncomingEvent::ConversationUpdated(summary) => {
                let stored = self
                    .gateway
                    .merge_conversation(&ConversationRecord::from_summary(&summary))
                    .await?;
                if !stored.is_initialized() || stored.is_behind_remote() {
                    return Ok(self.schedule(&stored.id, BackfillJob::Full).await);
                }
                Ok(IncomingOutcome::ConversationStored)
            }
            IncomingEvent::ConversationDeleted(id) => {
                self.gateway.delete_conversations(std::slice::from_ref(&id)).await?;
                self.tracker.forget(&id).await;
                Ok(IncomingOutcome::ConversationDeleted)
            }
            IncomingEvent::Timeline(event) => self.handle_timeline(event).await,
        }
    }

    async fn handle_timeline(&self, event: RemoteEvent) -> Result<IncomingOutcome> {
        let id = event.conversation_id.clone();
        let stored = match self.store().get_conversation(&id).await? {
            Some(record) => record,
            None => self.fetch_conversation(&id).await?,
        };

        if !self.tracker.is_tracking(&id).await {
            self.tracker.seed(&id, stored.last_local_event_id).await;
        }
        let check = self.tracker.observe(&id, event.event_id).await;

        // Contiguous with the store, or a replay: apply in place.
        if event.event_id <= stored.last_local_event_id.next() {
            let applied = self
                .gateway
                .apply_events(&id, std::slice::from_ref(&event))
                .await?;
            return Ok(IncomingOutcome::Applied(applied));
        }

        let mut raised = stored.clone();
        raised.observe_remote_event(event.event_id);
        if raised != stored {
            self.gateway.merge_conversation(&raised).await?;
        }

        // Fetch everything past what the store holds, up to and including
        // the pushed event. The tracker may already have moved past a gap
        // whose backfill failed or was throttled.
        let held_next = stored.last_local_event_id.next();
        let from = match check {
            GapCheck::Gap { from, .. } => from.min(held_next),
            GapCheck::InOrder | GapCheck::Duplicate => held_next,
        };
        Ok(self
            .schedule(
                &id,
                BackfillJob::Range {
                    from,
                    to: event.event_id,
                },
            )
            .await)
    }

    async fn schedule(&self, id: &ConversationId, job: BackfillJob) -> IncomingOutcome {
        let decision = self.limiter.lock().await.check();
        if !decision.is_allowed() {
            warn!(conversation = %id, ?decision, "on-demand backfill rejected by rate limiter");
            return IncomingOutcome::Throttled;
        }

        let engine = self.backfill.clone();
        let task_id = id.clone();
        let mut background = self.background.lock().await;
        reap_finished(&mut background);
        background.spawn(async move {
            let result = match job {
                BackfillJob::Full => engine.backfill_conversation(&task_id).await,
                BackfillJob::Range { from, to } => engine.backfill_range(&task_id, from, to).await,
            };
            (task_id, result)
        });

        debug!(conversation = %id, ?job, "scheduled on-demand backfill");
        match job {
            BackfillJob::Full => IncomingOutcome::BackfillScheduled {
                from: EventId::ZERO,
                to: None,
            },
            BackfillJob::Range { from, to } => IncomingOutcome::BackfillScheduled {
                from,
                to: Some(to),
            },
        }
    }

    /// Wait for every background backfill still held.
    ///
    /// Tasks that finished before a later one was scheduled have already
    /// been reaped and logged, and are not part of the report.
    pub async fn wait_for_background(&self) -> BackgroundReport {
        let mut tasks = std::mem::take(&mut *self.background.lock().await);
        let mut report = BackgroundReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(done))) => report.completed.push(done),
                Ok((id, Err(e))) => {
                    warn!(conversation = %id, error = %e, "on-demand backfill failed");
                    report.failed.push((id, e));
                }
                Err(e) => warn!(error = %e, "on-demand backfill task aborted"),
            }
        }
        report
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Conversations
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn create_conversation(
        &self,
        meta: ConversationMeta,
        participants: Vec<ProfileId>,
    ) -> Result<ConversationRecord> {
        self.session.ensure_active()?;

        let summary = self
            .remote
            .create_conversation(NewConversation { meta, participants })
            .await
            .into_result("create_conversation")?;
        let record = self
            .gateway
            .merge_conversation(&ConversationRecord::from_summary(&summary))
            .await?;

        let members = self
            .remote
            .list_participants(&record.id)
            .await
            .into_result("list_participants")?;
        self.gateway.upsert_participants(&members).await?;

        info!(conversation = %record.id, "created conversation");
        Ok(record)
    }

    /// Update a conversation's metadata against its stored version.
    ///
    /// A version conflict refetches and merges the conversation and fails
    /// with [`EngineError::ConflictRefreshed`]; resubmitting is up to the
    /// caller.
    pub async fn update_conversation(
        &self,
        id: &ConversationId,
        meta: ConversationMeta,
    ) -> Result<ConversationRecord> {
        self.session.ensure_active()?;

        let local = self.stored_conversation(id).await?;
        let response = self
            .remote
            .update_conversation(id, meta, local.version.clone())
            .await;
        if response.is_conflict() {
            return Err(self.refresh_after_conflict(id).await);
        }

        let version = response.version.clone();
        let mut summary = response.into_result("update_conversation")?;
        if version.is_some() {
            summary.version = version;
        }
        let record = self
            .gateway
            .merge_conversation(&ConversationRecord::from_summary(&summary))
            .await?;
        Ok(record)
    }

    /// Delete a conversation remotely, then locally with everything in it.
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<()> {
        self.session.ensure_active()?;

        let local = self.stored_conversation(id).await?;
        let response = self
            .remote
            .delete_conversation(id, local.version.clone())
            .await;
        if response.is_conflict() {
            return Err(self.refresh_after_conflict(id).await);
        }
        response.into_result("delete_conversation")?;

        self.gateway.delete_conversations(std::slice::from_ref(id)).await?;
        self.tracker.forget(id).await;
        Ok(())
    }

    pub async fn add_participants(
        &self,
        id: &ConversationId,
        participants: Vec<ParticipantRecord>,
    ) -> Result<Vec<ParticipantRecord>> {
        self.session.ensure_active()?;

        let added = self
            .remote
            .add_participants(id, participants)
            .await
            .into_result("add_participants")?;
        self.gateway.upsert_participants(&added).await?;
        Ok(added)
    }

    pub async fn remove_participants(
        &self,
        id: &ConversationId,
        profiles: Vec<ProfileId>,
    ) -> Result<()> {
        self.session.ensure_active()?;

        self.remote
            .remove_participants(id, profiles.clone())
            .await
            .into_result("remove_participants")?;
        self.gateway.remove_participants(id, &profiles).await?;
        Ok(())
    }

    async fn stored_conversation(&self, id: &ConversationId) -> Result<ConversationRecord> {
        self.store()
            .get_conversation(id)
            .await?
            .ok_or_else(|| EngineError::ConversationNotFound(id.clone()))
    }

    /// Fetch one conversation from the remote and merge it locally.
    async fn fetch_conversation(&self, id: &ConversationId) -> Result<ConversationRecord> {
        let summary = self
            .remote
            .get_conversation(id)
            .await
            .into_result("get_conversation")?;
        let record = self
            .gateway
            .merge_conversation(&ConversationRecord::from_summary(&summary))
            .await?;
        Ok(record)
    }

    async fn refresh_after_conflict(&self, id: &ConversationId) -> EngineError {
        warn!(conversation = %id, "version conflict, refetching conversation");
        match self.fetch_conversation(id).await {
            Ok(record) => EngineError::ConflictRefreshed {
                conversation_id: id.clone(),
                version: record.version,
            },
            Err(e) => e,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Send a message as the session's profile.
    ///
    /// Fails outright only if nothing was stored (session gone, unknown
    /// conversation). Once the placeholder exists, the outcome carries any
    /// failure and the placeholder stays, marked errored.
    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        parts: Vec<MessagePart>,
        attachments: Vec<AttachmentInput>,
    ) -> Result<SendOutcome> {
        let cancel = CancellationToken::new();
        self.send_message_with_cancel(conversation_id, parts, attachments, cancel)
            .await
    }

    /// [`send_message`](Self::send_message) that stops when `cancel` fires.
    pub async fn send_message_with_cancel(
        &self,
        conversation_id: &ConversationId,
        parts: Vec<MessagePart>,
        attachments: Vec<AttachmentInput>,
        cancel: CancellationToken,
    ) -> Result<SendOutcome> {
        self.session.ensure_active()?;
        self.stored_conversation(conversation_id).await?;

        Ok(self
            .sender
            .send(
                conversation_id,
                self.session.profile_id(),
                parts,
                attachments,
                &cancel,
            )
            .await)
    }

    /// Report a delivery status for a message as the session's profile.
    ///
    /// Network failures are retried with a growing delay; anything else
    /// surfaces immediately. The local write is upgrade-only.
    pub async fn update_message_status(
        &self,
        message_id: &MessageId,
        status: DeliveryStatus,
    ) -> Result<MessageStatusRecord> {
        self.session.ensure_active()?;

        let message = self
            .store()
            .get_message(message_id)
            .await?
            .ok_or_else(|| {
                EngineError::InvalidRequest(format!("unknown message {}", message_id))
            })?;
        let profile = self.session.profile_id();
        let retry = &self.config.status_retry;

        let mut attempt = 1;
        let record = loop {
            let result = self
                .remote
                .update_message_status(&message.conversation_id, message_id, profile, status)
                .await
                .into_result("update_message_status");
            match result {
                Ok(record) => break record,
                Err(e) if e.is_transient() && attempt < retry.attempts => {
                    let delay = retry.delay_for(attempt);
                    debug!(
                        message = %message_id,
                        attempt,
                        ?delay,
                        error = %e,
                        "retrying status update"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.gateway
            .apply_statuses(std::slice::from_ref(&record))
            .await?;
        Ok(record)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn conversation(&self, id: &ConversationId) -> Result<Option<ConversationRecord>> {
        Ok(self.store().get_conversation(id).await?)
    }

    pub async fn conversations(&self) -> Result<Vec<ConversationRecord>> {
        Ok(self.store().list_conversations().await?)
    }

    /// Messages of a conversation, confirmed ones by event id, pending last.
    pub async fn messages(&self, id: &ConversationId) -> Result<Vec<MessageRecord>> {
        Ok(self.store().list_messages(id).await?)
    }

    pub async fn statuses(&self, message_id: &MessageId) -> Result<Vec<MessageStatusRecord>> {
        Ok(self.store().list_statuses(message_id).await?)
    }

    pub async fn participants(&self, id: &ConversationId) -> Result<Vec<ParticipantRecord>> {
        Ok(self.store().list_participants(id).await?)
    }
}

/// Drop background backfills that already finished, logging failures.
fn reap_finished(tasks: &mut JoinSet<BackgroundTask>) {
    while let Some(joined) = tasks.try_join_next() {
        match joined {
            Ok((id, Ok(done))) => {
                debug!(conversation = %id, events = done.events, "on-demand backfill finished");
            }
            Ok((id, Err(e))) => warn!(conversation = %id, error = %e, "on-demand backfill failed"),
            Err(e) => warn!(error = %e, "on-demand backfill task aborted"),
        }
    }
}
