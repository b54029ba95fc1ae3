//! Event backfill: paging a conversation's remote event stream into the
//! local store.
//!
//! # Algorithm
//!
//! For one conversation:
//! 1. Start at `last_local_event_id + 1` (or 0 if unknown).
//! 2. Query one page, apply it through the gateway in one transaction.
//! 3. Continue after the page's last event id.
//! 4. Stop when a page comes back short (exhausted) or the per-conversation
//!    call ceiling is reached.
//!
//! Pages within a conversation are strictly sequential. Conversations are
//! independent and run concurrently, bounded by a semaphore. A failed page
//! stops that conversation only; pages already applied stay applied.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use threadline_core::{ConversationId, ConversationRecord, EventId, RemoteEvent};
use threadline_store::{LocalStore, PersistenceGateway, StoreError};

use crate::error::{Result, SyncError};
use crate::remote::RemoteService;

/// Backfill limits.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Events requested per page.
    pub page_size: usize,
    /// Remote calls allowed per conversation per backfill.
    pub max_calls_per_conversation: usize,
    /// Conversations backfilled per sync cycle; the rest wait.
    pub max_conversations_per_cycle: usize,
    /// Conversations backfilled at once.
    pub concurrency: usize,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_calls_per_conversation: 100,
            max_conversations_per_cycle: 21,
            concurrency: 4,
        }
    }
}

/// What one conversation's backfill did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub conversation_id: ConversationId,
    pub calls: usize,
    pub events: usize,
    /// Highest event id applied, `UNKNOWN` if none.
    pub last_event_id: EventId,
    /// The remote stream ran out before the ceiling.
    pub exhausted: bool,
    /// The call ceiling cut the backfill short.
    pub ceiling_reached: bool,
}

impl BackfillReport {
    fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            calls: 0,
            events: 0,
            last_event_id: EventId::UNKNOWN,
            exhausted: false,
            ceiling_reached: false,
        }
    }
}

/// Outcome of backfilling a batch of conversations.
#[derive(Debug, Default)]
pub struct BackfillSummary {
    /// Completed backfills, most recently updated conversation first.
    pub completed: Vec<BackfillReport>,
    pub failed: Vec<(ConversationId, SyncError)>,
    /// Over the per-cycle cap; left for the next cycle.
    pub deferred: Vec<ConversationId>,
}

impl BackfillSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pages remote events into the store.
pub struct BackfillEngine<R: RemoteService, S: LocalStore> {
    remote: Arc<R>,
    gateway: Arc<PersistenceGateway<S>>,
    config: BackfillConfig,
}

impl<R: RemoteService, S: LocalStore> Clone for BackfillEngine<R, S> {
    fn clone(&self) -> Self {
        Self {
            remote: Arc::clone(&self.remote),
            gateway: Arc::clone(&self.gateway),
            config: self.config.clone(),
        }
    }
}

impl<R: RemoteService, S: LocalStore> BackfillEngine<R, S> {
    pub fn new(remote: Arc<R>, gateway: Arc<PersistenceGateway<S>>, config: BackfillConfig) -> Self {
        Self {
            remote,
            gateway,
            config,
        }
    }

    pub fn config(&self) -> &BackfillConfig {
        &self.config
    }

    /// Backfill one conversation from its local high-water mark.
    pub async fn backfill_conversation(&self, id: &ConversationId) -> Result<BackfillReport> {
        let record = self
            .gateway
            .store()
            .get_conversation(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("conversation {}", id)))?;

        let report = self.page_forward(id, record.backfill_start(), None).await?;
        if report.exhausted {
            self.gateway.mark_backfilled(id).await?;
        }
        Ok(report)
    }

    /// Backfill exactly `from..=to`, as reported by a push stream gap.
    pub async fn backfill_range(
        &self,
        id: &ConversationId,
        from: EventId,
        to: EventId,
    ) -> Result<BackfillReport> {
        if to < from {
            return Ok(BackfillReport::new(id.clone()));
        }
        self.page_forward(id, from, Some(to)).await
    }

    async fn page_forward(
        &self,
        id: &ConversationId,
        start: EventId,
        until: Option<EventId>,
    ) -> Result<BackfillReport> {
        let page_size = self.config.page_size.max(1);
        let mut report = BackfillReport::new(id.clone());
        let mut from = start;

        loop {
            if report.calls >= self.config.max_calls_per_conversation {
                report.ceiling_reached = true;
                warn!(
                    conversation = %id,
                    calls = report.calls,
                    next = %from,
                    "backfill call ceiling reached"
                );
                break;
            }

            let page = self
                .remote
                .query_events(id, Some(from), page_size)
                .await
                .into_result("query_events")?;
            report.calls += 1;
            let short = page.len() < page_size;

            let page: Vec<RemoteEvent> = match until {
                Some(to) => page.into_iter().filter(|e| e.event_id <= to).collect(),
                None => page,
            };
            let reached_end = match until {
                Some(to) => page.last().map_or(true, |e| e.event_id >= to),
                None => false,
            };

            if !page.is_empty() {
                let applied = self.gateway.apply_events(id, &page).await?;
                report.events += page.len();
                report.last_event_id = report.last_event_id.max(applied.last_event_id);
                from = applied.last_event_id.next();
                debug!(
                    conversation = %id,
                    events = page.len(),
                    last_event_id = %applied.last_event_id,
                    "applied backfill page"
                );
            }

            if short || reached_end {
                report.exhausted = short;
                break;
            }
        }
        Ok(report)
    }

    /// Order candidates most recently updated first and split off those over
    /// the per-cycle cap.
    pub fn select(
        &self,
        mut candidates: Vec<ConversationRecord>,
    ) -> (Vec<ConversationId>, Vec<ConversationId>) {
        candidates.sort_by(|a, b| {
            b.updated_on
                .cmp(&a.updated_on)
                .then_with(|| a.id.cmp(&b.id))
        });
        let mut seen = BTreeSet::new();
        let ids: Vec<ConversationId> = candidates
            .into_iter()
            .map(|c| c.id)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        let cap = self.config.max_conversations_per_cycle.min(ids.len());
        let mut selected = ids;
        let deferred = selected.split_off(cap);
        (selected, deferred)
    }
}

impl<R, S> BackfillEngine<R, S>
where
    R: RemoteService + 'static,
    S: LocalStore + 'static,
{
    /// Backfill a batch of conversations concurrently.
    ///
    /// At most `max_conversations_per_cycle` run, most recently updated
    /// first. One conversation's failure does not stop the others.
    pub async fn backfill_many(&self, candidates: Vec<ConversationRecord>) -> BackfillSummary {
        let (selected, deferred) = self.select(candidates);
        if !deferred.is_empty() {
            info!(
                selected = selected.len(),
                deferred = deferred.len(),
                "backfill capped for this cycle"
            );
        }

        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut outstanding: BTreeSet<(usize, ConversationId)> = BTreeSet::new();

        for (index, id) in selected.into_iter().enumerate() {
            outstanding.insert((index, id.clone()));
            let engine = self.clone();
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => engine.backfill_conversation(&id).await,
                    Err(_) => Err(SyncError::Cancelled),
                };
                (index, id, result)
            });
        }

        let mut completed = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, id, result)) => {
                    outstanding.remove(&(index, id.clone()));
                    match result {
                        Ok(report) => completed.push((index, report)),
                        Err(e) => {
                            warn!(conversation = %id, error = %e, "backfill failed");
                            failed.push((index, id, e));
                        }
                    }
                }
                Err(e) => warn!(error = %e, "backfill task aborted"),
            }
        }
        for (index, id) in outstanding {
            failed.push((index, id, SyncError::TaskFailed("task did not report".into())));
        }

        completed.sort_by_key(|(index, _)| *index);
        failed.sort_by_key(|(index, _, _)| *index);
        BackfillSummary {
            completed: completed.into_iter().map(|(_, r)| r).collect(),
            failed: failed.into_iter().map(|(_, id, e)| (id, e)).collect(),
            deferred,
        }
    }
}
