//! The message send and attachment pipeline.
//!
//! # Stages
//!
//! 1. **Prepare**: oversized inline parts become attachments. Every
//!    attachment is shown as an `Uploading` part on an optimistic
//!    placeholder stored under a temporary id.
//! 2. **Upload**: attachments upload concurrently. A failed upload turns
//!    into an `Error` part for that attachment only.
//! 3. **Post-upload**: each `Uploading` part is replaced by the uploaded
//!    attachment or its error.
//! 4. **Finalize**: only inline and uploaded parts are transmitted. On
//!    success the placeholder is swapped for the confirmed record; on
//!    failure it is kept and marked errored.
//!
//! Cancellation stops uploads still in flight. Uploads that already
//! finished keep their results, the placeholder is marked errored, and
//! nothing is transmitted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use threadline_core::{
    ConversationId, EventId, MessageId, MessagePart, MessageRecord, ProfileId, SendState,
};
use threadline_store::{LocalStore, PersistenceGateway};
use threadline_sync::{AttachmentUpload, OutgoingMessage, RemoteService, UploadedAttachment};

use crate::config::SendConfig;
use crate::error::{EngineError, Result};

const CANCELLED: &str = "cancelled";

/// An attachment to upload with a message.
#[derive(Debug, Clone)]
pub struct AttachmentInput {
    pub name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl AttachmentInput {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }
}

/// What a send produced.
#[derive(Debug)]
pub struct SendOutcome {
    /// The placeholder's temporary id.
    pub temp_id: MessageId,
    /// Set once the remote accepted the message.
    pub server_message_id: Option<MessageId>,
    pub event_id: EventId,
    /// Attachments that did not make it into the message.
    pub failed_attachments: Vec<String>,
    pub error: Option<EngineError>,
}

impl SendOutcome {
    fn failed(temp_id: MessageId, error: EngineError) -> Self {
        Self {
            temp_id,
            server_message_id: None,
            event_id: EventId::UNKNOWN,
            failed_attachments: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.server_message_id.is_some()
    }

    /// The server message id, or the error.
    pub fn into_result(self) -> Result<MessageId> {
        match (self.error, self.server_message_id) {
            (Some(e), _) => Err(e),
            (None, Some(id)) => Ok(id),
            (None, None) => Err(EngineError::InvalidRequest("message was not sent".into())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stages
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PendingUpload {
    /// Index of the `Uploading` part this upload replaces.
    slot: usize,
    request: AttachmentUpload,
}

#[derive(Debug)]
struct Prepared {
    parts: Vec<MessagePart>,
    uploads: Vec<PendingUpload>,
}

impl Prepared {
    /// Show an `Uploading` part and queue its upload.
    fn stage(
        &mut self,
        conversation_id: &ConversationId,
        name: String,
        content_type: String,
        data: Bytes,
    ) {
        let slot = self.parts.len();
        self.parts.push(MessagePart::Uploading {
            name: name.clone(),
            size: data.len() as u64,
        });
        self.uploads.push(PendingUpload {
            slot,
            request: AttachmentUpload {
                conversation_id: conversation_id.clone(),
                name,
                content_type,
                data,
            },
        });
    }
}

#[derive(Debug)]
enum UploadResult {
    Uploaded(UploadedAttachment),
    Failed(String),
    Cancelled,
}

#[derive(Debug)]
struct UploadOutcome {
    slot: usize,
    name: String,
    content_type: String,
    result: UploadResult,
}

fn prepare(
    conversation_id: &ConversationId,
    parts: Vec<MessagePart>,
    attachments: Vec<AttachmentInput>,
    inline_threshold: usize,
) -> Prepared {
    let mut prepared = Prepared {
        parts: Vec::with_capacity(parts.len() + attachments.len()),
        uploads: Vec::new(),
    };

    for (index, part) in parts.into_iter().enumerate() {
        match part {
            MessagePart::Inline { content_type, body } if body.len() > inline_threshold => {
                debug!(index, size = body.len(), "converting oversized inline part");
                prepared.stage(conversation_id, format!("part-{}", index), content_type, body);
            }
            // A stale temporary part has nothing left to upload.
            MessagePart::Uploading { name, .. } => prepared.parts.push(MessagePart::Error {
                name,
                reason: "upload not started".into(),
            }),
            other => prepared.parts.push(other),
        }
    }
    for attachment in attachments {
        prepared.stage(
            conversation_id,
            attachment.name,
            attachment.content_type,
            attachment.data,
        );
    }
    prepared
}

async fn upload_all<R: RemoteService + 'static>(
    remote: &Arc<R>,
    uploads: Vec<PendingUpload>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> Vec<UploadOutcome> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();
    let mut outstanding = BTreeMap::new();

    for PendingUpload { slot, request } in uploads {
        outstanding.insert(slot, (request.name.clone(), request.content_type.clone()));
        let remote = Arc::clone(remote);
        let permits = Arc::clone(&permits);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let name = request.name.clone();
            let content_type = request.content_type.clone();
            let upload = async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return UploadResult::Cancelled;
                };
                match remote
                    .upload_attachment(request)
                    .await
                    .into_result("upload_attachment")
                {
                    Ok(done) => UploadResult::Uploaded(done),
                    Err(e) => UploadResult::Failed(e.to_string()),
                }
            };
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => UploadResult::Cancelled,
                result = upload => result,
            };
            UploadOutcome {
                slot,
                name,
                content_type,
                result,
            }
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => {
                outstanding.remove(&outcome.slot);
                outcomes.push(outcome);
            }
            Err(e) => warn!(error = %e, "upload task aborted"),
        }
    }
    for (slot, (name, content_type)) in outstanding {
        outcomes.push(UploadOutcome {
            slot,
            name,
            content_type,
            result: UploadResult::Failed("upload task failed".into()),
        });
    }
    outcomes.sort_by_key(|o| o.slot);
    outcomes
}

/// Swap each `Uploading` part for its result. Returns the names of the
/// attachments that did not upload.
fn apply_uploads(parts: &mut [MessagePart], outcomes: Vec<UploadOutcome>) -> Vec<String> {
    let mut failed = Vec::new();
    for UploadOutcome {
        slot,
        name,
        content_type,
        result,
    } in outcomes
    {
        let replacement = match result {
            UploadResult::Uploaded(done) => MessagePart::Attachment {
                name,
                content_type,
                url: done.url,
                size: done.size,
            },
            UploadResult::Failed(reason) => {
                warn!(attachment = %name, %reason, "attachment upload failed");
                failed.push(name.clone());
                MessagePart::Error { name, reason }
            }
            UploadResult::Cancelled => {
                failed.push(name.clone());
                MessagePart::Error {
                    name,
                    reason: CANCELLED.into(),
                }
            }
        };
        if let Some(part) = parts.get_mut(slot) {
            *part = replacement;
        }
    }
    failed
}

// ─────────────────────────────────────────────────────────────────────────────
// Pipeline
// ─────────────────────────────────────────────────────────────────────────────

/// Runs sends against a remote service and the persistence gateway.
pub struct SendPipeline<R: RemoteService, S: LocalStore> {
    remote: Arc<R>,
    gateway: Arc<PersistenceGateway<S>>,
    config: SendConfig,
}

impl<R, S> SendPipeline<R, S>
where
    R: RemoteService + 'static,
    S: LocalStore,
{
    pub fn new(remote: Arc<R>, gateway: Arc<PersistenceGateway<S>>, config: SendConfig) -> Self {
        Self {
            remote,
            gateway,
            config,
        }
    }

    /// Send one message from `sender`.
    pub async fn send(
        &self,
        conversation_id: &ConversationId,
        sender: &ProfileId,
        parts: Vec<MessagePart>,
        attachments: Vec<AttachmentInput>,
        cancel: &CancellationToken,
    ) -> SendOutcome {
        let Prepared {
            mut parts,
            uploads,
        } = prepare(
            conversation_id,
            parts,
            attachments,
            self.config.inline_threshold,
        );

        let placeholder = MessageRecord::pending(
            conversation_id.clone(),
            sender.clone(),
            now_millis(),
            parts.clone(),
        );
        let temp_id = placeholder.message_id.clone();
        if let Err(e) = self.gateway.insert_pending_message(&placeholder).await {
            return SendOutcome::failed(temp_id, e.into());
        }

        let mut failed_attachments = Vec::new();
        if !uploads.is_empty() {
            let outcomes =
                upload_all(&self.remote, uploads, self.config.upload_concurrency, cancel).await;
            failed_attachments = apply_uploads(&mut parts, outcomes);
            if let Err(e) = self.gateway.update_pending_parts(&temp_id, parts.clone()).await {
                return self.abandon(temp_id, failed_attachments, e.into()).await;
            }
        }

        if cancel.is_cancelled() {
            info!(message = %temp_id, "send cancelled before transmission");
            return self
                .abandon(temp_id, failed_attachments, EngineError::Cancelled)
                .await;
        }

        let transmitted: Vec<MessagePart> = parts
            .iter()
            .filter(|p| !p.is_local_only())
            .cloned()
            .collect();
        if transmitted.is_empty() {
            let error = EngineError::InvalidRequest("no transmittable parts".into());
            return self.abandon(temp_id, failed_attachments, error).await;
        }

        let request = OutgoingMessage {
            conversation_id: conversation_id.clone(),
            client_message_id: temp_id.clone(),
            sender: sender.clone(),
            parts: transmitted,
        };
        let sent = match self
            .remote
            .send_message(request)
            .await
            .into_result("send_message")
        {
            Ok(sent) => sent,
            Err(e) => return self.abandon(temp_id, failed_attachments, e.into()).await,
        };

        let confirmed = MessageRecord {
            message_id: sent.message_id.clone(),
            conversation_id: conversation_id.clone(),
            sent_event_id: sent.event_id,
            sender: sender.clone(),
            sent_on: sent.sent_on,
            parts,
            statuses: Vec::new(),
            send_state: SendState::Sent,
        };
        if let Err(e) = self.gateway.promote_message(&temp_id, &confirmed).await {
            // The remote has the message; the next backfill brings it in.
            warn!(message = %temp_id, error = %e, "failed to promote sent message");
            return SendOutcome {
                temp_id,
                server_message_id: Some(sent.message_id),
                event_id: sent.event_id,
                failed_attachments,
                error: Some(e.into()),
            };
        }

        debug!(
            message = %sent.message_id,
            event_id = %sent.event_id,
            failed_attachments = failed_attachments.len(),
            "message sent"
        );
        SendOutcome {
            temp_id,
            server_message_id: Some(sent.message_id),
            event_id: sent.event_id,
            failed_attachments,
            error: None,
        }
    }

    /// Mark the placeholder errored and report `error`.
    async fn abandon(
        &self,
        temp_id: MessageId,
        failed_attachments: Vec<String>,
        error: EngineError,
    ) -> SendOutcome {
        let reason = match &error {
            EngineError::Cancelled => CANCELLED.to_owned(),
            other => other.to_string(),
        };
        if let Err(e) = self.gateway.mark_message_errored(&temp_id, &reason).await {
            warn!(message = %temp_id, error = %e, "failed to mark message errored");
        }
        SendOutcome {
            failed_attachments,
            ..SendOutcome::failed(temp_id, error)
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use threadline_store::MemoryStore;
    use threadline_sync::MemoryRemote;

    fn conv() -> ConversationId {
        ConversationId::new("c1")
    }

    #[test]
    fn test_prepare_converts_oversized_inline() {
        let big = MessagePart::Inline {
            content_type: "text/plain".into(),
            body: Bytes::from(vec![b'x'; 20 * 1024]),
        };
        let small = MessagePart::text("hello");
        let prepared = prepare(&conv(), vec![small.clone(), big], Vec::new(), 13 * 1024);

        assert_eq!(prepared.parts.len(), 2);
        assert_eq!(prepared.parts[0], small);
        assert!(matches!(
            &prepared.parts[1],
            MessagePart::Uploading { size, .. } if *size == 20 * 1024
        ));
        assert_eq!(prepared.uploads.len(), 1);
        assert_eq!(prepared.uploads[0].slot, 1);
        assert_eq!(prepared.uploads[0].request.content_type, "text/plain");
    }

    #[test]
    fn test_prepare_keeps_threshold_sized_inline() {
        let exact = MessagePart::Inline {
            content_type: "text/plain".into(),
            body: Bytes::from(vec![b'x'; 13 * 1024]),
        };
        let prepared = prepare(&conv(), vec![exact], Vec::new(), 13 * 1024);
        assert!(prepared.uploads.is_empty());
    }

    #[test]
    fn test_apply_uploads_isolates_failures() {
        let mut parts = vec![
            MessagePart::Uploading { name: "a".into(), size: 1 },
            MessagePart::Uploading { name: "b".into(), size: 1 },
        ];
        let outcomes = vec![
            UploadOutcome {
                slot: 0,
                name: "a".into(),
                content_type: "image/png".into(),
                result: UploadResult::Uploaded(UploadedAttachment {
                    url: "memory://a".into(),
                    size: 1,
                }),
            },
            UploadOutcome {
                slot: 1,
                name: "b".into(),
                content_type: "image/png".into(),
                result: UploadResult::Failed("boom".into()),
            },
        ];
        let failed = apply_uploads(&mut parts, outcomes);
        assert_eq!(failed, vec!["b".to_owned()]);
        assert!(matches!(&parts[0], MessagePart::Attachment { url, .. } if url == "memory://a"));
        assert!(matches!(&parts[1], MessagePart::Error { reason, .. } if reason == "boom"));
    }

    async fn pipeline() -> (
        Arc<MemoryRemote>,
        Arc<PersistenceGateway<MemoryStore>>,
        SendPipeline<MemoryRemote, MemoryStore>,
        ConversationId,
    ) {
        let remote = Arc::new(MemoryRemote::new());
        let summary = remote.seed_conversation("c1", "General").await;
        let gateway = Arc::new(PersistenceGateway::new(Arc::new(MemoryStore::new())));
        gateway
            .upsert_conversations(&[threadline_core::ConversationRecord::from_summary(&summary)])
            .await
            .unwrap();
        let pipeline =
            SendPipeline::new(Arc::clone(&remote), Arc::clone(&gateway), SendConfig::default());
        (remote, gateway, pipeline, summary.id)
    }

    #[tokio::test]
    async fn test_cancel_keeps_finished_uploads() {
        let (remote, gateway, pipeline, id) = pipeline().await;
        remote.delay_upload("slow.bin", Duration::from_secs(30)).await;
        let cancel = CancellationToken::new();

        let attachments = vec![
            AttachmentInput::new("fast.png", "image/png", Bytes::from_static(b"png")),
            AttachmentInput::new("slow.bin", "application/octet-stream", Bytes::from_static(b"bin")),
        ];
        let trigger = cancel.clone();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let outcome = pipeline
            .send(&id, &ProfileId::new("me"), Vec::new(), attachments, &cancel)
            .await;
        canceller.await.unwrap();

        assert!(matches!(outcome.error, Some(EngineError::Cancelled)));
        assert_eq!(outcome.failed_attachments, vec!["slow.bin".to_owned()]);
        assert!(remote.sent_messages().await.is_empty());

        let stored = gateway.store().get_message(&outcome.temp_id).await.unwrap().unwrap();
        assert!(stored.is_errored());
        assert!(matches!(&stored.parts[0], MessagePart::Attachment { name, .. } if name == "fast.png"));
        assert!(matches!(&stored.parts[1], MessagePart::Error { reason, .. } if reason == CANCELLED));
    }

    #[tokio::test]
    async fn test_send_failure_keeps_errored_placeholder() {
        let (remote, gateway, pipeline, id) = pipeline().await;
        remote.fail_sends(true).await;

        let outcome = pipeline
            .send(
                &id,
                &ProfileId::new("me"),
                vec![MessagePart::text("hi")],
                Vec::new(),
                &CancellationToken::new(),
            )
            .await;
        assert!(!outcome.is_success());
        assert!(outcome.server_message_id.is_none());

        let stored = gateway.store().get_message(&outcome.temp_id).await.unwrap().unwrap();
        assert!(stored.is_errored());
        assert_eq!(stored.sent_event_id, EventId::UNKNOWN);
    }
}
