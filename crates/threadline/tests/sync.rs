//! End-to-end sync scenarios against the in-memory remote and store.

use std::time::Duration;

use threadline::{
    ConversationMeta, DeliveryStatus, EngineConfig, EngineError, EventId, IncomingEvent,
    IncomingOutcome, MessageId, ProfileId,
};
use threadline_core::{ParticipantRecord, RateLimitConfig};
use threadline_sync::{BackfillConfig, RemoteService, SyncError};
use threadline_testkit::TestHarness;

fn page_size(size: usize) -> EngineConfig {
    EngineConfig {
        backfill: BackfillConfig {
            page_size: size,
            ..BackfillConfig::default()
        },
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn test_first_sync_caps_backfill_per_cycle() {
    let harness = TestHarness::new();
    let seeded = harness.seed_many(100, 1).await;

    let report = harness.engine.synchronize_all().await.unwrap();
    assert!(report.success());
    assert_eq!(report.added, 100);
    assert_eq!(report.backfilled.len(), 21);
    assert_eq!(report.deferred.len(), 79);

    // Most recently updated conversations go first.
    let newest = harness.engine.conversation(&seeded[99].id).await.unwrap().unwrap();
    assert!(newest.is_initialized());
    let oldest = harness.engine.conversation(&seeded[0].id).await.unwrap().unwrap();
    assert!(!oldest.is_initialized());

    // Deferred conversations are picked up by later cycles.
    let report = harness.engine.synchronize_all().await.unwrap();
    assert_eq!(report.added, 0);
    assert_eq!(report.backfilled.len(), 21);
    assert_eq!(report.deferred.len(), 58);

    let initialized = harness
        .engine
        .conversations()
        .await
        .unwrap()
        .into_iter()
        .filter(|c| c.is_initialized())
        .count();
    assert_eq!(initialized, 42);
}

#[tokio::test]
async fn test_resync_adds_updates_and_deletes() {
    let harness = TestHarness::new();
    let b = harness.seed("b", 2).await;
    let c = harness.seed("c", 2).await;
    let d = harness.seed("d", 2).await;
    harness.engine.synchronize_all().await.unwrap();

    let a = harness.seed("a", 1).await;
    harness
        .remote
        .append_message(&b.id, &TestHarness::alice(), "later")
        .await;
    harness.remote.drop_conversation(&d.id).await;
    let c_before = harness.engine.conversation(&c.id).await.unwrap().unwrap();

    let report = harness.engine.synchronize_all().await.unwrap();
    assert!(report.success());
    assert_eq!((report.added, report.updated, report.deleted), (1, 1, 1));

    let backfilled: Vec<_> = report
        .backfilled
        .iter()
        .map(|r| r.conversation_id.clone())
        .collect();
    assert!(backfilled.contains(&a.id));
    assert!(backfilled.contains(&b.id));
    assert!(!backfilled.contains(&c.id));

    assert_eq!(harness.engine.messages(&a.id).await.unwrap().len(), 1);
    assert_eq!(harness.engine.messages(&b.id).await.unwrap().len(), 3);
    assert_eq!(
        harness.engine.conversation(&c.id).await.unwrap().unwrap(),
        c_before
    );
    assert!(harness.engine.conversation(&d.id).await.unwrap().is_none());
    assert!(harness.engine.messages(&d.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_list_failure_fails_the_cycle() {
    let harness = TestHarness::new();
    harness.seed("a", 1).await;
    harness.remote.fail_list_conversations(true).await;

    let err = harness.engine.synchronize_all().await.unwrap_err();
    assert!(matches!(err, EngineError::Sync(SyncError::Network { .. })));
    assert!(harness.engine.conversations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_conflict_refreshes_local_copy() {
    let harness = TestHarness::new();
    let a = harness.seed("a", 0).await;
    harness.engine.synchronize_all().await.unwrap();

    let renamed = harness
        .remote
        .rename_conversation(&a.id, "Renamed elsewhere")
        .await
        .unwrap();

    let err = harness
        .engine
        .update_conversation(&a.id, ConversationMeta::named("Mine"))
        .await
        .unwrap_err();
    match err {
        EngineError::ConflictRefreshed {
            conversation_id,
            version,
        } => {
            assert_eq!(conversation_id, a.id);
            assert_eq!(version, renamed.version);
        }
        other => panic!("expected a refreshed conflict, got {:?}", other),
    }
    assert_eq!(harness.remote.get_conversation_count().await, 1);

    let local = harness.engine.conversation(&a.id).await.unwrap().unwrap();
    assert_eq!(local.meta.name.as_deref(), Some("Renamed elsewhere"));
    assert_eq!(local.version, renamed.version);

    // Resubmitting against the refreshed version goes through.
    let updated = harness
        .engine
        .update_conversation(&a.id, ConversationMeta::named("Mine"))
        .await
        .unwrap();
    assert_eq!(updated.meta.name.as_deref(), Some("Mine"));
}

#[tokio::test]
async fn test_conflict_with_failed_refetch_reports_refetch_error() {
    let harness = TestHarness::new();
    let a = harness.seed("a", 0).await;
    harness.engine.synchronize_all().await.unwrap();
    let before = harness.engine.conversation(&a.id).await.unwrap().unwrap();

    harness.remote.force_conflicts(1).await;
    harness.remote.fail_get_conversation(true).await;

    let err = harness.engine.delete_conversation(&a.id).await.unwrap_err();
    assert!(matches!(err, EngineError::Sync(SyncError::Network { .. })));
    assert_eq!(
        harness.engine.conversation(&a.id).await.unwrap().unwrap(),
        before
    );
}

#[tokio::test]
async fn test_push_gap_backfills_missing_range() {
    let harness = TestHarness::new();
    let a = harness.seed("a", 3).await;
    harness.engine.synchronize_all().await.unwrap();

    let mut pushed = None;
    for i in 0..3 {
        pushed = harness
            .remote
            .append_message(&a.id, &TestHarness::alice(), &format!("missed {}", i))
            .await;
    }
    let pushed = pushed.unwrap();
    assert_eq!(pushed.event_id, EventId::new(6));

    let outcome = harness
        .engine
        .handle_incoming(IncomingEvent::Timeline(pushed))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IncomingOutcome::BackfillScheduled {
            from: EventId::new(4),
            to: Some(EventId::new(6)),
        }
    );

    let background = harness.engine.wait_for_background().await;
    assert_eq!(background.completed.len(), 1);
    assert!(background.failed.is_empty());

    let local = harness.engine.conversation(&a.id).await.unwrap().unwrap();
    assert_eq!(local.last_local_event_id, EventId::new(6));
    assert_eq!(harness.engine.messages(&a.id).await.unwrap().len(), 6);

    // The next pushed event is contiguous and applied in place.
    let next = harness
        .remote
        .append_message(&a.id, &TestHarness::alice(), "live")
        .await
        .unwrap();
    let outcome = harness
        .engine
        .handle_incoming(IncomingEvent::Timeline(next))
        .await
        .unwrap();
    assert!(matches!(outcome, IncomingOutcome::Applied(_)));
    let local = harness.engine.conversation(&a.id).await.unwrap().unwrap();
    assert_eq!(local.last_local_event_id, EventId::new(7));
}

#[tokio::test]
async fn test_failed_gap_backfill_is_retried_by_the_next_push() {
    let harness = TestHarness::new();
    let a = harness.seed("a", 3).await;
    harness.engine.synchronize_all().await.unwrap();

    harness
        .remote
        .append_message(&a.id, &TestHarness::alice(), "missed")
        .await;
    let pushed = harness
        .remote
        .append_message(&a.id, &TestHarness::alice(), "gap")
        .await
        .unwrap();
    harness.remote.fail_event_queries(&a.id, true).await;
    let outcome = harness
        .engine
        .handle_incoming(IncomingEvent::Timeline(pushed))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IncomingOutcome::BackfillScheduled {
            from: EventId::new(4),
            to: Some(EventId::new(5)),
        }
    );
    let background = harness.engine.wait_for_background().await;
    assert_eq!(background.failed.len(), 1);
    let local = harness.engine.conversation(&a.id).await.unwrap().unwrap();
    assert_eq!(local.last_local_event_id, EventId::new(3));

    // The next push is in order for the tracker but the store still lacks 4 and 5.
    harness.remote.fail_event_queries(&a.id, false).await;
    let next = harness
        .remote
        .append_message(&a.id, &TestHarness::alice(), "live")
        .await
        .unwrap();
    let outcome = harness
        .engine
        .handle_incoming(IncomingEvent::Timeline(next))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IncomingOutcome::BackfillScheduled {
            from: EventId::new(4),
            to: Some(EventId::new(6)),
        }
    );
    let background = harness.engine.wait_for_background().await;
    assert_eq!(background.completed.len(), 1);

    let local = harness.engine.conversation(&a.id).await.unwrap().unwrap();
    assert_eq!(local.last_local_event_id, EventId::new(6));
    assert_eq!(harness.engine.messages(&a.id).await.unwrap().len(), 6);
}

#[tokio::test]
async fn test_throttled_gap_is_covered_by_the_next_push() {
    let harness = TestHarness::with_config(EngineConfig {
        rate_limit: RateLimitConfig {
            short_window: Duration::from_millis(100),
            short_limit: 1,
            ..RateLimitConfig::default()
        },
        ..EngineConfig::default()
    });
    let a = harness.seed("a", 3).await;
    let b = harness.seed("b", 1).await;
    harness.engine.synchronize_all().await.unwrap();

    // Spend the window on another conversation.
    harness
        .remote
        .append_message(&b.id, &TestHarness::alice(), "missed")
        .await;
    let pushed = harness
        .remote
        .append_message(&b.id, &TestHarness::alice(), "gap")
        .await
        .unwrap();
    let outcome = harness
        .engine
        .handle_incoming(IncomingEvent::Timeline(pushed))
        .await
        .unwrap();
    assert!(matches!(outcome, IncomingOutcome::BackfillScheduled { .. }));

    harness
        .remote
        .append_message(&a.id, &TestHarness::alice(), "missed")
        .await;
    let pushed = harness
        .remote
        .append_message(&a.id, &TestHarness::alice(), "gap")
        .await
        .unwrap();
    let outcome = harness
        .engine
        .handle_incoming(IncomingEvent::Timeline(pushed))
        .await
        .unwrap();
    assert_eq!(outcome, IncomingOutcome::Throttled);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let next = harness
        .remote
        .append_message(&a.id, &TestHarness::alice(), "live")
        .await
        .unwrap();
    let outcome = harness
        .engine
        .handle_incoming(IncomingEvent::Timeline(next))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IncomingOutcome::BackfillScheduled {
            from: EventId::new(4),
            to: Some(EventId::new(6)),
        }
    );
    harness.engine.wait_for_background().await;

    let local = harness.engine.conversation(&a.id).await.unwrap().unwrap();
    assert_eq!(local.last_local_event_id, EventId::new(6));
    let ids: Vec<EventId> = harness
        .engine
        .messages(&a.id)
        .await
        .unwrap()
        .iter()
        .map(|m| m.sent_event_id)
        .collect();
    assert_eq!(ids, (1..=6).map(EventId::new).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_replayed_push_is_idempotent() {
    let harness = TestHarness::new();
    let a = harness.seed("a", 2).await;
    harness.engine.synchronize_all().await.unwrap();
    let before = harness.store.snapshot().unwrap();

    let pushed = harness.push_after(&a.id, EventId::ZERO).await;
    assert_eq!(pushed, 2);
    assert_eq!(harness.store.snapshot().unwrap(), before);
}

#[tokio::test]
async fn test_on_demand_backfills_are_rate_limited() {
    let harness = TestHarness::with_config(EngineConfig {
        rate_limit: RateLimitConfig {
            short_window: Duration::from_secs(60),
            short_limit: 2,
            ..RateLimitConfig::default()
        },
        ..EngineConfig::default()
    });
    let seeded = harness.seed_many(3, 1).await;
    harness.engine.synchronize_all().await.unwrap();

    let mut outcomes = Vec::new();
    for summary in &seeded {
        harness
            .remote
            .append_message(&summary.id, &TestHarness::alice(), "skipped")
            .await;
        let pushed = harness
            .remote
            .append_message(&summary.id, &TestHarness::alice(), "pushed")
            .await
            .unwrap();
        outcomes.push(
            harness
                .engine
                .handle_incoming(IncomingEvent::Timeline(pushed))
                .await
                .unwrap(),
        );
    }
    assert!(matches!(outcomes[0], IncomingOutcome::BackfillScheduled { .. }));
    assert!(matches!(outcomes[1], IncomingOutcome::BackfillScheduled { .. }));
    assert_eq!(outcomes[2], IncomingOutcome::Throttled);
    harness.engine.wait_for_background().await;

    // The throttled conversation knows it is behind; the next sync catches up.
    let throttled = harness.engine.conversation(&seeded[2].id).await.unwrap().unwrap();
    assert!(throttled.is_behind_remote());
    harness.engine.synchronize_all().await.unwrap();
    let caught_up = harness.engine.conversation(&seeded[2].id).await.unwrap().unwrap();
    assert_eq!(caught_up.last_local_event_id, EventId::new(3));
}

#[tokio::test]
async fn test_push_for_unknown_conversation_fetches_it() {
    let harness = TestHarness::new();
    let a = harness.seed("a", 2).await;
    let first = harness.remote.events(&a.id).await.remove(0);

    let outcome = harness
        .engine
        .handle_incoming(IncomingEvent::Timeline(first))
        .await
        .unwrap();
    assert!(matches!(outcome, IncomingOutcome::BackfillScheduled { .. }));
    assert_eq!(harness.remote.get_conversation_count().await, 1);

    harness.engine.wait_for_background().await;
    let local = harness.engine.conversation(&a.id).await.unwrap().unwrap();
    assert_eq!(local.last_local_event_id, EventId::new(1));
    assert_eq!(local.latest_remote_event_id, EventId::new(2));
}

#[tokio::test]
async fn test_pushed_conversation_update_schedules_backfill() {
    let harness = TestHarness::new();
    let a = harness.seed("a", 1).await;
    harness.engine.synchronize_all().await.unwrap();

    harness
        .remote
        .append_message(&a.id, &TestHarness::alice(), "new")
        .await;
    let summary = harness.remote.summary(&a.id).await.unwrap();
    let outcome = harness
        .engine
        .handle_incoming(IncomingEvent::ConversationUpdated(summary))
        .await
        .unwrap();
    assert_eq!(
        outcome,
        IncomingOutcome::BackfillScheduled {
            from: EventId::ZERO,
            to: None,
        }
    );
    harness.engine.wait_for_background().await;
    assert_eq!(harness.engine.messages(&a.id).await.unwrap().len(), 2);

    let outcome = harness
        .engine
        .handle_incoming(IncomingEvent::ConversationDeleted(a.id.clone()))
        .await
        .unwrap();
    assert_eq!(outcome, IncomingOutcome::ConversationDeleted);
    assert!(harness.engine.conversation(&a.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_status_before_message_waits_as_orphan() {
    let harness = TestHarness::with_config(page_size(2));
    let a = harness.seed("a", 1).await;
    let later = MessageId::new("msg-2");
    harness
        .remote
        .append_status(&a.id, &later, &ProfileId::new("bob"), DeliveryStatus::Read)
        .await;
    harness
        .remote
        .append_message(&a.id, &TestHarness::alice(), "arrives late")
        .await;

    let report = harness.engine.synchronize_all().await.unwrap();
    assert!(report.success());
    assert_eq!(report.backfilled[0].calls, 2);

    let statuses = harness.engine.statuses(&later).await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].status, DeliveryStatus::Read);
    assert!(harness.store.snapshot().unwrap().orphans.is_empty());
}

#[tokio::test]
async fn test_unknown_event_kinds_still_advance_marks() {
    let harness = TestHarness::new();
    let a = harness.seed("a", 1).await;
    harness.remote.append_unknown(&a.id, "poll_created").await;

    harness.engine.synchronize_all().await.unwrap();
    let local = harness.engine.conversation(&a.id).await.unwrap().unwrap();
    assert_eq!(local.last_local_event_id, EventId::new(2));
    assert_eq!(harness.engine.messages(&a.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_participant_changes_local_and_remote() {
    let harness = TestHarness::new();
    let record = harness
        .engine
        .create_conversation(
            ConversationMeta::named("Team"),
            vec![TestHarness::me(), ProfileId::new("bob")],
        )
        .await
        .unwrap();
    let id = record.id.clone();

    harness
        .engine
        .add_participants(
            &id,
            vec![ParticipantRecord::new(id.clone(), TestHarness::alice(), "member")],
        )
        .await
        .unwrap();
    assert_eq!(harness.engine.participants(&id).await.unwrap().len(), 3);

    harness
        .engine
        .remove_participants(&id, vec![TestHarness::alice()])
        .await
        .unwrap();
    assert_eq!(harness.engine.participants(&id).await.unwrap().len(), 2);

    // Someone else adds carol; the change arrives through the event stream.
    harness
        .remote
        .add_participants(
            &id,
            vec![ParticipantRecord::new(id.clone(), ProfileId::new("carol"), "member")],
        )
        .await;
    harness.engine.synchronize_all().await.unwrap();

    let mut members: Vec<String> = harness
        .engine
        .participants(&id)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.profile_id.as_str().to_owned())
        .collect();
    members.sort();
    assert_eq!(members, vec!["bob", "carol", "me"]);
}
