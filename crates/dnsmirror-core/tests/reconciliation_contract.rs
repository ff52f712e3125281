//! Contract Test: Post-Commit Reconciliation
//!
//! Verifies that committed mutations are confirmed against the store:
//! - The cache adopts the store listing once the change is visible
//! - Lagging listings are retried on the fixed delay, never reverted
//! - Verification gives up after the configured number of polls
//! - Switching zones aborts outstanding polls
//! - A partly applied batch still reconciles the part the store accepted

mod common;

use common::*;
use dnsmirror_core::{MutationState, NoticeLevel, RecordDraft, SessionConfig, SessionEvent};
use std::sync::Arc;
use std::time::Duration;

fn is_reconciled(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::MutationStateChanged {
            state: MutationState::Reconciled,
            ..
        }
    )
}

#[tokio::test(start_paused = true)]
async fn visible_add_reconciles_cache_with_store() {
    let store = Arc::new(MockRecordStore::new());
    let (session, mut events) = session_on(&store, test_config()).await;

    session
        .create_record(&RecordDraft::new("A", "fresh", "192.0.2.10"))
        .await
        .unwrap();
    wait_for_event(&mut events, is_reconciled).await;

    let mut cached = session.view().records;
    let mut remote = store.authoritative(ZONE_A);
    cached.sort_by(|a, b| a.id.cmp(&b.id));
    remote.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(cached, remote);
    assert_eq!(store.calls(Op::List), 2, "initial load plus one verification poll");
}

#[tokio::test(start_paused = true)]
async fn lagging_listing_is_polled_again() {
    let store = Arc::new(MockRecordStore::new());
    let (session, mut events) = session_on(&store, test_config()).await;

    store.freeze_listing(2);
    let created = session
        .create_record(&RecordDraft::new("A", "slow", "192.0.2.11"))
        .await
        .unwrap();

    let mut retries = 0;
    wait_for_event(&mut events, |e| {
        if matches!(e, SessionEvent::VerificationRetrying { .. }) {
            retries += 1;
            // optimistic state stays while polling
            assert!(session.view().records.iter().any(|r| r.id == created.id));
        }
        is_reconciled(e)
    })
    .await;

    assert_eq!(retries, 2);
    assert_eq!(store.calls(Op::List), 1 + 3);
    assert!(session.view().records.iter().any(|r| r.id == created.id));
}

#[tokio::test(start_paused = true)]
async fn retries_are_spaced_by_the_verify_delay() {
    let store = Arc::new(MockRecordStore::new());
    let (session, _events) = session_on(&store, test_config()).await;

    store.freeze_listing(100);
    session
        .create_record(&RecordDraft::new("A", "spaced", "192.0.2.12"))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.calls(Op::List), 2, "first poll runs immediately");

    tokio::time::sleep(Duration::from_millis(1400)).await;
    assert_eq!(store.calls(Op::List), 2);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.calls(Op::List), 3);
}

#[tokio::test(start_paused = true)]
async fn verification_gives_up_after_max_attempts() {
    let store = Arc::new(MockRecordStore::new());
    let config = SessionConfig {
        max_verify_attempts: 3,
        ..test_config()
    };
    let (session, _events) = session_on(&store, config).await;

    store.freeze_listing(100);
    let created = session
        .create_record(&RecordDraft::new("A", "never", "192.0.2.13"))
        .await
        .unwrap();

    wait_until(|| session.notices().iter().any(|n| n.level == NoticeLevel::Warning)).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(store.calls(Op::List), 1 + 3, "polling stops at the bound");
    assert_eq!(session.pending_verifications(), 0);
    assert!(
        session.view().records.iter().any(|r| r.id == created.id),
        "an unconfirmed change is not reverted"
    );
}

#[tokio::test(start_paused = true)]
async fn zone_switch_aborts_outstanding_verification() {
    let store = Arc::new(MockRecordStore::new());
    let (session, mut events) = session_on(&store, test_config()).await;

    store.freeze_listing(100);
    session
        .create_record(&RecordDraft::new("A", "orphan", "192.0.2.14"))
        .await
        .unwrap();
    assert_eq!(session.pending_verifications(), 1);

    session.select_zone(ZONE_B).await.unwrap();
    let calls_after_switch = store.calls(Op::List);
    assert_eq!(session.pending_verifications(), 0);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(store.calls(Op::List), calls_after_switch, "no polls after the switch");
    assert!(!drain(&mut events).iter().any(is_reconciled));
}

#[tokio::test(start_paused = true)]
async fn remote_errors_raise_one_stale_notice() {
    let store = Arc::new(MockRecordStore::new());
    let (session, mut events) = session_on(&store, test_config()).await;

    for _ in 0..3 {
        store.fail_next(Op::List, Failure::Remote);
    }
    session
        .create_record(&RecordDraft::new("A", "flaky", "192.0.2.15"))
        .await
        .unwrap();
    wait_for_event(&mut events, is_reconciled).await;

    let stale_notices = session
        .notices()
        .iter()
        .filter(|n| n.level == NoticeLevel::Info && n.message.contains("cached"))
        .count();
    assert_eq!(stale_notices, 1);
    assert_eq!(store.calls(Op::List), 1 + 4);
}

#[tokio::test(start_paused = true)]
async fn network_errors_retry_silently() {
    let store = Arc::new(MockRecordStore::new());
    let (session, mut events) = session_on(&store, test_config()).await;
    drain(&mut events);

    store.fail_next(Op::List, Failure::Network);
    session
        .create_record(&RecordDraft::new("A", "quiet", "192.0.2.16"))
        .await
        .unwrap();
    wait_for_event(&mut events, is_reconciled).await;

    assert!(
        !session
            .notices()
            .iter()
            .any(|n| n.level == NoticeLevel::Info || n.level == NoticeLevel::Warning)
    );
}

#[tokio::test(start_paused = true)]
async fn unauthorized_poll_stops_verification() {
    let store = Arc::new(MockRecordStore::new());
    let (session, mut events) = session_on(&store, test_config()).await;

    store.fail_next(Op::List, Failure::Unauthorized);
    let created = session
        .create_record(&RecordDraft::new("A", "locked", "192.0.2.17"))
        .await
        .unwrap();
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::AuthenticationRequired)).await;

    assert!(session.auth_required());
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(store.calls(Op::List), 2);
    assert!(session.view().records.iter().any(|r| r.id == created.id));
}

#[tokio::test(start_paused = true)]
async fn partial_batch_delete_reconciles_accepted_deletes() {
    let store = Arc::new(MockRecordStore::new());
    let (session, mut events) = session_on(&store, test_config()).await;
    for raw in ["r1", "r2", "r3"] {
        session.toggle_selection(&id(raw));
    }

    store.fail_after(Op::Delete, 1, Failure::Remote);
    assert!(session.delete_selected().await.is_err());

    // everything is back locally right after the failure
    let visible = session.view().visible_ids();
    for raw in ["r1", "r2", "r3"] {
        assert!(visible.contains(&id(raw)));
        assert!(session.is_selected(&id(raw)));
    }
    assert!(!store.authoritative(ZONE_A).iter().any(|r| r.id == id("r1")));

    // the delete the store accepted is confirmed and applied
    wait_until(|| !session.view().visible_ids().contains(&id("r1"))).await;
    assert!(!session.is_selected(&id("r1")));
    assert!(session.is_selected(&id("r2")));
    assert!(session.is_selected(&id("r3")));
    assert!(
        !drain(&mut events).iter().any(is_reconciled),
        "a rolled-back batch is not reported as reconciled"
    );
}

#[tokio::test(start_paused = true)]
async fn batch_delete_reconciles_and_empties_selection() {
    let store = Arc::new(MockRecordStore::new());
    let (session, mut events) = session_on(&store, test_config()).await;
    for raw in ["r5", "r6"] {
        session.toggle_selection(&id(raw));
    }

    assert_eq!(session.delete_selected().await.unwrap(), 2);
    assert!(session.selected_ids().is_empty());
    wait_for_event(&mut events, is_reconciled).await;

    assert_eq!(session.view().page.total_count, 5);
    assert_eq!(store.calls(Op::Delete), 2);
}

#[tokio::test(start_paused = true)]
async fn confirmed_listing_clears_the_stale_flag() {
    let store = Arc::new(MockRecordStore::new());
    let (session, mut events) = session_on(&store, test_config()).await;

    store.fail_next(Op::List, Failure::Remote);
    session.refresh(true).await.unwrap();
    assert!(session.is_stale());

    session
        .create_record(&RecordDraft::new("A", "recovered", "192.0.2.18"))
        .await
        .unwrap();
    wait_for_event(&mut events, is_reconciled).await;

    assert!(!session.is_stale(), "the cache now holds the store's listing");
}

#[tokio::test(start_paused = true)]
async fn failing_polls_mark_the_view_stale() {
    let store = Arc::new(MockRecordStore::new());
    let config = SessionConfig {
        max_verify_attempts: 2,
        ..test_config()
    };
    let (session, mut events) = session_on(&store, config).await;
    assert!(!session.is_stale());

    store.fail_next(Op::List, Failure::Remote);
    store.fail_next(Op::List, Failure::Remote);
    session
        .create_record(&RecordDraft::new("A", "cloudy", "192.0.2.19"))
        .await
        .unwrap();
    wait_for_event(&mut events, |e| matches!(e, SessionEvent::StaleData { .. })).await;

    assert!(session.is_stale(), "flag and notice must agree");
    wait_until(|| session.notices().iter().any(|n| n.level == NoticeLevel::Warning)).await;
    assert!(session.is_stale());
}
