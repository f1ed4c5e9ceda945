pub mod common;

use attendance_ledger::{
    db::batch::Status,
    ledger::{ApplyDeltaError, OutOfBounds},
};

#[tokio::test]
async fn admits_within_remaining() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 10)]).await;

    let checkin = ledger
        .apply_delta(&"T-1".into(), 3, Some("gate-1"), Some("family"))
        .await
        .unwrap();

    assert_eq!(checkin.checked_in, 3);
    assert_eq!(checkin.remaining, 7);
    assert_eq!(checkin.message, "Checked in 3. Now 3/10.");

    let history = ledger.history(&"T-1".into()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].count, 3);
    assert_eq!(history[0].verifier.as_deref(), Some("gate-1"));
    assert_eq!(history[0].notes.as_deref(), Some("family"));
    assert_eq!(history[0].status, Status::Active);
}

#[tokio::test]
async fn rejects_admit_beyond_remaining() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 4)]).await;
    ledger.apply_delta(&"T-1".into(), 3, None, None).await.unwrap();

    let err = ledger
        .apply_delta(&"T-1".into(), 2, None, None)
        .await
        .unwrap_err();

    assert!(err.is_rejection());
    assert!(matches!(
        err,
        ApplyDeltaError::OutOfBounds(OutOfBounds::NotEnoughRemaining {
            requested: 2,
            remaining: 1,
        }),
    ));
    assert_eq!(err.to_string(), "Only 1 remaining.");

    let summary = ledger.get_ticket(&"T-1".into()).await.unwrap();
    assert_eq!(summary.checked_in, 3);
    assert_eq!(summary.remaining, 1);
    assert_eq!(ledger.history(&"T-1".into()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn rewinds_within_checked_in() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 10)]).await;
    ledger.apply_delta(&"T-1".into(), 5, None, None).await.unwrap();

    let checkin = ledger
        .apply_delta(&"T-1".into(), -2, Some("gate-2"), None)
        .await
        .unwrap();

    assert_eq!(checkin.checked_in, 3);
    assert_eq!(checkin.remaining, 7);
    assert_eq!(checkin.message, "Rewound 2. Now 3/10.");
}

#[tokio::test]
async fn rejects_rewind_beyond_checked_in() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 10)]).await;
    ledger.apply_delta(&"T-1".into(), 2, None, None).await.unwrap();

    let err = ledger
        .apply_delta(&"T-1".into(), -3, None, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ApplyDeltaError::OutOfBounds(OutOfBounds::NotEnoughCheckedIn {
            requested: 3,
            checked_in: 2,
        }),
    ));
    assert_eq!(
        err.to_string(),
        "Cannot rewind 3; only 2 already checked in.",
    );

    let summary = ledger.get_ticket(&"T-1".into()).await.unwrap();
    assert_eq!(summary.checked_in, 2);
    let history = ledger.history(&"T-1".into()).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, Status::Active);
}

#[tokio::test]
async fn rejects_zero_delta() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 10)]).await;

    let err = ledger
        .apply_delta(&"T-1".into(), 0, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ApplyDeltaError::NoChangeRequested));
    assert_eq!(err.to_string(), "No change requested.");
}

#[tokio::test]
async fn rejects_unknown_ticket() {
    let ledger = common::ledger_with(&[]).await;

    let err = ledger
        .apply_delta(&"missing".into(), 1, None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, ApplyDeltaError::TicketNotFound));
    assert!(err.is_rejection());
}

#[tokio::test]
async fn rejects_delta_beyond_count_range() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 10)]).await;

    let err = ledger
        .apply_delta(&"T-1".into(), i64::MAX, None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApplyDeltaError::OutOfBounds(OutOfBounds::NotEnoughRemaining { .. }),
    ));

    let err = ledger
        .apply_delta(&"T-1".into(), i64::MIN, None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApplyDeltaError::OutOfBounds(OutOfBounds::NotEnoughCheckedIn { .. }),
    ));
}

#[tokio::test]
async fn rewinds_most_recent_batches_first() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 10)]).await;
    for delta in [5, 3, 2] {
        ledger
            .apply_delta(&"T-1".into(), delta, Some("gate-1"), None)
            .await
            .unwrap();
    }

    let checkin = ledger
        .apply_delta(&"T-1".into(), -4, Some("gate-2"), None)
        .await
        .unwrap();
    assert_eq!(checkin.checked_in, 6);

    let history = ledger.history(&"T-1".into()).await.unwrap();
    assert_eq!(history.len(), 3);

    assert_eq!(history[0].count, 5);
    assert_eq!(history[0].status, Status::Active);

    assert_eq!(history[1].count, 1);
    assert_eq!(history[1].status, Status::Active);

    assert_eq!(history[2].count, 2);
    assert!(matches!(
        &history[2].status,
        Status::Revoked { by: Some(by), .. } if by == "gate-2",
    ));
}

#[tokio::test]
async fn rewinding_everything_revokes_every_batch() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 10)]).await;
    for delta in [4, 1] {
        ledger.apply_delta(&"T-1".into(), delta, None, None).await.unwrap();
    }

    let checkin = ledger
        .apply_delta(&"T-1".into(), -5, None, None)
        .await
        .unwrap();
    assert_eq!(checkin.checked_in, 0);
    assert_eq!(checkin.remaining, 10);

    let history = ledger.history(&"T-1".into()).await.unwrap();
    assert!(history.iter().all(|b| !b.is_active()));
    // Revoked batches keep their count for audit.
    assert_eq!(history[0].count, 4);
    assert_eq!(history[1].count, 1);
}

#[tokio::test]
async fn follows_admission_scenario() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 10)]).await;
    let id = "T-1".into();

    let checkin = ledger.apply_delta(&id, 3, None, None).await.unwrap();
    assert_eq!((checkin.checked_in, checkin.remaining), (3, 7));

    let checkin = ledger.apply_delta(&id, 5, None, None).await.unwrap();
    assert_eq!((checkin.checked_in, checkin.remaining), (8, 2));

    let err = ledger.apply_delta(&id, 5, None, None).await.unwrap_err();
    assert!(err.to_string().contains('2'));
    assert_eq!(ledger.get_ticket(&id).await.unwrap().checked_in, 8);

    let checkin = ledger.apply_delta(&id, -2, None, None).await.unwrap();
    assert_eq!((checkin.checked_in, checkin.remaining), (6, 4));
}

#[tokio::test]
async fn admits_all_remaining() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 6)]).await;
    ledger.apply_delta(&"T-1".into(), 2, None, None).await.unwrap();

    let checkin = ledger
        .admit_remaining(&"T-1".into(), Some("gate-1"), None)
        .await
        .unwrap();
    assert_eq!(checkin.checked_in, 6);
    assert_eq!(checkin.remaining, 0);
    assert_eq!(checkin.message, "Checked in 4. Now 6/6.");

    let err = ledger
        .admit_remaining(&"T-1".into(), Some("gate-1"), None)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Only 0 remaining.");
}

#[tokio::test]
async fn touches_last_updated_at() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 2)]).await;
    let before = ledger.get_ticket(&"T-1".into()).await.unwrap();

    ledger.apply_delta(&"T-1".into(), 1, None, None).await.unwrap();

    let after = ledger.get_ticket(&"T-1".into()).await.unwrap();
    assert!(after.ticket.last_updated_at > before.ticket.last_updated_at);
}

#[tokio::test]
async fn keeps_counts_within_bounds() {
    let ledger = common::ledger_with(&[common::ticket("T-1", "Alice", 7)]).await;
    let id = "T-1".into();

    for delta in [3, 5, -1, 4, -9, 2, -2, 8, 7, 1, -7, -1, 6, 2, -3] {
        let before = ledger.get_ticket(&id).await.unwrap();
        let result = ledger.apply_delta(&id, delta, None, None).await;
        let after = ledger.get_ticket(&id).await.unwrap();

        assert!(after.checked_in <= after.ticket.purchased_count);
        assert_eq!(after.checked_in + after.remaining, 7);
        match result {
            Ok(checkin) => {
                assert_eq!(
                    i64::from(after.checked_in),
                    i64::from(before.checked_in) + delta,
                );
                assert_eq!(checkin.checked_in, after.checked_in);
            }
            Err(e) => {
                assert!(e.is_rejection());
                assert_eq!(after.checked_in, before.checked_in);
            }
        }
    }
}
