//! Timeout sweeper tests: abandonment, expiry, last-chance checks

mod common;

use common::*;
use payflow::engine::PaymentUpdate;
use payflow::sweeper;
use rusqlite::params;

#[tokio::test]
async fn abandoned_order_is_failed_once_after_threshold() {
    let app = test_app();
    let order = create_test_order(&app.state, "s1@example.com");
    backdate_order(&app.state, &order.order_number, 31 * 60);

    let report = sweeper::run_cycle(&app.state).await.unwrap();
    assert_eq!(report.abandoned, 1);
    assert_eq!(report.errors, 0);

    let conn = app.state.db.get().unwrap();
    let swept = queries::get_order(&conn, &order.order_number).unwrap().unwrap();
    assert_eq!(swept.payment_status, PaymentStatus::Failed);
    let abandoned_at = swept.abandoned_at.expect("abandoned_at must be stamped");
    drop(conn);

    // Redundant sweep: no second stamp, no state change.
    let report = sweeper::run_cycle(&app.state).await.unwrap();
    assert_eq!(report.abandoned, 0);

    let conn = app.state.db.get().unwrap();
    let again = queries::get_order(&conn, &order.order_number).unwrap().unwrap();
    assert_eq!(again.abandoned_at, Some(abandoned_at), "abandoned_at is set once");
    assert_eq!(
        app.notifier.sent_outcomes(&order.order_number),
        vec![Outcome::Rejected]
    );
}

#[tokio::test]
async fn fresh_order_is_not_swept() {
    let app = test_app();
    let order = create_test_order(&app.state, "s2@example.com");
    backdate_order(&app.state, &order.order_number, 5 * 60);

    let report = sweeper::run_cycle(&app.state).await.unwrap();
    assert_eq!(report.abandoned, 0);

    let conn = app.state.db.get().unwrap();
    let untouched = queries::get_order(&conn, &order.order_number).unwrap().unwrap();
    assert_eq!(untouched.payment_status, PaymentStatus::Pending);
    assert!(untouched.abandoned_at.is_none());
}

#[tokio::test]
async fn order_with_a_payment_is_not_treated_as_abandoned() {
    let app = test_app();
    let order = create_test_order(&app.state, "s3@example.com");
    backdate_order(&app.state, &order.order_number, 40 * 60);

    // A pending payment exists (recent), so the abandonment sweep skips it.
    app.state
        .engine
        .apply(PaymentUpdate::from_snapshot(
            order.order_number.clone(),
            &snapshot("PAY-20", &order.order_number, "pending"),
            UpdateSource::Webhook,
        ))
        .await
        .unwrap();

    let report = sweeper::run_cycle(&app.state).await.unwrap();
    assert_eq!(report.abandoned, 0);
    assert_eq!(report.expired, 0);
}

#[tokio::test]
async fn expired_pending_payment_is_force_failed_when_gateway_still_pending() {
    let app = test_app();
    let order = create_test_order(&app.state, "s4@example.com");
    app.state
        .engine
        .apply(PaymentUpdate::from_snapshot(
            order.order_number.clone(),
            &snapshot("PAY-21", &order.order_number, "pending"),
            UpdateSource::Webhook,
        ))
        .await
        .unwrap();
    backdate_payment(&app.state, "PAY-21", 25 * 60);
    app.gateway
        .script("PAY-21", Scripted::Snapshot(snapshot("PAY-21", &order.order_number, "pending")));

    let report = sweeper::run_cycle(&app.state).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.rescued, 0);

    let conn = app.state.db.get().unwrap();
    let swept = queries::get_order(&conn, &order.order_number).unwrap().unwrap();
    assert_eq!(swept.payment_status, PaymentStatus::Failed);

    let payment = queries::get_payment(&conn, "PAY-21").unwrap().unwrap();
    assert_eq!(payment.status, GatewayStatus::Rejected);
    assert_eq!(payment.status_detail.as_deref(), Some(sweeper::DETAIL_EXPIRED));
    assert_eq!(payment.source_verified, UpdateSource::Swept);
}

#[tokio::test]
async fn last_chance_check_rescues_a_slow_approval() {
    let app = test_app();
    let order = create_test_order(&app.state, "s5@example.com");
    app.state
        .engine
        .apply(PaymentUpdate::from_snapshot(
            order.order_number.clone(),
            &snapshot("PAY-22", &order.order_number, "pending"),
            UpdateSource::Webhook,
        ))
        .await
        .unwrap();
    backdate_payment(&app.state, "PAY-22", 25 * 60);

    // 25 minutes pending with a 20-minute card threshold, but the gateway
    // now says approved: the sweeper must write paid, not failed.
    app.gateway
        .script("PAY-22", Scripted::Snapshot(snapshot("PAY-22", &order.order_number, "approved")));

    let report = sweeper::run_cycle(&app.state).await.unwrap();
    assert_eq!(report.rescued, 1);
    assert_eq!(report.expired, 0);

    let conn = app.state.db.get().unwrap();
    let rescued = queries::get_order(&conn, &order.order_number).unwrap().unwrap();
    assert_eq!(rescued.payment_status, PaymentStatus::Paid);
    assert_eq!(rescued.status, OrderStatus::Confirmed);
    assert_eq!(
        app.notifier.sent_outcomes(&order.order_number),
        vec![Outcome::Pending, Outcome::Approved]
    );
}

#[tokio::test]
async fn gateway_failure_at_sweep_time_forces_rejection() {
    let app = test_app();
    let order = create_test_order(&app.state, "s6@example.com");
    app.state
        .engine
        .apply(PaymentUpdate::from_snapshot(
            order.order_number.clone(),
            &snapshot("PAY-23", &order.order_number, "pending"),
            UpdateSource::Polled,
        ))
        .await
        .unwrap();
    backdate_payment(&app.state, "PAY-23", 25 * 60);
    app.gateway.script("PAY-23", Scripted::Transient("gateway down"));

    let report = sweeper::run_cycle(&app.state).await.unwrap();
    assert_eq!(report.expired, 1);

    let conn = app.state.db.get().unwrap();
    let swept = queries::get_order(&conn, &order.order_number).unwrap().unwrap();
    assert_eq!(swept.payment_status, PaymentStatus::Failed);
}

#[tokio::test]
async fn slow_clearing_methods_get_the_longer_threshold() {
    let app = test_app();
    let order = create_test_order(&app.state, "s7@example.com");
    app.state
        .engine
        .apply(PaymentUpdate::from_snapshot(
            order.order_number.clone(),
            &snapshot("PAY-24", &order.order_number, "pending"),
            UpdateSource::Webhook,
        ))
        .await
        .unwrap();
    set_payment_method(&app.state, "PAY-24", "pse");
    backdate_payment(&app.state, "PAY-24", 25 * 60);

    // 25 minutes old: past the 20-minute card threshold but inside the
    // 45-minute bank threshold, so a PSE payment is left alone.
    let report = sweeper::run_cycle(&app.state).await.unwrap();
    assert_eq!(report.expired, 0);
    assert_eq!(app.gateway.fetch_count(), 0, "no gateway call for unexpired rows");

    // Past the bank threshold it expires like any other.
    backdate_payment(&app.state, "PAY-24", 46 * 60);
    app.gateway
        .script("PAY-24", Scripted::Snapshot(snapshot("PAY-24", &order.order_number, "pending")));
    let report = sweeper::run_cycle(&app.state).await.unwrap();
    assert_eq!(report.expired, 1);
}

#[tokio::test]
async fn one_bad_row_does_not_abort_the_cycle() {
    let app = test_app();
    let stuck = create_test_order(&app.state, "s8@example.com");
    let fine = create_test_order(&app.state, "s9@example.com");

    for (order, pay) in [(&stuck, "PAY-25"), (&fine, "PAY-26")] {
        app.state
            .engine
            .apply(PaymentUpdate::from_snapshot(
                order.order_number.clone(),
                &snapshot(pay, &order.order_number, "pending"),
                UpdateSource::Webhook,
            ))
            .await
            .unwrap();
        backdate_payment(&app.state, pay, 25 * 60);
    }

    // First row's gateway check blows up permanently; second row settles.
    app.gateway.script("PAY-25", Scripted::Permanent("bad id"));
    app.gateway
        .script("PAY-26", Scripted::Snapshot(snapshot("PAY-26", &fine.order_number, "approved")));

    let report = sweeper::run_cycle(&app.state).await.unwrap();
    // A failed last-chance check is itself a policy outcome (forced reject),
    // and the other row is still processed.
    assert_eq!(report.expired, 1);
    assert_eq!(report.rescued, 1);

    let conn = app.state.db.get().unwrap();
    assert_eq!(
        queries::get_order(&conn, &stuck.order_number).unwrap().unwrap().payment_status,
        PaymentStatus::Failed
    );
    assert_eq!(
        queries::get_order(&conn, &fine.order_number).unwrap().unwrap().payment_status,
        PaymentStatus::Paid
    );
}

#[tokio::test]
async fn stale_notification_claims_are_released() {
    let app = test_app();
    let order = create_test_order(&app.state, "s10@example.com");

    {
        let conn = app.state.db.get().unwrap();
        assert!(queries::claim_notification(&conn, &order.order_number, Outcome::Approved).unwrap());
        // Simulate a crash mid-delivery 20 minutes ago.
        conn.execute(
            "UPDATE notifications SET claimed_at = claimed_at - 1200
             WHERE order_number = ?1",
            params![order.order_number],
        )
        .unwrap();
    }

    let report = sweeper::run_cycle(&app.state).await.unwrap();
    assert_eq!(report.released_claims, 1);

    // The outcome can now be delivered.
    let gate = NotificationGate::new(
        app.state.db.clone(),
        app.notifier.clone() as std::sync::Arc<dyn NotificationSender>,
    );
    assert_eq!(
        gate.try_notify(&order, Outcome::Approved).await.unwrap(),
        NotifyStatus::Sent
    );
}
