//! Autonomous closer against a full service.

use chrono::Duration;
use std::time::Duration as StdDuration;

use wager::types::{BetStatus, Outcome, WagerError};

use crate::support::{account, Service, FUNDING, STAKE};

const TIMEOUT: StdDuration = StdDuration::from_secs(5);

#[tokio::test]
async fn test_one_failing_bet_does_not_block_the_rest() {
    let svc = Service::new();
    let pairs = [("a0", "b0"), ("a1", "blocked"), ("a2", "b2")];
    let mut ids = Vec::new();
    for (a, b) in pairs {
        let (a, b) = (account(a), account(b));
        svc.fund(&a);
        svc.fund(&b);
        ids.push(svc.active_bet(&a, &b).await);
    }
    svc.set_price(20_000);
    svc.clock.advance(Duration::hours(2));
    svc.faults.block(&account("blocked"));

    let scheduler = svc.scheduler(TIMEOUT);
    let report = scheduler.tick().await;

    assert_eq!(report.eligible, 3);
    assert_eq!(report.closed, vec![ids[0], ids[2]]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, ids[1]);
    assert!(report.failed[0].1.contains("Payout failed"));

    for id in [ids[0], ids[2]] {
        let bet = svc.registry.get_bet(id).await.unwrap();
        assert_eq!(bet.status, BetStatus::Closed);
    }
    let stuck = svc.registry.get_bet(ids[1]).await.unwrap();
    assert_eq!(stuck.status, BetStatus::Active);

    // the stuck bet is retried on the next tick and resumes its settlement
    svc.faults.unblock(&account("blocked"));
    let report = scheduler.tick().await;
    assert_eq!(report.closed, vec![ids[1]]);
    let bet = svc.registry.get_bet(ids[1]).await.unwrap();
    assert_eq!(bet.winner, Some(Outcome::Winner(account("blocked"))));

    assert_eq!(svc.ledger.balance_of(&account("closer")), 3 * 40);
    assert_eq!(svc.ledger.balance_of(&account("blocked")), FUNDING - STAKE + 1_960);
    assert_eq!(svc.ledger.escrow_balance(), 0);
}

#[tokio::test]
async fn test_nothing_due_means_nothing_closed() {
    let svc = Service::new();
    let (alice, bob) = (account("alice"), account("bob"));
    svc.fund(&alice);
    svc.fund(&bob);
    let id = svc.active_bet(&alice, &bob).await;

    let report = svc.scheduler(TIMEOUT).tick().await;
    assert_eq!(report.scanned, 1);
    assert_eq!(report.eligible, 0);
    assert!(report.is_clean());
    assert_eq!(
        svc.registry.get_bet(id).await.unwrap().status,
        BetStatus::Active
    );
}

#[tokio::test]
async fn test_slow_close_times_out_without_double_pay() {
    let svc = Service::new();
    let (alice, bob) = (account("alice"), account("bob"));
    svc.fund(&alice);
    svc.fund(&bob);
    let id = svc.active_bet(&alice, &bob).await;
    svc.set_price(20_000);
    svc.clock.advance(Duration::hours(2));
    svc.faults.delay_payouts(StdDuration::from_millis(200));

    let scheduler = svc.scheduler(StdDuration::from_millis(50));
    let report = scheduler.tick().await;
    assert_eq!(report.timed_out, vec![id]);
    assert_eq!(scheduler.in_flight(), 1);

    // the background close still holds the bet
    let report = scheduler.tick().await;
    assert_eq!(report.busy, vec![id]);
    assert!(report.closed.is_empty());

    tokio::time::sleep(StdDuration::from_millis(800)).await;
    let report = scheduler.tick().await;
    assert_eq!(report.eligible, 0);
    assert_eq!(scheduler.in_flight(), 0);

    assert_eq!(
        svc.registry.get_bet(id).await.unwrap().status,
        BetStatus::Closed
    );
    assert_eq!(svc.ledger.payouts().len(), 2);
    assert_eq!(svc.ledger.balance_of(&bob), 5_960);
}

#[tokio::test]
async fn test_stop_waits_for_background_closes() {
    let svc = Service::new();
    let (alice, bob) = (account("alice"), account("bob"));
    svc.fund(&alice);
    svc.fund(&bob);
    let id = svc.active_bet(&alice, &bob).await;
    svc.clock.advance(Duration::hours(2));
    svc.faults.delay_payouts(StdDuration::from_millis(150));

    let handle = svc.scheduler(StdDuration::from_millis(20)).start();
    tokio::time::sleep(StdDuration::from_millis(60)).await;
    handle.stop().await;

    let bet = svc.registry.get_bet(id).await.unwrap();
    assert_eq!(bet.status, BetStatus::Closed);
    assert_eq!(bet.winner, Some(Outcome::Draw));
    assert_eq!(svc.ledger.escrow_balance(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manual_close_racing_a_tick_settles_once() {
    let svc = Service::new();
    let (alice, bob, carol) = (account("alice"), account("bob"), account("carol"));
    svc.fund(&alice);
    svc.fund(&bob);
    let id = svc.active_bet(&alice, &bob).await;
    svc.set_price(20_000);
    svc.clock.advance(Duration::hours(2));
    svc.faults.delay_payouts(StdDuration::from_millis(50));

    let scheduler = svc.scheduler(TIMEOUT);
    let tick = tokio::spawn({
        let scheduler = scheduler.clone();
        async move { scheduler.tick().await }
    });
    let manual = tokio::spawn({
        let registry = svc.registry.clone();
        async move { registry.close_bet(&carol, id).await }
    });
    let report = tick.await.unwrap();
    let manual = manual.await.unwrap();

    let tick_settled = report.closed == vec![id];
    let manual_settled = manual.is_ok();
    assert!(tick_settled ^ manual_settled, "exactly one close must settle");
    if tick_settled {
        assert!(matches!(manual, Err(WagerError::AlreadyClosed(x)) if x == id));
    } else {
        let lost = report.busy == vec![id]
            || report.eligible == 0
            || report.failed.iter().any(|(x, _)| *x == id);
        assert!(lost, "unexpected tick report: {report:?}");
    }

    assert_eq!(svc.ledger.payouts().len(), 2);
    assert_eq!(svc.ledger.balance_of(&bob), 5_960);
    let fees = svc.ledger.balance_of(&account("closer"))
        + svc.ledger.balance_of(&account("carol"));
    assert_eq!(fees, 40);
    assert_eq!(svc.ledger.escrow_balance(), 0);
    assert_eq!(
        svc.registry.get_bet(id).await.unwrap().status,
        BetStatus::Closed
    );
}
