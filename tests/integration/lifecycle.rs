//! Bet lifecycle through the public registry API.

use chrono::Duration;
use tokio_test::{assert_err, assert_ok};

use wager::clock::Clock;
use wager::engine::settlement::{DrawPolicy, SettlementConfig};
use wager::types::{BetStatus, Outcome, Side, WagerError};

use crate::support::{account, Service, FUNDING, STAKE};

#[tokio::test]
async fn test_short_wins_on_price_drop() {
    let svc = Service::new();
    let (alice, bob, carol) = (account("alice"), account("bob"), account("carol"));
    svc.fund(&alice);
    svc.fund(&bob);

    let id = svc.active_bet(&alice, &bob).await;
    assert_eq!(svc.ledger.escrow_balance(), 2 * STAKE);

    svc.set_price(20_000);
    svc.clock.advance(Duration::hours(2));

    let result = assert_ok!(svc.registry.close_bet(&carol, id).await);
    assert_eq!(result.outcome, Outcome::Winner(bob.clone()));
    assert_eq!(result.fee, 40);
    assert!(!result.resumed);

    assert_eq!(svc.ledger.balance_of(&bob), FUNDING - STAKE + 1_960);
    assert_eq!(svc.ledger.balance_of(&bob), 5_960);
    assert_eq!(svc.ledger.balance_of(&alice), FUNDING - STAKE);
    assert_eq!(svc.ledger.balance_of(&carol), 40);
    assert_eq!(svc.ledger.escrow_balance(), 0);

    let bet = svc.registry.get_bet(id).await.unwrap();
    assert_eq!(bet.status, BetStatus::Closed);
    assert_eq!(bet.winner, Some(Outcome::Winner(bob)));
}

#[tokio::test]
async fn test_long_wins_on_price_rise() {
    let svc = Service::new();
    let (alice, bob) = (account("alice"), account("bob"));
    svc.fund(&alice);
    svc.fund(&bob);

    let id = svc.active_bet(&alice, &bob).await;
    svc.set_price(30_000);
    svc.clock.advance(Duration::hours(2));

    let result = svc.registry.close_bet(&account("carol"), id).await.unwrap();
    assert_eq!(result.outcome, Outcome::Winner(alice.clone()));
    assert_eq!(svc.ledger.balance_of(&alice), FUNDING + STAKE - 40);
}

#[tokio::test]
async fn test_draw_under_both_policies() {
    for (policy, refund, fee) in [(DrawPolicy::SplitFee, 980, 40), (DrawPolicy::NoFee, 1_000, 0)] {
        let svc = Service::with_settlement(SettlementConfig {
            draw_policy: policy,
            ..SettlementConfig::default()
        });
        let (alice, bob, carol) = (account("alice"), account("bob"), account("carol"));
        svc.fund(&alice);
        svc.fund(&bob);

        let id = svc.active_bet(&alice, &bob).await;
        svc.clock.advance(Duration::hours(2));

        let result = svc.registry.close_bet(&carol, id).await.unwrap();
        assert_eq!(result.outcome, Outcome::Draw);
        assert_eq!(result.fee, fee);
        assert_eq!(svc.ledger.balance_of(&alice), FUNDING - STAKE + refund);
        assert_eq!(svc.ledger.balance_of(&bob), FUNDING - STAKE + refund);
        assert_eq!(svc.ledger.balance_of(&carol), fee);
        assert_eq!(svc.ledger.escrow_balance(), 0);
    }
}

#[tokio::test]
async fn test_rejected_transitions() {
    let svc = Service::new();
    let (alice, bob, dave) = (account("alice"), account("bob"), account("dave"));
    svc.fund(&alice);
    svc.fund(&bob);
    svc.fund(&dave);

    let now = svc.clock.now();
    let bad = svc
        .registry
        .create_bet(
            &alice,
            STAKE,
            now + Duration::hours(2),
            now + Duration::hours(1),
            Side::Short,
        )
        .await;
    assert!(matches!(bad, Err(WagerError::InvalidParameters(_))));

    let id = svc.active_bet(&alice, &bob).await;
    assert!(matches!(
        svc.registry.join_bet(&dave, id).await,
        Err(WagerError::InvalidState(_))
    ));
    assert!(matches!(
        svc.registry.close_bet(&dave, id).await,
        Err(WagerError::NotYetCloseable(_))
    ));

    svc.clock.advance(Duration::hours(2));
    assert_ok!(svc.registry.close_bet(&dave, id).await);
    let payouts = svc.ledger.payouts().len();
    assert!(matches!(
        svc.registry.close_bet(&dave, id).await,
        Err(WagerError::AlreadyClosed(_))
    ));
    assert_eq!(svc.ledger.payouts().len(), payouts);
}

#[tokio::test]
async fn test_join_after_deadline_expires() {
    let svc = Service::new();
    let (alice, bob) = (account("alice"), account("bob"));
    svc.fund(&alice);
    svc.fund(&bob);

    let now = svc.clock.now();
    let id = svc
        .registry
        .create_bet(
            &alice,
            STAKE,
            now + Duration::minutes(10),
            now + Duration::hours(1),
            Side::Long,
        )
        .await
        .unwrap();
    svc.clock.advance(Duration::minutes(10));

    assert_eq!(
        svc.registry.join_bet(&bob, id).await,
        Err(WagerError::Expired(id))
    );
    assert_eq!(svc.ledger.balance_of(&bob), FUNDING);
}

#[tokio::test]
async fn test_concurrent_manual_closes_settle_once() {
    let svc = Service::new();
    let (alice, bob) = (account("alice"), account("bob"));
    svc.fund(&alice);
    svc.fund(&bob);

    let id = svc.active_bet(&alice, &bob).await;
    svc.set_price(20_000);
    svc.clock.advance(Duration::hours(2));

    let (carol, dave) = (account("carol"), account("dave"));
    let (first, second) = tokio::join!(
        svc.registry.close_bet(&carol, id),
        svc.registry.close_bet(&dave, id),
    );
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);

    assert_eq!(svc.ledger.balance_of(&bob), 5_960);
    assert_eq!(
        svc.ledger.balance_of(&account("carol")) + svc.ledger.balance_of(&account("dave")),
        40
    );
}

#[tokio::test]
async fn test_failed_payout_is_resumed_by_manual_retry() {
    let svc = Service::new();
    let (alice, bob, carol) = (account("alice"), account("bob"), account("carol"));
    svc.fund(&alice);
    svc.fund(&bob);

    let id = svc.active_bet(&alice, &bob).await;
    svc.set_price(20_000);
    svc.clock.advance(Duration::hours(2));

    svc.faults.block(&bob);
    let err = assert_err!(svc.registry.close_bet(&carol, id).await);
    assert!(matches!(err, WagerError::PayoutFailure(_)));
    let bet = svc.registry.get_bet(id).await.unwrap();
    assert_eq!(bet.status, BetStatus::Active);
    assert!(bet.has_pending_settlement());

    // a later price move must not change the recorded outcome
    svc.set_price(40_000);
    svc.faults.unblock(&bob);
    let result = svc.registry.close_bet(&carol, id).await.unwrap();
    assert!(result.resumed);
    assert_eq!(result.outcome, Outcome::Winner(bob.clone()));
    assert_eq!(svc.ledger.balance_of(&bob), 5_960);
    assert_eq!(svc.ledger.balance_of(&carol), 40);
    assert_eq!(svc.ledger.escrow_balance(), 0);
}
