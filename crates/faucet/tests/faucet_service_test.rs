//! End-to-end tests of the faucet service over a real sled database

use drip_common::utils::logging::init_test_logging;
use drip_common::Address;
use drip_faucet::{
    ClaimRules, Clock, Deployment, Event, FaucetDatabase, FaucetError, FaucetService, ManualClock,
};
use drip_token::{LedgerError, TokenMetadata, ONE_TOKEN};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

const DAY: u64 = 24 * 60 * 60;
const START: u64 = 1_700_000_000;

fn admin() -> Address {
    Address::from_low_u64(0xad)
}

fn token() -> Address {
    Address::from_low_u64(0xf7c)
}

fn user(n: u64) -> Address {
    Address::from_low_u64(n)
}

fn deployment() -> Deployment {
    Deployment {
        faucet: Address::from_low_u64(0xfa0ce7),
        token: token(),
        rules: ClaimRules::default(),
        metadata: TokenMetadata::default(),
    }
}

async fn setup_with(deployment: Deployment) -> (FaucetService, Arc<ManualClock>) {
    init_test_logging();
    let clock = Arc::new(ManualClock::new(START));
    let database = FaucetDatabase::temporary().unwrap();
    let service = FaucetService::bootstrap(deployment, admin(), database, clock.clone(), 64)
        .await
        .unwrap();
    (service, clock)
}

async fn setup() -> (FaucetService, Arc<ManualClock>) {
    setup_with(deployment()).await
}

#[tokio::test]
async fn test_first_claim() {
    let (service, _clock) = setup().await;
    let alice = user(1);

    assert!(service.can_claim(&alice).await);
    let receipt = service.request_tokens(&alice).await.unwrap();

    assert_eq!(receipt.amount, 100 * ONE_TOKEN);
    assert_eq!(receipt.timestamp, START);
    assert_eq!(receipt.balance, 100 * ONE_TOKEN);
    assert_eq!(receipt.remaining_allowance, 900 * ONE_TOKEN);
    assert_eq!(service.total_supply().await, 100 * ONE_TOKEN);
    assert!(!service.can_claim(&alice).await);
}

#[tokio::test]
async fn test_cooldown_then_retry() {
    let (service, clock) = setup().await;
    let alice = user(1);
    service.request_tokens(&alice).await.unwrap();

    clock.advance(60);
    let err = service.request_tokens(&alice).await.unwrap_err();
    assert!(matches!(err, FaucetError::CooldownActive { remaining_secs } if remaining_secs == DAY - 60));
    assert!(err.is_rate_limit());
    assert_eq!(service.cooldown_remaining(&alice).await, DAY - 60);

    clock.set(START + DAY + 1);
    service.request_tokens(&alice).await.unwrap();
    assert_eq!(service.balance_of(&alice).await, 200 * ONE_TOKEN);
    assert_eq!(service.claim_record(&alice).await.last_claim_at, START + DAY + 1);
}

#[tokio::test]
async fn test_ten_claims_reach_lifetime_cap() {
    let (service, clock) = setup().await;
    let alice = user(1);

    for _ in 0..10 {
        service.request_tokens(&alice).await.unwrap();
        clock.advance(DAY + 1);
    }

    assert_eq!(service.balance_of(&alice).await, 1_000 * ONE_TOKEN);
    assert_eq!(service.remaining_allowance(&alice).await, 0);
    assert!(!service.can_claim(&alice).await);

    let err = service.request_tokens(&alice).await.unwrap_err();
    assert!(matches!(err, FaucetError::LifetimeLimitReached));
    assert_eq!(service.balance_of(&alice).await, 1_000 * ONE_TOKEN);

    let status = service.get_status().await.unwrap();
    assert_eq!(status.total_claims, 10);
    assert_eq!(status.unique_claimers, 1);
    assert_eq!(status.total_distributed, 1_000 * ONE_TOKEN);
}

#[tokio::test]
async fn test_supply_ceiling() {
    let mut deployment = deployment();
    deployment.metadata.max_supply = 250 * ONE_TOKEN;
    let (service, _clock) = setup_with(deployment).await;

    service.request_tokens(&user(1)).await.unwrap();
    service.request_tokens(&user(2)).await.unwrap();
    let err = service.request_tokens(&user(3)).await.unwrap_err();

    assert!(matches!(err, FaucetError::SupplyExceeded { available, .. } if available == 50 * ONE_TOKEN));
    assert_eq!(service.total_supply().await, 200 * ONE_TOKEN);
    assert_eq!(service.claim_record(&user(3)).await.total_claimed, 0);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (service, clock) = setup().await;
    let alice = user(1);

    service.set_paused(&admin(), true).await.unwrap();
    assert!(!service.can_claim(&alice).await);
    let err = service.request_tokens(&alice).await.unwrap_err();
    assert!(matches!(err, FaucetError::FaucetPaused));

    clock.advance(10);
    service.set_paused(&admin(), false).await.unwrap();
    assert!(service.can_claim(&alice).await);
    service.request_tokens(&alice).await.unwrap();
}

#[tokio::test]
async fn test_admin_only_operations() {
    let (service, _clock) = setup().await;
    let mallory = user(0xbad);

    let err = service.set_paused(&mallory, true).await.unwrap_err();
    assert!(matches!(err, FaucetError::Unauthorized { caller } if caller == mallory));
    assert!(!service.faucet_state().await.is_paused);

    let err = service.set_token(&admin(), user(0x71)).await.unwrap_err();
    assert!(matches!(err, FaucetError::AlreadyConfigured(existing) if existing == token()));
}

#[tokio::test]
async fn test_claim_before_token_bound() {
    init_test_logging();
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(START));
    let database = FaucetDatabase::temporary().unwrap();
    let service = FaucetService::deploy(deployment(), admin(), database, clock, 16).unwrap();

    let err = service.request_tokens(&user(1)).await.unwrap_err();
    assert!(matches!(err, FaucetError::TokenNotConfigured));

    service.set_token(&admin(), token()).await.unwrap();
    service.request_tokens(&user(1)).await.unwrap();
}

#[tokio::test]
async fn test_addresses_are_independent() {
    let (service, clock) = setup().await;
    let alice = user(1);
    let bob = user(2);

    service.request_tokens(&alice).await.unwrap();
    clock.advance(5);
    service.request_tokens(&bob).await.unwrap();

    let account = service.account(&alice).await;
    assert_eq!(account.total_claimed, 100 * ONE_TOKEN);
    assert_eq!(account.cooldown_remaining, DAY - 5);
    assert!(!account.can_claim);

    let account = service.account(&bob).await;
    assert_eq!(account.last_claim_at, START + 5);
    assert_eq!(account.cooldown_remaining, DAY);
    assert_eq!(account.next_claim_at, Some(START + 5 + DAY));
    assert_eq!(service.next_claim_at(&user(3)).await, None);
}

#[tokio::test]
async fn test_concurrent_claims_grant_once() {
    let (service, _clock) = setup().await;
    let service = Arc::new(service);
    let alice = user(1);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.request_tokens(&alice).await })
        })
        .collect();

    let mut granted = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            granted += 1;
        }
    }

    assert_eq!(granted, 1);
    assert_eq!(service.balance_of(&alice).await, 100 * ONE_TOKEN);
}

#[tokio::test]
async fn test_transfer_and_allowance_flow() {
    let (service, _clock) = setup().await;
    let alice = user(1);
    let bob = user(2);
    let carol = user(3);
    service.request_tokens(&alice).await.unwrap();

    service.transfer(&alice, &bob, 10 * ONE_TOKEN).await.unwrap();
    assert_eq!(service.balance_of(&alice).await, 90 * ONE_TOKEN);
    assert_eq!(service.balance_of(&bob).await, 10 * ONE_TOKEN);

    service.approve(&alice, &carol, 30 * ONE_TOKEN).await.unwrap();
    service.transfer_from(&carol, &alice, &bob, 20 * ONE_TOKEN).await.unwrap();
    assert_eq!(service.allowance(&alice, &carol).await, 10 * ONE_TOKEN);
    assert_eq!(service.balance_of(&bob).await, 30 * ONE_TOKEN);

    let err = service.transfer_from(&carol, &alice, &bob, 20 * ONE_TOKEN).await.unwrap_err();
    assert!(matches!(err, FaucetError::Ledger(_)));
    assert_eq!(service.balance_of(&alice).await, 70 * ONE_TOKEN);
}

#[tokio::test]
async fn test_state_survives_restart() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("faucet");
    let path = path.to_str().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let alice = user(1);
    let bob = user(2);

    {
        let database = FaucetDatabase::new(path).unwrap();
        let service = FaucetService::bootstrap(deployment(), admin(), database, clock.clone(), 16)
            .await
            .unwrap();
        service.request_tokens(&alice).await.unwrap();
        service.approve(&alice, &bob, 5 * ONE_TOKEN).await.unwrap();
        service.set_paused(&admin(), true).await.unwrap();
    }

    let database = FaucetDatabase::new(path).unwrap();
    let service = FaucetService::open(database, clock.clone(), 16).unwrap();

    assert_eq!(service.balance_of(&alice).await, 100 * ONE_TOKEN);
    assert_eq!(service.allowance(&alice, &bob).await, 5 * ONE_TOKEN);
    assert_eq!(service.claim_record(&alice).await.last_claim_at, START);
    assert!(service.faucet_state().await.is_paused);
    assert_eq!(service.claim_history(&alice).unwrap().len(), 1);

    // Cooldown still applies after the restart
    service.set_paused(&admin(), false).await.unwrap();
    clock.advance(DAY - 1);
    let err = service.request_tokens(&alice).await.unwrap_err();
    assert!(matches!(err, FaucetError::CooldownActive { remaining_secs: 1 }));
}

#[tokio::test]
async fn test_open_without_deployment_fails() {
    let database = FaucetDatabase::temporary().unwrap();
    let result = FaucetService::open(database, Arc::new(ManualClock::new(START)), 16);
    assert!(matches!(result, Err(FaucetError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_subscribers_see_committed_events() {
    let (service, _clock) = setup().await;
    let alice = user(1);
    let mut all = service.subscribe(None);
    let mut only_bob = service.subscribe(Some(user(2)));

    service.request_tokens(&alice).await.unwrap();
    service.request_tokens(&user(2)).await.unwrap();

    let first = all.recv().await.unwrap();
    assert_eq!(
        first.event,
        Event::Transfer {
            from: Address::ZERO,
            to: alice,
            amount: 100 * ONE_TOKEN
        }
    );
    let second = all.recv().await.unwrap();
    assert!(matches!(second.event, Event::TokensClaimed { recipient, .. } if recipient == alice));
    assert!(second.sequence > first.sequence);

    for _ in 0..2 {
        let record = all.recv().await.unwrap();
        assert!(record.event.involves(&user(2)));
        let bobs = only_bob.recv().await.unwrap();
        assert_eq!(bobs, record);
    }

    // Rejected claims publish nothing
    let _ = service.request_tokens(&alice).await.unwrap_err();
    let quiet = Duration::from_millis(50);
    assert!(timeout(quiet, all.recv()).await.is_err());
    assert!(timeout(quiet, only_bob.recv()).await.is_err());

    let recent = service.recent_events(10).unwrap();
    assert_eq!(recent.len(), 5);
    assert!(matches!(recent[0].event, Event::TokensClaimed { recipient, .. } if recipient == user(2)));
}

#[tokio::test]
async fn test_zero_address_never_holds_tokens() {
    init_test_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("faucet");
    let path = path.to_str().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let alice = user(1);

    {
        let database = FaucetDatabase::new(path).unwrap();
        let service = FaucetService::bootstrap(deployment(), admin(), database, clock.clone(), 16)
            .await
            .unwrap();

        assert!(!service.can_claim(&Address::ZERO).await);
        let err = service.request_tokens(&Address::ZERO).await.unwrap_err();
        assert!(matches!(err, FaucetError::InvalidAddress(_)));

        service.request_tokens(&alice).await.unwrap();
        let err = service.transfer(&alice, &Address::ZERO, 40 * ONE_TOKEN).await.unwrap_err();
        assert!(matches!(err, FaucetError::Ledger(LedgerError::InvalidReceiver(_))));
        let err = service.transfer(&Address::ZERO, &alice, 0).await.unwrap_err();
        assert!(matches!(err, FaucetError::Ledger(LedgerError::InvalidSender(_))));

        assert_eq!(service.total_supply().await, 100 * ONE_TOKEN);
    }

    let database = FaucetDatabase::new(path).unwrap();
    let service = FaucetService::open(database, clock, 16).unwrap();

    assert_eq!(service.total_supply().await, 100 * ONE_TOKEN);
    assert_eq!(service.balance_of(&alice).await, 100 * ONE_TOKEN);
    assert_eq!(service.balance_of(&Address::ZERO).await, 0);
    assert_eq!(service.claim_record(&Address::ZERO).await.total_claimed, 0);
}

#[tokio::test]
async fn test_status_is_a_consistent_snapshot() {
    let (service, _clock) = setup().await;
    let service = Arc::new(service);

    let claims: Vec<_> = (1..=20)
        .map(|n| {
            let service = service.clone();
            tokio::spawn(async move { service.request_tokens(&user(n)).await })
        })
        .collect();
    let readers: Vec<_> = (0..20)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.get_status().await })
        })
        .collect();

    for handle in claims {
        handle.await.unwrap().unwrap();
    }
    for handle in readers {
        let status = handle.await.unwrap().unwrap();
        assert_eq!(status.total_supply, status.total_distributed);
        assert_eq!(status.total_claims as u128 * 100 * ONE_TOKEN, status.total_supply);
    }
}
