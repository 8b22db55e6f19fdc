use async_trait::async_trait;
use gatekeeper::config::{build_store, Environment, LimiterConfig, RemoteStoreConfig};
use gatekeeper::{
    AdmissionController, CounterStore, FailureMode, FallbackCounterStore, InMemoryCounterStore,
    ManualClock, Policy, StoreError,
};
use std::sync::Arc;
use std::time::Duration;

const IP: &str = "1.2.3.4";

fn in_process(now: u64) -> (AdmissionController, ManualClock) {
    let clock = ManualClock::new(now);
    let store = InMemoryCounterStore::with_clock(Arc::new(clock.clone()));
    (AdmissionController::with_clock(Arc::new(store), Arc::new(clock.clone())), clock)
}

#[derive(Debug)]
struct DownStore;

#[async_trait]
impl CounterStore for DownStore {
    async fn increment(&self, _key: &str, _ttl_secs: u64) -> Result<u64, StoreError> {
        Err(StoreError::Status { status: 503, body: "maintenance".into() })
    }
}

async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

#[tokio::test]
async fn sixty_per_minute_scenario() {
    // Mid-window so a 61 second jump always lands in a later window.
    let (controller, clock) = in_process(1_700_000_010);
    let policy = Policy::new(60, 60, "api").unwrap();

    let mut last_remaining = None;
    for i in 1..=60u64 {
        let d = controller.check(&policy, "default", IP).await.unwrap();
        assert!(d.allowed, "check {i} should be allowed");
        assert_eq!(d.total, i);
        assert_eq!(d.remaining, 60 - i);
        if let Some(prev) = last_remaining {
            assert!(d.remaining < prev, "remaining strictly decreases");
        }
        last_remaining = Some(d.remaining);
    }
    assert_eq!(last_remaining, Some(0));

    let denied = controller.check(&policy, "default", IP).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.total, 61);
    assert_eq!(denied.remaining, 0);

    clock.advance(61);
    let fresh = controller.check(&policy, "default", IP).await.unwrap();
    assert!(fresh.allowed);
    assert_eq!(fresh.total, 1);
    assert!(fresh.reset_at > denied.reset_at);
}

#[tokio::test]
async fn identities_do_not_share_counters() {
    let (controller, _clock) = in_process(0);
    let policy = Policy::new(2, 60, "api").unwrap();

    for _ in 0..3 {
        controller.check(&policy, "default", "alice").await.unwrap();
    }
    let bob = controller.check(&policy, "default", "bob").await.unwrap();
    assert!(bob.allowed);
    assert_eq!(bob.total, 1);
}

#[tokio::test]
async fn reset_is_end_of_window() {
    let (controller, _clock) = in_process(125);
    let policy = Policy::new(10, 60, "api").unwrap();
    let d = controller.check(&policy, "default", IP).await.unwrap();
    assert_eq!(d.reset_at, 180);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_checks_never_exceed_limit() {
    let (controller, _clock) = in_process(1_000);
    let policy = Arc::new(Policy::new(100, 60, "api").unwrap());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let controller = controller.clone();
        let policy = policy.clone();
        handles.push(tokio::spawn(async move {
            let mut allowed = 0u64;
            for _ in 0..25 {
                if controller.check(&policy, "default", IP).await.unwrap().allowed {
                    allowed += 1;
                }
            }
            allowed
        }));
    }

    let results = futures::future::join_all(handles).await;
    let allowed: u64 = results.into_iter().map(|r| r.unwrap()).sum();
    assert_eq!(allowed, 100);
}

#[tokio::test]
async fn development_store_outage_falls_back() {
    let config = LimiterConfig {
        environment: Environment::Development,
        remote: Some(
            RemoteStoreConfig::new(unreachable_url().await, "token")
                .with_timeout(Duration::from_millis(500)),
        ),
        failure_mode: None,
    };
    let controller = AdmissionController::new(build_store(&config).unwrap());
    let policy = Policy::new(2, 60, "api").unwrap();

    let first = controller.check(&policy, "default", IP).await.unwrap();
    let second = controller.check(&policy, "default", IP).await.unwrap();
    let third = controller.check(&policy, "default", IP).await.unwrap();
    assert_eq!((first.total, second.total, third.total), (1, 2, 3));
    assert!(first.allowed && second.allowed && !third.allowed);
}

#[tokio::test]
async fn production_store_outage_is_an_error() {
    let config = LimiterConfig {
        environment: Environment::Production,
        remote: Some(
            RemoteStoreConfig::new(unreachable_url().await, "token")
                .with_timeout(Duration::from_millis(500)),
        ),
        failure_mode: None,
    };
    let controller = AdmissionController::new(build_store(&config).unwrap());
    let policy = Policy::new(2, 60, "api").unwrap();

    let err = controller.check(&policy, "default", IP).await.unwrap_err();
    assert!(matches!(err, StoreError::Transport(_)), "unexpected error: {err:?}");
}

#[tokio::test]
async fn check_propagates_store_errors_unchanged() {
    let store = FallbackCounterStore::new(DownStore, FailureMode::FailLoud);
    let controller = AdmissionController::new(Arc::new(store));
    let policy = Policy::new(5, 60, "api").unwrap();

    assert_eq!(
        controller.check(&policy, "default", IP).await,
        Err(StoreError::Status { status: 503, body: "maintenance".into() })
    );
}
