//! Rate-limit behavior through the public surface, on the in-process backend.

use std::sync::Arc;
use std::time::Duration;

use gatehouse::backend::MemoryBackend;
use gatehouse::cache::CacheConfig;
use gatehouse::clock::{Clock, ManualClock};
use gatehouse::guard::{COMMENTING_POLICY, POSTING_POLICY, READ_POLICY};
use gatehouse::{Gatehouse, Identity, Policy, RateLimiter};

/// Aligned on every built-in window so offsets map directly onto buckets.
const START: i64 = 1_700_000_400;

fn policy(max_requests: u32, window_seconds: u32) -> Policy {
    Policy::new(max_requests, window_seconds).expect("valid policy")
}

fn gatehouse_at(start: i64) -> (Gatehouse, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_unix(start));
    let backend = Arc::new(MemoryBackend::new(clock.clone()));
    let gatehouse = Gatehouse::assemble(
        backend,
        clock.clone(),
        CacheConfig::default(),
        [
            (READ_POLICY, policy(50, 40)),
            (POSTING_POLICY, policy(1, 10)),
            (COMMENTING_POLICY, policy(6, 120)),
        ],
    );
    (gatehouse, clock)
}

#[tokio::test]
async fn posting_allows_one_per_ten_seconds() {
    let (gatehouse, clock) = gatehouse_at(START);
    let user = Identity::User("42".to_string());

    let first = gatehouse
        .guard
        .check(POSTING_POLICY, &user)
        .await
        .expect("known policy");
    assert!(first.allowed);

    clock.advance(Duration::from_secs(1));
    let second = gatehouse
        .guard
        .check(POSTING_POLICY, &user)
        .await
        .expect("known policy");
    assert!(!second.allowed);
    assert_eq!(second.retry_after, Some(Duration::from_secs(9)));

    clock.advance(Duration::from_secs(10));
    let third = gatehouse
        .guard
        .check(POSTING_POLICY, &user)
        .await
        .expect("known policy");
    assert!(third.allowed);
}

#[tokio::test]
async fn request_past_limit_is_rejected_within_window() {
    let (gatehouse, _clock) = gatehouse_at(START);
    let reader = Identity::Ip("203.0.113.9".parse().expect("ip"));
    let read = gatehouse.guard.resolve(READ_POLICY).expect("read policy");

    for attempt in 1..=50 {
        assert!(read.check(&reader).await.allowed, "attempt {attempt}");
    }
    let over = read.check(&reader).await;
    assert!(!over.allowed);
    assert_eq!(over.retry_after_secs(), Some(40));
}

#[tokio::test]
async fn identities_and_actions_do_not_share_counters() {
    let (gatehouse, _clock) = gatehouse_at(START);
    let alice = Identity::User("alice".to_string());
    let bob = Identity::User("bob".to_string());

    let alice_posts = gatehouse.guard.check(POSTING_POLICY, &alice).await;
    assert!(alice_posts.expect("known").allowed);
    assert!(
        !gatehouse
            .guard
            .check(POSTING_POLICY, &alice)
            .await
            .expect("known")
            .allowed
    );

    assert!(
        gatehouse
            .guard
            .check(POSTING_POLICY, &bob)
            .await
            .expect("known")
            .allowed
    );
    assert!(
        gatehouse
            .guard
            .check(COMMENTING_POLICY, &alice)
            .await
            .expect("known")
            .allowed
    );
}

#[tokio::test]
async fn unknown_policy_is_a_configuration_error() {
    let (gatehouse, _clock) = gatehouse_at(START);
    let user = Identity::User("42".to_string());

    assert!(gatehouse.guard.check("voting", &user).await.is_err());
    assert!(gatehouse.guard.resolve("voting").is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_exceed_the_limit() {
    let clock = Arc::new(ManualClock::at_unix(START));
    let backend = Arc::new(MemoryBackend::new(clock.clone()));
    let limiter = RateLimiter::new(backend, clock as Arc<dyn Clock>);
    let policy = policy(10, 60);

    let mut tasks = Vec::new();
    for _ in 0..64 {
        let limiter = limiter.clone();
        tasks.push(tokio::spawn(async move {
            limiter.allow("comment", "user:7", &policy).await
        }));
    }

    let mut admitted = 0;
    for task in tasks {
        if task.await.expect("task completes") {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);
}

#[tokio::test]
async fn verdict_reports_remaining_quota() {
    let clock = Arc::new(ManualClock::at_unix(START + 5));
    let backend = Arc::new(MemoryBackend::new(clock.clone()));
    let limiter = RateLimiter::new(backend, clock);
    let policy = policy(3, 40);

    let verdict = limiter.check("read", "ip:10.0.0.1", &policy).await;
    assert!(verdict.allowed);
    assert_eq!(verdict.count, Some(1));
    assert_eq!(verdict.remaining(), 2);
    assert_eq!(verdict.resets_in, Duration::from_secs(35));
}
