// ABOUTME: Rate limiting tests for the pure decision core and the keyed window store
// ABOUTME: Covers purity, window rollover, burst admission, delay, and merge semantics
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use std::time::Duration;

use apigate::rate_limiting::{
    calculate_delay, check, merge, truncate_to_window, RateLimitQuota, WindowState, WindowStore,
};

const QUOTA: RateLimitQuota = RateLimitQuota {
    limit: 60,
    window_seconds: 60,
    burst_tokens: 2,
};

const NOW: i64 = 1_700_000_010;

#[test]
fn check_is_pure() {
    let state = WindowState {
        count: 17,
        window_end: 1_700_000_040,
        burst_used: 1,
    };
    let first = check(state, &QUOTA, NOW);
    let second = check(state, &QUOTA, NOW);
    assert_eq!(first, second);
}

#[test]
fn fresh_state_resets_to_truncated_window() {
    let (decision, state) = check(WindowState::default(), &QUOTA, NOW);
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 59);
    assert_eq!(state.count, 1);
    assert_eq!(state.window_end, truncate_to_window(NOW, 60) + 60);
    assert_eq!(state.burst_used, 0);
}

#[test]
fn window_rollover_resets_counters() {
    let stale = WindowState {
        count: 60,
        window_end: NOW - 1,
        burst_used: 2,
    };
    let (decision, state) = check(stale, &QUOTA, NOW);
    assert!(decision.allowed);
    assert_eq!(state.count, 1);
    assert_eq!(state.burst_used, 0);
}

#[test]
fn limit_boundary_admits_then_bursts_then_denies() {
    // count = limit - 1 admits one more within the normal window.
    let mut state = WindowState {
        count: QUOTA.limit - 1,
        window_end: NOW + 30,
        burst_used: 0,
    };

    let (decision, next) = check(state, &QUOTA, NOW);
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 0);
    state = next;

    // Then each burst token admits one request with zero remaining.
    for expected_burst in 1..=QUOTA.burst_tokens {
        let (decision, next) = check(state, &QUOTA, NOW);
        assert!(decision.allowed, "burst admission {expected_burst}");
        assert_eq!(decision.remaining, 0);
        assert_eq!(next.burst_used, expected_burst);
        state = next;
    }

    // Then denial, with state unchanged.
    let (decision, next) = check(state, &QUOTA, NOW);
    assert!(!decision.allowed);
    assert!(decision.reason.is_some());
    assert_eq!(next.count, state.count);
}

#[test]
fn denied_count_stays_monotonic() {
    let state = WindowState {
        count: 62,
        window_end: NOW + 30,
        burst_used: 2,
    };
    let (_, next) = check(state, &QUOTA, NOW);
    assert_eq!(next.count, 62);
}

#[test]
fn delay_is_zero_at_reset_instant() {
    let state = WindowState {
        count: 62,
        window_end: NOW + 30,
        burst_used: 2,
    };
    let (decision, _) = check(state, &QUOTA, NOW);
    assert!(!decision.allowed);
    assert_eq!(calculate_delay(&decision, decision.reset_at), Duration::ZERO);
    assert_eq!(calculate_delay(&decision, NOW), Duration::from_secs(30));
}

#[test]
fn delay_is_zero_when_allowed() {
    let (decision, _) = check(WindowState::default(), &QUOTA, NOW);
    assert_eq!(calculate_delay(&decision, NOW), Duration::ZERO);
}

#[test]
fn merge_takes_max_counts_and_earliest_window() {
    let merged = merge([
        WindowState {
            count: 10,
            window_end: 2_000,
            burst_used: 0,
        },
        WindowState {
            count: 25,
            window_end: 1_000,
            burst_used: 1,
        },
        WindowState {
            count: 5,
            window_end: 0,
            burst_used: 2,
        },
    ]);
    assert_eq!(merged.count, 25);
    assert_eq!(merged.burst_used, 2);
    assert_eq!(merged.window_end, 1_000);
}

#[test]
fn merge_of_nothing_is_default() {
    assert_eq!(merge([]), WindowState::default());
}

#[test]
fn store_counts_down_remaining_per_key() {
    let store = WindowStore::new();
    for expected in (0..60).rev() {
        let decision = store.check("user-1", "free", &QUOTA, NOW);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected);
    }
    // Other identities are unaffected.
    let other = store.check("user-2", "free", &QUOTA, NOW);
    assert_eq!(other.remaining, 59);
}

#[test]
fn store_spec_scenario_sixty_plus_two_burst() {
    let store = WindowStore::new();
    for i in 0..62 {
        let decision = store.check("u1", "free", &QUOTA, NOW);
        assert!(decision.allowed, "request {}", i + 1);
    }
    let decision = store.check("u1", "free", &QUOTA, NOW);
    assert!(!decision.allowed);
    assert_eq!(decision.remaining, 0);
}

#[test]
fn store_prunes_expired_windows() {
    let store = WindowStore::new();
    store.check("user-1", "free", &QUOTA, NOW);
    assert_eq!(store.len(), 1);
    store.prune_expired(NOW + 3_600);
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn store_is_linearizable_per_key() {
    let store = std::sync::Arc::new(WindowStore::new());
    let quota = RateLimitQuota {
        limit: 1_000,
        window_seconds: 60,
        burst_tokens: 0,
    };

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut admitted = 0_u32;
            for _ in 0..200 {
                if store.check("shared", "free", &quota, NOW).allowed {
                    admitted += 1;
                }
            }
            admitted
        }));
    }

    let mut total = 0;
    for handle in handles {
        total += handle.await.unwrap();
    }
    // 1600 attempts against a limit of 1000: exactly 1000 admitted.
    assert_eq!(total, 1_000);
}
