// ABOUTME: Rate limiting engine with a pure fixed-window plus burst-token core
// ABOUTME: Keyed window store provides per-key linearizable read-modify-write over window state
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Fixed-Window Rate Limiting
//!
//! The decision core is a pure function over window state and the current
//! time: no I/O, no allocation beyond the returned values, and identical
//! results for identical arguments. The [`WindowStore`] owns the mutable
//! state, keyed by `(identity, plan, window-start)`, and guarantees that a
//! read-modify-write on a single key appears atomic to concurrent callers.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Mutable per-key window state
///
/// `window_end` of zero means the window has never been initialized. The
/// count is monotonically non-decreasing until the window rolls over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    /// Requests admitted in the current window, including burst admissions
    pub count: u32,
    /// Unix second at which the current window ends; zero when unset
    pub window_end: i64,
    /// Burst tokens consumed in the current window
    pub burst_used: u32,
}

/// Limit configuration applied to one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitQuota {
    /// Requests admitted per window before burst tokens apply
    pub limit: u32,
    /// Window length in seconds; must be positive
    pub window_seconds: i64,
    /// Extra admissions granted after the window limit is reached
    pub burst_tokens: u32,
}

/// Reason attached to a denial
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    RateLimitExceeded,
}

/// Outcome of a single admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// The configured window limit
    pub limit: u32,
    /// Requests left in the window; zero once burst tokens are in use
    pub remaining: u32,
    /// Unix second at which the window resets
    pub reset_at: i64,
    /// Populated on denial
    pub reason: Option<DenyReason>,
}

/// Truncate a Unix second down to the start of its window
#[must_use]
pub const fn truncate_to_window(now: i64, window_seconds: i64) -> i64 {
    now - now.rem_euclid(window_seconds)
}

/// Run one admission check against a window state
///
/// Pure and deterministic: two calls with identical arguments yield
/// identical results. The caller writes `new_state` back under whatever
/// guard it holds for the key.
#[must_use]
pub fn check(
    state: WindowState,
    quota: &RateLimitQuota,
    now: i64,
) -> (RateLimitDecision, WindowState) {
    let mut state = state;

    if state.window_end == 0 || now > state.window_end {
        state = WindowState {
            count: 0,
            window_end: truncate_to_window(now, quota.window_seconds) + quota.window_seconds,
            burst_used: 0,
        };
    }

    if state.count < quota.limit {
        state.count += 1;
        let decision = RateLimitDecision {
            allowed: true,
            limit: quota.limit,
            remaining: quota.limit - state.count,
            reset_at: state.window_end,
            reason: None,
        };
        return (decision, state);
    }

    if state.burst_used < quota.burst_tokens {
        state.count += 1;
        state.burst_used += 1;
        let decision = RateLimitDecision {
            allowed: true,
            limit: quota.limit,
            remaining: 0,
            reset_at: state.window_end,
            reason: None,
        };
        return (decision, state);
    }

    let decision = RateLimitDecision {
        allowed: false,
        limit: quota.limit,
        remaining: 0,
        reset_at: state.window_end,
        reason: Some(DenyReason::RateLimitExceeded),
    };
    (decision, state)
}

/// Seconds a denied caller should wait before retrying
#[must_use]
pub fn calculate_delay(decision: &RateLimitDecision, now: i64) -> Duration {
    if decision.allowed {
        return Duration::ZERO;
    }
    let delta = decision.reset_at.saturating_sub(now);
    Duration::from_secs(delta.max(0) as u64)
}

/// Consolidate window states observed across replicas
///
/// Takes the maximum count, maximum burst used, and the earliest non-zero
/// window end, which is safe: the merged state never under-counts and
/// never extends a window.
#[must_use]
pub fn merge<I>(states: I) -> WindowState
where
    I: IntoIterator<Item = WindowState>,
{
    let mut merged = WindowState::default();
    for state in states {
        merged.count = merged.count.max(state.count);
        merged.burst_used = merged.burst_used.max(state.burst_used);
        if state.window_end != 0
            && (merged.window_end == 0 || state.window_end < merged.window_end)
        {
            merged.window_end = state.window_end;
        }
    }
    merged
}

/// Key for one identity's window
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    identity: String,
    plan_id: String,
    window_start: i64,
}

/// Keyed store of live window states
///
/// Each key maps to the state of a single fixed window. The map entry
/// guard makes the read-modify-write linearizable per key; there is no
/// global lock.
#[derive(Debug, Default)]
pub struct WindowStore {
    windows: DashMap<WindowKey, WindowState>,
}

impl WindowStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    /// Admit or deny one request for `identity` under `quota`
    pub fn check(
        &self,
        identity: &str,
        plan_id: &str,
        quota: &RateLimitQuota,
        now: i64,
    ) -> RateLimitDecision {
        let key = WindowKey {
            identity: identity.to_owned(),
            plan_id: plan_id.to_owned(),
            window_start: truncate_to_window(now, quota.window_seconds),
        };

        let mut entry = self.windows.entry(key).or_default();
        let (decision, next) = check(*entry, quota, now);
        *entry = next;
        decision
    }

    /// Peek the state for an identity's current window, if any
    #[must_use]
    pub fn current_state(
        &self,
        identity: &str,
        plan_id: &str,
        window_seconds: i64,
        now: i64,
    ) -> Option<WindowState> {
        let key = WindowKey {
            identity: identity.to_owned(),
            plan_id: plan_id.to_owned(),
            window_start: truncate_to_window(now, window_seconds),
        };
        self.windows.get(&key).map(|entry| *entry)
    }

    /// Drop windows that ended before `now`
    pub fn prune_expired(&self, now: i64) {
        self.windows
            .retain(|_, state| state.window_end == 0 || state.window_end >= now);
    }

    /// Number of live windows, for metrics
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether the store holds no windows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
