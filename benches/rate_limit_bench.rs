// ABOUTME: Criterion benchmark for the pure rate-limit decision core
// ABOUTME: The check function must stay below one microsecond per call
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use apigate::rate_limiting::{check, RateLimitQuota, WindowState};

fn bench_check(c: &mut Criterion) {
    let quota = RateLimitQuota {
        limit: 60,
        window_seconds: 60,
        burst_tokens: 2,
    };

    c.bench_function("rate_limit_check_fresh_window", |b| {
        let state = WindowState::default();
        b.iter(|| check(black_box(state), black_box(&quota), black_box(1_700_000_000)));
    });

    c.bench_function("rate_limit_check_mid_window", |b| {
        let state = WindowState {
            count: 30,
            window_end: 1_700_000_040,
            burst_used: 0,
        };
        b.iter(|| check(black_box(state), black_box(&quota), black_box(1_700_000_000)));
    });

    c.bench_function("rate_limit_check_denied", |b| {
        let state = WindowState {
            count: 62,
            window_end: 1_700_000_040,
            burst_used: 2,
        };
        b.iter(|| check(black_box(state), black_box(&quota), black_box(1_700_000_000)));
    });
}

criterion_group!(benches, bench_check);
criterion_main!(benches);
