// ABOUTME: Metering expression tests for grammar, accumulation flags, and evaluation
// ABOUTME: Unrecognized tokens are refused; runtime failures fall back to one unit
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![allow(missing_docs)]

use apigate::metering::{MeterContext, MeterExpr};

fn ctx() -> MeterContext<'static> {
    MeterContext {
        status: 200,
        request_bytes: 100,
        response_bytes: 2048,
        chunk_count: 4,
        all_data: None,
    }
}

#[test]
fn arithmetic_precedence_and_parens() {
    let expr = MeterExpr::parse("1 + responseBytes / 1024 * 2").unwrap();
    assert!((expr.evaluate(&ctx()) - 5.0).abs() < 1e-9);

    let expr = MeterExpr::parse("(1 + responseBytes / 1024) * 2").unwrap();
    assert!((expr.evaluate(&ctx()) - 6.0).abs() < 1e-9);
}

#[test]
fn unary_minus_and_clamping() {
    // Negative results clamp to zero rather than producing negative bills.
    let expr = MeterExpr::parse("-chunkCount").unwrap();
    assert!(expr.evaluate(&ctx()).abs() < 1e-9);
}

#[test]
fn min_max_functions() {
    let expr = MeterExpr::parse("max(responseBytes / 1024, 1)").unwrap();
    assert!((expr.evaluate(&ctx()) - 2.0).abs() < 1e-9);

    let expr = MeterExpr::parse("min(chunkCount, 2)").unwrap();
    assert!((expr.evaluate(&ctx()) - 2.0).abs() < 1e-9);
}

#[test]
fn modulo_operator() {
    let expr = MeterExpr::parse("responseBytes % 1000").unwrap();
    assert!((expr.evaluate(&ctx()) - 48.0).abs() < 1e-9);
}

#[test]
fn unrecognized_tokens_are_refused_at_parse() {
    assert!(MeterExpr::parse("tokens").is_err());
    assert!(MeterExpr::parse("responseBytes @ 2").is_err());
    assert!(MeterExpr::parse("responseBytes 2").is_err());
    assert!(MeterExpr::parse("min(responseBytes)").is_err());
    assert!(MeterExpr::parse("1..5").is_err());
    assert!(MeterExpr::parse("(1").is_err());
}

#[test]
fn accumulation_flag_follows_expression_shape() {
    assert!(!MeterExpr::parse("").unwrap().needs_accumulation());
    assert!(!MeterExpr::parse("1").unwrap().needs_accumulation());
    assert!(!MeterExpr::parse("responseBytes").unwrap().needs_accumulation());
    assert!(MeterExpr::parse("responseBytes * 1").unwrap().needs_accumulation());
    assert!(MeterExpr::parse("sseEvents").unwrap().needs_accumulation());
    assert!(MeterExpr::parse("sseLastData").unwrap().needs_accumulation());
}

#[test]
fn sse_events_counts_parsed_events() {
    let data = b"data: a\n\ndata: b\n\ndata: c\n\n";
    let ctx = MeterContext {
        all_data: Some(data),
        ..ctx()
    };
    let expr = MeterExpr::parse("sseEvents").unwrap();
    assert!((expr.evaluate(&ctx) - 3.0).abs() < 1e-9);
}

#[test]
fn sse_last_data_parses_the_final_payload() {
    let data = b"data: 1\n\ndata: 17.5\n\n";
    let ctx = MeterContext {
        all_data: Some(data),
        ..ctx()
    };
    let expr = MeterExpr::parse("sseLastData * 2").unwrap();
    assert!((expr.evaluate(&ctx) - 35.0).abs() < 1e-9);
}

#[test]
fn non_numeric_last_data_falls_back_to_unit() {
    let data = b"data: not-a-number\n\n";
    let ctx = MeterContext {
        all_data: Some(data),
        ..ctx()
    };
    let expr = MeterExpr::parse("sseLastData").unwrap();
    assert!((expr.evaluate(&ctx) - 1.0).abs() < 1e-9);
}

#[test]
fn accumulation_identifiers_without_data_fall_back() {
    // The route said no accumulation but the expression needs it:
    // evaluation degrades to one unit instead of failing the request.
    let expr = MeterExpr::parse("sseEvents").unwrap();
    assert!((expr.evaluate(&ctx()) - 1.0).abs() < 1e-9);
}

#[test]
fn status_identifier_is_exposed() {
    let expr = MeterExpr::parse("status - 200").unwrap();
    assert!(expr.evaluate(&ctx()).abs() < 1e-9);
}
