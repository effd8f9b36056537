// ABOUTME: Server-Sent Events support for the streaming forwarder
// ABOUTME: Pure event parsing plus a metering-aware stream reader
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

/// Pure SSE event parsing over byte spans
pub mod parser;
/// Byte-counting stream wrapper with optional accumulation
pub mod reader;

pub use parser::{last_data, last_event, parse_events, SseEvent};
pub use reader::{MeterHandle, MeteredStream, StreamMetrics};
