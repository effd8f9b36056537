// ABOUTME: Configuration module for environment-based gateway settings
// ABOUTME: Re-exports the environment loader used by the binary and tests
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

/// Environment-variable driven server configuration
pub mod environment;

pub use environment::ServerConfig;
