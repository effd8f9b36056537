// ABOUTME: API key generation, format validation, and hashing
// ABOUTME: Keys are prefix-addressable for lookup and stored only as SHA-256 digests
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # API Key Management
//!
//! Gateway keys are 64 characters: the `ak_` prefix followed by 61 random
//! alphanumerics. The first 12 characters form the lookup prefix; the full
//! key is stored only as a SHA-256 digest.

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::key_format;
use crate::errors::{GatewayError, GatewayResult};
use crate::models::ApiKeyRecord;

/// Freshly generated key material
#[derive(Debug, Clone)]
pub struct ApiKeyData {
    /// The full key, shown to the caller exactly once
    pub full_key: String,
    /// Lookup prefix (first 12 characters)
    pub key_prefix: String,
    /// SHA-256 hex digest of the full key
    pub key_hash: String,
}

/// API key manager
#[derive(Debug, Clone, Default)]
pub struct ApiKeyManager;

impl ApiKeyManager {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Generate a new key with its lookup prefix and storage hash
    #[must_use]
    pub fn generate(&self) -> ApiKeyData {
        let random_len = key_format::KEY_LENGTH - key_format::KEY_PREFIX.len();
        let random: String = thread_rng()
            .sample_iter(&Alphanumeric)
            .take(random_len)
            .map(char::from)
            .collect();
        let full_key = format!("{}{random}", key_format::KEY_PREFIX);

        ApiKeyData {
            key_prefix: full_key[..key_format::LOOKUP_PREFIX_LENGTH].to_owned(),
            key_hash: self.hash_key(&full_key),
            full_key,
        }
    }

    /// Validate the wire format of a presented key
    ///
    /// # Errors
    ///
    /// Returns `invalid_api_key` on a wrong prefix or length. The message
    /// carries no detail about which check failed.
    pub fn validate_key_format(&self, api_key: &str) -> GatewayResult<()> {
        if !api_key.starts_with(key_format::KEY_PREFIX)
            || api_key.len() != key_format::KEY_LENGTH
        {
            return Err(GatewayError::invalid_api_key());
        }
        Ok(())
    }

    /// Extract the lookup prefix from a presented key
    #[must_use]
    pub fn extract_key_prefix(&self, api_key: &str) -> String {
        api_key
            .chars()
            .take(key_format::LOOKUP_PREFIX_LENGTH)
            .collect()
    }

    /// Hash a key for storage or comparison
    #[must_use]
    pub fn hash_key(&self, api_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Create a new key record for a user, returning the record and the
    /// full key. The full key is never recoverable afterwards.
    #[must_use]
    pub fn create_key(&self, user_id: Uuid, name: impl Into<String>) -> (ApiKeyRecord, String) {
        let data = self.generate();
        let record = ApiKeyRecord {
            id: Uuid::new_v4().to_string(),
            user_id,
            name: name.into(),
            key_prefix: data.key_prefix,
            key_hash: data.key_hash,
            scopes: Vec::new(),
            is_active: true,
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
        };
        (record, data.full_key)
    }

    /// Check that a stored record is usable
    ///
    /// # Errors
    ///
    /// Returns `invalid_api_key` when the record is inactive or expired.
    pub fn is_key_valid(&self, record: &ApiKeyRecord) -> GatewayResult<()> {
        if !record.is_active {
            return Err(GatewayError::invalid_api_key());
        }
        if let Some(expires_at) = record.expires_at {
            if Utc::now() > expires_at {
                return Err(GatewayError::invalid_api_key());
            }
        }
        Ok(())
    }
}
