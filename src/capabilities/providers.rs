// ABOUTME: Provider contracts for the built-in capabilities plus in-memory implementations
// ABOUTME: Cache and queue providers carry an explicit close for container teardown
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::errors::GatewayResult;

/// Payment provider contract
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Charge a customer; returns the provider transaction id
    async fn charge(
        &self,
        customer: &str,
        amount_cents: u64,
        currency: &str,
        description: &str,
    ) -> GatewayResult<String>;
}

/// Email provider contract
#[async_trait]
pub trait EmailProvider: Send + Sync + std::fmt::Debug {
    async fn send(&self, to: &str, subject: &str, body: &str) -> GatewayResult<()>;
}

/// Cache provider contract. Implementations are closed by the container
/// on teardown.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn get(&self, key: &str) -> GatewayResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: std::time::Duration) -> GatewayResult<()>;
    async fn delete(&self, key: &str) -> GatewayResult<()>;
    /// Release backend resources; idempotent
    async fn close(&self) -> GatewayResult<()>;
}

/// Blob storage provider contract
#[async_trait]
pub trait StorageProvider: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>) -> GatewayResult<()>;
    async fn get(&self, key: &str) -> GatewayResult<Option<Vec<u8>>>;
    async fn delete(&self, key: &str) -> GatewayResult<()>;
}

/// Queue provider contract. Implementations are closed by the container
/// on teardown.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> GatewayResult<()>;
    /// Release backend resources; idempotent
    async fn close(&self) -> GatewayResult<()>;
}

/// Notification provider contract
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    async fn notify(&self, channel: &str, message: &str) -> GatewayResult<()>;
}

/// Hashing provider contract
pub trait HashProvider: Send + Sync {
    fn hash(&self, input: &[u8]) -> String;
    fn verify(&self, input: &[u8], digest: &str) -> bool;
}

struct CacheEntry {
    value: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// In-memory cache provider with per-entry expiry
#[derive(Default)]
pub struct MemoryCacheProvider {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCacheProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheProvider for MemoryCacheProvider {
    async fn get(&self, key: &str) -> GatewayResult<Option<Vec<u8>>> {
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };
        if Utc::now() > entry.expires_at {
            drop(entry);
            self.entries.remove(key);
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: std::time::Duration) -> GatewayResult<()> {
        let ttl = Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(60));
        self.entries.insert(
            key.to_owned(),
            CacheEntry {
                value,
                expires_at: Utc::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> GatewayResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn close(&self) -> GatewayResult<()> {
        self.entries.clear();
        Ok(())
    }
}

/// In-memory queue provider collecting published payloads per topic
#[derive(Default)]
pub struct MemoryQueueProvider {
    topics: Mutex<VecDeque<(String, Vec<u8>)>>,
}

impl MemoryQueueProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything published so far, for tests
    #[must_use]
    pub fn drain(&self) -> Vec<(String, Vec<u8>)> {
        self.topics
            .lock()
            .map(|mut guard| guard.drain(..).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueueProvider for MemoryQueueProvider {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> GatewayResult<()> {
        if let Ok(mut guard) = self.topics.lock() {
            guard.push_back((topic.to_owned(), payload));
        }
        Ok(())
    }

    async fn close(&self) -> GatewayResult<()> {
        if let Ok(mut guard) = self.topics.lock() {
            guard.clear();
        }
        Ok(())
    }
}

/// SHA-256 hash provider
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256HashProvider;

impl HashProvider for Sha256HashProvider {
    fn hash(&self, input: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input);
        hex::encode(hasher.finalize())
    }

    fn verify(&self, input: &[u8], digest: &str) -> bool {
        self.hash(input) == digest
    }
}
