// ABOUTME: Capability container exposing named providers for pluggable services
// ABOUTME: Payment, email, cache, storage, queue, notification, hasher, and custom capabilities
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Capabilities
//!
//! A name-keyed provider registry for the services the gateway consumes
//! but does not implement. The container is populated at boot and
//! immutable afterwards; it is consulted for plug-in providers and never
//! sits on the request hot path.

/// Built-in provider contracts and in-memory implementations
pub mod providers;
/// The provider registry and resolver
pub mod registry;

pub use providers::{
    CacheProvider, EmailProvider, HashProvider, MemoryCacheProvider, MemoryQueueProvider,
    NotificationProvider, PaymentProvider, QueueProvider, Sha256HashProvider, StorageProvider,
};
pub use registry::{CapabilityContainer, ProviderHandle, ProviderOptions};

/// Capability names the container understands
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    Payment,
    Email,
    Cache,
    Storage,
    Queue,
    Notification,
    Hasher,
    /// Caller-defined capability, resolved by downcast
    Custom(String),
}

impl Capability {
    /// Stable key used for registration and lookup
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Payment => "payment",
            Self::Email => "email",
            Self::Cache => "cache",
            Self::Storage => "storage",
            Self::Queue => "queue",
            Self::Notification => "notification",
            Self::Hasher => "hasher",
            Self::Custom(name) => name.as_str(),
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}
