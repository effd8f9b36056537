// ABOUTME: Name-keyed provider registry with default/first-enabled resolution
// ABOUTME: Tracks closeable providers and aggregates errors on teardown
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! Provider registry. Registration fails on a duplicate
//! `(capability, name)` pair or a second default; resolution returns the
//! enabled default if one exists, else the first enabled registration in
//! registration order, else an error. Custom capabilities resolve by
//! downcast; a failed downcast is a configuration error, not a runtime
//! error.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use super::providers::{
    CacheProvider, EmailProvider, HashProvider, NotificationProvider, PaymentProvider,
    QueueProvider, StorageProvider,
};
use super::Capability;
use crate::errors::{GatewayError, GatewayResult};

/// A registered provider instance
#[derive(Clone)]
pub enum ProviderHandle {
    Payment(Arc<dyn PaymentProvider>),
    Email(Arc<dyn EmailProvider>),
    Cache(Arc<dyn CacheProvider>),
    Storage(Arc<dyn StorageProvider>),
    Queue(Arc<dyn QueueProvider>),
    Notification(Arc<dyn NotificationProvider>),
    Hasher(Arc<dyn HashProvider>),
    Custom(Arc<dyn Any + Send + Sync>),
}

impl ProviderHandle {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Payment(_) => "payment",
            Self::Email(_) => "email",
            Self::Cache(_) => "cache",
            Self::Storage(_) => "storage",
            Self::Queue(_) => "queue",
            Self::Notification(_) => "notification",
            Self::Hasher(_) => "hasher",
            Self::Custom(_) => "custom",
        }
    }
}

/// Registration flags
#[derive(Debug, Clone, Copy)]
pub struct ProviderOptions {
    /// Disabled providers are skipped during resolution
    pub enabled: bool,
    /// At most one default per capability
    pub default: bool,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            default: false,
        }
    }
}

struct Registration {
    name: String,
    enabled: bool,
    default: bool,
    handle: ProviderHandle,
}

/// Process-wide capability container, immutable after boot
#[derive(Default)]
pub struct CapabilityContainer {
    entries: HashMap<String, Vec<Registration>>,
}

impl CapabilityContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named provider for a capability
    ///
    /// # Errors
    ///
    /// Returns a configuration error on a duplicate `(capability, name)`
    /// pair or a second default for the same capability.
    pub fn register(
        &mut self,
        capability: &Capability,
        name: impl Into<String>,
        handle: ProviderHandle,
        options: ProviderOptions,
    ) -> GatewayResult<()> {
        let name = name.into();
        let registrations = self.entries.entry(capability.key().to_owned()).or_default();

        if registrations.iter().any(|r| r.name == name) {
            return Err(GatewayError::config(format!(
                "provider '{name}' already registered for capability '{capability}'"
            )));
        }
        if options.default && registrations.iter().any(|r| r.default) {
            return Err(GatewayError::config(format!(
                "capability '{capability}' already has a default provider"
            )));
        }

        tracing::info!(
            capability = %capability,
            provider = %name,
            kind = handle.kind(),
            default = options.default,
            "registering capability provider"
        );
        registrations.push(Registration {
            name,
            enabled: options.enabled,
            default: options.default,
            handle,
        });
        Ok(())
    }

    /// Resolve the active provider for a capability: the enabled default
    /// if any, else the first enabled registration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no enabled provider exists.
    pub fn resolve(&self, capability: &Capability) -> GatewayResult<&ProviderHandle> {
        let registrations = self.entries.get(capability.key()).ok_or_else(|| {
            GatewayError::config(format!("no providers registered for capability '{capability}'"))
        })?;

        if let Some(default) = registrations.iter().find(|r| r.default && r.enabled) {
            return Ok(&default.handle);
        }
        registrations
            .iter()
            .find(|r| r.enabled)
            .map(|r| &r.handle)
            .ok_or_else(|| {
                GatewayError::config(format!(
                    "no enabled provider for capability '{capability}'"
                ))
            })
    }

    /// Resolve a specific provider by name, regardless of default flags
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the name is unknown or disabled.
    pub fn resolve_named(
        &self,
        capability: &Capability,
        name: &str,
    ) -> GatewayResult<&ProviderHandle> {
        self.entries
            .get(capability.key())
            .and_then(|registrations| {
                registrations
                    .iter()
                    .find(|r| r.name == name && r.enabled)
                    .map(|r| &r.handle)
            })
            .ok_or_else(|| {
                GatewayError::config(format!(
                    "no enabled provider '{name}' for capability '{capability}'"
                ))
            })
    }

    /// Resolve the active payment provider
    ///
    /// # Errors
    ///
    /// Configuration error when unregistered or registered under the
    /// wrong variant.
    pub fn payment(&self) -> GatewayResult<Arc<dyn PaymentProvider>> {
        match self.resolve(&Capability::Payment)? {
            ProviderHandle::Payment(provider) => Ok(Arc::clone(provider)),
            other => Err(wrong_kind(&Capability::Payment, other)),
        }
    }

    /// Resolve the active email provider
    ///
    /// # Errors
    ///
    /// Configuration error when unregistered or mis-registered.
    pub fn email(&self) -> GatewayResult<Arc<dyn EmailProvider>> {
        match self.resolve(&Capability::Email)? {
            ProviderHandle::Email(provider) => Ok(Arc::clone(provider)),
            other => Err(wrong_kind(&Capability::Email, other)),
        }
    }

    /// Resolve the active cache provider
    ///
    /// # Errors
    ///
    /// Configuration error when unregistered or mis-registered.
    pub fn cache(&self) -> GatewayResult<Arc<dyn CacheProvider>> {
        match self.resolve(&Capability::Cache)? {
            ProviderHandle::Cache(provider) => Ok(Arc::clone(provider)),
            other => Err(wrong_kind(&Capability::Cache, other)),
        }
    }

    /// Resolve the active storage provider
    ///
    /// # Errors
    ///
    /// Configuration error when unregistered or mis-registered.
    pub fn storage(&self) -> GatewayResult<Arc<dyn StorageProvider>> {
        match self.resolve(&Capability::Storage)? {
            ProviderHandle::Storage(provider) => Ok(Arc::clone(provider)),
            other => Err(wrong_kind(&Capability::Storage, other)),
        }
    }

    /// Resolve the active queue provider
    ///
    /// # Errors
    ///
    /// Configuration error when unregistered or mis-registered.
    pub fn queue(&self) -> GatewayResult<Arc<dyn QueueProvider>> {
        match self.resolve(&Capability::Queue)? {
            ProviderHandle::Queue(provider) => Ok(Arc::clone(provider)),
            other => Err(wrong_kind(&Capability::Queue, other)),
        }
    }

    /// Resolve the active notification provider
    ///
    /// # Errors
    ///
    /// Configuration error when unregistered or mis-registered.
    pub fn notification(&self) -> GatewayResult<Arc<dyn NotificationProvider>> {
        match self.resolve(&Capability::Notification)? {
            ProviderHandle::Notification(provider) => Ok(Arc::clone(provider)),
            other => Err(wrong_kind(&Capability::Notification, other)),
        }
    }

    /// Resolve the active hash provider
    ///
    /// # Errors
    ///
    /// Configuration error when unregistered or mis-registered.
    pub fn hasher(&self) -> GatewayResult<Arc<dyn HashProvider>> {
        match self.resolve(&Capability::Hasher)? {
            ProviderHandle::Hasher(provider) => Ok(Arc::clone(provider)),
            other => Err(wrong_kind(&Capability::Hasher, other)),
        }
    }

    /// Resolve a custom capability and downcast it to its concrete type
    ///
    /// # Errors
    ///
    /// Configuration error when the capability is unregistered or the
    /// downcast fails.
    pub fn resolve_custom<T: Send + Sync + 'static>(
        &self,
        capability_name: &str,
    ) -> GatewayResult<Arc<T>> {
        let capability = Capability::Custom(capability_name.to_owned());
        match self.resolve(&capability)? {
            ProviderHandle::Custom(provider) => {
                Arc::clone(provider).downcast::<T>().map_err(|_| {
                    GatewayError::config(format!(
                        "provider for capability '{capability_name}' has the wrong type"
                    ))
                })
            }
            other => Err(wrong_kind(&capability, other)),
        }
    }

    /// Close every closeable provider, aggregating errors
    ///
    /// # Errors
    ///
    /// Returns a single error naming each provider that failed to close.
    pub async fn close_all(&self) -> GatewayResult<()> {
        let mut failures = Vec::new();

        for (capability, registrations) in &self.entries {
            for registration in registrations {
                let result = match &registration.handle {
                    ProviderHandle::Cache(provider) => provider.close().await,
                    ProviderHandle::Queue(provider) => provider.close().await,
                    _ => continue,
                };
                if let Err(e) = result {
                    failures.push(format!("{capability}/{}: {}", registration.name, e.message));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(GatewayError::internal(format!(
                "provider teardown failures: {}",
                failures.join("; ")
            )))
        }
    }
}

fn wrong_kind(capability: &Capability, handle: &ProviderHandle) -> GatewayError {
    GatewayError::config(format!(
        "provider for capability '{capability}' registered as '{}'",
        handle.kind()
    ))
}
