//! Named auxiliary services resolved while configuring stages.

use dashmap::DashMap;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// An auxiliary service a stage can be configured to use.
pub trait Service: Send + Sync + Debug {
    /// Returns the identifier the service was registered under.
    fn identifier(&self) -> &str;

    /// Returns `self` for downcasting to the concrete service type.
    fn as_any(&self) -> &dyn Any;
}

/// Shared handle to a resolved service.
pub type ServiceHandle = Arc<dyn Service>;

/// Downcasts a service handle to its concrete type.
#[must_use]
pub fn downcast_service<T: Service + 'static>(handle: &ServiceHandle) -> Option<&T> {
    handle.as_any().downcast_ref::<T>()
}

/// Read-only lookup of services by name.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceLookup: Send + Sync {
    /// Returns the service registered under `name`.
    fn resolve_service(&self, name: &str) -> Option<ServiceHandle>;
}

/// A lookup that knows no services.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyServiceLookup;

impl ServiceLookup for EmptyServiceLookup {
    fn resolve_service(&self, _name: &str) -> Option<ServiceHandle> {
        None
    }
}

/// A concurrent in-memory service lookup.
#[derive(Debug, Default)]
pub struct InMemoryServiceLookup {
    services: DashMap<String, ServiceHandle>,
}

impl InMemoryServiceLookup {
    /// Creates an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a service under its identifier, returning any service it replaced.
    pub fn register(&self, service: ServiceHandle) -> Option<ServiceHandle> {
        let name = service.identifier().to_string();
        self.services.insert(name, service)
    }

    /// Removes a service.
    pub fn unregister(&self, name: &str) -> Option<ServiceHandle> {
        self.services.remove(name).map(|(_, service)| service)
    }

    /// Returns the registered service names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.services.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Returns the number of registered services.
    #[must_use]
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Returns true if no services are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl ServiceLookup for InMemoryServiceLookup {
    fn resolve_service(&self, name: &str) -> Option<ServiceHandle> {
        self.services.get(name).map(|entry| Arc::clone(entry.value()))
    }
}
