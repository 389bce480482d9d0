//! External collaborators consulted while resolving stage configuration.
//!
//! Both collaborators are read-only and are only consulted while properties
//! are being set, never while a flow runs.

mod services;
mod variables;

pub use services::{
    downcast_service, EmptyServiceLookup, InMemoryServiceLookup, Service, ServiceHandle,
    ServiceLookup,
};
pub use variables::{
    substitute_variables, EmptyVariableRegistry, EnvVariableRegistry, LayeredVariableRegistry,
    MapVariableRegistry, VariableRegistry,
};

#[cfg(test)]
pub use services::MockServiceLookup;
#[cfg(test)]
pub use variables::MockVariableRegistry;

use std::sync::Arc;

/// The collaborators a flow graph resolves properties against.
#[derive(Clone)]
pub struct Collaborators {
    /// Variable values for `${name}` references.
    pub variables: Arc<dyn VariableRegistry>,
    /// Named services.
    pub services: Arc<dyn ServiceLookup>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            variables: Arc::new(EmptyVariableRegistry),
            services: Arc::new(EmptyServiceLookup),
        }
    }
}

impl Collaborators {
    /// Creates collaborators with no variables and no services.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the variable registry.
    #[must_use]
    pub fn with_variables(mut self, variables: Arc<dyn VariableRegistry>) -> Self {
        self.variables = variables;
        self
    }

    /// Sets the service lookup.
    #[must_use]
    pub fn with_services(mut self, services: Arc<dyn ServiceLookup>) -> Self {
        self.services = services;
        self
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
