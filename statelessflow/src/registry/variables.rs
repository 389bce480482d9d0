//! Variable registries and `${name}` substitution.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Read-only source of variable values consulted while resolving properties.
#[cfg_attr(test, mockall::automock)]
pub trait VariableRegistry: Send + Sync {
    /// Returns the value for `key`, or `None` when undefined.
    fn resolve(&self, key: &str) -> Option<String>;
}

/// A registry with no variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyVariableRegistry;

impl VariableRegistry for EmptyVariableRegistry {
    fn resolve(&self, _key: &str) -> Option<String> {
        None
    }
}

/// A registry backed by an in-memory map.
#[derive(Debug, Clone, Default)]
pub struct MapVariableRegistry {
    variables: HashMap<String, String>,
}

impl MapVariableRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a variable, builder style.
    #[must_use]
    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Adds or replaces a variable.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.variables.insert(key.into(), value.into())
    }

    /// Returns the number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.variables.len()
    }

    /// Returns true if no variables are defined.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

impl VariableRegistry for MapVariableRegistry {
    fn resolve(&self, key: &str) -> Option<String> {
        self.variables.get(key).cloned()
    }
}

impl FromIterator<(String, String)> for MapVariableRegistry {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            variables: iter.into_iter().collect(),
        }
    }
}

/// A registry reading process environment variables, optionally under a prefix.
#[derive(Debug, Clone, Default)]
pub struct EnvVariableRegistry {
    prefix: Option<String>,
}

impl EnvVariableRegistry {
    /// Creates a registry over the whole environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry that resolves `key` as `{prefix}{key}`.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }
}

impl VariableRegistry for EnvVariableRegistry {
    fn resolve(&self, key: &str) -> Option<String> {
        match &self.prefix {
            Some(prefix) => std::env::var(format!("{prefix}{key}")).ok(),
            None => std::env::var(key).ok(),
        }
    }
}

/// Consults registries in order; the first definition wins.
#[derive(Clone, Default)]
pub struct LayeredVariableRegistry {
    layers: Vec<Arc<dyn VariableRegistry>>,
}

impl LayeredVariableRegistry {
    /// Creates a registry with no layers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer with lower precedence than the existing ones.
    #[must_use]
    pub fn with_layer(mut self, layer: Arc<dyn VariableRegistry>) -> Self {
        self.layers.push(layer);
        self
    }
}

impl std::fmt::Debug for LayeredVariableRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredVariableRegistry")
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl VariableRegistry for LayeredVariableRegistry {
    fn resolve(&self, key: &str) -> Option<String> {
        self.layers.iter().find_map(|layer| layer.resolve(key))
    }
}

// `$${name}` is an escaped literal; `${ name }` is a reference.
#[allow(clippy::expect_used)]
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$\{[^}]*\}|\$\{\s*([A-Za-z0-9_.\-]+)\s*\}").expect("valid reference pattern")
});

/// Replaces every `${name}` in `value` with its registry value.
///
/// `$${name}` yields the literal text `${name}`.
///
/// # Errors
///
/// Returns the name of the first undefined variable.
pub fn substitute_variables(value: &str, registry: &dyn VariableRegistry) -> Result<String, String> {
    let mut resolved = String::with_capacity(value.len());
    let mut last = 0;

    for captures in REFERENCE.captures_iter(value) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        resolved.push_str(&value[last..whole.start()]);

        match captures.get(1) {
            Some(name) => {
                let replacement = registry
                    .resolve(name.as_str())
                    .ok_or_else(|| name.as_str().to_string())?;
                resolved.push_str(&replacement);
            }
            None => resolved.push_str(&whole.as_str()[1..]),
        }
        last = whole.end();
    }

    resolved.push_str(&value[last..]);
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_substitute_plain_value() {
        let out = substitute_variables("/tmp/output", &EmptyVariableRegistry).unwrap();
        assert_eq!(out, "/tmp/output");
    }

    #[test]
    fn test_substitute_references() {
        let registry = MapVariableRegistry::new()
            .with_variable("base", "/data")
            .with_variable("name", "in.txt");

        let out = substitute_variables("${base}/input/${ name }", &registry).unwrap();
        assert_eq!(out, "/data/input/in.txt");
    }

    #[test]
    fn test_substitute_undefined_reports_name() {
        let registry = MapVariableRegistry::new().with_variable("a", "1");
        let err = substitute_variables("${a}-${missing}", &registry).unwrap_err();
        assert_eq!(err, "missing");
    }

    #[test]
    fn test_escaped_reference_is_literal() {
        let out = substitute_variables("cost: $${amount}", &EmptyVariableRegistry).unwrap();
        assert_eq!(out, "cost: ${amount}");
    }

    #[test]
    fn test_layered_registry_precedence() {
        let first = MapVariableRegistry::new().with_variable("x", "first");
        let second = MapVariableRegistry::new()
            .with_variable("x", "second")
            .with_variable("y", "only-second");

        let layered = LayeredVariableRegistry::new()
            .with_layer(Arc::new(first))
            .with_layer(Arc::new(second));

        assert_eq!(layered.resolve("x"), Some("first".to_string()));
        assert_eq!(layered.resolve("y"), Some("only-second".to_string()));
        assert_eq!(layered.resolve("z"), None);
    }

    #[test]
    fn test_substitute_consults_registry_once_per_reference() {
        let mut registry = MockVariableRegistry::new();
        registry
            .expect_resolve()
            .with(eq("dir"))
            .times(1)
            .returning(|_| Some("/out".to_string()));

        let out = substitute_variables("${dir}", &registry).unwrap();
        assert_eq!(out, "/out");
    }

    #[test]
    fn test_env_registry_prefix() {
        let registry = EnvVariableRegistry::with_prefix("STATELESSFLOW_TEST_SURELY_UNSET_");
        assert_eq!(registry.resolve("VALUE"), None);
    }
}
