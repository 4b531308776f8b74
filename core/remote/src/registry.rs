//! Authority registry for resolving remote authorities by name.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use revsync_common::{Error, Result};

use crate::authority::RemoteAuthority;

/// Factory function type for creating authorities.
pub type AuthorityFactory = Box<dyn Fn(Value) -> Result<Arc<dyn RemoteAuthority>> + Send + Sync>;

/// Registry for remote authority factories.
///
/// Lets a client pick its authority by name and configuration, e.g. from a
/// command line flag.
pub struct AuthorityRegistry {
    factories: HashMap<String, AuthorityFactory>,
}

impl AuthorityRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register an authority factory.
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: AuthorityFactory) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Authority '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Resolve an authority by name and configuration.
    ///
    /// # Errors
    /// - Authority not found
    /// - Configuration invalid
    pub fn resolve(&self, name: &str, config: Value) -> Result<Arc<dyn RemoteAuthority>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Authority '{}' is not registered", name)))?;
        factory(config)
    }

    /// Get list of registered authority names.
    pub fn authorities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_authority(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl Default for AuthorityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a registry with the bundled authorities.
pub fn create_default_registry() -> AuthorityRegistry {
    let mut factories: HashMap<String, AuthorityFactory> = HashMap::new();

    factories.insert(
        "memory".to_string(),
        Box::new(|_config| Ok(Arc::new(crate::memory::MemoryAuthority::new()))),
    );

    factories.insert(
        "local".to_string(),
        Box::new(|config| {
            let root = config
                .get("root")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    Error::InvalidInput("Local authority requires 'root' path".to_string())
                })?;
            Ok(Arc::new(crate::local::LocalAuthority::new(root)?))
        }),
    );

    AuthorityRegistry { factories }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAuthority;
    use tempfile::TempDir;

    #[test]
    fn test_register_and_resolve() {
        let mut registry = AuthorityRegistry::new();
        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryAuthority::new()))))
            .unwrap();

        let authority = registry.resolve("test", Value::Null).unwrap();
        assert_eq!(authority.name(), "memory");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = AuthorityRegistry::new();
        registry
            .register("test", Box::new(|_| Ok(Arc::new(MemoryAuthority::new()))))
            .unwrap();

        let result = registry.register("test", Box::new(|_| Ok(Arc::new(MemoryAuthority::new()))));
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_unknown_fails() {
        let registry = AuthorityRegistry::new();
        assert!(registry.resolve("unknown", Value::Null).is_err());
    }

    #[test]
    fn test_default_registry() {
        let registry = create_default_registry();
        assert_eq!(registry.authorities(), vec!["local", "memory"]);

        let temp = TempDir::new().unwrap();
        let config = serde_json::json!({ "root": temp.path().to_str().unwrap() });
        let authority = registry.resolve("local", config).unwrap();
        assert_eq!(authority.name(), "local");

        assert!(registry.resolve("local", Value::Null).is_err());
    }
}
