//! Registry module
//!
//! Keeps the set of names registered with the server and decides whether a
//! new registration is accepted.

use std::collections::HashSet;

use thiserror::Error;

/// Reasons a registration is rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("name already registered: {0}")]
    AlreadyRegistered(String),
}

/// Names registered during the lifetime of the server
#[derive(Debug, Default)]
pub struct Registry {
    names: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a name, surrounding whitespace ignored
    ///
    /// Returns the stored form of the name.
    pub fn register(&mut self, name: &str) -> Result<String, RegistrationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }

        if !self.names.insert(name.to_string()) {
            return Err(RegistrationError::AlreadyRegistered(name.to_string()));
        }

        Ok(name.to_string())
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name.trim())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_new_name() {
        let mut registry = Registry::new();
        assert_eq!(registry.register("mart").unwrap(), "mart");
        assert!(registry.contains("mart"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = Registry::new();
        registry.register("mart").unwrap();

        let err = registry.register("  mart ").unwrap_err();
        assert_eq!(err, RegistrationError::AlreadyRegistered("mart".to_string()));
        assert_eq!(err.to_string(), "name already registered: mart");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_empty_rejected() {
        let mut registry = Registry::new();
        assert_eq!(registry.register("   "), Err(RegistrationError::EmptyName));
        assert!(registry.is_empty());
    }
}
