//! Dataset-name registry.
//!
//! The orchestrator's single source of truth for which dataset names are
//! live. Registering never overwrites: a taken name gets a numeric suffix.

use crate::error::EngineError;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub(crate) struct NameRegistry {
  names: HashSet<String>,
}

impl NameRegistry {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Registers `base`, or `base0`, `base1`, ... if it is taken, and returns
  /// the name actually registered.
  pub(crate) fn register(&mut self, base: &str) -> String {
    let name = if self.names.contains(base) {
      (0u64..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !self.names.contains(candidate))
        .unwrap_or_else(|| base.to_string())
    } else {
      base.to_string()
    };
    self.names.insert(name.clone());
    name
  }

  /// Frees `name`.
  pub(crate) fn unregister(&mut self, name: &str) -> Result<(), EngineError> {
    if self.names.remove(name) {
      Ok(())
    } else {
      Err(EngineError::NotFound(name.to_string()))
    }
  }

  pub(crate) fn contains(&self, name: &str) -> bool {
    self.names.contains(name)
  }

  /// Fails with [`EngineError::NotFound`] unless `name` is live.
  pub(crate) fn ensure(&self, name: &str) -> Result<(), EngineError> {
    if self.contains(name) {
      Ok(())
    } else {
      Err(EngineError::NotFound(name.to_string()))
    }
  }

  /// Live names, sorted.
  pub(crate) fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.names.iter().cloned().collect();
    names.sort();
    names
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_register_free_name_verbatim() {
    let mut registry = NameRegistry::new();
    assert_eq!(registry.register("nums"), "nums");
    assert!(registry.contains("nums"));
  }

  #[test]
  fn test_collisions_get_suffixes() {
    let mut registry = NameRegistry::new();
    assert_eq!(registry.register("a"), "a");
    assert_eq!(registry.register("a"), "a0");
    assert_eq!(registry.register("a"), "a1");
    assert_eq!(registry.names(), vec!["a", "a0", "a1"]);
  }

  #[test]
  fn test_suffix_skips_taken_names() {
    let mut registry = NameRegistry::new();
    registry.register("b");
    registry.register("b0");
    assert_eq!(registry.register("b"), "b1");
  }

  #[test]
  fn test_unregister_unknown_is_not_found() {
    let mut registry = NameRegistry::new();
    registry.register("x");
    assert!(registry.unregister("x").is_ok());
    assert!(matches!(
      registry.unregister("x"),
      Err(EngineError::NotFound(name)) if name == "x"
    ));
    assert!(registry.ensure("x").is_err());
  }

  #[test]
  fn test_freed_name_is_reused() {
    let mut registry = NameRegistry::new();
    registry.register("c");
    registry.unregister("c").unwrap();
    assert_eq!(registry.register("c"), "c");
  }
}
