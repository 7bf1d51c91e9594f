//! Cache generations and the namespaces derived from them.

use color_eyre::{eyre::eyre, Result};
use std::fmt;

/// A build-identified label that namespaces all cached data of one deploy.
///
/// Exactly one generation is current for a running worker; every namespace
/// not derived from it is stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheGeneration {
  label: String,
}

impl CacheGeneration {
  /// Build a generation from a semantic version and an optional build number.
  ///
  /// `("2.3.0", Some(45))` yields `v2.3.0+45`, `("2.3.0", None)` yields `v2.3.0`.
  pub fn from_release(version: &str, build: Option<u64>) -> Result<Self> {
    let version = semver::Version::parse(version.trim_start_matches('v'))
      .map_err(|e| eyre!("Invalid generation version '{}': {}", version, e))?;

    let label = match build {
      Some(build) => format!("v{}+{}", version, build),
      None => format!("v{}", version),
    };

    Ok(Self { label })
  }

  /// Use an externally supplied label verbatim (e.g. `v2`).
  pub fn from_label(label: &str) -> Result<Self> {
    let label = label.trim();
    if label.is_empty() {
      return Err(eyre!("Generation label must not be empty"));
    }
    if label.chars().any(char::is_whitespace) {
      return Err(eyre!("Generation label '{}' contains whitespace", label));
    }
    Ok(Self {
      label: label.to_string(),
    })
  }

  pub fn label(&self) -> &str {
    &self.label
  }
}

impl fmt::Display for CacheGeneration {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.label)
  }
}

/// What a namespace holds within its generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespacePurpose {
  /// App shell resources fetched at install time
  Precache,
  /// Resources stored as they are requested
  Runtime,
}

impl NamespacePurpose {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Precache => "precache",
      Self::Runtime => "runtime",
    }
  }
}

/// A named partition of the cache store.
///
/// Names produced by [`CacheNamespace::for_generation`] are a pure function of
/// (prefix, generation, purpose), so two generations never share a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheNamespace(String);

impl CacheNamespace {
  pub fn for_generation(
    prefix: Option<&str>,
    generation: &CacheGeneration,
    purpose: NamespacePurpose,
  ) -> Self {
    match prefix {
      Some(prefix) => Self(format!("{}-{}-{}", prefix, generation, purpose.as_str())),
      None => Self(format!("{}-{}", generation, purpose.as_str())),
    }
  }

  /// Wrap an existing namespace name, e.g. one listed by the store.
  pub fn from_name(name: impl Into<String>) -> Self {
    Self(name.into())
  }

  pub fn name(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CacheNamespace {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// The pair of namespaces owned by one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationNamespaces {
  pub precache: CacheNamespace,
  pub runtime: CacheNamespace,
  prefix: Option<String>,
}

impl GenerationNamespaces {
  pub fn new(prefix: Option<&str>, generation: &CacheGeneration) -> Self {
    Self {
      precache: CacheNamespace::for_generation(prefix, generation, NamespacePurpose::Precache),
      runtime: CacheNamespace::for_generation(prefix, generation, NamespacePurpose::Runtime),
      prefix: prefix.map(str::to_string),
    }
  }

  /// Whether a stored namespace belongs to this app at all, in any
  /// generation. With a prefix only `{prefix}-…` names do; without one the
  /// store is assumed to hold this app alone.
  pub fn in_scope(&self, name: &str) -> bool {
    match &self.prefix {
      Some(prefix) => name
        .strip_prefix(prefix.as_str())
        .is_some_and(|rest| rest.starts_with('-')),
      None => true,
    }
  }

  /// Whether a stored namespace name belongs to this generation.
  pub fn owns(&self, name: &str) -> bool {
    name == self.precache.name() || name == self.runtime.name()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_release_label_with_build() {
    let generation = CacheGeneration::from_release("2.3.0", Some(45)).unwrap();
    assert_eq!(generation.label(), "v2.3.0+45");
  }

  #[test]
  fn test_release_label_accepts_leading_v() {
    let generation = CacheGeneration::from_release("v1.0.0", None).unwrap();
    assert_eq!(generation.label(), "v1.0.0");
  }

  #[test]
  fn test_release_rejects_non_semver() {
    assert!(CacheGeneration::from_release("two", Some(1)).is_err());
  }

  #[test]
  fn test_label_rejects_blank() {
    assert!(CacheGeneration::from_label("  ").is_err());
    assert!(CacheGeneration::from_label("v 2").is_err());
  }

  #[test]
  fn test_namespace_names() {
    let v2 = CacheGeneration::from_label("v2").unwrap();
    let namespaces = GenerationNamespaces::new(None, &v2);
    assert_eq!(namespaces.precache.name(), "v2-precache");
    assert_eq!(namespaces.runtime.name(), "v2-runtime");

    let prefixed = GenerationNamespaces::new(Some("shell"), &v2);
    assert_eq!(prefixed.runtime.name(), "shell-v2-runtime");
  }

  #[test]
  fn test_generations_never_collide() {
    let v1 = GenerationNamespaces::new(None, &CacheGeneration::from_label("v1").unwrap());
    let v2 = GenerationNamespaces::new(None, &CacheGeneration::from_label("v2").unwrap());

    assert!(!v2.owns(v1.precache.name()));
    assert!(!v2.owns(v1.runtime.name()));
    assert!(v2.owns("v2-precache"));
    assert!(!v2.owns("v2-other"));
  }

  #[test]
  fn test_prefix_limits_scope() {
    let v2 = CacheGeneration::from_label("v2").unwrap();
    let mine = GenerationNamespaces::new(Some("myapp"), &v2);
    assert!(mine.in_scope("myapp-v1-runtime"));
    assert!(mine.in_scope("myapp-v2-precache"));
    assert!(!mine.in_scope("other-v1-runtime"));
    assert!(!mine.in_scope("myappx-v1-runtime"));
    assert!(!mine.in_scope("v1-runtime"));

    let unprefixed = GenerationNamespaces::new(None, &v2);
    assert!(unprefixed.in_scope("other-v1-runtime"));
  }
}
