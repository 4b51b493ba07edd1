//! Message catalog for toasts, keyed by entity namespace.

use color_eyre::{eyre::eyre, Result};
use serde_yaml::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::toast::ToastKind;

const BUILTIN: &str = include_str!("../locales/en.yaml");

/// Flat `dotted.key -> template` lookup built from nested YAML.
#[derive(Debug, Clone)]
pub struct Messages {
  entries: HashMap<String, String>,
}

impl Default for Messages {
  fn default() -> Self {
    // The built-in catalog is covered by tests, so a parse failure here is a
    // build defect rather than a runtime condition.
    Self::from_yaml(BUILTIN).unwrap_or_else(|_| Self::empty())
  }
}

impl Messages {
  pub fn empty() -> Self {
    Self {
      entries: HashMap::new(),
    }
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let root: Value = serde_yaml::from_str(contents)?;
    let mut entries = HashMap::new();
    flatten(&root, String::new(), &mut entries);
    Ok(Self { entries })
  }

  /// Built-in catalog with the file at `path` merged over it.
  pub fn with_overrides(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read messages file {}: {}", path.display(), e))?;
    let overrides = Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse messages file {}: {}", path.display(), e))?;

    let mut messages = Self::default();
    messages.entries.extend(overrides.entries);
    Ok(messages)
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.entries.get(key).map(String::as_str)
  }

  /// Human label for a namespace, falling back to the namespace itself.
  pub fn label<'a>(&'a self, namespace: &'a str) -> &'a str {
    self
      .get(&format!("{}.label", namespace))
      .unwrap_or(namespace)
  }

  /// Resolve the toast text for a mutation outcome.
  ///
  /// Tries `{namespace}.{action}.{outcome}`, then `common.{action}.{outcome}`,
  /// and finally returns the namespaced key itself so a missing entry is visible.
  pub fn mutation(&self, namespace: &str, action: &str, outcome: ToastKind, error: Option<&str>) -> String {
    let key = format!("{}.{}.{}", namespace, action, outcome.as_str());
    let template = self
      .get(&key)
      .or_else(|| self.get(&format!("common.{}.{}", action, outcome.as_str())));

    match template {
      Some(template) => template
        .replace("{entity}", self.label(namespace))
        .replace("{error}", error.unwrap_or_default()),
      None => key,
    }
  }
}

fn flatten(value: &Value, prefix: String, out: &mut HashMap<String, String>) {
  match value {
    Value::Mapping(map) => {
      for (k, v) in map {
        let Some(k) = scalar_to_string(k) else {
          continue;
        };
        let key = if prefix.is_empty() {
          k
        } else {
          format!("{}.{}", prefix, k)
        };
        flatten(v, key, out);
      }
    }
    Value::Null | Value::Sequence(_) | Value::Tagged(_) => {}
    scalar => {
      if let Some(text) = scalar_to_string(scalar) {
        out.insert(prefix, text);
      }
    }
  }
}

fn scalar_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}
