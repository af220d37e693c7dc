//! Store configuration, persisted as TOML.
//!
//! A [`StoreConfig`] declares the named storage areas the layout routes
//! instances into. Instances whose root type is not owned by any declared
//! area land in the default main area.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::identity::Identity;

/// One named storage area.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaConfig {
    /// Area name; becomes the sub-directory name under the store root.
    pub name: String,
    /// Root types this area owns (an instance belongs here when one of
    /// these subsumes its root type).
    #[serde(default)]
    pub root_types: Vec<String>,
    /// Whether assertions and queries get separate sub-directories.
    #[serde(default)]
    pub split_by_function: bool,
}

impl AreaConfig {
    /// Create an area owning the given root types.
    pub fn new(name: impl Into<String>, root_types: Vec<String>) -> Self {
        Self {
            name: name.into(),
            root_types,
            split_by_function: false,
        }
    }

    /// Split assertions and queries into separate sub-directories.
    pub fn split(mut self) -> Self {
        self.split_by_function = true;
        self
    }

    /// The area's root types as identities.
    pub fn root_identities(&self) -> Vec<Identity> {
        self.root_types.iter().map(Identity::new).collect()
    }
}

/// Store configuration: the declared areas, in routing priority order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Named areas; first area owning a type wins.
    #[serde(default)]
    pub areas: Vec<AreaConfig>,
}

impl StoreConfig {
    /// A config with no typed areas: everything goes to the main area.
    pub fn main_only() -> Self {
        Self::default()
    }

    /// Add an area.
    pub fn with_area(mut self, area: AreaConfig) -> Self {
        self.areas.push(area);
        self
    }

    /// Parse a config from TOML text.
    pub fn from_toml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml(&text, &path.display().to_string())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for area in &self.areas {
            if !seen.insert(area.name.as_str()) {
                return Err(ConfigError::DuplicateArea {
                    name: area.name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let config = StoreConfig::from_toml("", "inline").unwrap();
        assert!(config.areas.is_empty());
    }

    #[test]
    fn parse_areas() {
        let text = r#"
            [[areas]]
            name = "clinical"
            root_types = ["Patient", "Ward"]
            split_by_function = true

            [[areas]]
            name = "geo"
            root_types = ["Address"]
        "#;
        let config = StoreConfig::from_toml(text, "inline").unwrap();
        assert_eq!(config.areas.len(), 2);
        assert!(config.areas[0].split_by_function);
        assert_eq!(config.areas[1].root_types, vec!["Address"]);
    }

    #[test]
    fn duplicate_area_names_rejected() {
        let text = r#"
            [[areas]]
            name = "a"
            [[areas]]
            name = "a"
        "#;
        assert!(matches!(
            StoreConfig::from_toml(text, "inline"),
            Err(ConfigError::DuplicateArea { .. })
        ));
    }
}
