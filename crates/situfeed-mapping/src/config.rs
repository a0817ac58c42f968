//! Mapping configuration as loaded from YAML.
//!
//! ```yaml
//! mappings:
//!   Cause:
//!     rename: { causeType: type }
//!     unwrap: [detailedCauseType]
//! supertypes:
//!   GenericSituationRecord: [SituationRecord]
//! valueOnly:
//!   Source: sourceIdentification
//! enums: [SeverityEnum]
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Per-type field handling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct ClassMapping {
    pub ignore: Vec<String>,
    pub rename: BTreeMap<String, String>,
    pub unwrap: Vec<String>,
    pub flatten_enum_values: Vec<String>,
    /// Fields always emitted as arrays, since XML does not say whether a
    /// single element is one of many.
    pub list: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct MappingConfig {
    pub mappings: BTreeMap<String, ClassMapping>,
    /// Ancestors per concrete type, nearest first.
    pub supertypes: BTreeMap<String, Vec<String>>,
    pub value_only: BTreeMap<String, String>,
    pub enums: Vec<String>,
}

impl MappingConfig {
    /// Loads and validates a mapping file. A missing file is an error, never
    /// an empty config.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(display.clone())
            } else {
                ConfigError::Io {
                    path: display.clone(),
                    source,
                }
            }
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: MappingConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (type_name, mapping) in &self.mappings {
            let invalid = |reason: String| ConfigError::Invalid {
                type_name: type_name.clone(),
                reason,
            };
            if let Some(field) = mapping.ignore.iter().find(|f| mapping.unwrap.contains(f)) {
                return Err(invalid(format!("`{field}` is both ignored and unwrapped")));
            }
            if let Some((field, _)) = mapping.rename.iter().find(|(_, to)| to.trim().is_empty()) {
                return Err(invalid(format!("`{field}` is renamed to an empty name")));
            }
        }
        for (type_name, property) in &self.value_only {
            if property.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    type_name: type_name.clone(),
                    reason: "valueOnly property is empty".into(),
                });
            }
        }
        for (type_name, ancestors) in &self.supertypes {
            if ancestors.contains(type_name) {
                return Err(ConfigError::Invalid {
                    type_name: type_name.clone(),
                    reason: "type lists itself as a supertype".into(),
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
    fn parses_camel_case_keys() {
        let config = MappingConfig::from_yaml(
            r#"
mappings:
  DetailedCauseType:
    flattenEnumValues: [accidentType, obstructionType]
    list: [roads]
valueOnly:
  Mobility: mobilityType
enums: [SeverityEnum]
"#,
        )
        .unwrap();
        let detail = &config.mappings["DetailedCauseType"];
        assert_eq!(detail.flatten_enum_values, vec!["accidentType", "obstructionType"]);
        assert_eq!(detail.list, vec!["roads"]);
        assert_eq!(config.value_only["Mobility"], "mobilityType");
        assert_eq!(config.enums, vec!["SeverityEnum"]);
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = MappingConfig::from_yaml("mappings:\n  A:\n    ignroe: [x]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn rejects_contradictory_field_rules() {
        let err = MappingConfig::from_yaml("mappings:\n  A:\n    ignore: [x]\n    unwrap: [x]\n")
            .unwrap_err();
        assert!(err.to_string().contains("both ignored and unwrapped"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let path = std::env::temp_dir().join("situfeed_missing_mappings.yaml");
        let _ = std::fs::remove_file(&path);
        assert!(matches!(MappingConfig::load(&path), Err(ConfigError::NotFound(_))));
    }
}
