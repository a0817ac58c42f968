//! Flat rule registry built once from a [`MappingConfig`].
//!
//! Every type name the config mentions gets a fully merged [`Rule`], so the
//! transformer does a single map lookup per object and never walks the
//! supertype chain at runtime.

use crate::config::{ClassMapping, MappingConfig};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    /// Emit only the resolved inner string.
    Enum,
    /// Emit only the named property.
    ValueOnly(String),
    /// Emit fields according to the merged mapping.
    Fields(FieldRule),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldRule {
    pub ignore: HashSet<String>,
    pub rename: HashMap<String, String>,
    pub unwrap: HashSet<String>,
    pub flatten: Vec<String>,
    pub list: HashSet<String>,
}

impl FieldRule {
    fn absorb(&mut self, mapping: &ClassMapping) {
        self.ignore.extend(mapping.ignore.iter().cloned());
        for (from, to) in &mapping.rename {
            self.rename.entry(from.clone()).or_insert_with(|| to.clone());
        }
        self.unwrap.extend(mapping.unwrap.iter().cloned());
        for field in &mapping.flatten_enum_values {
            if !self.flatten.contains(field) {
                self.flatten.push(field.clone());
            }
        }
        self.list.extend(mapping.list.iter().cloned());
    }

    /// Wire name of a field.
    pub fn wire_name<'a>(&'a self, field: &'a str) -> &'a str {
        self.rename.get(field).map(String::as_str).unwrap_or(field)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    rules: HashMap<String, Rule>,
}

impl Registry {
    pub fn build(config: &MappingConfig) -> Self {
        let mut names: BTreeSet<&String> = BTreeSet::new();
        names.extend(config.mappings.keys());
        names.extend(config.supertypes.keys());
        names.extend(config.value_only.keys());
        names.extend(config.enums.iter());

        let rules = names
            .into_iter()
            .filter_map(|name| resolve(config, name).map(|rule| (name.clone(), rule)))
            .collect();
        Self { rules }
    }

    pub fn rule(&self, type_name: &str) -> Option<&Rule> {
        self.rules.get(type_name)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn chain<'a>(config: &'a MappingConfig, type_name: &'a str) -> impl Iterator<Item = &'a str> {
    std::iter::once(type_name).chain(
        config
            .supertypes
            .get(type_name)
            .into_iter()
            .flatten()
            .map(String::as_str),
    )
}

fn resolve(config: &MappingConfig, type_name: &str) -> Option<Rule> {
    for name in chain(config, type_name) {
        if config.enums.iter().any(|e| e == name) {
            return Some(Rule::Enum);
        }
        if let Some(property) = config.value_only.get(name) {
            return Some(Rule::ValueOnly(property.clone()));
        }
    }

    let mut merged = FieldRule::default();
    let mut found = false;
    for name in chain(config, type_name) {
        if let Some(mapping) = config.mappings.get(name) {
            merged.absorb(mapping);
            found = true;
        }
    }
    found.then_some(Rule::Fields(merged))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> MappingConfig {
        MappingConfig::from_yaml(yaml).unwrap()
    }

    #[test]
    fn supertype_mappings_merge_first_found_wins() {
        let registry = Registry::build(&config(
            r#"
mappings:
  Accident:
    rename: { accidentType: types }
    ignore: [accidentExtension]
  SituationRecord:
    rename: { accidentType: ignored, severity: sev }
    ignore: [situationRecordExtension]
supertypes:
  Accident: [SituationRecord]
"#,
        ));
        let Some(Rule::Fields(rule)) = registry.rule("Accident") else {
            panic!("expected field rule");
        };
        assert_eq!(rule.wire_name("accidentType"), "types");
        assert_eq!(rule.wire_name("severity"), "sev");
        assert!(rule.ignore.contains("accidentExtension"));
        assert!(rule.ignore.contains("situationRecordExtension"));
    }

    #[test]
    fn base_mapping_covers_subtypes_without_own_entry() {
        let registry = Registry::build(&config(
            r#"
mappings:
  SituationRecord:
    ignore: [x]
supertypes:
  MaintenanceWorks: [Roadworks, SituationRecord]
"#,
        ));
        assert!(matches!(registry.rule("MaintenanceWorks"), Some(Rule::Fields(r)) if r.ignore.contains("x")));
    }

    #[test]
    fn enum_and_value_only_follow_chain() {
        let registry = Registry::build(&config(
            r#"
supertypes:
  AccidentTypeEnum: [ExtendedEnum]
  LocalSource: [Source]
valueOnly:
  Source: sourceIdentification
enums: [ExtendedEnum]
"#,
        ));
        assert_eq!(registry.rule("AccidentTypeEnum"), Some(&Rule::Enum));
        assert_eq!(
            registry.rule("LocalSource"),
            Some(&Rule::ValueOnly("sourceIdentification".into()))
        );
        assert!(registry.rule("Unrelated").is_none());
    }
}
