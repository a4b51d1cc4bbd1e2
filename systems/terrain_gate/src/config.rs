//! Declarative rule configuration.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::Deserialize;
use terrain_conditions_core::{ConditionName, EntityKind, TerrainTypeName};
use thiserror::Error;

/// Errors raised while loading or validating rule configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed or lacked a required field.
    #[error("failed to parse terrain condition rule: {0}")]
    Parse(#[from] toml::de::Error),
    /// The rule names an empty condition.
    #[error("terrain condition rule requires a non-empty `condition`")]
    EmptyCondition,
    /// The rule grants a condition the entity kind does not track.
    #[error("entity kind `{kind}` does not track condition `{condition}`")]
    UntrackedCondition {
        /// Kind the rule is attached to.
        kind: EntityKind,
        /// Condition the rule grants.
        condition: ConditionName,
    },
}

/// Immutable configuration of a single terrain condition rule.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RuleDocument")]
pub struct TerrainConditionConfig {
    condition: ConditionName,
    terrain_types: BTreeSet<TerrainTypeName>,
}

impl TerrainConditionConfig {
    /// Creates a rule granting `condition` on any of `terrain_types`.
    pub fn new<I>(condition: ConditionName, terrain_types: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = TerrainTypeName>,
    {
        if condition.is_empty() {
            return Err(ConfigError::EmptyCondition);
        }

        Ok(Self {
            condition,
            terrain_types: terrain_types.into_iter().collect(),
        })
    }

    /// Parses a single rule from a TOML document.
    ///
    /// ```toml
    /// condition = "SwimBonus"
    /// terrainTypes = ["Water", "Beach"]
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Condition granted while the entity stands on a trigger terrain.
    #[must_use]
    pub fn condition(&self) -> &ConditionName {
        &self.condition
    }

    /// Terrain types that trigger the condition.
    pub fn terrain_types(&self) -> impl Iterator<Item = &TerrainTypeName> {
        self.terrain_types.iter()
    }

    /// Reports whether standing on `terrain` should assert the condition.
    #[must_use]
    pub fn triggers_on(&self, terrain: &TerrainTypeName) -> bool {
        self.terrain_types.contains(terrain)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RuleDocument {
    condition: String,
    terrain_types: Vec<String>,
}

impl TryFrom<RuleDocument> for TerrainConditionConfig {
    type Error = ConfigError;

    fn try_from(document: RuleDocument) -> Result<Self, Self::Error> {
        Self::new(
            ConditionName::new(document.condition),
            document.terrain_types.into_iter().map(TerrainTypeName::new),
        )
    }
}

/// Rules attached to each entity kind. Configurations are shared by every
/// entity of the kind.
#[derive(Clone, Debug, Default)]
pub struct RuleBook {
    rules: BTreeMap<EntityKind, Vec<Arc<TerrainConditionConfig>>>,
}

impl RuleBook {
    /// Creates an empty rule book.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a rule to every entity of the kind. Rules run in insertion order.
    pub fn insert(&mut self, kind: EntityKind, config: TerrainConditionConfig) {
        self.rules.entry(kind).or_default().push(Arc::new(config));
    }

    /// Rules attached to the kind.
    #[must_use]
    pub fn rules_for(&self, kind: &EntityKind) -> &[Arc<TerrainConditionConfig>] {
        self.rules.get(kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of rules across all kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.values().map(Vec::len).sum()
    }

    /// Reports whether no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks that every rule of the kind grants a condition the kind tracks.
    pub fn ensure_tracked(
        &self,
        kind: &EntityKind,
        tracked: &BTreeSet<ConditionName>,
    ) -> Result<(), ConfigError> {
        match self
            .rules_for(kind)
            .iter()
            .find(|config| !tracked.contains(config.condition()))
        {
            Some(config) => Err(ConfigError::UntrackedCondition {
                kind: kind.clone(),
                condition: config.condition().clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rule_document() {
        let config = TerrainConditionConfig::from_toml_str(
            r#"
                condition = "SwimBonus"
                terrainTypes = ["Water", "Beach"]
            "#,
        )
        .expect("valid rule");

        assert_eq!(config.condition().as_str(), "SwimBonus");
        assert!(config.triggers_on(&TerrainTypeName::new("Water")));
        assert!(config.triggers_on(&TerrainTypeName::new("Beach")));
        assert!(!config.triggers_on(&TerrainTypeName::new("water")));
    }

    #[test]
    fn missing_fields_are_rejected() {
        let missing_terrain = TerrainConditionConfig::from_toml_str(r#"condition = "SwimBonus""#);
        assert!(matches!(missing_terrain, Err(ConfigError::Parse(_))));

        let missing_condition =
            TerrainConditionConfig::from_toml_str(r#"terrainTypes = ["Water"]"#);
        assert!(matches!(missing_condition, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn empty_condition_is_rejected() {
        let error = TerrainConditionConfig::new(
            ConditionName::new(""),
            [TerrainTypeName::new("Water")],
        )
        .expect_err("empty condition");
        assert!(matches!(error, ConfigError::EmptyCondition));

        let parsed = TerrainConditionConfig::from_toml_str(
            r#"
                condition = ""
                terrainTypes = ["Water"]
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed = TerrainConditionConfig::from_toml_str(
            r#"
                condition = "SwimBonus"
                terrainTypes = ["Water"]
                terrain = "Water"
            "#,
        );
        assert!(matches!(parsed, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn empty_trigger_set_never_triggers() {
        let config = TerrainConditionConfig::new(ConditionName::new("Dry"), Vec::new())
            .expect("valid rule");
        assert_eq!(config.terrain_types().count(), 0);
        assert!(!config.triggers_on(&TerrainTypeName::new("Clear")));
    }

    #[test]
    fn rule_book_checks_tracked_conditions() {
        let mut book = RuleBook::new();
        let kind = EntityKind::new("infantry");
        book.insert(
            kind.clone(),
            TerrainConditionConfig::new(
                ConditionName::new("SwimBonus"),
                [TerrainTypeName::new("Water")],
            )
            .expect("valid rule"),
        );

        let tracked: BTreeSet<_> = [ConditionName::new("SwimBonus")].into_iter().collect();
        assert!(book.ensure_tracked(&kind, &tracked).is_ok());

        let error = book
            .ensure_tracked(&kind, &BTreeSet::new())
            .expect_err("untracked condition");
        assert_eq!(
            error.to_string(),
            "entity kind `infantry` does not track condition `SwimBonus`"
        );
        assert_eq!(book.len(), 1);
        assert!(book.rules_for(&EntityKind::new("tank")).is_empty());
    }
}
