use crate::error::GonError;
use crate::stream::DEFAULT_LOOK_BEHIND;
use serde::{Deserialize, Serialize};

/// What the expression builder does when it meets an object a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferencePolicy {
    /// Write a `$` path reference to the first occurrence.
    #[default]
    WriteIdentifier,
    /// Write `null` where a value would contain itself.
    IgnoreCircularReferences,
    /// Fail where a value would contain itself.
    ErrorCircularReferences,
}

/// What the evaluator does with a document key it cannot assign normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyAction {
    Ignore,
    SetIfPossible,
    Throw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerializerConfig {
    pub reference_policy: ReferencePolicy,
    /// Keys the type has no property for.
    pub missing_property: PropertyAction,
    /// Keys naming a property marked as ignored.
    pub ignored_property: PropertyAction,
    /// Emit `(Type)` casts where the runtime type differs from the declared one.
    pub write_type_information: bool,
    pub pretty: bool,
    pub indent: usize,
    pub max_depth: usize,
    pub look_behind: usize,
}

/// Nesting allowed by default. Parsing, evaluation and building recurse once
/// per level, so this stays well inside a 2 MiB thread stack.
pub const DEFAULT_MAX_DEPTH: usize = 64;

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            reference_policy: ReferencePolicy::default(),
            missing_property: PropertyAction::Throw,
            ignored_property: PropertyAction::Ignore,
            write_type_information: true,
            pretty: true,
            indent: 2,
            max_depth: DEFAULT_MAX_DEPTH,
            look_behind: DEFAULT_LOOK_BEHIND,
        }
    }
}

impl SerializerConfig {
    pub fn from_json_str(text: &str) -> Result<Self, GonError> {
        serde_json::from_str(text).map_err(|e| GonError::Config(e.to_string()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, GonError> {
        serde_yaml::from_str(text).map_err(|e| GonError::Config(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, GonError> {
        serde_json::to_string_pretty(self).map_err(|e| GonError::Config(e.to_string()))
    }

    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    pub fn with_policy(mut self, policy: ReferencePolicy) -> Self {
        self.reference_policy = policy;
        self
    }
}
