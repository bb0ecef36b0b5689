//! Step domain types
//!
//! The engine owns steps; the poller reads `attributes.params` and writes
//! `attributes.returns` while the step waits for an external result.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::type_hint::TypeHint;
use crate::Params;
use crate::protocol::step_state;

/// The slice of a step document the poller reads and writes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "uuid")]
    pub id: String,
    pub workflow_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: StepAttributes,
}

impl Step {
    /// Creates a step waiting on an external result
    pub fn awaiting(id: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            state: step_state::EVENT_TRANSMIT.to_string(),
            attributes: StepAttributes::default(),
        }
    }

    /// Adds a parameter, inferring its type hint
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        let attribute = Attribute::new(name, value);
        self.attributes
            .params
            .insert(attribute.name.clone(), attribute);
        self
    }

    /// Returns true while returns may still be written
    pub fn is_awaiting_result(&self) -> bool {
        self.state == step_state::EVENT_TRANSMIT
    }

    /// Parameter values without their type hints
    pub fn param_values(&self) -> Params {
        self.attributes
            .params
            .iter()
            .map(|(name, attr)| (name.clone(), attr.value.clone()))
            .collect()
    }
}

/// Input and output attributes of a step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepAttributes {
    #[serde(default)]
    pub params: HashMap<String, Attribute>,
    #[serde(default)]
    pub returns: HashMap<String, Attribute>,
}

/// A named value with its type hint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default = "default_hint")]
    pub type_hint: TypeHint,
}

fn default_hint() -> TypeHint {
    TypeHint::Any
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        let type_hint = TypeHint::infer(&value);
        Self {
            name: name.into(),
            value,
            type_hint,
        }
    }
}

/// Builds the `returns` entries for a handler result
pub fn returns_from(values: &Params) -> HashMap<String, Attribute> {
    values
        .iter()
        .map(|(name, value)| (name.clone(), Attribute::new(name.clone(), value.clone())))
        .collect()
}
