//! Type hints for step attribute values
//!
//! The engine's type system needs a tag next to every value the poller
//! writes. Handlers return plain JSON, so the tag is inferred here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Type tag stored next to a step attribute value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeHint {
    Boolean,
    Long,
    Double,
    String,
    List,
    Map,
    /// Null, or any tag this poller does not know
    #[serde(other)]
    Any,
}

impl TypeHint {
    /// Infers the tag for a value. Never fails; unclassifiable values are `Any`.
    ///
    /// Numbers held as integers are `Long`; numbers held as floats are
    /// `Double` even when they have no fractional part.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => TypeHint::Boolean,
            Value::Number(n) if n.is_i64() || n.is_u64() => TypeHint::Long,
            Value::Number(_) => TypeHint::Double,
            Value::String(_) => TypeHint::String,
            Value::Array(_) => TypeHint::List,
            Value::Object(_) => TypeHint::Map,
            Value::Null => TypeHint::Any,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TypeHint::Boolean => "Boolean",
            TypeHint::Long => "Long",
            TypeHint::Double => "Double",
            TypeHint::String => "String",
            TypeHint::List => "List",
            TypeHint::Map => "Map",
            TypeHint::Any => "Any",
        }
    }
}

impl fmt::Display for TypeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
