use std::fmt::{Display, Formatter};

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Written in place of any value that has no JSON form.
pub const OPAQUE_PLACEHOLDER: &str = "Object";

/// Settings key the host raises before an intentional shutdown.
pub const STOP_FLAG: &str = "__stop_flag__";

/// A host setting. Either plain JSON data or something the host can hold but not describe.
///
/// Opaque entries are decided when the setting is stored, so serializing a setting can't fail.
#[derive(Debug, Clone, PartialEq)]
pub enum Setting {
    Value(Value),
    Opaque,
}

impl Setting {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Setting::Value(value) => Some(value),
            Setting::Opaque => None,
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Setting::Value(Value::Bool(true)))
    }

    pub fn to_json(&self) -> Value {
        match self {
            Setting::Value(value) => value.clone(),
            Setting::Opaque => Value::String(OPAQUE_PLACEHOLDER.to_string()),
        }
    }
}

impl From<Value> for Setting {
    fn from(value: Value) -> Self {
        Setting::Value(value)
    }
}

impl From<bool> for Setting {
    fn from(value: bool) -> Self {
        Setting::Value(Value::Bool(value))
    }
}

impl From<&str> for Setting {
    fn from(value: &str) -> Self {
        Setting::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Setting {
    fn from(value: String) -> Self {
        Setting::Value(Value::String(value))
    }
}

impl Serialize for Setting {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error> where S: Serializer {
        match self {
            Setting::Value(value) => value.serialize(serializer),
            Setting::Opaque => serializer.serialize_str(OPAQUE_PLACEHOLDER),
        }
    }
}

impl Display for Setting {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Setting::Value(Value::String(s)) => write!(f, "{}", s),
            Setting::Value(value) => write!(f, "{}", value),
            Setting::Opaque => write!(f, "{}", OPAQUE_PLACEHOLDER),
        }
    }
}
