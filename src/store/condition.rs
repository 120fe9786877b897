//! IOV-tagged condition objects and typed parameter access.

use std::collections::HashMap;
use std::fmt;

use crate::constants::OVERRIDE_ASSIGN;
use crate::ConditionError;
use crate::Result;
use crate::ValidityInterval;

/// A typed condition parameter value. Closed set; accessors match on it
/// exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Int(i64),
    Double(f64),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Double(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
        }
    }
}

/// Typed extraction from a [`ParamValue`].
pub trait FromParam: Sized {
    const TYPE_NAME: &'static str;

    fn from_param(value: &ParamValue) -> Option<Self>;
}

impl FromParam for i64 {
    const TYPE_NAME: &'static str = "int";

    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }
}

impl FromParam for f64 {
    const TYPE_NAME: &'static str = "double";

    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Double(v) => Some(*v),
            // int-valued calibration constants are routinely read as doubles
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl FromParam for String {
    const TYPE_NAME: &'static str = "string";

    fn from_param(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// One calibration/alignment object as served by the data provider: a
/// validity window plus a flat bag of named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    validity: ValidityInterval,
    params: HashMap<String, ParamValue>,
}

impl Condition {
    pub fn new(validity: ValidityInterval) -> Self {
        Condition {
            validity,
            params: HashMap::new(),
        }
    }

    pub fn with_param(
        mut self,
        name: &str,
        value: ParamValue,
    ) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn set_param(
        &mut self,
        name: &str,
        value: ParamValue,
    ) {
        self.params.insert(name.to_string(), value);
    }

    pub fn validity(&self) -> ValidityInterval {
        self.validity
    }

    pub fn set_validity(
        &mut self,
        validity: ValidityInterval,
    ) {
        self.validity = validity;
    }

    /// Typed parameter access; misses raise the `ParamException` family.
    pub fn param<T: FromParam>(
        &self,
        name: &str,
    ) -> Result<T> {
        let value = self
            .params
            .get(name)
            .ok_or_else(|| ConditionError::ParamNotFound {
                name: name.to_string(),
            })?;
        T::from_param(value).ok_or_else(|| {
            ConditionError::ParamWrongType {
                name: name.to_string(),
                expected: T::TYPE_NAME,
            }
            .into()
        })
    }

    /// Two conditions carry the same payload when their parameters agree;
    /// the validity window is deliberately ignored. Dirty propagation keys
    /// on this, not on the window moving.
    pub fn same_payload(
        &self,
        other: &Condition,
    ) -> bool {
        self.params == other.params
    }
}

/// One parsed `"path := type name = value"` configuration override.
#[derive(Debug, Clone, PartialEq)]
pub struct OverrideEntry {
    pub path: String,
    pub param: String,
    pub value: ParamValue,
}

impl OverrideEntry {
    /// Parses a single override string.
    ///
    /// Accepted types are `int`, `double` and `string`; anything else is a
    /// configuration error surfaced at initialize.
    pub fn parse(entry: &str) -> Result<Self> {
        let malformed = |reason: &str| ConditionError::InvalidOverride {
            entry: entry.to_string(),
            reason: reason.to_string(),
        };

        let (path, assignment) = entry
            .split_once(OVERRIDE_ASSIGN)
            .ok_or_else(|| malformed("missing ':='"))?;
        let path = path.trim();
        if path.is_empty() {
            return Err(malformed("empty condition path").into());
        }

        let (lhs, raw_value) = assignment
            .split_once('=')
            .ok_or_else(|| malformed("missing '='"))?;
        let raw_value = raw_value.trim();

        let mut lhs_tokens = lhs.split_whitespace();
        let type_name = lhs_tokens.next().ok_or_else(|| malformed("missing type"))?;
        let param = lhs_tokens
            .next()
            .ok_or_else(|| malformed("missing parameter name"))?;
        if lhs_tokens.next().is_some() {
            return Err(malformed("too many tokens before '='").into());
        }

        let value = match type_name {
            "int" => ParamValue::Int(
                raw_value
                    .parse()
                    .map_err(|_| malformed("value is not an int"))?,
            ),
            "double" => ParamValue::Double(
                raw_value
                    .parse()
                    .map_err(|_| malformed("value is not a double"))?,
            ),
            "string" => ParamValue::Text(raw_value.to_string()),
            other => {
                return Err(malformed(&format!("unsupported type '{other}'")).into());
            }
        };

        Ok(OverrideEntry {
            path: path.to_string(),
            param: param.to_string(),
            value,
        })
    }

    pub fn apply(
        &self,
        condition: &mut Condition,
    ) {
        condition.set_param(&self.param, self.value.clone());
    }
}
