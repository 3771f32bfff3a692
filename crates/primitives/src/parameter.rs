//! Behavior identities, parameter declarations and bound parameter values.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::BehaviorError;

// ---------------------------------------------------------------------------
// BehaviorId
// ---------------------------------------------------------------------------

/// Stable identity of a behavior (primitive or sub-protocol), e.g.
/// `"liquid_handling/Provision"`. Graphs refer to behaviors only through it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BehaviorId(String);

impl BehaviorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BehaviorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BehaviorId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for BehaviorId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// ---------------------------------------------------------------------------
// Parameter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    In,
    Out,
}

fn default_required() -> bool {
    true
}

/// A declared parameter of a behavior.
///
/// `required` is the lower multiplicity bound (0 or 1) and `unbounded` the
/// upper one (1 or many).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub direction: Direction,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub unbounded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl Parameter {
    /// A required, single-valued input.
    pub fn input(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self::new(name, param_type, Direction::In)
    }

    /// A required, single-valued output.
    pub fn output(name: impl Into<String>, param_type: impl Into<String>) -> Self {
        Self::new(name, param_type, Direction::Out)
    }

    fn new(name: impl Into<String>, param_type: impl Into<String>, direction: Direction) -> Self {
        Self {
            name: name.into(),
            param_type: param_type.into(),
            direction,
            required: true,
            unbounded: false,
            default: None,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.unbounded = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::In
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Out
    }
}

// ---------------------------------------------------------------------------
// Bound values
// ---------------------------------------------------------------------------

/// One bound value of a named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub parameter: String,
    pub value: Value,
}

impl ParameterValue {
    pub fn new(parameter: impl Into<String>, value: Value) -> Self {
        Self {
            parameter: parameter.into(),
            value,
        }
    }
}

/// Parameter values bound for one invocation, keyed by parameter name.
///
/// A parameter may carry several values when it is declared unbounded; the
/// values keep the order in which they were bound.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterValueMap(BTreeMap<String, Vec<Value>>);

impl ParameterValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, parameter: impl Into<String>, value: Value) {
        self.0.entry(parameter.into()).or_default().push(value);
    }

    pub fn with(mut self, parameter: impl Into<String>, value: Value) -> Self {
        self.push(parameter, value);
        self
    }

    /// First value bound to `parameter`.
    pub fn get(&self, parameter: &str) -> Option<&Value> {
        self.0.get(parameter).and_then(|values| values.first())
    }

    pub fn get_all(&self, parameter: &str) -> &[Value] {
        self.0.get(parameter).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, parameter: &str) -> bool {
        self.0.get(parameter).is_some_and(|values| !values.is_empty())
    }

    /// The bound value as a single JSON value: the value itself when there
    /// is one, an array when there are several.
    pub fn as_value(&self, parameter: &str) -> Option<Value> {
        match self.get_all(parameter) {
            [] => None,
            [single] => Some(single.clone()),
            many => Some(Value::Array(many.to_vec())),
        }
    }

    /// Numeric view of a bound input, for hooks doing arithmetic.
    pub fn number(&self, parameter: &str) -> Result<f64, BehaviorError> {
        let value = self
            .get(parameter)
            .ok_or_else(|| BehaviorError::invalid_input(parameter, "no value bound"))?;
        value
            .as_f64()
            .ok_or_else(|| BehaviorError::invalid_input(parameter, format!("{value} is not a number")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<Value>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flatten into one `ParameterValue` per bound value.
    pub fn to_parameter_values(&self) -> Vec<ParameterValue> {
        self.0
            .iter()
            .flat_map(|(name, values)| {
                values
                    .iter()
                    .map(move |value| ParameterValue::new(name.clone(), value.clone()))
            })
            .collect()
    }
}

impl FromIterator<ParameterValue> for ParameterValueMap {
    fn from_iter<I: IntoIterator<Item = ParameterValue>>(iter: I) -> Self {
        let mut map = Self::new();
        for pv in iter {
            map.push(pv.parameter, pv.value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_and_multiple_values_render_differently() {
        let map = ParameterValueMap::new()
            .with("volume", json!(10))
            .with("samples", json!("a"))
            .with("samples", json!("b"));

        assert_eq!(map.as_value("volume"), Some(json!(10)));
        assert_eq!(map.as_value("samples"), Some(json!(["a", "b"])));
        assert_eq!(map.as_value("missing"), None);
        assert_eq!(map.get_all("samples").len(), 2);
    }

    #[test]
    fn number_rejects_non_numeric_values() {
        let map = ParameterValueMap::new().with("x", json!("five"));
        assert!(matches!(
            map.number("x"),
            Err(BehaviorError::InvalidInput { parameter, .. }) if parameter == "x"
        ));
        assert!(map.number("y").is_err());
    }

    #[test]
    fn parameter_deserializes_with_defaults() {
        let p: Parameter =
            serde_json::from_value(json!({ "name": "x", "type": "integer", "direction": "in" }))
                .expect("valid parameter");
        assert!(p.required);
        assert!(!p.unbounded);
        assert_eq!(p.default, None);
        assert!(p.is_input());
    }

    #[test]
    fn flattening_keeps_every_value() {
        let map: ParameterValueMap = vec![
            ParameterValue::new("a", json!(1)),
            ParameterValue::new("a", json!(2)),
            ParameterValue::new("b", json!(true)),
        ]
        .into_iter()
        .collect();
        assert_eq!(map.to_parameter_values().len(), 3);
        assert_eq!(map.len(), 2);
    }
}
