//! The `Primitive` trait: the contract every leaf behavior must fulfil.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{BehaviorError, BehaviorId, Parameter, ParameterValueMap};

/// An amount of some resource used up by one invocation, e.g. 200 µL of a
/// buffer. Units are opaque strings; nothing here converts between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consumption {
    pub resource: String,
    pub amount: f64,
    pub unit: String,
}

impl Consumption {
    pub fn new(resource: impl Into<String>, amount: f64, unit: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            amount,
            unit: unit.into(),
        }
    }
}

/// The core primitive trait.
///
/// The engine never calls into a primitive for anything but its declared
/// parameters and the two hooks below, both of which must be deterministic
/// in their inputs.
pub trait Primitive: Send + Sync {
    fn id(&self) -> &BehaviorId;

    /// Declared parameters, in declaration order.
    fn parameters(&self) -> &[Parameter];

    /// Compute the value of one output parameter from the bound inputs.
    ///
    /// `Ok(None)` means the primitive has no hook for this output and the
    /// engine substitutes an opaque placeholder.
    fn compute_output(
        &self,
        _inputs: &ParameterValueMap,
        _output: &Parameter,
    ) -> Result<Option<Value>, BehaviorError> {
        Ok(None)
    }

    /// Resources used up by one invocation with the given inputs.
    fn consumed(&self, _inputs: &ParameterValueMap) -> Result<Vec<Consumption>, BehaviorError> {
        Ok(Vec::new())
    }

    fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters().iter().find(|p| p.name == name)
    }
}
