//! `MockPrimitive`: a test double for `Primitive`.
//!
//! Useful in engine tests where a real primitive library is either
//! unavailable or irrelevant.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use crate::{BehaviorError, BehaviorId, Parameter, ParameterValueMap, Primitive};

/// Behaviour injected into `MockPrimitive` at construction time.
pub enum MockBehaviour {
    /// Return a specific JSON value from every output.
    ReturnValue(Value),
    /// Echo the bound inputs back as a JSON object.
    EchoInputs,
    /// Fail with a `Compute` error.
    Fail(String),
}

/// A mock primitive that records the inputs of every call it receives and
/// returns a programmer-specified result on its single `return` output.
pub struct MockPrimitive {
    pub id: BehaviorId,
    pub parameters: Vec<Parameter>,
    pub behaviour: MockBehaviour,
    /// All inputs seen by this primitive (in call order).
    pub calls: Arc<Mutex<Vec<ParameterValueMap>>>,
}

impl MockPrimitive {
    fn with_behaviour(id: impl Into<BehaviorId>, behaviour: MockBehaviour) -> Self {
        Self {
            id: id.into(),
            parameters: vec![Parameter::output("return", "any")],
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(id: impl Into<BehaviorId>, value: Value) -> Self {
        Self::with_behaviour(id, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that returns its inputs.
    pub fn echoing(id: impl Into<BehaviorId>) -> Self {
        Self::with_behaviour(id, MockBehaviour::EchoInputs)
    }

    /// Create a mock whose output hook always fails.
    pub fn failing(id: impl Into<BehaviorId>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(id, MockBehaviour::Fail(msg.into()))
    }

    /// Declare an extra parameter ahead of the `return` output.
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.insert(0, parameter);
        self
    }

    /// Declare an extra required input.
    pub fn with_input(self, name: impl Into<String>) -> Self {
        self.with_parameter(Parameter::input(name, "any"))
    }

    /// Number of times this primitive has been invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }

    /// Inputs of the most recent invocation.
    pub fn last_call(&self) -> Option<ParameterValueMap> {
        self.calls.lock().ok().and_then(|calls| calls.last().cloned())
    }
}

impl Primitive for MockPrimitive {
    fn id(&self) -> &BehaviorId {
        &self.id
    }

    fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    fn compute_output(
        &self,
        inputs: &ParameterValueMap,
        _output: &Parameter,
    ) -> Result<Option<Value>, BehaviorError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(inputs.clone());
        }

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(Some(v.clone())),
            MockBehaviour::EchoInputs => {
                let mut out = json!({});
                if let Some(obj) = out.as_object_mut() {
                    for (name, _) in inputs.iter() {
                        obj.insert(name.clone(), inputs.as_value(name).unwrap_or(Value::Null));
                    }
                }
                Ok(Some(out))
            }
            MockBehaviour::Fail(msg) => Err(BehaviorError::Compute(msg.clone())),
        }
    }
}
