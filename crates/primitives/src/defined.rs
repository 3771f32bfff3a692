//! `DefinedPrimitive`: a primitive assembled from a parameter list and
//! optional closures.
//!
//! Deserialized declarations carry only the parameter list; hooks are
//! attached in code, so a primitive read from a document always produces
//! placeholder outputs.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::{BehaviorError, BehaviorId, Consumption, Parameter, ParameterValueMap, Primitive};

pub type OutputHook =
    Arc<dyn Fn(&ParameterValueMap, &Parameter) -> Result<Value, BehaviorError> + Send + Sync>;

pub type ConsumptionHook =
    Arc<dyn Fn(&ParameterValueMap) -> Result<Vec<Consumption>, BehaviorError> + Send + Sync>;

#[derive(Clone, Serialize, Deserialize)]
pub struct DefinedPrimitive {
    pub id: BehaviorId,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(skip)]
    output_hook: Option<OutputHook>,
    #[serde(skip)]
    consumption_hook: Option<ConsumptionHook>,
}

impl DefinedPrimitive {
    pub fn new(id: impl Into<BehaviorId>) -> Self {
        Self {
            id: id.into(),
            parameters: Vec::new(),
            output_hook: None,
            consumption_hook: None,
        }
    }

    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_input(self, name: impl Into<String>, param_type: impl Into<String>) -> Self {
        self.with_parameter(Parameter::input(name, param_type))
    }

    pub fn with_output(self, name: impl Into<String>, param_type: impl Into<String>) -> Self {
        self.with_parameter(Parameter::output(name, param_type))
    }

    /// Attach the output-computation hook, called once per declared output.
    pub fn computing<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ParameterValueMap, &Parameter) -> Result<Value, BehaviorError> + Send + Sync + 'static,
    {
        self.output_hook = Some(Arc::new(hook));
        self
    }

    pub fn consuming<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ParameterValueMap) -> Result<Vec<Consumption>, BehaviorError> + Send + Sync + 'static,
    {
        self.consumption_hook = Some(Arc::new(hook));
        self
    }

    pub fn has_output_hook(&self) -> bool {
        self.output_hook.is_some()
    }
}

impl fmt::Debug for DefinedPrimitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinedPrimitive")
            .field("id", &self.id)
            .field("parameters", &self.parameters)
            .field("output_hook", &self.output_hook.is_some())
            .field("consumption_hook", &self.consumption_hook.is_some())
            .finish()
    }
}

impl Primitive for DefinedPrimitive {
    fn id(&self) -> &BehaviorId {
        &self.id
    }

    fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    fn compute_output(
        &self,
        inputs: &ParameterValueMap,
        output: &Parameter,
    ) -> Result<Option<Value>, BehaviorError> {
        if !output.is_output() || self.parameter(&output.name).is_none() {
            return Err(BehaviorError::UnknownOutput(output.name.clone()));
        }
        match &self.output_hook {
            Some(hook) => {
                let value = hook(inputs, output)?;
                debug!(primitive = %self.id, output = %output.name, %value, "computed output");
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn consumed(&self, inputs: &ParameterValueMap) -> Result<Vec<Consumption>, BehaviorError> {
        match &self.consumption_hook {
            Some(hook) => hook(inputs),
            None => Ok(Vec::new()),
        }
    }
}
