//! Specialization dispatch.
//!
//! A [`Specialization`] observes a run as it happens: it is told when a run
//! begins and ends and is offered every [`NodeExecution`] as soon as it is
//! appended. Sub-protocol runs nest their own begin/end pair inside the
//! caller's.
//!
//! Routing by behavior identity goes through a [`HandlerTable`]: a static
//! map from [`BehaviorId`] to a plain function, with an explicit fallback for
//! identities the table does not know.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use primitives::BehaviorId;
use serde_json::{json, Map, Value};

use crate::error::SpecializationError;
use crate::execution::{ActivityExecution, NodeExecution};

pub trait Specialization: Send {
    /// Name used in logs and failsafe annotations.
    fn name(&self) -> &str;

    fn on_run_begin(&mut self, _execution: &ActivityExecution) -> Result<(), SpecializationError> {
        Ok(())
    }

    fn on_node_executed(
        &mut self,
        record: &NodeExecution,
        execution: &ActivityExecution,
    ) -> Result<(), SpecializationError>;

    fn on_run_end(&mut self, _execution: &ActivityExecution) -> Result<(), SpecializationError> {
        Ok(())
    }
}

pub type Handler<S> =
    fn(&mut S, &NodeExecution, &ActivityExecution) -> Result<(), SpecializationError>;

/// Behavior identity → handler.
pub struct HandlerTable<S> {
    handlers: BTreeMap<BehaviorId, Handler<S>>,
}

impl<S> Default for HandlerTable<S> {
    fn default() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }
}

impl<S> fmt::Debug for HandlerTable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl<S> HandlerTable<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, behavior: impl Into<BehaviorId>, handler: Handler<S>) -> Self {
        self.insert(behavior, handler);
        self
    }

    pub fn insert(&mut self, behavior: impl Into<BehaviorId>, handler: Handler<S>) {
        self.handlers.insert(behavior.into(), handler);
    }

    pub fn get(&self, behavior: &BehaviorId) -> Option<Handler<S>> {
        self.handlers.get(behavior).copied()
    }

    /// Handler for `record`: the mapped one, else `fallback`. Records of
    /// control nodes carry no behavior and route nowhere.
    pub fn route(&self, record: &NodeExecution, fallback: Handler<S>) -> Option<Handler<S>> {
        record
            .behavior()
            .map(|behavior| self.get(behavior).unwrap_or(fallback))
    }
}

/// Records shared between a [`DefaultSpecialization`] and its owner.
pub type SharedRecords = Arc<Mutex<Vec<Value>>>;

/// Generic renderer: records every invocation's raw input parameters.
#[derive(Debug, Default)]
pub struct DefaultSpecialization {
    handlers: HandlerTable<Self>,
    data: SharedRecords,
    depth: usize,
}

impl DefaultSpecialization {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, behavior: impl Into<BehaviorId>, handler: Handler<Self>) -> Self {
        self.handlers.insert(behavior, handler);
        self
    }

    /// Handle on the recorded data, readable after the engine owns `self`.
    pub fn records(&self) -> SharedRecords {
        Arc::clone(&self.data)
    }

    pub fn push(&mut self, entry: Value) -> Result<(), SpecializationError> {
        self.data
            .lock()
            .map_err(|_| SpecializationError::failed("record store poisoned"))?
            .push(entry);
        Ok(())
    }

    /// Fallback handler: the node, its behavior and its inputs as strings.
    pub fn unhandled(
        &mut self,
        record: &NodeExecution,
        execution: &ActivityExecution,
    ) -> Result<(), SpecializationError> {
        let Some(call) = &record.call else {
            return Ok(());
        };
        let inputs: Map<String, Value> = call
            .inputs
            .iter()
            .map(|(name, _)| {
                let rendered = call
                    .inputs
                    .get_all(name)
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                (name.clone(), Value::String(rendered))
            })
            .collect();
        let entry = json!({
            "graph": execution.graph,
            "node": record.node,
            "behavior": call.behavior,
            "inputs": inputs,
            "depth": self.depth,
        });
        self.push(entry)
    }
}

impl Specialization for DefaultSpecialization {
    fn name(&self) -> &str {
        "default"
    }

    fn on_run_begin(&mut self, _execution: &ActivityExecution) -> Result<(), SpecializationError> {
        self.depth += 1;
        Ok(())
    }

    fn on_node_executed(
        &mut self,
        record: &NodeExecution,
        execution: &ActivityExecution,
    ) -> Result<(), SpecializationError> {
        match self.handlers.route(record, Self::unhandled) {
            Some(handler) => handler(self, record, execution),
            None => Ok(()),
        }
    }

    fn on_run_end(&mut self, _execution: &ActivityExecution) -> Result<(), SpecializationError> {
        self.depth = self.depth.saturating_sub(1);
        Ok(())
    }
}
