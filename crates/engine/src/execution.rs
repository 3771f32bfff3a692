//! The execution trace: one [`ActivityExecution`] per run, one
//! [`NodeExecution`] per firing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use primitives::{BehaviorId, Consumption, ParameterValue, ParameterValueMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{EdgeId, FlowKind, NodeId};

/// Index of a record in its run's `executions` list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "record#{}", self.0)
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "flow", content = "value", rename_all = "snake_case")]
pub enum TokenValue {
    Control,
    Object(Value),
}

impl TokenValue {
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::Control => None,
            Self::Object(value) => Some(value),
        }
    }

    pub fn kind(&self) -> FlowKind {
        match self {
            Self::Control => FlowKind::Control,
            Self::Object(_) => FlowKind::Object,
        }
    }
}

/// A pending (or consumed) activity edge flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    /// `None` for synthetic start and parameter-binding tokens.
    pub edge: Option<EdgeId>,
    /// Node that will consume the token.
    pub target: NodeId,
    /// Record of the firing that produced the token.
    pub source: Option<RecordId>,
    pub value: TokenValue,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// What an action invocation was called with and what it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub behavior: BehaviorId,
    pub inputs: ParameterValueMap,
    pub outputs: ParameterValueMap,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub consumed: Vec<Consumption>,
    /// The nested run, for sub-protocol invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_execution: Option<Box<ActivityExecution>>,
}

/// One firing of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: RecordId,
    pub node: NodeId,
    /// Node kind label, kept so a trace reads without its graph.
    pub kind: String,
    pub round: usize,
    pub incoming: Vec<Token>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<Invocation>,
    /// Failsafe annotations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

impl NodeExecution {
    pub fn behavior(&self) -> Option<&BehaviorId> {
        self.call.as_ref().map(|c| &c.behavior)
    }
}

/// Tokens placed on and consumed from one edge over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowCount {
    pub edge: EdgeId,
    pub placed: usize,
    pub consumed: usize,
}

/// Append-only record of a complete run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityExecution {
    pub id: Uuid,
    pub graph: BehaviorId,
    pub actor: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Bound top-level inputs followed by outputs, in binding order.
    pub parameter_values: Vec<ParameterValue>,
    pub executions: Vec<NodeExecution>,
    pub consumed: Vec<Consumption>,
    pub flows: Vec<FlowCount>,
    /// Tokens still pending when the run stopped.
    pub pending: Vec<Token>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    pub completed_normally: bool,
}

impl ActivityExecution {
    pub fn new(graph: BehaviorId, actor: impl Into<String>, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            graph,
            actor: actor.into(),
            start_time,
            end_time: None,
            parameter_values: Vec::new(),
            executions: Vec::new(),
            consumed: Vec::new(),
            flows: Vec::new(),
            pending: Vec::new(),
            issues: Vec::new(),
            completed_normally: false,
        }
    }

    /// Value bound to a top-level parameter; several values come back as an
    /// array.
    pub fn output(&self, name: &str) -> Option<Value> {
        let values: Vec<Value> = self
            .parameter_values
            .iter()
            .filter(|pv| pv.parameter == name)
            .map(|pv| pv.value.clone())
            .collect();
        match values.len() {
            0 => None,
            1 => values.into_iter().next(),
            _ => Some(Value::Array(values)),
        }
    }

    pub fn record(&self, id: RecordId) -> Option<&NodeExecution> {
        self.executions.get(id.0)
    }

    pub fn records_for(&self, node: NodeId) -> impl Iterator<Item = &NodeExecution> + '_ {
        self.executions.iter().filter(move |r| r.node == node)
    }

    /// Nodes in the order they fired.
    pub fn firing_sequence(&self) -> Vec<NodeId> {
        self.executions.iter().map(|r| r.node).collect()
    }

    pub fn flow(&self, edge: EdgeId) -> Option<&FlowCount> {
        self.flows.iter().find(|f| f.edge == edge)
    }

    pub fn rounds(&self) -> usize {
        self.executions.last().map_or(0, |r| r.round + 1)
    }
}

/// Sum consumption per (resource, unit), keeping first-seen order.
pub fn aggregate<'a>(items: impl IntoIterator<Item = &'a Consumption>) -> Vec<Consumption> {
    let mut order: Vec<(String, String)> = Vec::new();
    let mut totals: BTreeMap<(String, String), f64> = BTreeMap::new();
    for c in items {
        let key = (c.resource.clone(), c.unit.clone());
        if !totals.contains_key(&key) {
            order.push(key.clone());
        }
        *totals.entry(key).or_insert(0.0) += c.amount;
    }
    order
        .into_iter()
        .map(|key| {
            let amount = totals.get(&key).copied().unwrap_or_default();
            Consumption::new(key.0, amount, key.1)
        })
        .collect()
}
