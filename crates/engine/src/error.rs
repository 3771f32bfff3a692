//! Engine-level error types.

use primitives::{BehaviorError, BehaviorId};
use serde_json::Value;
use thiserror::Error;

use crate::execution::ActivityExecution;
use crate::models::{EdgeId, FlowKind, NodeId};

/// Malformed graph discovered while a run is in progress. Always fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StructuralError {
    #[error("fork {node} must have exactly one incoming edge, found {count}")]
    ForkIncomingEdges { node: NodeId, count: usize },

    #[error("fork {node} has {count} pending tokens, expected one")]
    ForkMultipleTokens { node: NodeId, count: usize },

    #[error("join {node} must have exactly one outgoing edge, found {count}")]
    JoinOutgoingEdges { node: NodeId, count: usize },

    /// A join cannot invent a merged value; combining is a behavior's job.
    #[error("join {node} received {count} object values for a single object flow")]
    JoinValueConflict { node: NodeId, count: usize },

    #[error("{node} must emit an object flow but consumed no value")]
    MissingPayload { node: NodeId },

    #[error("decision {node} has no primary incoming edge")]
    DecisionWithoutPrimary { node: NodeId },

    #[error("decision {node} has a control primary edge but no decision input")]
    DecisionWithoutInput { node: NodeId },

    #[error("decision {node} has no outgoing edge matching {value} and no otherwise edge")]
    NoMatchingGuard { node: NodeId, value: Value },

    #[error("{edge} leaving {node} must be a {expected} flow")]
    FlowKindMismatch {
        node: NodeId,
        edge: EdgeId,
        expected: FlowKind,
    },

    #[error("{node} invokes unknown behavior '{behavior}'")]
    UnknownBehavior { node: NodeId, behavior: BehaviorId },

    #[error("{node} references parameter '{parameter}' not declared by '{behavior}'")]
    UnknownParameter {
        node: NodeId,
        behavior: BehaviorId,
        parameter: String,
    },

    #[error("edge references unknown {0}")]
    UnknownNode(NodeId),

    #[error("{edge} already carries a token")]
    EdgeOccupied { edge: EdgeId },

    #[error("sub-protocol '{behavior}' nested {depth} levels deep")]
    NestingTooDeep { behavior: BehaviorId, depth: usize },

    #[error("graph failed validation: {}", .issues.join("; "))]
    Invalid { issues: Vec<String> },
}

/// A required value is missing (or over-supplied) when its node becomes a
/// dispatch candidate. Always fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BindingError {
    #[error("{node} has no value for required input '{parameter}'")]
    MissingInput { node: NodeId, parameter: String },

    #[error("value pin '{parameter}' of {node} has no literal")]
    MissingLiteral { node: NodeId, parameter: String },

    #[error("{node} bound {count} values to single-valued parameter '{parameter}'")]
    TooManyValues {
        node: NodeId,
        parameter: String,
        count: usize,
    },

    #[error("'{graph}' requires a value for input parameter '{parameter}'")]
    MissingParameter { graph: BehaviorId, parameter: String },

    #[error("'{graph}' declares no input parameter '{parameter}'")]
    UnknownParameter { graph: BehaviorId, parameter: String },
}

/// Raised by a specialization handler.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SpecializationError {
    #[error("no handler for behavior '{0}'")]
    Unhandled(BehaviorId),

    #[error("{0}")]
    Failed(String),
}

impl SpecializationError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Everything that can abort a run.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    Binding(#[from] BindingError),

    #[error("specialization '{name}' failed: {source}")]
    Specialization {
        name: String,
        #[source]
        source: SpecializationError,
    },

    #[error("behavior '{behavior}' failed at {node}: {source}")]
    Behavior {
        node: NodeId,
        behavior: BehaviorId,
        #[source]
        source: BehaviorError,
    },

    /// A nested run failed; the caller and every ancestor abort with it.
    #[error("sub-protocol '{behavior}' invoked at {node} failed: {source}")]
    SubGraph {
        node: NodeId,
        behavior: BehaviorId,
        #[source]
        source: Box<EngineError>,
    },

    #[error("round limit of {0} exceeded")]
    RoundLimitExceeded(usize),
}

impl EngineError {
    /// The innermost error, looking through sub-protocol wrappers.
    pub fn root(&self) -> &EngineError {
        match self {
            Self::SubGraph { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_structural(&self) -> bool {
        matches!(self.root(), Self::Structural(_))
    }

    pub fn is_binding(&self) -> bool {
        matches!(self.root(), Self::Binding(_))
    }
}

/// A failed run: the error plus the partial trace accumulated so far.
#[derive(Debug, Error)]
#[error("execution of '{}' failed: {error}", .execution.graph)]
pub struct ExecutionFailure {
    #[source]
    pub error: EngineError,
    pub execution: Box<ActivityExecution>,
}

/// Errors raised while authoring a graph.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GraphError {
    #[error("unknown {0}")]
    UnknownNode(NodeId),

    #[error("an edge from {from} to {to} with the same guard already exists")]
    DuplicateEdge { from: NodeId, to: NodeId },

    #[error("{node} cannot be the {end} of a {kind} flow: {reason}")]
    InvalidEndpoint {
        node: NodeId,
        end: &'static str,
        kind: FlowKind,
        reason: &'static str,
    },

    #[error("{0} is not a decision node")]
    NotADecision(NodeId),

    #[error("{0} is not an action")]
    NotAnAction(NodeId),

    #[error("decision {0} already has an otherwise edge")]
    DuplicateOtherwise(NodeId),

    #[error("decision {0} has no primary incoming edge")]
    DecisionWithoutPrimary(NodeId),

    #[error("'{behavior}' declares no input parameter '{parameter}'")]
    UnknownParameter {
        behavior: BehaviorId,
        parameter: String,
    },

    #[error("parameter '{0}' is already declared")]
    DuplicateParameter(String),

    #[error("{node} has no {role} pin for '{parameter}'")]
    NoSuchPin {
        node: NodeId,
        role: &'static str,
        parameter: String,
    },

    #[error("decision predicate '{0}' must declare a 'return' output")]
    MissingReturn(BehaviorId),

    #[error("decision predicate '{0}' has no input to receive an object primary flow")]
    PredicateUnreachable(BehaviorId),
}
