//! `engine` crate: graph model, authoring, validation and the activity
//! execution engine.

pub mod builder;
pub mod clock;
pub mod decision;
pub mod error;
pub mod execution;
pub mod executor;
pub mod firing;
pub mod library;
pub mod models;
pub mod pool;
pub mod predicates;
pub mod specialization;
pub mod validation;

pub use decision::DecisionBuilder;
pub use error::{
    BindingError, EngineError, ExecutionFailure, GraphError, SpecializationError, StructuralError,
};
pub use execution::{ActivityExecution, NodeExecution, Token, TokenValue};
pub use executor::{EngineConfig, ExecutionEngine, NodeOutputs};
pub use library::{Behavior, Library};
pub use models::{EdgeId, FlowKind, Graph, Guard, NodeId, NodeKind};
pub use specialization::{DefaultSpecialization, HandlerTable, Specialization};
pub use validation::{validate_graph, ValidationReport};
