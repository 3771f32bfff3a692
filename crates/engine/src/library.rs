//! Behavior library: resolves [`BehaviorId`]s to primitives or sub-protocols.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use primitives::{BehaviorId, Parameter, Primitive};

use crate::error::StructuralError;
use crate::models::{Graph, NodeId};

/// Anything an action node can invoke.
#[derive(Clone)]
pub enum Behavior {
    Primitive(Arc<dyn Primitive>),
    SubGraph(Arc<Graph>),
}

impl Behavior {
    pub fn primitive(p: impl Primitive + 'static) -> Self {
        Self::Primitive(Arc::new(p))
    }

    pub fn sub_graph(graph: Graph) -> Self {
        Self::SubGraph(Arc::new(graph))
    }

    pub fn id(&self) -> &BehaviorId {
        match self {
            Self::Primitive(p) => p.id(),
            Self::SubGraph(g) => &g.id,
        }
    }

    pub fn parameters(&self) -> &[Parameter] {
        match self {
            Self::Primitive(p) => p.parameters(),
            Self::SubGraph(g) => &g.parameters,
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters().iter().find(|p| p.name == name)
    }

    pub fn is_sub_graph(&self) -> bool {
        matches!(self, Self::SubGraph(_))
    }
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => f.debug_tuple("Primitive").field(p.id()).finish(),
            Self::SubGraph(g) => f.debug_tuple("SubGraph").field(&g.id).finish(),
        }
    }
}

/// Maps behavior identities to their implementations.
#[derive(Debug, Clone, Default)]
pub struct Library {
    behaviors: BTreeMap<BehaviorId, Behavior>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a behavior, replacing any previous one with the same id.
    /// Returns a handle for authoring calls against it.
    pub fn register(&mut self, behavior: Behavior) -> Behavior {
        self.behaviors
            .insert(behavior.id().clone(), behavior.clone());
        behavior
    }

    pub fn with(mut self, behavior: Behavior) -> Self {
        self.register(behavior);
        self
    }

    pub fn get(&self, id: &BehaviorId) -> Option<&Behavior> {
        self.behaviors.get(id)
    }

    pub fn resolve(&self, id: &BehaviorId, node: NodeId) -> Result<&Behavior, StructuralError> {
        self.get(id).ok_or_else(|| StructuralError::UnknownBehavior {
            node,
            behavior: id.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}
