//! Core graph model for the activity engine.
//!
//! A [`Graph`] owns its nodes and edges in two arenas; everything refers to
//! everything else by [`NodeId`] / [`EdgeId`] index. Graphs serialise
//! to/from JSON so an external document store can persist them.

use std::fmt;

use primitives::{BehaviorId, Direction, Parameter};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Index of a node in its graph's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

/// Index of an edge in its graph's edge arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Whether an edge carries a bare control signal or a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Control,
    Object,
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => f.write_str("control"),
            Self::Object => f.write_str("object"),
        }
    }
}

/// Guard on an edge leaving a decision node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    Value(Value),
    /// Taken when no other guard matches.
    Otherwise,
}

impl From<Value> for Guard {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl Guard {
    /// Exact match, with the string coercion protocol documents rely on:
    /// a string decision value matches a non-string guard that renders to it.
    /// Non-string values only ever match exactly.
    pub fn matches(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Otherwise, _) => false,
            (Self::Value(guard), _) if guard == value => true,
            (Self::Value(guard), Value::String(s)) => !guard.is_string() && *s == guard.to_string(),
            (Self::Value(_), _) => false,
        }
    }
}

/// Directed edge between two nodes of the same graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub kind: FlowKind,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<Guard>,
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinRole {
    Input,
    Output,
    /// Input pin whose value is a literal fixed at authoring time.
    Value,
}

/// A pin: one parameter slot of an action invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinNode {
    pub owner: NodeId,
    pub parameter: String,
    pub role: PinRole,
    /// Literal of a value pin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

/// Invocation of a behavior (primitive or sub-protocol).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionNode {
    pub behavior: BehaviorId,
    /// Owned pins, in parameter declaration order.
    #[serde(default)]
    pub pins: Vec<NodeId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    /// The dominant incoming edge whose token is routed onward.
    #[serde(default)]
    pub primary: Option<EdgeId>,
    /// Object edge supplying the decision value directly.
    #[serde(default)]
    pub decision_input_flow: Option<EdgeId>,
    /// Behavior evaluating the decision value.
    #[serde(default)]
    pub predicate: Option<BehaviorId>,
    /// Satellite invocation of `predicate`.
    #[serde(default)]
    pub predicate_call: Option<NodeId>,
    /// Edge from the satellite's `return` pin into the decision.
    #[serde(default)]
    pub predicate_return: Option<EdgeId>,
}

/// Node standing for one of the graph's declared parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterNode {
    pub parameter: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Initial,
    FlowFinal,
    Fork,
    Join,
    Merge,
    Decision(DecisionNode),
    Action(ActionNode),
    Pin(PinNode),
    Parameter(ParameterNode),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::FlowFinal => "flow_final",
            Self::Fork => "fork",
            Self::Join => "join",
            Self::Merge => "merge",
            Self::Decision(_) => "decision",
            Self::Action(_) => "action",
            Self::Pin(_) => "pin",
            Self::Parameter(_) => "parameter",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub kind: NodeKind,
}

impl Node {
    /// Human-facing label for logs: the name when set, otherwise the kind.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}{}", self.kind.label(), self.id.0),
        }
    }

    pub fn as_action(&self) -> Option<&ActionNode> {
        match &self.kind {
            NodeKind::Action(action) => Some(action),
            _ => None,
        }
    }

    pub fn as_pin(&self) -> Option<&PinNode> {
        match &self.kind {
            NodeKind::Pin(pin) => Some(pin),
            _ => None,
        }
    }

    pub fn as_decision(&self) -> Option<&DecisionNode> {
        match &self.kind {
            NodeKind::Decision(decision) => Some(decision),
            _ => None,
        }
    }

    /// Nodes whose outgoing flows carry values rather than control.
    pub fn is_object_node(&self) -> bool {
        matches!(self.kind, NodeKind::Pin(_) | NodeKind::Parameter(_))
    }
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// A complete activity: the body of a protocol or sub-protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub id: BehaviorId,
    /// Declared top-level parameters.
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn new(id: impl Into<BehaviorId>) -> Self {
        Self {
            id: id.into(),
            parameters: Vec::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.0)
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn incoming(&self, node: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().filter(move |e| e.target == node)
    }

    pub fn outgoing(&self, node: NodeId) -> impl Iterator<Item = &Edge> + '_ {
        self.edges.iter().filter(move |e| e.source == node)
    }

    /// The node that consumes tokens travelling on `edge`: the owning
    /// action for edges into an input pin, the target otherwise.
    pub fn consumer(&self, edge: &Edge) -> NodeId {
        match self.node(edge.target).and_then(Node::as_pin) {
            Some(pin) if pin.role != PinRole::Output => pin.owner,
            _ => edge.target,
        }
    }

    /// Pins owned by `action`, in declaration order.
    pub fn pins(&self, action: NodeId) -> impl Iterator<Item = (NodeId, &PinNode)> + '_ {
        self.node(action)
            .and_then(Node::as_action)
            .map(|a| a.pins.as_slice())
            .unwrap_or(&[])
            .iter()
            .filter_map(move |id| self.node(*id).and_then(Node::as_pin).map(|p| (*id, p)))
    }

    /// Nodes able to start a run: initial nodes and input parameter nodes.
    pub fn initiating_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| match &n.kind {
                NodeKind::Initial => true,
                NodeKind::Parameter(p) => p.direction == Direction::In,
                _ => false,
            })
            .map(|n| n.id)
            .collect()
    }

    pub fn required_outputs(&self) -> impl Iterator<Item = &Parameter> + '_ {
        self.parameters.iter().filter(|p| p.is_output() && p.required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn guard_matches_exact_and_coerced_values() {
        let guard = Guard::from(json!(true));
        assert!(guard.matches(&json!(true)));
        assert!(guard.matches(&json!("true")));
        assert!(!guard.matches(&json!(false)));
        assert!(!guard.matches(&json!(1)));
        assert!(Guard::from(json!(3)).matches(&json!("3")));
        assert!(!Guard::Otherwise.matches(&json!(null)));
        assert!(Guard::from(json!(null)).matches(&json!(null)));
    }

    #[test]
    fn string_guard_never_coerces_a_non_string_value() {
        assert!(!Guard::from(json!("3")).matches(&json!(3)));
        assert!(!Guard::from(json!("true")).matches(&json!(true)));
        assert!(Guard::from(json!("3")).matches(&json!("3")));
    }

    #[test]
    fn node_kind_serializes_with_tag() {
        let node = Node {
            id: NodeId(0),
            name: None,
            kind: NodeKind::Fork,
        };
        let json = serde_json::to_value(&node).expect("serializable");
        assert_eq!(json["kind"]["kind"], "fork");
        let back: Node = serde_json::from_value(json).expect("deserializable");
        assert_eq!(back, node);
    }

    #[test]
    fn display_name_falls_back_to_kind() {
        let node = Node {
            id: NodeId(4),
            name: None,
            kind: NodeKind::Join,
        };
        assert_eq!(node.display_name(), "join4");
    }
}
