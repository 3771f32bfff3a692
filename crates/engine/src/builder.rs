//! Authoring operations on [`Graph`].
//!
//! Graphs are assembled through these methods and then frozen: a run only
//! ever borrows `&Graph`.

use primitives::{Direction, Parameter};
use serde_json::Value;

use crate::error::GraphError;
use crate::library::Behavior;
use crate::models::{
    ActionNode, Edge, EdgeId, FlowKind, Graph, Guard, Node, NodeId, NodeKind, ParameterNode,
    PinNode, PinRole,
};

impl Graph {
    pub(crate) fn push_node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id,
            name: None,
            kind,
        });
        id
    }

    fn node_or_err(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.node(id).ok_or(GraphError::UnknownNode(id))
    }

    /// The graph's initial node, created on first use.
    pub fn initial(&mut self) -> NodeId {
        self.find_or_push(NodeKind::Initial)
    }

    /// The graph's flow-final node, created on first use.
    pub fn flow_final(&mut self) -> NodeId {
        self.find_or_push(NodeKind::FlowFinal)
    }

    fn find_or_push(&mut self, kind: NodeKind) -> NodeId {
        match self.nodes.iter().find(|n| n.kind == kind) {
            Some(node) => node.id,
            None => self.push_node(kind),
        }
    }

    pub fn fork(&mut self) -> NodeId {
        self.push_node(NodeKind::Fork)
    }

    pub fn join(&mut self) -> NodeId {
        self.push_node(NodeKind::Join)
    }

    pub fn merge(&mut self) -> NodeId {
        self.push_node(NodeKind::Merge)
    }

    pub fn set_name(&mut self, node: NodeId, name: impl Into<String>) -> Result<(), GraphError> {
        let slot = self
            .nodes
            .get_mut(node.0)
            .ok_or(GraphError::UnknownNode(node))?;
        slot.name = Some(name.into());
        Ok(())
    }

    fn declare(&mut self, parameter: Parameter) -> Result<NodeId, GraphError> {
        if self.parameter(&parameter.name).is_some() {
            return Err(GraphError::DuplicateParameter(parameter.name));
        }
        let node = self.push_node(NodeKind::Parameter(ParameterNode {
            parameter: parameter.name.clone(),
            direction: parameter.direction,
        }));
        self.parameters.push(parameter);
        Ok(node)
    }

    /// Declare a top-level input and return its parameter node.
    pub fn input_value(&mut self, mut parameter: Parameter) -> Result<NodeId, GraphError> {
        parameter.direction = Direction::In;
        self.declare(parameter)
    }

    /// Declare a top-level output, optionally fed by `source`.
    pub fn designate_output(
        &mut self,
        mut parameter: Parameter,
        source: Option<NodeId>,
    ) -> Result<NodeId, GraphError> {
        parameter.direction = Direction::Out;
        let node = self.declare(parameter)?;
        if let Some(source) = source {
            self.use_value(source, node)?;
        }
        Ok(node)
    }

    /// Add an invocation of `behavior` with its pins.
    ///
    /// Inputs named in `literals` get value pins; an array literal for an
    /// unbounded input yields one value pin per element. Remaining inputs get
    /// input pins to be wired with [`Graph::use_value`].
    pub fn call_behavior(
        &mut self,
        behavior: &Behavior,
        literals: &[(&str, Value)],
    ) -> Result<NodeId, GraphError> {
        for (name, _) in literals {
            if !behavior.parameter(name).is_some_and(Parameter::is_input) {
                return Err(GraphError::UnknownParameter {
                    behavior: behavior.id().clone(),
                    parameter: (*name).to_string(),
                });
            }
        }

        let action = self.push_node(NodeKind::Action(ActionNode {
            behavior: behavior.id().clone(),
            pins: Vec::new(),
        }));

        let mut pins = Vec::new();
        for parameter in behavior.parameters() {
            let literal = literals
                .iter()
                .find(|(name, _)| *name == parameter.name)
                .map(|(_, value)| value);
            let slots: Vec<(PinRole, Option<Value>)> = match literal {
                None if parameter.is_output() => vec![(PinRole::Output, None)],
                None => vec![(PinRole::Input, None)],
                Some(Value::Array(items)) if parameter.unbounded => items
                    .iter()
                    .map(|v| (PinRole::Value, Some(v.clone())))
                    .collect(),
                Some(value) => vec![(PinRole::Value, Some(value.clone()))],
            };
            for (role, value) in slots {
                pins.push(self.push_node(NodeKind::Pin(PinNode {
                    owner: action,
                    parameter: parameter.name.clone(),
                    role,
                    value,
                })));
            }
        }

        if let Some(NodeKind::Action(node)) = self.nodes.get_mut(action.0).map(|n| &mut n.kind) {
            node.pins = pins;
        }
        Ok(action)
    }

    fn pin(&self, action: NodeId, name: &str, role: PinRole) -> Result<NodeId, GraphError> {
        if self.node_or_err(action)?.as_action().is_none() {
            return Err(GraphError::NotAnAction(action));
        }
        self.pins(action)
            .find(|(_, pin)| pin.parameter == name && pin.role == role)
            .map(|(id, _)| id)
            .ok_or_else(|| GraphError::NoSuchPin {
                node: action,
                role: match role {
                    PinRole::Input => "input",
                    PinRole::Output => "output",
                    PinRole::Value => "value",
                },
                parameter: name.to_string(),
            })
    }

    pub fn input_pin(&self, action: NodeId, name: &str) -> Result<NodeId, GraphError> {
        self.pin(action, name, PinRole::Input)
    }

    pub fn output_pin(&self, action: NodeId, name: &str) -> Result<NodeId, GraphError> {
        self.pin(action, name, PinRole::Output)
    }

    /// Control flow: `target` runs after `source`.
    pub fn order(&mut self, source: NodeId, target: NodeId) -> Result<EdgeId, GraphError> {
        self.add_edge(FlowKind::Control, source, target, None)
    }

    /// Object flow: `target` receives the value produced by `source`.
    pub fn use_value(&mut self, source: NodeId, target: NodeId) -> Result<EdgeId, GraphError> {
        self.add_edge(FlowKind::Object, source, target, None)
    }

    pub(crate) fn add_edge(
        &mut self,
        kind: FlowKind,
        source: NodeId,
        target: NodeId,
        guard: Option<Guard>,
    ) -> Result<EdgeId, GraphError> {
        check_endpoint(self.node_or_err(source)?, "source", kind)?;
        check_endpoint(self.node_or_err(target)?, "target", kind)?;
        if self
            .edges
            .iter()
            .any(|e| e.source == source && e.target == target && e.guard == guard)
        {
            return Err(GraphError::DuplicateEdge {
                from: source,
                to: target,
            });
        }
        let id = EdgeId(self.edges.len());
        self.edges.push(Edge {
            id,
            kind,
            source,
            target,
            guard,
        });
        Ok(id)
    }
}

pub(crate) fn check_endpoint(node: &Node, end: &'static str, kind: FlowKind) -> Result<(), GraphError> {
    let is_source = end == "source";
    let reason = match (&node.kind, kind) {
        (NodeKind::Initial, _) if !is_source => Some("initial nodes have no inflow"),
        (NodeKind::Initial, FlowKind::Object) => Some("initial nodes emit control only"),
        (NodeKind::FlowFinal, _) if is_source => Some("flow-final nodes have no outflow"),
        (NodeKind::Pin(_) | NodeKind::Parameter(_), FlowKind::Control) => {
            Some("object nodes carry object flows only")
        }
        (NodeKind::Action(_), FlowKind::Object) => Some("wire values through the action's pins"),
        (NodeKind::Pin(pin), FlowKind::Object) => match (pin.role, is_source) {
            (PinRole::Output, false) => Some("output pins are produced by their action"),
            (PinRole::Input, true) => Some("input pins only receive values"),
            (PinRole::Value, _) => Some("value pins hold a fixed literal"),
            _ => None,
        },
        (NodeKind::Parameter(p), FlowKind::Object) => match (p.direction, is_source) {
            (Direction::In, false) => Some("input parameters are bound by the caller"),
            (Direction::Out, true) => Some("output parameters end a flow"),
            _ => None,
        },
        _ => None,
    };
    match reason {
        Some(reason) => Err(GraphError::InvalidEndpoint {
            node: node.id,
            end,
            kind,
            reason,
        }),
        None => Ok(()),
    }
}
