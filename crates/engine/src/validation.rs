//! Graph validation. Run this before persisting or executing a graph.
//!
//! Errors make a graph unrunnable; warnings flag shapes that are legal but
//! usually mistakes (unreachable nodes, unguarded decision outcomes, loops
//! that no merge node feeds).

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

use primitives::Direction;
use serde::{Deserialize, Serialize};

use crate::library::Library;
use crate::models::{FlowKind, Graph, Guard, NodeId, NodeKind, PinRole};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.node {
            Some(node) => write!(f, "{node}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<Issue>,
    pub warnings: Vec<Issue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, node: Option<NodeId>, message: impl Into<String>) {
        self.errors.push(Issue {
            node,
            message: message.into(),
        });
    }

    fn warn(&mut self, node: Option<NodeId>, message: impl Into<String>) {
        self.warnings.push(Issue {
            node,
            message: message.into(),
        });
    }
}

/// Check `graph` for well-formedness against `library`.
pub fn validate_graph(graph: &Graph, library: &Library) -> ValidationReport {
    let mut report = ValidationReport::default();

    // -----------------------------------------------------------------------
    // 1. Arena consistency
    // -----------------------------------------------------------------------
    for (index, node) in graph.nodes.iter().enumerate() {
        if node.id.0 != index {
            report.error(Some(node.id), format!("stored at index {index}"));
        }
    }
    for (index, edge) in graph.edges.iter().enumerate() {
        if edge.id.0 != index {
            report.error(None, format!("{} stored at index {index}", edge.id));
        }
        for end in [edge.source, edge.target] {
            if graph.node(end).is_none() {
                report.error(None, format!("{} references unknown {end}", edge.id));
            }
        }
        if edge.guard.is_some()
            && !matches!(graph.node(edge.source).map(|n| &n.kind), Some(NodeKind::Decision(_)))
        {
            report.error(Some(edge.source), format!("guarded {} does not leave a decision", edge.id));
        }
    }
    if !report.is_valid() {
        return report;
    }

    // -----------------------------------------------------------------------
    // 2. Declared parameters
    // -----------------------------------------------------------------------
    let mut names = BTreeSet::new();
    for parameter in &graph.parameters {
        if !names.insert(parameter.name.as_str()) {
            report.error(None, format!("parameter '{}' declared twice", parameter.name));
        }
    }

    // -----------------------------------------------------------------------
    // 3. Per-kind shape rules
    // -----------------------------------------------------------------------
    for node in &graph.nodes {
        let id = node.id;
        let incoming: Vec<_> = graph.incoming(id).collect();
        let outgoing: Vec<_> = graph.outgoing(id).collect();

        match &node.kind {
            NodeKind::Initial => {
                if !incoming.is_empty() {
                    report.error(Some(id), "initial node has incoming edges");
                }
            }
            NodeKind::FlowFinal => {
                if !outgoing.is_empty() {
                    report.error(Some(id), "flow-final node has outgoing edges");
                }
            }
            NodeKind::Fork => {
                if incoming.len() != 1 {
                    report.error(Some(id), format!("fork has {} incoming edges", incoming.len()));
                }
            }
            NodeKind::Join => {
                if outgoing.len() != 1 {
                    report.error(Some(id), format!("join has {} outgoing edges", outgoing.len()));
                }
            }
            NodeKind::Merge => {}
            NodeKind::Decision(decision) => {
                let primary = decision
                    .primary
                    .and_then(|e| incoming.iter().find(|edge| edge.id == e));
                match primary {
                    None => report.error(Some(id), "decision has no primary incoming edge"),
                    Some(primary) => {
                        if outgoing.iter().any(|e| e.kind != primary.kind) {
                            report.error(
                                Some(id),
                                format!("decision outcomes must be {} flows", primary.kind),
                            );
                        }
                    }
                }
                if decision.predicate.is_some() && decision.predicate_return.is_none() {
                    report.error(Some(id), "decision predicate has no return edge");
                }
                let otherwise = outgoing
                    .iter()
                    .filter(|e| e.guard == Some(Guard::Otherwise))
                    .count();
                if otherwise > 1 {
                    report.error(Some(id), format!("decision has {otherwise} otherwise edges"));
                }
                for edge in outgoing.iter().filter(|e| e.guard.is_none()) {
                    report.warn(Some(id), format!("unguarded outcome {} is never taken", edge.id));
                }
            }
            NodeKind::Action(action) => {
                match library.get(&action.behavior) {
                    None => report.error(Some(id), format!("unknown behavior '{}'", action.behavior)),
                    Some(behavior) => {
                        for (_, pin) in graph.pins(id) {
                            if behavior.parameter(&pin.parameter).is_none() {
                                report.error(
                                    Some(id),
                                    format!(
                                        "pin '{}' not declared by '{}'",
                                        pin.parameter, action.behavior
                                    ),
                                );
                            }
                        }
                    }
                }
                if incoming.iter().chain(&outgoing).any(|e| e.kind == FlowKind::Object) {
                    report.error(Some(id), "object flows must go through pins");
                }
            }
            NodeKind::Pin(pin) => {
                let owned = graph
                    .node(pin.owner)
                    .and_then(|n| n.as_action())
                    .is_some_and(|a| a.pins.contains(&id));
                if !owned {
                    report.error(Some(id), format!("pin '{}' is not owned by {}", pin.parameter, pin.owner));
                }
                if incoming.iter().chain(&outgoing).any(|e| e.kind == FlowKind::Control) {
                    report.error(Some(id), "pins carry object flows only");
                }
                match pin.role {
                    PinRole::Value if !incoming.is_empty() => {
                        report.error(Some(id), "value pin has incoming edges")
                    }
                    PinRole::Output if !incoming.is_empty() => {
                        report.error(Some(id), "output pin has incoming edges")
                    }
                    PinRole::Input if !outgoing.is_empty() => {
                        report.error(Some(id), "input pin has outgoing edges")
                    }
                    _ => {}
                }
            }
            NodeKind::Parameter(p) => {
                match graph.parameter(&p.parameter) {
                    Some(declared) if declared.direction == p.direction => {}
                    Some(_) => report.error(Some(id), format!("parameter '{}' has the wrong direction", p.parameter)),
                    None => report.error(Some(id), format!("parameter '{}' is not declared", p.parameter)),
                }
                if incoming.iter().chain(&outgoing).any(|e| e.kind == FlowKind::Control) {
                    report.error(Some(id), "parameter nodes carry object flows only");
                }
            }
        }

        let initiating = matches!(
            &node.kind,
            NodeKind::Initial | NodeKind::Pin(_)
        ) || matches!(&node.kind, NodeKind::Parameter(p) if p.direction == Direction::In);
        let fed_by_pins = graph
            .pins(id)
            .any(|(pin, _)| graph.incoming(pin).next().is_some());
        if !initiating && incoming.is_empty() && !fed_by_pins {
            report.warn(Some(id), format!("{} has no inflow and will never fire", node.display_name()));
        }
    }

    // -----------------------------------------------------------------------
    // 4. Loops
    // -----------------------------------------------------------------------
    if let Some(cycle) = cyclic_nodes(graph) {
        if !cycle
            .iter()
            .any(|n| matches!(graph.node(*n).map(|n| &n.kind), Some(NodeKind::Merge)))
        {
            report.warn(None, "graph contains a loop not fed through a merge node");
        }
    }

    report
}

/// Nodes left over by Kahn's algorithm, i.e. those on or behind a cycle.
/// Input pins count as part of their action and output pins follow it.
fn cyclic_nodes(graph: &Graph) -> Option<Vec<NodeId>> {
    let mut adjacency: BTreeMap<NodeId, Vec<NodeId>> = BTreeMap::new();
    let mut in_degree: BTreeMap<NodeId, usize> = graph.nodes.iter().map(|n| (n.id, 0)).collect();
    let mut link = |from: NodeId, to: NodeId| {
        adjacency.entry(from).or_default().push(to);
        *in_degree.entry(to).or_insert(0) += 1;
    };

    for edge in &graph.edges {
        link(edge.source, edge.target);
    }
    for node in &graph.nodes {
        if let NodeKind::Pin(pin) = &node.kind {
            match pin.role {
                PinRole::Output => link(pin.owner, node.id),
                PinRole::Input | PinRole::Value => link(node.id, pin.owner),
            }
        }
    }

    let mut queue: VecDeque<NodeId> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();
    let mut visited = BTreeSet::new();
    while let Some(id) = queue.pop_front() {
        visited.insert(id);
        for next in adjacency.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    let remaining: Vec<NodeId> = graph
        .nodes
        .iter()
        .map(|n| n.id)
        .filter(|id| !visited.contains(id))
        .collect();
    (!remaining.is_empty()).then_some(remaining)
}
