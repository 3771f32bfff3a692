//! Decision construction.
//!
//! A decision needs three things wired consistently: the primary flow it
//! routes, the source of its decision value, and guarded outcomes of the
//! same flow kind as the primary. [`Graph::make_decision`] does the wiring.

use primitives::Parameter;

use crate::builder::check_endpoint;
use crate::error::GraphError;
use crate::library::Behavior;
use crate::models::{DecisionNode, EdgeId, FlowKind, Graph, Guard, NodeId, NodeKind};

/// Name of the output a predicate behavior must declare.
pub const PREDICATE_RETURN: &str = "return";

/// Predicate input fed from the decision's `predicate_source`.
pub const DECISION_INPUT: &str = "decision_input";

/// Predicate input fed from an object primary.
pub const PRIMARY_INPUT: &str = "primary_input";

/// Handle for adding outcomes to a freshly built decision.
#[derive(Debug)]
pub struct DecisionBuilder<'a> {
    graph: &'a mut Graph,
    node: NodeId,
}

impl DecisionBuilder<'_> {
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn add_outcome(
        &mut self,
        guard: impl Into<Guard>,
        target: NodeId,
    ) -> Result<EdgeId, GraphError> {
        self.graph.add_outcome(self.node, guard.into(), target)
    }

    pub fn otherwise(&mut self, target: NodeId) -> Result<EdgeId, GraphError> {
        self.graph.add_outcome(self.node, Guard::Otherwise, target)
    }
}

impl Graph {
    /// Add a decision routing the flow leaving `primary`.
    ///
    /// With a `predicate`, a satellite invocation of it is inserted and its
    /// `return` pin feeds the decision. A predicate declaring
    /// `decision_input` is fed from `predicate_source`, and one declaring
    /// `primary_input` is fed from `primary` when that is an object node. A
    /// predicate with a single other input takes whichever of the two is
    /// present, preferring `predicate_source`. Without a predicate,
    /// `predicate_source` (if any) is wired straight into the decision as its
    /// decision input.
    pub fn make_decision(
        &mut self,
        primary: NodeId,
        predicate: Option<&Behavior>,
        predicate_source: Option<NodeId>,
    ) -> Result<DecisionBuilder<'_>, GraphError> {
        let primary_node = self.node(primary).ok_or(GraphError::UnknownNode(primary))?;
        let kind = if primary_node.is_object_node() {
            FlowKind::Object
        } else {
            FlowKind::Control
        };
        check_endpoint(primary_node, "source", kind)?;
        if let Some(source) = predicate_source {
            let node = self.node(source).ok_or(GraphError::UnknownNode(source))?;
            check_endpoint(node, "source", FlowKind::Object)?;
        }

        let object_primary = (kind == FlowKind::Object).then_some(primary);
        let bindings = match predicate {
            Some(behavior) => {
                if !behavior
                    .parameter(PREDICATE_RETURN)
                    .is_some_and(Parameter::is_output)
                {
                    return Err(GraphError::MissingReturn(behavior.id().clone()));
                }
                let bindings = predicate_bindings(behavior, object_primary, predicate_source);
                if bindings.is_empty() && (predicate_source.is_some() || object_primary.is_some()) {
                    return Err(GraphError::PredicateUnreachable(behavior.id().clone()));
                }
                bindings
            }
            None => Vec::new(),
        };

        let decision = self.push_node(NodeKind::Decision(DecisionNode::default()));
        let mut shape = DecisionNode {
            primary: Some(self.add_edge(kind, primary, decision, None)?),
            ..DecisionNode::default()
        };

        match predicate {
            Some(behavior) => {
                let call = self.call_behavior(behavior, &[])?;
                for (source, input) in bindings {
                    let pin = self.input_pin(call, &input)?;
                    self.use_value(source, pin)?;
                }
                if kind == FlowKind::Control {
                    self.order(primary, call)?;
                }
                let ret = self.output_pin(call, PREDICATE_RETURN)?;
                shape.predicate = Some(behavior.id().clone());
                shape.predicate_call = Some(call);
                shape.predicate_return = Some(self.use_value(ret, decision)?);
            }
            None => {
                if let Some(source) = predicate_source.filter(|s| *s != primary) {
                    shape.decision_input_flow = Some(self.use_value(source, decision)?);
                }
            }
        }

        if let Some(NodeKind::Decision(node)) = self.nodes.get_mut(decision.0).map(|n| &mut n.kind) {
            *node = shape;
        }
        Ok(DecisionBuilder {
            graph: self,
            node: decision,
        })
    }

    /// Add a guarded outgoing edge to `decision`, of the same flow kind as
    /// its primary edge.
    pub fn add_outcome(
        &mut self,
        decision: NodeId,
        guard: Guard,
        target: NodeId,
    ) -> Result<EdgeId, GraphError> {
        let node = self.node(decision).ok_or(GraphError::UnknownNode(decision))?;
        let shape = node.as_decision().ok_or(GraphError::NotADecision(decision))?;
        let kind = shape
            .primary
            .and_then(|e| self.edge(e))
            .map(|e| e.kind)
            .ok_or(GraphError::DecisionWithoutPrimary(decision))?;
        if guard == Guard::Otherwise
            && self
                .outgoing(decision)
                .any(|e| e.guard == Some(Guard::Otherwise))
        {
            return Err(GraphError::DuplicateOtherwise(decision));
        }
        self.add_edge(kind, decision, target, Some(guard))
    }
}

/// Which node feeds which predicate input, as `(source, parameter)` pairs.
fn predicate_bindings(
    behavior: &Behavior,
    object_primary: Option<NodeId>,
    predicate_source: Option<NodeId>,
) -> Vec<(NodeId, String)> {
    let declares = |name: &str| behavior.parameter(name).is_some_and(Parameter::is_input);
    if declares(DECISION_INPUT) || declares(PRIMARY_INPUT) {
        let named = [
            (predicate_source, DECISION_INPUT),
            (object_primary, PRIMARY_INPUT),
        ];
        return named
            .into_iter()
            .filter(|(_, name)| declares(name))
            .filter_map(|(source, name)| source.map(|s| (s, name.to_string())))
            .collect();
    }
    let inputs: Vec<&Parameter> = behavior.parameters().iter().filter(|p| p.is_input()).collect();
    match (inputs.as_slice(), predicate_source.or(object_primary)) {
        ([only], Some(source)) => vec![(source, only.name.clone())],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use primitives::mock::MockPrimitive;
    use primitives::DefinedPrimitive;
    use serde_json::json;

    fn is_clean() -> Behavior {
        Behavior::primitive(MockPrimitive::returning("qc/IsClean", json!(true)).with_input("sample"))
    }

    #[test]
    fn control_primary_orders_predicate_before_decision() {
        let mut g = Graph::new("p");
        let start = g.initial();
        let t = g.fork();
        let f = g.fork();
        let mut d = g.make_decision(start, Some(&is_clean()), None).expect("built");
        d.add_outcome(json!(true), t).expect("true branch");
        d.add_outcome(json!(false), f).expect("false branch");
        let node = d.node();

        let shape = g.node(node).and_then(|n| n.as_decision()).cloned().expect("decision");
        let call = shape.predicate_call.expect("satellite call");
        assert_eq!(shape.predicate.as_ref().map(|b| b.as_str()), Some("qc/IsClean"));
        assert!(g.outgoing(start).any(|e| e.target == call && e.kind == FlowKind::Control));
        let ret = g.edge(shape.predicate_return.expect("return edge")).expect("edge");
        assert_eq!(ret.target, node);
        assert!(g.outgoing(node).all(|e| e.kind == FlowKind::Control));
    }

    #[test]
    fn object_primary_feeds_predicate_in_parallel() {
        let mut g = Graph::new("p");
        let sample = g.input_value(Parameter::input("sample", "sample")).expect("declared");
        let d = g.make_decision(sample, Some(&is_clean()), None).expect("built");
        let node = d.node();

        let shape = g.node(node).and_then(|n| n.as_decision()).cloned().expect("decision");
        let call = shape.predicate_call.expect("satellite call");
        let pin = g.input_pin(call, "sample").expect("pin");
        assert!(g.outgoing(sample).any(|e| e.target == pin));
        assert!(g.incoming(call).next().is_none());
        assert_eq!(
            g.edge(shape.primary.expect("primary")).map(|e| e.kind),
            Some(FlowKind::Object)
        );
    }

    #[test]
    fn source_without_predicate_becomes_decision_input() {
        let mut g = Graph::new("p");
        let start = g.initial();
        let flag = g.input_value(Parameter::input("flag", "boolean")).expect("declared");
        let d = g.make_decision(start, None, Some(flag)).expect("built");
        let node = d.node();
        let shape = g.node(node).and_then(|n| n.as_decision()).cloned().expect("decision");
        let input = g.edge(shape.decision_input_flow.expect("input flow")).expect("edge");
        assert_eq!((input.source, input.kind), (flag, FlowKind::Object));
    }

    #[test]
    fn named_predicate_inputs_take_source_and_object_primary() {
        let check = Behavior::primitive(
            MockPrimitive::returning("qc/Check", json!(true))
                .with_input(DECISION_INPUT)
                .with_input(PRIMARY_INPUT),
        );
        let mut g = Graph::new("p");
        let sample = g.input_value(Parameter::input("sample", "sample")).expect("declared");
        let flag = g.input_value(Parameter::input("flag", "boolean")).expect("declared");
        let d = g.make_decision(sample, Some(&check), Some(flag)).expect("built");
        let node = d.node();

        let shape = g.node(node).and_then(|n| n.as_decision()).cloned().expect("decision");
        let call = shape.predicate_call.expect("satellite call");
        let primary_pin = g.input_pin(call, PRIMARY_INPUT).expect("pin");
        let decision_pin = g.input_pin(call, DECISION_INPUT).expect("pin");
        assert!(g.outgoing(sample).any(|e| e.target == primary_pin));
        assert!(g.outgoing(flag).any(|e| e.target == decision_pin));
        assert!(!g.outgoing(flag).any(|e| e.target == primary_pin));
        assert!(shape.decision_input_flow.is_none());
    }

    #[test]
    fn named_predicate_without_reachable_inputs_is_rejected() {
        let primary_only = Behavior::primitive(
            MockPrimitive::returning("qc/Primary", json!(true)).with_input(PRIMARY_INPUT),
        );
        let mut g = Graph::new("p");
        let start = g.initial();
        let flag = g.input_value(Parameter::input("flag", "boolean")).expect("declared");
        assert_eq!(
            g.make_decision(start, Some(&primary_only), Some(flag)).map(|d| d.node()),
            Err(GraphError::PredicateUnreachable("qc/Primary".into()))
        );
    }

    #[test]
    fn second_otherwise_is_rejected() {
        let mut g = Graph::new("p");
        let start = g.initial();
        let a = g.fork();
        let b = g.fork();
        let mut d = g.make_decision(start, None, None).expect("built");
        d.otherwise(a).expect("first otherwise");
        let node = d.node();
        assert_eq!(d.otherwise(b), Err(GraphError::DuplicateOtherwise(node)));
    }

    #[test]
    fn predicate_must_return_a_value() {
        let mut g = Graph::new("p");
        let start = g.initial();
        let silent = Behavior::primitive(DefinedPrimitive::new("qc/Silent").with_input("x", "any"));
        assert!(matches!(
            g.make_decision(start, Some(&silent), None),
            Err(GraphError::MissingReturn(_))
        ));
        let blind = Behavior::primitive(MockPrimitive::returning("qc/Blind", json!(1)));
        let x = g.input_value(Parameter::input("x", "any")).expect("declared");
        assert!(matches!(
            g.make_decision(x, Some(&blind), None),
            Err(GraphError::PredicateUnreachable(_))
        ));
        assert_eq!(g.nodes.len(), 2);
    }

    #[test]
    fn outcome_on_non_decision_is_rejected() {
        let mut g = Graph::new("p");
        let start = g.initial();
        let fork = g.fork();
        assert_eq!(
            g.add_outcome(fork, Guard::Otherwise, start),
            Err(GraphError::NotADecision(fork))
        );
    }
}
