//! Node executor: the effect of firing each kind of node.
//!
//! A firing consumes exactly the tokens its enabling predicate returned and
//! yields the new record plus the tokens to place once the round is over.

use primitives::{Direction, Parameter, ParameterValue, ParameterValueMap};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{BindingError, EngineError, StructuralError};
use crate::execution::{Invocation, NodeExecution, RecordId, Token, TokenValue};
use crate::executor::{run_graph, NodeOutputs, Run, RunContext};
use crate::library::Behavior;
use crate::models::{ActionNode, DecisionNode, Edge, FlowKind, Guard, NodeId, NodeKind, PinRole};

/// Value produced for an output whose primitive has no computation hook.
pub fn placeholder(behavior: &Behavior, output: &Parameter) -> Value {
    json!({
        "placeholder": output.name,
        "type": output.param_type,
        "behavior": behavior.id(),
    })
}

impl Run<'_> {
    pub(crate) fn fire(
        &mut self,
        ctx: &mut RunContext<'_>,
        node: NodeId,
        consumed: Vec<Token>,
    ) -> Result<(NodeExecution, Vec<Token>), EngineError> {
        let graph = self.graph;
        let current = graph.node(node).ok_or(StructuralError::UnknownNode(node))?;
        let mut record = NodeExecution {
            id: RecordId(self.execution.executions.len()),
            node,
            kind: current.kind.label().to_string(),
            round: self.round,
            incoming: Vec::new(),
            call: None,
            issues: Vec::new(),
        };
        debug!(node = %current.display_name(), kind = current.kind.label(), round = self.round, "firing");

        let produced = match &current.kind {
            NodeKind::Initial => self.emit_all(node, record.id, FlowKind::Control, TokenValue::Control)?,
            NodeKind::FlowFinal => Vec::new(),
            NodeKind::Parameter(p) if p.direction == Direction::In => {
                let value = single_payload(node, &consumed)?;
                self.emit_all(node, record.id, FlowKind::Object, TokenValue::Object(value))?
            }
            NodeKind::Parameter(p) => {
                let payloads: Vec<&Value> = consumed.iter().filter_map(|t| t.value.payload()).collect();
                if payloads.is_empty() {
                    return Err(StructuralError::MissingPayload { node }.into());
                }
                for value in payloads {
                    self.execution
                        .parameter_values
                        .push(ParameterValue::new(p.parameter.clone(), value.clone()));
                }
                Vec::new()
            }
            NodeKind::Fork => {
                let token = consumed
                    .first()
                    .ok_or(StructuralError::ForkMultipleTokens { node, count: 0 })?;
                self.emit_all(node, record.id, token.value.kind(), token.value.clone())?
            }
            NodeKind::Join => self.fire_join(node, record.id, &consumed)?,
            NodeKind::Merge => self.fire_merge(node, record.id, &consumed)?,
            NodeKind::Decision(decision) => {
                self.fire_decision(node, decision, record.id, &consumed)?
            }
            NodeKind::Action(action) => {
                let behavior = ctx.library.resolve(&action.behavior, node)?.clone();
                let inputs = bind_inputs(self, node, action, &behavior, &consumed)?;
                match self.invoke(ctx, node, &behavior, inputs) {
                    Ok(call) => {
                        let produced = self.emit_action(node, record.id, &call.outputs)?;
                        record.call = Some(call);
                        produced
                    }
                    Err(Failed { call, error }) => {
                        record.call = call;
                        record.incoming = consumed;
                        self.execution.executions.push(record);
                        return Err(error);
                    }
                }
            }
            NodeKind::Pin(_) => Vec::new(),
        };

        record.incoming = consumed;
        Ok((record, produced))
    }

    fn emit(&mut self, edge: &Edge, source: RecordId, value: TokenValue) -> Token {
        let target = self.graph.consumer(edge);
        self.pool.mint(Some(edge.id), target, Some(source), value)
    }

    /// One token per outgoing edge of `node`, all of flow kind `kind`.
    fn emit_all(
        &mut self,
        node: NodeId,
        source: RecordId,
        kind: FlowKind,
        value: TokenValue,
    ) -> Result<Vec<Token>, EngineError> {
        let graph = self.graph;
        let mut tokens = Vec::new();
        for edge in graph.outgoing(node) {
            if edge.kind != kind {
                return Err(StructuralError::FlowKindMismatch {
                    node,
                    edge: edge.id,
                    expected: kind,
                }
                .into());
            }
            tokens.push(self.emit(edge, source, value.clone()));
        }
        Ok(tokens)
    }

    fn fire_join(
        &mut self,
        node: NodeId,
        source: RecordId,
        consumed: &[Token],
    ) -> Result<Vec<Token>, EngineError> {
        let graph = self.graph;
        let outgoing: Vec<&Edge> = graph.outgoing(node).collect();
        let [edge] = outgoing.as_slice() else {
            return Err(StructuralError::JoinOutgoingEdges {
                node,
                count: outgoing.len(),
            }
            .into());
        };
        let value = match edge.kind {
            FlowKind::Control => TokenValue::Control,
            FlowKind::Object => {
                let payloads: Vec<&Value> =
                    consumed.iter().filter_map(|t| t.value.payload()).collect();
                match payloads.as_slice() {
                    [] => return Err(StructuralError::MissingPayload { node }.into()),
                    [value] => TokenValue::Object((*value).clone()),
                    many => {
                        return Err(StructuralError::JoinValueConflict {
                            node,
                            count: many.len(),
                        }
                        .into())
                    }
                }
            }
        };
        Ok(vec![self.emit(edge, source, value)])
    }

    /// Forward the token from the earliest-declared incoming edge.
    fn fire_merge(
        &mut self,
        node: NodeId,
        source: RecordId,
        consumed: &[Token],
    ) -> Result<Vec<Token>, EngineError> {
        let chosen = consumed.iter().min_by_key(|t| (t.edge, t.id));
        let payload = chosen.and_then(|t| t.value.payload()).cloned();
        let graph = self.graph;
        let mut tokens = Vec::new();
        for edge in graph.outgoing(node) {
            let value = match (edge.kind, &payload) {
                (FlowKind::Control, _) => TokenValue::Control,
                (FlowKind::Object, Some(value)) => TokenValue::Object(value.clone()),
                (FlowKind::Object, None) => {
                    return Err(StructuralError::MissingPayload { node }.into())
                }
            };
            tokens.push(self.emit(edge, source, value));
        }
        Ok(tokens)
    }

    fn fire_decision(
        &mut self,
        node: NodeId,
        decision: &DecisionNode,
        source: RecordId,
        consumed: &[Token],
    ) -> Result<Vec<Token>, EngineError> {
        let primary = consumed
            .iter()
            .find(|t| t.edge.is_some() && t.edge == decision.primary)
            .ok_or(StructuralError::DecisionWithoutPrimary { node })?;
        let input = decision.predicate_return.or(decision.decision_input_flow);
        let value = input
            .and_then(|edge| consumed.iter().find(|t| t.edge == Some(edge)))
            .and_then(|t| t.value.payload())
            .or_else(|| primary.value.payload())
            .cloned()
            .ok_or(StructuralError::DecisionWithoutInput { node })?;

        let graph = self.graph;
        let outgoing: Vec<&Edge> = graph.outgoing(node).collect();
        let chosen = outgoing
            .iter()
            .find(|e| e.guard.as_ref().is_some_and(|g| g.matches(&value)))
            .or_else(|| {
                outgoing
                    .iter()
                    .find(|e| e.guard == Some(Guard::Otherwise))
            })
            .copied()
            .ok_or_else(|| StructuralError::NoMatchingGuard {
                node,
                value: value.clone(),
            })?;
        if chosen.kind != primary.value.kind() {
            return Err(StructuralError::FlowKindMismatch {
                node,
                edge: chosen.id,
                expected: primary.value.kind(),
            }
            .into());
        }
        debug!(decision = %node, %value, edge = %chosen.id, "decision routed");
        Ok(vec![self.emit(chosen, source, primary.value.clone())])
    }

    /// Run the behavior of an action against its bound inputs.
    fn invoke(
        &mut self,
        ctx: &mut RunContext<'_>,
        node: NodeId,
        behavior: &Behavior,
        inputs: ParameterValueMap,
    ) -> Result<Invocation, Failed> {
        let start_time = ctx.clock.now();
        let mut call = Invocation {
            behavior: behavior.id().clone(),
            inputs,
            outputs: ParameterValueMap::new(),
            start_time,
            end_time: start_time,
            consumed: Vec::new(),
            sub_execution: None,
        };
        let behavior_error = |source| EngineError::Behavior {
            node,
            behavior: behavior.id().clone(),
            source,
        };

        match behavior {
            Behavior::Primitive(primitive) => {
                let given = self.node_outputs.get(&node);
                for output in primitive.parameters().iter().filter(|p| p.is_output()) {
                    let supplied = given.map(|m| m.get_all(&output.name)).unwrap_or_default();
                    if !supplied.is_empty() {
                        debug!(node = %node, output = %output.name, "using supplied output");
                        for value in supplied {
                            call.outputs.push(output.name.clone(), value.clone());
                        }
                        continue;
                    }
                    let value = primitive
                        .compute_output(&call.inputs, output)
                        .map_err(|e| Failed::bare(behavior_error(e)))?
                        .unwrap_or_else(|| placeholder(behavior, output));
                    call.outputs.push(output.name.clone(), value);
                }
                call.consumed = primitive
                    .consumed(&call.inputs)
                    .map_err(|e| Failed::bare(behavior_error(e)))?;
            }
            Behavior::SubGraph(sub) => {
                let values = call.inputs.to_parameter_values();
                match run_graph(ctx, sub, &self.actor, values, NodeOutputs::new(), self.depth + 1) {
                    Ok(child) => {
                        for output in sub.parameters.iter().filter(|p| p.is_output()) {
                            for pv in child.parameter_values.iter().filter(|pv| pv.parameter == output.name) {
                                call.outputs.push(pv.parameter.clone(), pv.value.clone());
                            }
                        }
                        call.consumed = child.consumed.clone();
                        call.sub_execution = Some(Box::new(child));
                    }
                    Err(failure) => {
                        warn!(node = %node, behavior = %sub.id, error = %failure.error, "sub-protocol failed");
                        call.end_time = ctx.clock.now();
                        call.sub_execution = Some(failure.execution);
                        return Err(Failed {
                            call: Some(call),
                            error: EngineError::SubGraph {
                                node,
                                behavior: sub.id.clone(),
                                source: Box::new(failure.error),
                            },
                        });
                    }
                }
            }
        }
        call.end_time = ctx.clock.now();
        Ok(call)
    }

    /// Output tokens from the action's output pins, control tokens from the
    /// action's own outgoing edges.
    fn emit_action(
        &mut self,
        node: NodeId,
        source: RecordId,
        outputs: &ParameterValueMap,
    ) -> Result<Vec<Token>, EngineError> {
        let graph = self.graph;
        let mut tokens = Vec::new();
        let pins: Vec<(NodeId, String)> = graph
            .pins(node)
            .filter(|(_, pin)| pin.role == PinRole::Output)
            .map(|(id, pin)| (id, pin.parameter.clone()))
            .collect();
        for (pin, parameter) in pins {
            if let Some(value) = outputs.as_value(&parameter) {
                tokens.extend(self.emit_all(pin, source, FlowKind::Object, TokenValue::Object(value))?);
            }
        }
        tokens.extend(self.emit_all(node, source, FlowKind::Control, TokenValue::Control)?);
        Ok(tokens)
    }
}

/// A failed invocation, with whatever record it got as far as producing.
struct Failed {
    call: Option<Invocation>,
    error: EngineError,
}

impl Failed {
    fn bare(error: EngineError) -> Self {
        Self { call: None, error }
    }
}

fn single_payload(node: NodeId, consumed: &[Token]) -> Result<Value, EngineError> {
    consumed
        .iter()
        .find_map(|t| t.value.payload())
        .cloned()
        .ok_or_else(|| StructuralError::MissingPayload { node }.into())
}

/// Input values for one invocation: pin tokens in edge order, then literals,
/// then declared defaults.
fn bind_inputs(
    run: &Run<'_>,
    node: NodeId,
    action: &ActionNode,
    behavior: &Behavior,
    consumed: &[Token],
) -> Result<ParameterValueMap, EngineError> {
    let graph = run.graph;
    let mut inputs = ParameterValueMap::new();
    for parameter in behavior.parameters().iter().filter(|p| p.is_input()) {
        let mut values: Vec<Value> = Vec::new();
        for (pin_id, pin) in graph.pins(node).filter(|(_, p)| p.parameter == parameter.name) {
            match pin.role {
                PinRole::Input => values.extend(
                    consumed
                        .iter()
                        .filter(|t| {
                            t.edge
                                .and_then(|e| graph.edge(e))
                                .is_some_and(|e| e.target == pin_id)
                        })
                        .filter_map(|t| t.value.payload().cloned()),
                ),
                PinRole::Value => values.extend(pin.value.clone()),
                PinRole::Output => {}
            }
        }
        if values.is_empty() {
            values.extend(parameter.default.clone());
        }
        if values.len() > 1 && !parameter.unbounded {
            return Err(BindingError::TooManyValues {
                node,
                parameter: parameter.name.clone(),
                count: values.len(),
            }
            .into());
        }
        for value in values {
            inputs.push(parameter.name.clone(), value);
        }
    }
    debug!(action = %action.behavior, inputs = inputs.len(), "bound inputs");
    Ok(inputs)
}
