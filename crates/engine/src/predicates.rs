//! Enabling predicates: which pending tokens, if any, let a node fire.
//!
//! Every rule reads the pool as it stands at the start of a round and
//! returns exactly the tokens the firing will consume.

use primitives::Direction;

use crate::error::{BindingError, EngineError, StructuralError};
use crate::execution::{Token, TokenId};
use crate::library::Library;
use crate::models::{ActionNode, FlowKind, Graph, NodeId, NodeKind, PinRole};
use crate::pool::TokenPool;

/// The tokens `node` would consume if it fired now, or `None` when it is
/// not enabled.
pub fn enabling_tokens(
    graph: &Graph,
    library: &Library,
    node: NodeId,
    pool: &TokenPool,
) -> Result<Option<Vec<TokenId>>, EngineError> {
    let current = graph.node(node).ok_or(StructuralError::UnknownNode(node))?;
    let all = || ids(pool.targeting(node));

    let tokens = match &current.kind {
        NodeKind::Initial => synthetic(pool, node),
        NodeKind::Parameter(p) if p.direction == Direction::In => synthetic(pool, node),
        NodeKind::Parameter(_) | NodeKind::FlowFinal | NodeKind::Merge => all(),
        NodeKind::Fork => {
            let count = graph.incoming(node).count();
            if count != 1 {
                return Err(StructuralError::ForkIncomingEdges { node, count }.into());
            }
            let tokens = all();
            if tokens.len() > 1 {
                return Err(StructuralError::ForkMultipleTokens {
                    node,
                    count: tokens.len(),
                }
                .into());
            }
            tokens
        }
        NodeKind::Join => {
            let mut tokens = Vec::new();
            for edge in graph.incoming(node) {
                match pool.on_edge(edge.id) {
                    Some(token) => tokens.push(token.id),
                    None => return Ok(None),
                }
            }
            tokens
        }
        NodeKind::Decision(decision) => {
            let primary = decision
                .primary
                .ok_or(StructuralError::DecisionWithoutPrimary { node })?;
            let Some(primary) = pool.on_edge(primary) else {
                return Ok(None);
            };
            let mut tokens = vec![primary.id];
            if let Some(input) = decision.predicate_return.or(decision.decision_input_flow) {
                match pool.on_edge(input) {
                    Some(token) => tokens.push(token.id),
                    None => return Ok(None),
                }
            }
            tokens
        }
        NodeKind::Action(action) => match action_tokens(graph, library, node, action, pool)? {
            Some(tokens) => tokens,
            None => return Ok(None),
        },
        // Pins never consume: their tokens are consumed by the owning action.
        NodeKind::Pin(_) => Vec::new(),
    };

    Ok((!tokens.is_empty()).then_some(tokens))
}

pub fn enabled(
    graph: &Graph,
    library: &Library,
    node: NodeId,
    pool: &TokenPool,
) -> Result<bool, EngineError> {
    Ok(enabling_tokens(graph, library, node, pool)?.is_some())
}

fn ids<'a>(tokens: impl Iterator<Item = &'a Token>) -> Vec<TokenId> {
    let mut sorted: Vec<&Token> = tokens.collect();
    sorted.sort_by_key(|t| (t.edge, t.id));
    sorted.into_iter().map(|t| t.id).collect()
}

fn synthetic(pool: &TokenPool, node: NodeId) -> Vec<TokenId> {
    ids(pool.targeting(node).filter(|t| t.edge.is_none()))
}

fn action_tokens(
    graph: &Graph,
    library: &Library,
    node: NodeId,
    action: &ActionNode,
    pool: &TokenPool,
) -> Result<Option<Vec<TokenId>>, EngineError> {
    let behavior = library.resolve(&action.behavior, node)?;
    let mut tokens = Vec::new();

    let control: Vec<_> = graph
        .incoming(node)
        .filter(|e| e.kind == FlowKind::Control)
        .collect();
    if !control.is_empty() {
        let present: Vec<TokenId> = control
            .iter()
            .filter_map(|e| pool.on_edge(e.id))
            .map(|t| t.id)
            .collect();
        if present.is_empty() {
            return Ok(None);
        }
        tokens.extend(present);
    }

    for (pin_id, pin) in graph.pins(node) {
        if behavior.parameter(&pin.parameter).is_none() {
            return Err(StructuralError::UnknownParameter {
                node,
                behavior: action.behavior.clone(),
                parameter: pin.parameter.clone(),
            }
            .into());
        }
        if pin.role != PinRole::Input {
            continue;
        }
        for edge in graph.incoming(pin_id) {
            match pool.on_edge(edge.id) {
                Some(token) => tokens.push(token.id),
                None => return Ok(None),
            }
        }
    }

    // Ready as far as flows go; every required input must now have a source.
    for parameter in behavior.parameters().iter().filter(|p| p.is_input()) {
        let mut wired = false;
        let mut literal = false;
        for (pin_id, pin) in graph.pins(node).filter(|(_, p)| p.parameter == parameter.name) {
            match pin.role {
                PinRole::Input => wired |= graph.incoming(pin_id).next().is_some(),
                PinRole::Value if pin.value.is_some() => literal = true,
                PinRole::Value if parameter.required => {
                    return Err(BindingError::MissingLiteral {
                        node,
                        parameter: parameter.name.clone(),
                    }
                    .into())
                }
                _ => {}
            }
        }
        if parameter.required && !wired && !literal && parameter.default.is_none() {
            return Err(BindingError::MissingInput {
                node,
                parameter: parameter.name.clone(),
            }
            .into());
        }
    }

    tokens.sort_by_key(|id| (pool.get(*id).and_then(|t| t.edge), *id));
    Ok(Some(tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::TokenValue;
    use crate::library::Behavior;
    use crate::models::EdgeId;
    use primitives::mock::MockPrimitive;
    use primitives::Parameter;
    use serde_json::json;

    fn place(pool: &mut TokenPool, graph: &Graph, edge: EdgeId, value: TokenValue) {
        let e = graph.edge(edge).expect("edge").clone();
        let token = pool.mint(Some(e.id), graph.consumer(&e), None, value);
        pool.place(token).expect("free edge");
    }

    #[test]
    fn join_waits_for_every_incoming_edge() {
        let mut g = Graph::new("p");
        let (a, b, join) = (g.fork(), g.fork(), g.join());
        let ea = g.order(a, join).expect("edge");
        let eb = g.order(b, join).expect("edge");
        let library = Library::new();
        let mut pool = TokenPool::new();

        place(&mut pool, &g, ea, TokenValue::Control);
        assert_eq!(enabled(&g, &library, join, &pool), Ok(false));
        place(&mut pool, &g, eb, TokenValue::Control);
        assert_eq!(
            enabling_tokens(&g, &library, join, &pool).map(|t| t.map(|t| t.len())),
            Ok(Some(2))
        );
    }

    #[test]
    fn fork_requires_exactly_one_incoming_edge() {
        let mut g = Graph::new("p");
        let (a, b, fork) = (g.merge(), g.merge(), g.fork());
        let ea = g.order(a, fork).expect("edge");
        g.order(b, fork).expect("edge");
        let mut pool = TokenPool::new();
        place(&mut pool, &g, ea, TokenValue::Control);
        assert_eq!(
            enabled(&g, &Library::new(), fork, &pool),
            Err(EngineError::from(StructuralError::ForkIncomingEdges {
                node: fork,
                count: 2
            }))
        );
    }

    #[test]
    fn action_needs_control_and_all_wired_pins() {
        let mut library = Library::new();
        let add = library.register(Behavior::primitive(
            MockPrimitive::returning("math/Add", json!(0))
                .with_input("b")
                .with_input("a"),
        ));
        let mut g = Graph::new("p");
        let start = g.initial();
        let x = g.input_value(Parameter::input("x", "number")).expect("declared");
        let action = g.call_behavior(&add, &[("b", json!(2))]).expect("call");
        let ctl = g.order(start, action).expect("edge");
        let pin = g.input_pin(action, "a").expect("pin");
        let flow = g.use_value(x, pin).expect("edge");

        let mut pool = TokenPool::new();
        place(&mut pool, &g, ctl, TokenValue::Control);
        assert_eq!(enabled(&g, &library, action, &pool), Ok(false));
        place(&mut pool, &g, flow, TokenValue::Object(json!(1)));
        assert_eq!(enabled(&g, &library, action, &pool), Ok(true));
    }

    #[test]
    fn unwired_required_input_is_a_binding_error() {
        let mut library = Library::new();
        let wash = library.register(Behavior::primitive(
            MockPrimitive::returning("plate/Wash", json!(null)).with_input("plate"),
        ));
        let mut g = Graph::new("p");
        let start = g.initial();
        let action = g.call_behavior(&wash, &[]).expect("call");
        let ctl = g.order(start, action).expect("edge");
        let mut pool = TokenPool::new();
        place(&mut pool, &g, ctl, TokenValue::Control);
        assert_eq!(
            enabled(&g, &library, action, &pool),
            Err(EngineError::from(BindingError::MissingInput {
                node: action,
                parameter: "plate".into()
            }))
        );
    }

    #[test]
    fn unknown_behavior_is_structural() {
        let mut g = Graph::new("p");
        let start = g.initial();
        let ghost = Behavior::primitive(MockPrimitive::returning("ghost/Step", json!(1)));
        let action = g.call_behavior(&ghost, &[]).expect("call");
        let ctl = g.order(start, action).expect("edge");
        let mut pool = TokenPool::new();
        place(&mut pool, &g, ctl, TokenValue::Control);
        assert!(enabled(&g, &Library::new(), action, &pool).is_err_and(|e| e.is_structural()));
    }
}
