//! Pending-token pool for one run, with its per-edge ledger.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::StructuralError;
use crate::execution::{FlowCount, RecordId, Token, TokenId, TokenValue};
use crate::models::{EdgeId, NodeId};

#[derive(Debug, Default)]
pub struct TokenPool {
    next_id: u64,
    pending: BTreeMap<TokenId, Token>,
    by_edge: BTreeMap<EdgeId, TokenId>,
    flows: BTreeMap<EdgeId, FlowCount>,
}

impl TokenPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token without placing it.
    pub fn mint(
        &mut self,
        edge: Option<EdgeId>,
        target: NodeId,
        source: Option<RecordId>,
        value: TokenValue,
    ) -> Token {
        let id = TokenId(self.next_id);
        self.next_id += 1;
        Token {
            id,
            edge,
            target,
            source,
            value,
        }
    }

    /// Put a token in the pool. An edge holds at most one live token.
    pub fn place(&mut self, token: Token) -> Result<(), StructuralError> {
        if let Some(edge) = token.edge {
            if self.by_edge.contains_key(&edge) {
                return Err(StructuralError::EdgeOccupied { edge });
            }
            self.by_edge.insert(edge, token.id);
            self.ledger(edge).placed += 1;
        }
        self.pending.insert(token.id, token);
        Ok(())
    }

    /// Remove and return the given tokens, in the order asked for.
    pub fn take(&mut self, ids: &[TokenId]) -> Vec<Token> {
        let mut taken = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(token) = self.pending.remove(id) {
                if let Some(edge) = token.edge {
                    self.by_edge.remove(&edge);
                    self.ledger(edge).consumed += 1;
                }
                taken.push(token);
            }
        }
        taken
    }

    pub fn get(&self, id: TokenId) -> Option<&Token> {
        self.pending.get(&id)
    }

    pub fn on_edge(&self, edge: EdgeId) -> Option<&Token> {
        self.by_edge.get(&edge).and_then(|id| self.pending.get(id))
    }

    pub fn targeting(&self, node: NodeId) -> impl Iterator<Item = &Token> + '_ {
        self.pending.values().filter(move |t| t.target == node)
    }

    /// Nodes with at least one token waiting for them, in id order.
    pub fn candidates(&self) -> BTreeSet<NodeId> {
        self.pending.values().map(|t| t.target).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn flows(&self) -> Vec<FlowCount> {
        self.flows.values().copied().collect()
    }

    pub fn into_pending(self) -> Vec<Token> {
        self.pending.into_values().collect()
    }

    fn ledger(&mut self, edge: EdgeId) -> &mut FlowCount {
        self.flows.entry(edge).or_insert(FlowCount {
            edge,
            placed: 0,
            consumed: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn second_token_on_an_edge_is_rejected() {
        let mut pool = TokenPool::new();
        let a = pool.mint(Some(EdgeId(0)), NodeId(1), None, TokenValue::Control);
        let b = pool.mint(Some(EdgeId(0)), NodeId(1), None, TokenValue::Control);
        pool.place(a).expect("free edge");
        assert_eq!(
            pool.place(b),
            Err(StructuralError::EdgeOccupied { edge: EdgeId(0) })
        );
    }

    #[test]
    fn ledger_tracks_placement_and_consumption() {
        let mut pool = TokenPool::new();
        let t = pool.mint(Some(EdgeId(3)), NodeId(2), None, TokenValue::Object(json!(1)));
        let id = t.id;
        pool.place(t).expect("free edge");
        assert_eq!(pool.candidates().into_iter().collect::<Vec<_>>(), vec![NodeId(2)]);
        assert!(pool.on_edge(EdgeId(3)).is_some());

        let taken = pool.take(&[id]);
        assert_eq!(taken.len(), 1);
        assert!(pool.is_empty());
        assert!(pool.on_edge(EdgeId(3)).is_none());
        assert_eq!(
            pool.flows(),
            vec![FlowCount {
                edge: EdgeId(3),
                placed: 1,
                consumed: 1
            }]
        );
    }

    #[test]
    fn synthetic_tokens_skip_the_ledger() {
        let mut pool = TokenPool::new();
        let t = pool.mint(None, NodeId(0), None, TokenValue::Control);
        pool.place(t).expect("synthetic");
        assert!(pool.flows().is_empty());
        assert_eq!(pool.targeting(NodeId(0)).count(), 1);
    }
}
