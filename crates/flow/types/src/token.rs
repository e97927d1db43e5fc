//! Tokens: values with lineage flowing between nodes
//!
//! A token is never mutated in place. A node that transforms a token
//! produces a new one; a node that merges several tokens produces one
//! whose correlation set is the union of its parents'.

use crate::{CorrelationId, NodeId, Tick};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Ordered set of correlation ids. Ordered so that serialized ledgers
/// are byte-identical across runs.
pub type CorrelationSet = BTreeSet<CorrelationId>;

/// A value plus its lineage tag
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    /// The carried value
    pub value: Value,
    /// Lineage handle
    pub correlation_ids: CorrelationSet,
    /// Bootstrap tokens used only to re-check firing conditions
    #[serde(default)]
    pub internal: bool,
    /// Node that produced this token
    pub produced_by: NodeId,
    /// Tick at which it was produced
    pub produced_at: Tick,
}

impl Token {
    pub fn new(value: Value, produced_by: NodeId, produced_at: Tick) -> Self {
        Self {
            value,
            correlation_ids: CorrelationSet::new(),
            internal: false,
            produced_by,
            produced_at,
        }
    }

    pub fn with_correlation(mut self, id: CorrelationId) -> Self {
        self.correlation_ids.insert(id);
        self
    }

    pub fn with_correlations(mut self, ids: CorrelationSet) -> Self {
        self.correlation_ids.extend(ids);
        self
    }

    /// Mark as an internal bootstrap token
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    /// Derive a successor token produced by `node` at `tick`, keeping
    /// this token's lineage.
    pub fn derive(&self, value: Value, node: &NodeId, tick: Tick) -> Token {
        Token {
            value,
            correlation_ids: self.correlation_ids.clone(),
            internal: false,
            produced_by: node.clone(),
            produced_at: tick,
        }
    }

    /// Whether this token shares any lineage with `ids`
    pub fn shares_lineage(&self, ids: &CorrelationSet) -> bool {
        self.correlation_ids.iter().any(|id| ids.contains(id))
    }
}

/// Union of the correlation sets of all `tokens`
pub fn union_correlations<'a>(tokens: impl IntoIterator<Item = &'a Token>) -> CorrelationSet {
    let mut set = CorrelationSet::new();
    for token in tokens {
        set.extend(token.correlation_ids.iter().cloned());
    }
    set
}
