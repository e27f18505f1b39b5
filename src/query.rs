//! §4.4 `Query`: a small builder facade over a sum type of range,
//! min/max, and AND/OR combinations of secondary-index lookups. The
//! facade (`Query::range`/`::min`/`::max`/`::and`/`::or`) is the only
//! public constructor surface; the node variants stay crate-private
//! so query trees can only be built through it.

use crate::key::{Key, Value};
use crate::key_range::KeyRange;
use crate::transaction::Transaction;
use crate::Result;

enum MinMax {
    Min,
    Max,
}

enum Combinator {
    And,
    Or,
}

enum Node {
    Range(String, KeyRange),
    Advanced(String, MinMax),
    Combined(Combinator, Vec<Node>),
}

/// A composable query over a transaction's secondary indices.
/// "Concurrently" in §4.4 means sub-queries are independent of each
/// other, not that they run on separate threads — this single-
/// threaded core (§5) evaluates them in sequence.
pub struct Query(Node);

impl Query {
    pub fn range(index_name: impl Into<String>, range: KeyRange) -> Query {
        Query(Node::Range(index_name.into(), range))
    }

    pub fn min(index_name: impl Into<String>) -> Query {
        Query(Node::Advanced(index_name.into(), MinMax::Min))
    }

    pub fn max(index_name: impl Into<String>) -> Query {
        Query(Node::Advanced(index_name.into(), MinMax::Max))
    }

    /// Intersection of every sub-query's primary-key set. Empty input
    /// yields empty; a single operand passes through unchanged.
    pub fn and(parts: Vec<Query>) -> Query {
        Query(Node::Combined(Combinator::And, parts.into_iter().map(|q| q.0).collect()))
    }

    /// Union of every sub-query's primary-key set. Empty input yields
    /// empty.
    pub fn or(parts: Vec<Query>) -> Query {
        Query(Node::Combined(Combinator::Or, parts.into_iter().map(|q| q.0).collect()))
    }

    pub fn keys(&self, tx: &Transaction) -> Result<Vec<Key>> {
        eval(&self.0, tx)
    }

    /// Resolves every matching primary key through `tx.get`,
    /// preserving the read isolation of the transaction the query
    /// executes against.
    pub fn values(&self, tx: &Transaction) -> Result<Vec<Value>> {
        self.keys(tx)?
            .into_iter()
            .filter_map(|k| match tx.get(&k) {
                Ok(Some(v)) => Some(Ok(v)),
                Ok(None) => None,
                Err(e) => Some(Err(e)),
            })
            .collect()
    }
}

fn eval(node: &Node, tx: &Transaction) -> Result<Vec<Key>> {
    match node {
        Node::Range(index_name, range) => tx.index_keys(index_name, range),
        Node::Advanced(index_name, MinMax::Min) => tx.index_min_keys(index_name),
        Node::Advanced(index_name, MinMax::Max) => tx.index_max_keys(index_name),
        Node::Combined(Combinator::And, parts) => {
            if parts.is_empty() {
                return Ok(vec![]);
            }
            let mut iter = parts.iter();
            let mut acc: std::collections::BTreeSet<Key> = eval(iter.next().unwrap(), tx)?.into_iter().collect();
            for part in iter {
                let next: std::collections::BTreeSet<Key> = eval(part, tx)?.into_iter().collect();
                acc = acc.intersection(&next).cloned().collect();
            }
            Ok(acc.into_iter().collect())
        }
        Node::Combined(Combinator::Or, parts) => {
            let mut acc: std::collections::BTreeSet<Key> = std::collections::BTreeSet::new();
            for part in parts {
                acc.extend(eval(part, tx)?);
            }
            Ok(acc.into_iter().collect())
        }
    }
}

#[cfg(test)]
#[path = "query_test.rs"]
mod query_test;
