//! Declarative per-scope configuration and the merge engine.
//!
//! A test invocation sees a chain of scopes from the outermost (suite) to the
//! innermost (method). [`ScopeChain::merge`] folds them into one
//! [`MergedConfig`]: properties overlay with inner-wins semantics, topics
//! concatenate in scope order.

mod merge;
mod scope;

pub use merge::{MergedConfig, merge_scopes};
pub use scope::{
    ConfigScope, DEFAULT_TOPIC_PARTITIONS, DEFAULT_TOPIC_REPLICATION_FACTOR, ScopeChain,
};
