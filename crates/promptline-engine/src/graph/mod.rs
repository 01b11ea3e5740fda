//! Dependency-ordered workflows.
//!
//! A workflow is a set of named `DagNode`s, each listing the nodes it
//! depends on. `Dag` validates the graph and fixes a topological order;
//! `DagExecutor` runs every node whose dependencies completed, up to a
//! concurrency cap, and hands each node's typed fields to its descendants.

pub mod dag;
pub mod executor;
pub mod node;

pub use dag::Dag;
pub use executor::{DagExecutor, ExecutionResult, NodeOutcome, NodeResult};
pub use node::DagNode;
