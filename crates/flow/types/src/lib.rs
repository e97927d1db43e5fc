//! Token-Flow Domain Types
//!
//! A scenario is a directed graph of typed nodes. Discrete **tokens**
//! travel along its edges, are buffered on named node inputs, and are
//! turned into new tokens by the node that consumes them. Everything the
//! engine does is driven by timestamped **events** and recorded as
//! sequence-numbered **activity entries**.
//!
//! # Key Concepts
//!
//! - **Scenario**: the immutable graph (nodes, edges, metadata) loaded once
//!   per run.
//! - **Token**: a JSON value plus its lineage handle, a set of correlation
//!   ids that only ever grows by union.
//! - **Event**: a unit of pending work in the queue (`TokenArrival`,
//!   `Emit`, `ProcessingComplete`, `ProcessingTrigger`, `RunStart`).
//! - **NodeState**: per-node input buffers plus a tagged union of
//!   kind-specific variables.
//! - **ActivityEntry**: one line of the append-only ledger.
//!
//! This crate is pure data. Behaviour lives in `flow-engine`.

#![deny(unsafe_code)]

mod activity;
mod errors;
mod event;
mod ids;
mod scenario;
mod state;
mod token;

pub use activity::*;
pub use errors::*;
pub use event::*;
pub use ids::*;
pub use scenario::*;
pub use state::*;
pub use token::*;
