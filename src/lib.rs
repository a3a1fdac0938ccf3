//! Result-composition core for a federated GraphQL gateway.
//!
//! The crate stores the structure of JSON-like documents as bit-packed
//! fixed-size rows inside chunked arenas ([`metadb`]), parses raw subgraph
//! response bytes into navigable documents ([`source`]), builds equivalent
//! documents programmatically from an operation plan
//! ([`source::builder`]), and merges scalar leaves from many source
//! documents into one selection-set-addressed tree ([`composite`]).
//!
//! Everything here is synchronous, in-memory CPU work; network calls,
//! planning, and final serialization live in the layers above.

#![warn(missing_docs)]

pub mod composite;
pub mod error;
pub mod metadb;
pub mod plan;
pub mod source;
pub mod types;

pub use error::{Result, WeftError};
