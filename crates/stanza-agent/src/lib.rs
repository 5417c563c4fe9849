//! # Stanza Agent
//!
//! This crate provides the core of a log-collection agent: it tails sources,
//! transforms records through a chain of operators, and ships the results to
//! sinks.
//!
//! ## Architecture
//!
//! ```text
//!   Sources (file_input, generate_input)
//!       │
//!       v
//!   Transformers (noop, rate_limit, metadata, parsers)
//!       │
//!       v
//!   Sinks (stdout, drop_output)
//! ```
//!
//! The library is organized into several key modules:
//! - [`entry`]: The in-memory log record and its field-addressing language
//! - [`operator`]: The uniform lifecycle/process contract every node
//!   implements, the registry of builtin types, and the builtin operators
//! - [`pipeline`]: Declarative configuration expanded into a validated DAG
//!   of running operators
//! - [`plugin`]: Named, parameterized sub-pipeline templates
//! - [`database`]: Durable per-operator key-value state
//! - [`agent`]: Top-level lifecycle coordination for a built pipeline
//!
//! ## Concurrency Model
//!
//! Inputs run background tasks; transformers and sinks execute synchronously
//! on their upstream's task. Shutdown is coordinated through cancellation
//! tokens: sources quiesce first, then the rest of the graph drains.

#![deny(clippy::all)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![deny(unused_extern_crates)]
#![deny(unreachable_pub)]

pub mod agent;
pub mod database;
pub mod entry;
pub mod operator;
pub mod pipeline;
pub mod plugin;
pub mod testutil;
