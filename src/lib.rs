//! This crate provides the apply operator of a distributed datacube analytics engine. It applies a
//! user-supplied composition of server-side primitives to the measure of a datacube whose rows
//! are partitioned into fragments held by several database instances.
//!
//! An invocation runs on every rank of a process group:
//!
//! * The root rank parses the expression, classifies the aggregation it performs and checks that
//!   the datatypes of the composition agree. It then registers the output datacube and prepares
//!   the query run against every fragment.
//! * The setup outcome is broadcast to every rank, followed by the dimension values if the
//!   expression references them.
//! * Each rank deterministically computes its share of the fragments and builds the
//!   corresponding output fragments.
//! * The root rank finally derives the dimensions of the output datacube from the shape of the
//!   fragments produced.
//!
//! The metadata store, the storage layer, the primitive registry and the process group are
//! collaborators reached through the traits in [store], [storage], [descriptor] and [comm].
//!
//! The crate is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Serde](serde) performs (de)serialisation of task parameters, primitive descriptors and the
//!   broadcast payload, encoded with [bincode].
//! * [tracing] provides structured logging and [prometheus] collects metrics.

pub mod apply;
pub mod classifier;
pub mod comm;
pub mod compression;
pub mod config;
pub mod descriptor;
pub mod dimension;
pub mod error;
pub mod lexer;
pub mod master;
pub mod metrics;
pub mod models;
pub mod parser;
pub mod partition;
pub mod payload;
pub mod pid;
pub mod primitive;
pub mod rewrite;
pub mod storage;
pub mod store;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod typecheck;
pub mod types;
pub mod worker;
