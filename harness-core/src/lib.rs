//! # flock-harness
//!
//! Fault-injection test harness for the fault-tolerant SimpleFileLock
//! service.
//!
//! The harness brings a multi-node cluster up over SSH, drives concurrent
//! client workloads against it, kills a subset of server and client
//! processes mid-run, and verifies that the surviving system still produced
//! the expected persisted results. Runs are swept over a configuration
//! matrix (cluster size × failure count × repetition) and recorded in an
//! append-only report.
//!
//! The service under test is an external collaborator: the harness only
//! starts, stops, and reconfigures its processes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod command;
pub mod config;
pub mod failure;
pub mod hosts;
pub mod report;
pub mod ssh;
pub mod sweep;
pub mod validate;
pub mod workload;
