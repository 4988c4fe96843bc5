//! Pardo harness.
//!
//! A local engine that partitions input and drives one partition adapter per partition, plus a
//! few demo functions for exercising the runner end to end.

pub mod config;
pub mod demo;
pub mod engine;
pub mod functions;
