//! Execution of user functions over partitions.
//!
//! [`SimpleDoFnRunner`] sequences a function's hooks according to its signature;
//! [`PartitionAdapter`] drives a runner over one partition and buffers output in an
//! [`OutputManager`].

pub mod adapter;
pub mod error;
pub mod output_manager;
pub mod runner;

pub use adapter::{AdapterConfig, PartitionAdapter, PartitionOutput};
pub use error::{InvocationError, InvocationPhase};
pub use output_manager::OutputManager;
pub use runner::{DoFnRunner, InvocationPlan, RunnerEnvironment, SimpleDoFnRunner};
