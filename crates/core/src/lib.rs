#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Capability traits implemented by the orchestration engine.
//!
//! This crate defines the seams between the dependency resolver,
//! scheduler, executor, context pipeline, budget gate, and run store —
//! the `orchestrator` crate provides the concrete implementations.

pub mod orchestrator;

pub use orchestrator::{
    BudgetEnforcer, ContextBuilder, CostCalculator, DependencyResolver, Orchestrator,
    ParallelExecutor, Queue, RunSnapshot, RunStore, Scheduler, TaskExecutorFn, TokenEstimator,
    UsageTracker,
};
