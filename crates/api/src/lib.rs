#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Thin HTTP control plane: submit / status / abort, under `/api/v1`.
//!
//! Routes, status codes, and the error-code mapping follow the run
//! store and orchestration engine exactly — this layer is DTOs and
//! wiring only, never a second source of truth for run state.

pub mod dto;
pub mod handlers;
pub mod routes;

pub use routes::{build_router, run_retention_loop, AppState, RunDefaults};
