//! Core domain types
//!
//! This module contains the domain structures shared between the orchestrator
//! (which persists and drives pipelines) and its clients (which trigger and
//! observe them).

pub mod activity;
pub mod deployment;
pub mod event;
pub mod outcome;
pub mod phase;
pub mod pipeline;
pub mod signal;
pub mod state;
pub mod status;
