//! Gantry Core
//!
//! Core types and abstractions for the Gantry deployment pipeline.
//!
//! This crate contains:
//! - Domain types: pipeline requests, phase results, deployments, signals, outcomes
//! - The pipeline state machine, rebuilt from a recorded event log
//! - DTOs: Data transfer objects for the orchestrator API

pub mod domain;
pub mod dto;
