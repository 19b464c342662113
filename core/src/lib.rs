//! Credit-risk scoring desk: PD scoring, tenant-scoped persistence with
//! classified retries, and portfolio analytics (exact or cached).

pub mod application;
pub mod clock;
pub mod config;
pub mod error;
pub mod features;
pub mod grading;
pub mod model;
pub mod persistence;
pub mod portfolio;
pub mod rng;
pub mod sample;
pub mod service;
pub mod simulation;
pub mod store;
pub mod tenant;
pub mod types;
