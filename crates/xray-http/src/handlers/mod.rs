//! HTTP Request Handlers

pub mod executions;
pub mod health;
pub mod metrics;
pub mod steps;
