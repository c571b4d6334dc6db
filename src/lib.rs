//! versio: a rollout controller for versioned DeploymentConfig resources.

pub mod config;
pub mod controller;
pub mod crd;
pub mod server;
