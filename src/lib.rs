//! # Registry SCM Library
//!
//! This library provides the SCM credential lifecycle of the private Terraform
//! registry: provider configuration, OAuth and Personal Access Token
//! onboarding, encrypted credential storage and resilient SCM reads.

pub mod auth;
pub mod config;
pub mod connectors;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod token_refresh;
pub use migration;
