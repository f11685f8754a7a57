//! # Repository Layer
//!
//! This module contains repository implementations that encapsulate SeaORM operations
//! for SCM provider configuration and per-user credential rows.

pub mod scm;

pub use scm::{ScmRepository, TokenStore};
