//! Core use-case services.
//!
//! # Responsibility
//! - Dispatch CRUD by entity kind over the repository layer.
//! - Orchestrate bulk loads and read-side tree navigation on top of it.
//! - Keep HTTP/CLI layers decoupled from storage details.

pub mod bulk_load;
pub mod resolver;
pub mod tree_service;
pub mod view_model;
