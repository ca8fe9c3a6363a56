//! Generic entity model for the type and instance trees.
//!
//! # Responsibility
//! - Define the kind discriminator and its static descriptor table.
//! - Hold rows generically and validate payloads against descriptors.
//!
//! # Invariants
//! - Both trees are single-rooted at a node named `root`.
//! - Row ids are storage-assigned and immutable.

pub mod kind;
pub mod record;
pub mod rows;

/// Name of the synthetic top node of both trees.
pub const ROOT_NODE_NAME: &str = "root";
