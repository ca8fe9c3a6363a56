//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the kind-parameterized data access contract.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`) in addition to DB
//!   transport errors.
//! - Payload validation happens above this layer; values arrive aligned
//!   with the kind descriptor.

pub mod kind_repo;
