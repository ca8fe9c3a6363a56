//! Core engine for the typetree data model.
//! Owns the generic kind dispatch, bulk loading, and tree navigation; the
//! HTTP server and loader CLI are thin shells over it.

pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod telemetry;

pub use db::{open_db, open_db_in_memory, DbError, DbResult};
pub use logging::{
    default_log_level, init_logging, init_process_logging, init_stderr_logging, logging_status,
    LogTarget, LoggingError,
};
pub use model::kind::EntityKind;
pub use model::record::{FieldValue, Payload, Record, RowId, ValidationError};
pub use model::rows::{EnumMemberRow, EnumView, InstanceDataRow, NodeRow, TypeDataRow};
pub use repo::kind_repo::{
    CheckedConnection, KindRepoError, KindRepoResult, KindRepository, SqliteKindRepository,
};
pub use service::bulk_load::{BulkDocument, BulkLoadError, BulkLoader, LoadPass, LoadReport};
pub use service::resolver::{ReferenceError, ReferenceResolver};
pub use service::tree_service::{TreeService, TreeServiceError, TreeServiceResult};
pub use service::view_model::{format_value, DisplayValue, ViewError, ViewModel};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
