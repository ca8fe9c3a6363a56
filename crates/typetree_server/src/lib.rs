//! HTTP API over the typetree kind dispatcher.
//!
//! # Responsibility
//! - Route `/tree/{kind}` CRUD and the read-only projections to the core
//!   services.
//! - Run blocking SQLite work off the async runtime.
//!
//! # Invariants
//! - The connection is the only shared mutable state; every request takes
//!   it for the duration of one unit of work.
//! - The schema is verified when the state is built, not per request.

pub mod api;
pub mod config;
pub mod error;

use axum::routing::get;
use axum::Router;
use rusqlite::Connection;
use std::sync::{Arc, Mutex, PoisonError};
use typetree_core::telemetry::{LatestSample, SampleSource, TelemetryError, TELEMETRY_TOPIC};
use typetree_core::{CheckedConnection, KindRepoError, SqliteKindRepository, TreeService};

pub use config::ServerConfig;
pub use error::ApiError;

/// Service type handed to request work.
pub type Service<'conn> = TreeService<SqliteKindRepository<'conn>>;

/// Router state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    db: Arc<Mutex<CheckedConnection>>,
    latest: LatestSample,
}

impl AppState {
    /// Wraps a migrated connection; fails when it is not a typetree store.
    pub fn new(conn: Connection) -> Result<Self, KindRepoError> {
        Ok(Self {
            db: Arc::new(Mutex::new(CheckedConnection::new(conn)?)),
            latest: LatestSample::new(),
        })
    }

    pub fn latest_sample(&self) -> &LatestSample {
        &self.latest
    }

    /// Feeds `source` samples on the telemetry topic into this state.
    pub fn subscribe_telemetry(&self, source: &impl SampleSource) -> Result<(), TelemetryError> {
        source.subscribe(TELEMETRY_TOPIC, self.latest.callback())
    }

    /// Runs `work` against a service over the shared connection, on the
    /// blocking pool.
    pub async fn run<T, F>(&self, work: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Service<'_>) -> Result<T, ApiError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().unwrap_or_else(PoisonError::into_inner);
            work(&TreeService::new(conn.repository()))
        })
        .await
        .map_err(|err| ApiError::Internal(format!("request worker failed: {err}")))?
    }
}

/// Builds the HTTP router over `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/tree/{kind}",
            get(api::list_rows)
                .post(api::create_row)
                .delete(api::delete_kind),
        )
        .route(
            "/tree/{kind}/{id}",
            get(api::get_row)
                .patch(api::patch_row)
                .delete(api::delete_row),
        )
        .route("/enums", get(api::list_enums))
        .route("/types/{id}/data", get(api::type_data))
        .route("/instances/{id}/data", get(api::instance_data))
        .route("/telemetry/latest", get(api::latest_sample))
        .with_state(state)
}
