use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens (creating if needed) the store at `path`, ready for use.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    let target = path.display().to_string();
    prepare(&target, Connection::open(path))
}

/// Opens a fresh, private in-memory store. Used by tests and `--memory`.
pub fn open_db_in_memory() -> DbResult<Connection> {
    prepare(":memory:", Connection::open_in_memory())
}

fn prepare(target: &str, opened: rusqlite::Result<Connection>) -> DbResult<Connection> {
    let started_at = Instant::now();
    let result = opened
        .map_err(DbError::from)
        .and_then(|mut conn| -> DbResult<(Connection, usize)> {
            // Cascades and RESTRICT checks are inert without this pragma.
            conn.pragma_update(None, "foreign_keys", true)?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            let steps = apply_migrations(&mut conn)?;
            Ok((conn, steps))
        });

    let elapsed_ms = started_at.elapsed().as_millis();
    match result {
        Ok((conn, steps)) => {
            info!(
                "event=db_open module=db status=ok target={target} migrations_applied={steps} duration_ms={elapsed_ms}"
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error target={target} duration_ms={elapsed_ms} error={err}"
            );
            Err(err)
        }
    }
}
