//! Kind-parameterized repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Execute create/read/update/delete for any `EntityKind`.
//! - Keep SQL details behind one generic persistence boundary.
//!
//! # Invariants
//! - SQL text is produced only from the static descriptor table.
//! - Listing is deterministic: `id ASC` (insertion order).
//! - Deletes run in one IMMEDIATE transaction; the schema cascades, this
//!   layer only counts what disappeared.

use crate::db::migrations::{latest_version, schema_version};
use crate::db::DbError;
use crate::model::kind::{EntityKind, FieldType, KindDescriptor};
use crate::model::record::{FieldValue, Record, RowId};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by kind repository operations.
pub type KindRepoResult<T> = Result<T, KindRepoError>;

/// Errors from kind repository operations.
#[derive(Debug)]
pub enum KindRepoError {
    /// Underlying SQLite/bootstrap error, including constraint violations.
    Db(DbError),
    /// Target row does not exist.
    NotFound { kind: EntityKind, id: RowId },
    /// Lookup named a field the kind does not have.
    UnknownField { kind: EntityKind, field: String },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid record.
    InvalidData(String),
}

impl Display for KindRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { kind, id } => write!(f, "{kind} not found: {id}"),
            Self::UnknownField { kind, field } => write!(f, "{kind} has no field `{field}`"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "tree repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "tree repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "tree repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid tree data: {message}"),
        }
    }
}

impl Error for KindRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for KindRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for KindRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Engine(value))
    }
}

/// Repository interface shared by all six kinds.
pub trait KindRepository {
    /// Inserts one row and returns its assigned id.
    fn insert(&self, kind: EntityKind, values: &[FieldValue]) -> KindRepoResult<RowId>;
    /// Inserts all rows in one transaction; either every row lands or none.
    fn insert_many(&self, kind: EntityKind, rows: &[Vec<FieldValue>])
        -> KindRepoResult<Vec<RowId>>;
    /// Lists every row of a kind in insertion order.
    fn get_all(&self, kind: EntityKind) -> KindRepoResult<Vec<Record>>;
    /// Loads one row by id.
    fn get_by_id(&self, kind: EntityKind, id: RowId) -> KindRepoResult<Option<Record>>;
    /// Lists rows whose `field` equals `value`, in insertion order.
    fn find_by_field(
        &self,
        kind: EntityKind,
        field: &str,
        value: &FieldValue,
    ) -> KindRepoResult<Vec<Record>>;
    /// Writes every field of `record` back to its row.
    fn update(&self, record: &Record) -> KindRepoResult<()>;
    /// Deletes one row and everything the schema cascades to.
    ///
    /// Returns the number of rows removed across the affected tables.
    fn delete_by_id(&self, kind: EntityKind, id: RowId) -> KindRepoResult<u64>;
    /// Deletes every row of a kind, with cascades.
    fn delete_all(&self, kind: EntityKind) -> KindRepoResult<u64>;
}

/// SQLite-backed kind repository.
pub struct SqliteKindRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteKindRepository<'conn> {
    /// Creates repository from migrated connection.
    pub fn try_new(conn: &'conn Connection) -> KindRepoResult<Self> {
        ensure_kind_connection_ready(conn)?;
        Ok(Self { conn })
    }
}

/// Connection whose schema was verified once, for long-lived owners that
/// hand out many short-lived repositories.
pub struct CheckedConnection {
    conn: Connection,
}

impl CheckedConnection {
    /// Runs the same schema check as [`SqliteKindRepository::try_new`].
    pub fn new(conn: Connection) -> KindRepoResult<Self> {
        ensure_kind_connection_ready(&conn)?;
        Ok(Self { conn })
    }

    /// Repository over this connection, without re-checking the schema.
    pub fn repository(&self) -> SqliteKindRepository<'_> {
        SqliteKindRepository { conn: &self.conn }
    }
}

impl KindRepository for SqliteKindRepository<'_> {
    fn insert(&self, kind: EntityKind, values: &[FieldValue]) -> KindRepoResult<RowId> {
        insert_row(self.conn, kind.descriptor(), values)
    }

    fn insert_many(
        &self,
        kind: EntityKind,
        rows: &[Vec<FieldValue>],
    ) -> KindRepoResult<Vec<RowId>> {
        let descriptor = kind.descriptor();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let ids = rows
            .iter()
            .map(|values| insert_row(&tx, descriptor, values))
            .collect::<KindRepoResult<Vec<_>>>()?;
        tx.commit()?;
        Ok(ids)
    }

    fn get_all(&self, kind: EntityKind) -> KindRepoResult<Vec<Record>> {
        let descriptor = kind.descriptor();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY id ASC;",
            descriptor.select_columns(),
            descriptor.table
        );
        query_records(self.conn, descriptor, &sql, Vec::new())
    }

    fn get_by_id(&self, kind: EntityKind, id: RowId) -> KindRepoResult<Option<Record>> {
        let descriptor = kind.descriptor();
        let sql = format!(
            "SELECT {} FROM {} WHERE id = ?1;",
            descriptor.select_columns(),
            descriptor.table
        );
        let mut records = query_records(self.conn, descriptor, &sql, vec![Value::Integer(id)])?;
        Ok(records.pop())
    }

    fn find_by_field(
        &self,
        kind: EntityKind,
        field: &str,
        value: &FieldValue,
    ) -> KindRepoResult<Vec<Record>> {
        let descriptor = kind.descriptor();
        let (_, spec) = descriptor
            .field(field)
            .ok_or_else(|| KindRepoError::UnknownField {
                kind,
                field: field.to_string(),
            })?;

        let columns = descriptor.select_columns();
        if value.is_null() {
            let sql = format!(
                "SELECT {columns} FROM {} WHERE {} IS NULL ORDER BY id ASC;",
                descriptor.table, spec.column
            );
            return query_records(self.conn, descriptor, &sql, Vec::new());
        }

        let sql = format!(
            "SELECT {columns} FROM {} WHERE {} = ?1 ORDER BY id ASC;",
            descriptor.table, spec.column
        );
        query_records(self.conn, descriptor, &sql, vec![to_sql_value(value)])
    }

    fn update(&self, record: &Record) -> KindRepoResult<()> {
        let descriptor = record.kind.descriptor();
        let assignments = descriptor
            .fields
            .iter()
            .enumerate()
            .map(|(index, field)| format!("{} = ?{}", field.column, index + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {} SET {assignments} WHERE id = ?{};",
            descriptor.table,
            descriptor.fields.len() + 1
        );

        let mut bind_values: Vec<Value> = record.values().iter().map(to_sql_value).collect();
        bind_values.push(Value::Integer(record.id));

        let changed = self.conn.execute(&sql, params_from_iter(bind_values))?;
        if changed == 0 {
            return Err(KindRepoError::NotFound {
                kind: record.kind,
                id: record.id,
            });
        }
        Ok(())
    }

    fn delete_by_id(&self, kind: EntityKind, id: RowId) -> KindRepoResult<u64> {
        let descriptor = kind.descriptor();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let before = count_cascade_rows(&tx, descriptor)?;
        let changed = tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1;", descriptor.table),
            [id],
        )?;
        if changed == 0 {
            return Err(KindRepoError::NotFound { kind, id });
        }
        let after = count_cascade_rows(&tx, descriptor)?;

        tx.commit()?;
        Ok(before.saturating_sub(after))
    }

    fn delete_all(&self, kind: EntityKind) -> KindRepoResult<u64> {
        let descriptor = kind.descriptor();
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let before = count_cascade_rows(&tx, descriptor)?;
        tx.execute(&format!("DELETE FROM {};", descriptor.table), [])?;
        let after = count_cascade_rows(&tx, descriptor)?;

        tx.commit()?;
        Ok(before.saturating_sub(after))
    }
}

fn insert_row(
    conn: &Connection,
    descriptor: &KindDescriptor,
    values: &[FieldValue],
) -> KindRepoResult<RowId> {
    if values.len() != descriptor.fields.len() {
        return Err(KindRepoError::InvalidData(format!(
            "{} insert expects {} values, got {}",
            descriptor.kind,
            descriptor.fields.len(),
            values.len()
        )));
    }

    let columns = descriptor
        .fields
        .iter()
        .map(|field| field.column)
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=values.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {} ({columns}) VALUES ({placeholders});",
            descriptor.table
        ),
        params_from_iter(values.iter().map(to_sql_value)),
    )?;
    Ok(conn.last_insert_rowid())
}

fn query_records(
    conn: &Connection,
    descriptor: &KindDescriptor,
    sql: &str,
    bind_values: Vec<Value>,
) -> KindRepoResult<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params_from_iter(bind_values))?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(parse_record_row(descriptor, row)?);
    }
    Ok(records)
}

fn parse_record_row(descriptor: &KindDescriptor, row: &Row<'_>) -> KindRepoResult<Record> {
    let id: RowId = row.get(0)?;
    let mut values = Vec::with_capacity(descriptor.fields.len());

    for (offset, field) in descriptor.fields.iter().enumerate() {
        let index = offset + 1;
        let value = match field.field_type {
            FieldType::Integer => FieldValue::from(row.get::<_, Option<i64>>(index)?),
            FieldType::Text => row
                .get::<_, Option<String>>(index)?
                .map_or(FieldValue::Null, FieldValue::Text),
        };
        if field.required && value.is_null() {
            return Err(KindRepoError::InvalidData(format!(
                "null value in required column {}.{} (id {id})",
                descriptor.table, field.column
            )));
        }
        values.push(value);
    }

    Record::from_values(descriptor.kind, id, values).ok_or_else(|| {
        KindRepoError::InvalidData(format!("column count mismatch in {}", descriptor.table))
    })
}

fn count_cascade_rows(conn: &Connection, descriptor: &KindDescriptor) -> KindRepoResult<u64> {
    let sum = descriptor
        .cascade_tables()
        .map(|table| format!("(SELECT COUNT(*) FROM {table})"))
        .collect::<Vec<_>>()
        .join(" + ");
    let count: i64 = conn.query_row(&format!("SELECT {sum};"), [], |row| row.get(0))?;
    Ok(u64::try_from(count).unwrap_or(0))
}

fn to_sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Integer(value) => Value::Integer(*value),
        FieldValue::Text(value) => Value::Text(value.clone()),
    }
}

fn ensure_kind_connection_ready(conn: &Connection) -> KindRepoResult<()> {
    let expected_version = latest_version();
    let actual_version = schema_version(conn)?;
    if actual_version != expected_version {
        return Err(KindRepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for kind in EntityKind::ALL {
        let descriptor = kind.descriptor();
        let columns = table_columns(conn, descriptor.table)?;
        if columns.is_empty() {
            return Err(KindRepoError::MissingRequiredTable(descriptor.table));
        }
        let required = std::iter::once("id").chain(descriptor.fields.iter().map(|f| f.column));
        for column in required {
            if !columns.iter().any(|current| current == column) {
                return Err(KindRepoError::MissingRequiredColumn {
                    table: descriptor.table,
                    column,
                });
            }
        }
    }

    Ok(())
}

fn table_columns(conn: &Connection, table: &str) -> KindRepoResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get(1)?);
    }
    Ok(columns)
}
