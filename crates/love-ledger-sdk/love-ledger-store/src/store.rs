use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use love_ledger_sdk::{Commit, Record, RecordStore, RecordWrite};

use crate::error::StoreError;
use crate::models::{NewRecordRow, RecordRow};
use crate::schema::records;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// SQL expression for SQLite's `datetime('now')`.
const DATETIME_NOW: &str = "datetime('now')";

/// Record store backed by a SQLite database.
///
/// All methods take `&mut self` because Diesel's `SqliteConnection` requires
/// `&mut` for all operations, including reads.
pub struct LedgerStore {
    conn: SqliteConnection,
}

impl LedgerStore {
    /// Open (or create) a store at the given file path. Runs migrations automatically.
    pub fn open(path: &str) -> crate::Result<Self> {
        let mut conn = SqliteConnection::establish(path)?;
        conn.batch_execute(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000; PRAGMA journal_mode = WAL;",
        )?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        log::info!("store: opened {path}");
        Ok(LedgerStore { conn })
    }

    /// Open an in-memory store for tests.
    pub fn open_in_memory() -> crate::Result<Self> {
        let mut conn = SqliteConnection::establish(":memory:")?;
        conn.batch_execute("PRAGMA foreign_keys = ON;")?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(LedgerStore { conn })
    }

    // ==================== Reads ====================

    pub fn get(&mut self, key: &str) -> crate::Result<Option<Record>> {
        records::table
            .filter(records::key.eq(key))
            .select(RecordRow::as_select())
            .first(&mut self.conn)
            .optional()?
            .map(row_to_record)
            .transpose()
    }

    /// Records whose key starts with `prefix`, ordered by key.
    pub fn scan_prefix(&mut self, prefix: &str) -> crate::Result<Vec<Record>> {
        let rows: Vec<RecordRow> = records::table
            .filter(records::key.like(like_prefix(prefix)).escape('\\'))
            .order(records::key.asc())
            .select(RecordRow::as_select())
            .load(&mut self.conn)?;

        // LIKE is case-insensitive for ASCII in SQLite.
        rows.into_iter()
            .filter(|row| row.key.starts_with(prefix))
            .map(row_to_record)
            .collect()
    }

    /// When `key` was last written, in SQLite `datetime` format (UTC).
    pub fn updated_at(&mut self, key: &str) -> crate::Result<Option<String>> {
        Ok(records::table
            .filter(records::key.eq(key))
            .select(records::updated_at)
            .first(&mut self.conn)
            .optional()?)
    }

    pub fn count(&mut self) -> crate::Result<u64> {
        let n: i64 = records::table.count().get_result(&mut self.conn)?;
        Ok(n as u64)
    }

    // ==================== Writes ====================

    /// Apply a batch atomically. Every precondition is checked inside one
    /// immediate transaction before any row is written.
    pub fn commit(&mut self, writes: Vec<RecordWrite>) -> crate::Result<Commit> {
        self.conn.immediate_transaction(|conn| {
            let mut current = Vec::with_capacity(writes.len());
            for w in &writes {
                let version: Option<i64> = records::table
                    .filter(records::key.eq(&w.key))
                    .select(records::version)
                    .first(conn)
                    .optional()?;
                let version = version.map(version_from_db).transpose()?;
                if !w.expect.matches(version) {
                    log::debug!("store: precondition {:?} failed on {}", w.expect, w.key);
                    return Ok(Commit::Conflict { key: w.key.clone() });
                }
                current.push(version);
            }

            for (w, version) in writes.iter().zip(current) {
                let value = serde_json::to_string(&w.value)
                    .map_err(|e| StoreError::InvalidData(e.to_string()))?;
                match version {
                    Some(v) => {
                        diesel::update(records::table.filter(records::key.eq(&w.key)))
                            .set((
                                records::value.eq(value),
                                records::version.eq(version_to_db(v + 1)?),
                                records::updated_at.eq(diesel::dsl::sql::<
                                    diesel::sql_types::Text,
                                >(DATETIME_NOW)),
                            ))
                            .execute(conn)?;
                    }
                    None => {
                        diesel::insert_into(records::table)
                            .values(NewRecordRow {
                                key: w.key.clone(),
                                value,
                                version: 1,
                            })
                            .execute(conn)?;
                    }
                }
            }
            Ok(Commit::Applied)
        })
    }
}

impl RecordStore for LedgerStore {
    fn get(&mut self, key: &str) -> Result<Option<Record>, String> {
        self.get(key).map_err(|e| format!("{e}"))
    }

    fn scan_prefix(&mut self, prefix: &str) -> Result<Vec<Record>, String> {
        self.scan_prefix(prefix).map_err(|e| format!("{e}"))
    }

    fn commit(&mut self, writes: Vec<RecordWrite>) -> Result<Commit, String> {
        self.commit(writes).map_err(|e| format!("{e}"))
    }
}

// ==================== Helpers ====================

fn row_to_record(row: RecordRow) -> crate::Result<Record> {
    let value = serde_json::from_str(&row.value)
        .map_err(|e| StoreError::InvalidData(format!("{}: {e}", row.key)))?;
    Ok(Record {
        version: version_from_db(row.version)?,
        key: row.key,
        value,
    })
}

fn version_from_db(v: i64) -> crate::Result<u64> {
    u64::try_from(v).map_err(|_| StoreError::InvalidData(format!("negative version {v}")))
}

fn version_to_db(v: u64) -> crate::Result<i64> {
    i64::try_from(v).map_err(|_| StoreError::InvalidData(format!("version overflow {v}")))
}

/// `LIKE` pattern matching keys that start with `prefix`.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("contract_"), "contract\\_%");
        assert_eq!(like_prefix("a%b\\"), "a\\%b\\\\%");
        assert_eq!(like_prefix(""), "%");
    }

    #[test]
    fn versions_convert_both_ways() {
        assert_eq!(version_from_db(3).unwrap(), 3);
        assert!(version_from_db(-1).is_err());
        assert!(version_to_db(u64::MAX).is_err());
    }
}
