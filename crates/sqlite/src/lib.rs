//! `keymerge-sqlite` — Base store kept in a single SQLite table.
//!
//! Layout: one `TEXT NOT NULL` column per schema column plus an
//! `AUTOINCREMENT` sequence column that records insertion order. The
//! uniqueness constraint is a unique index on the key column. Index names are
//! global to a database, so constraint `c` on table `t` is stored as index
//! `t__c`; several base tables can share one file and one constraint name.

use std::path::Path;

use keymerge_recon::model::{Record, Schema, StoredRecord};
use keymerge_recon::store::BaseStore;
use keymerge_recon::ReconError;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

/// Insertion sequence column. Reserved: schemas may not use this name.
pub const SEQ_COLUMN: &str = "_keymerge_seq";

pub struct SqliteBase {
    conn: Connection,
    table: String,
    schema: Schema,
}

impl SqliteBase {
    /// Create the base table on `conn`. Fails if the table already exists.
    pub fn create(conn: Connection, table: &str, schema: Schema) -> Result<Self, ReconError> {
        if schema.position(SEQ_COLUMN).is_some() {
            return Err(ReconError::SchemaMismatch(format!(
                "column name '{SEQ_COLUMN}' is reserved"
            )));
        }

        let columns: Vec<String> = schema
            .columns()
            .iter()
            .map(|c| format!("{} TEXT NOT NULL", quote(c)))
            .collect();
        let sql = format!(
            "CREATE TABLE {} ({} INTEGER PRIMARY KEY AUTOINCREMENT, {})",
            quote(table),
            quote(SEQ_COLUMN),
            columns.join(", ")
        );
        conn.execute_batch(&sql).map_err(ReconError::storage)?;

        log::debug!("created base table '{table}' ({} columns)", schema.width());
        Ok(Self {
            conn,
            table: table.to_string(),
            schema,
        })
    }

    /// Open an existing base table, reading its columns from the database.
    pub fn open(conn: Connection, table: &str, key_column: &str) -> Result<Self, ReconError> {
        let columns = {
            let mut stmt = conn
                .prepare(&format!("PRAGMA table_info({})", quote(table)))
                .map_err(ReconError::storage)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))
                .map_err(ReconError::storage)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(ReconError::storage)?;
            names
        };

        if columns.is_empty() {
            return Err(ReconError::StorageFailure(format!(
                "table '{table}' not found"
            )));
        }
        if !columns.iter().any(|c| c == SEQ_COLUMN) {
            return Err(ReconError::SchemaMismatch(format!(
                "table '{table}' has no '{SEQ_COLUMN}' column"
            )));
        }

        let schema = Schema::new(columns.into_iter().filter(|c| c != SEQ_COLUMN), key_column)?;
        Ok(Self {
            conn,
            table: table.to_string(),
            schema,
        })
    }

    pub fn create_at(path: &Path, table: &str, schema: Schema) -> Result<Self, ReconError> {
        let conn = Connection::open(path).map_err(ReconError::storage)?;
        Self::create(conn, table, schema)
    }

    pub fn open_at(path: &Path, table: &str, key_column: &str) -> Result<Self, ReconError> {
        let conn = Connection::open(path).map_err(ReconError::storage)?;
        Self::open(conn, table, key_column)
    }

    pub fn create_in_memory(table: &str, schema: Schema) -> Result<Self, ReconError> {
        let conn = Connection::open_in_memory().map_err(ReconError::storage)?;
        Self::create(conn, table, schema)
    }

    /// Append records as-is, without conflict handling. Used to seed a base,
    /// duplicates included.
    pub fn load(&mut self, records: &[Record]) -> Result<usize, ReconError> {
        self.conn
            .execute_batch("BEGIN TRANSACTION")
            .map_err(ReconError::storage)?;
        match self.insert_plain(records) {
            Ok(n) => match self.conn.execute_batch("COMMIT") {
                Ok(()) => Ok(n),
                Err(err) => Err(self.abandon_load(ReconError::storage(err))),
            },
            Err(err) => Err(self.abandon_load(err)),
        }
    }

    /// Roll back a failed `load`, keeping the original error.
    fn abandon_load(&self, err: ReconError) -> ReconError {
        if self.conn.is_autocommit() {
            return err;
        }
        if let Err(rollback_err) = self.conn.execute_batch("ROLLBACK") {
            log::error!("load into '{}': rollback failed: {rollback_err}", self.table);
        }
        err
    }

    /// Records in insertion order.
    pub fn records(&self) -> Result<Vec<Record>, ReconError> {
        Ok(self.rows()?.into_iter().map(|r| r.record).collect())
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }

    fn insert_plain(&self, records: &[Record]) -> Result<usize, ReconError> {
        let mut stmt = self
            .conn
            .prepare(&self.insert_sql())
            .map_err(ReconError::storage)?;
        for record in records {
            self.check_width(record)?;
            stmt.execute(params_from_iter(record.values()))
                .map_err(ReconError::storage)?;
        }
        Ok(records.len())
    }

    fn check_width(&self, record: &Record) -> Result<(), ReconError> {
        if record.len() != self.schema.width() {
            return Err(ReconError::StorageFailure(format!(
                "record has {} fields, table '{}' has {}",
                record.len(),
                self.table,
                self.schema.width()
            )));
        }
        Ok(())
    }

    /// Physical index name backing constraint `name` on this table.
    pub fn index_name(&self, name: &str) -> String {
        format!("{}__{name}", self.table)
    }

    fn column_list(&self) -> String {
        self.schema
            .columns()
            .iter()
            .map(|c| quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn insert_sql(&self) -> String {
        let placeholders: Vec<String> =
            (1..=self.schema.width()).map(|i| format!("?{i}")).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(&self.table),
            self.column_list(),
            placeholders.join(", ")
        )
    }

    fn upsert_sql(&self) -> String {
        let key = quote(self.schema.key_column());
        let assignments: Vec<String> = self
            .schema
            .columns()
            .iter()
            .filter(|c| c.as_str() != self.schema.key_column())
            .map(|c| format!("{0} = excluded.{0}", quote(c)))
            .collect();
        let action = if assignments.is_empty() {
            "DO NOTHING".to_string()
        } else {
            format!("DO UPDATE SET {}", assignments.join(", "))
        };
        format!("{} ON CONFLICT({key}) {action}", self.insert_sql())
    }
}

impl BaseStore for SqliteBase {
    fn schema(&self) -> Result<Schema, ReconError> {
        Ok(self.schema.clone())
    }

    fn count(&self) -> Result<usize, ReconError> {
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", quote(&self.table)), [], |row| {
                row.get(0)
            })
            .map_err(ReconError::storage)?;
        Ok(n as usize)
    }

    fn rows(&self) -> Result<Vec<StoredRecord>, ReconError> {
        let sql = format!(
            "SELECT {}, {} FROM {} ORDER BY {}",
            quote(SEQ_COLUMN),
            self.column_list(),
            quote(&self.table),
            quote(SEQ_COLUMN)
        );
        let width = self.schema.width();
        let mut stmt = self.conn.prepare(&sql).map_err(ReconError::storage)?;
        let rows = stmt
            .query_map([], |row| {
                let seq: i64 = row.get(0)?;
                let mut values = Vec::with_capacity(width);
                for i in 0..width {
                    values.push(row.get::<_, String>(i + 1)?);
                }
                Ok(StoredRecord {
                    seq: seq as u64,
                    record: Record::new(values),
                })
            })
            .map_err(ReconError::storage)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(ReconError::storage)?;
        Ok(rows)
    }

    fn contains_key(&self, key: &str) -> Result<bool, ReconError> {
        let sql = format!(
            "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
            quote(&self.table),
            quote(self.schema.key_column())
        );
        let mut stmt = self.conn.prepare_cached(&sql).map_err(ReconError::storage)?;
        let found = stmt
            .query_row(params![key], |_| Ok(()))
            .optional()
            .map_err(ReconError::storage)?;
        Ok(found.is_some())
    }

    fn delete_seqs(&mut self, seqs: &[u64]) -> Result<usize, ReconError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?1",
            quote(&self.table),
            quote(SEQ_COLUMN)
        );
        let mut stmt = self.conn.prepare_cached(&sql).map_err(ReconError::storage)?;
        let mut removed = 0;
        for seq in seqs {
            removed += stmt
                .execute(params![*seq as i64])
                .map_err(ReconError::storage)?;
        }
        Ok(removed)
    }

    fn has_constraint(&self, name: &str) -> Result<bool, ReconError> {
        let n: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master \
                 WHERE type = 'index' AND name = ?1 AND tbl_name = ?2",
                params![self.index_name(name), self.table],
                |row| row.get(0),
            )
            .map_err(ReconError::storage)?;
        Ok(n > 0)
    }

    fn drop_constraint(&mut self, name: &str) -> Result<bool, ReconError> {
        if !self.has_constraint(name)? {
            return Ok(false);
        }
        self.conn
            .execute_batch(&format!("DROP INDEX {}", quote(&self.index_name(name))))
            .map_err(ReconError::storage)?;
        Ok(true)
    }

    fn add_unique_constraint(&mut self, name: &str) -> Result<(), ReconError> {
        let key = quote(self.schema.key_column());
        let duplicate: Option<(String, i64)> = self
            .conn
            .query_row(
                &format!(
                    "SELECT {key}, COUNT(*) FROM {} GROUP BY {key} \
                     HAVING COUNT(*) > 1 ORDER BY {key} LIMIT 1",
                    quote(&self.table)
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(ReconError::storage)?;

        if let Some((key, count)) = duplicate {
            return Err(ReconError::ConstraintViolation {
                constraint: name.to_string(),
                key,
                count: count as usize,
            });
        }

        self.conn
            .execute_batch(&format!(
                "CREATE UNIQUE INDEX {} ON {} ({key})",
                quote(&self.index_name(name)),
                quote(&self.table)
            ))
            .map_err(ReconError::storage)?;
        Ok(())
    }

    fn upsert_batch(&mut self, records: &[Record]) -> Result<(), ReconError> {
        let mut stmt = self
            .conn
            .prepare(&self.upsert_sql())
            .map_err(ReconError::storage)?;
        for record in records {
            self.check_width(record)?;
            stmt.execute(params_from_iter(record.values()))
                .map_err(ReconError::storage)?;
        }
        Ok(())
    }

    fn begin(&mut self) -> Result<(), ReconError> {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(ReconError::storage)
    }

    fn commit(&mut self) -> Result<(), ReconError> {
        self.conn.execute_batch("COMMIT").map_err(ReconError::storage)
    }

    fn rollback(&mut self) -> Result<(), ReconError> {
        self.conn.execute_batch("ROLLBACK").map_err(ReconError::storage)
    }
}

/// Quote an SQL identifier.
fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
