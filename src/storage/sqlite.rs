use super::traits::TableStore;
use super::{check_batch, column_type_from_decl, insert_sql, quote_ident, recreate_table_sql};
use crate::error::{PipelineError, Result};
use crate::types::{Column, RecordBatch, SqlValue};
use async_trait::async_trait;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params, params_from_iter, Connection};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// SQLite database file as destination. A connection is opened per call on the blocking
/// pool, so the store itself is just a path and is freely shareable.
#[derive(Debug, Clone)]
pub struct SqliteTableStore {
    path: PathBuf,
}

impl SqliteTableStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn to_sql(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(v) => Value::Integer(*v),
        SqlValue::Text(s) => Value::Text(s.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::Integer(v),
        ValueRef::Real(v) => SqlValue::Text(v.to_string()),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn replace_blocking(path: &Path, table: &str, batch: &RecordBatch) -> rusqlite::Result<u64> {
    let mut conn = Connection::open(path)?;
    let tx = conn.transaction()?;
    tx.execute_batch(&recreate_table_sql(table, batch))?;
    let mut written = 0u64;
    {
        let mut stmt = tx.prepare(&insert_sql(table, batch))?;
        for row in &batch.rows {
            written += stmt.execute(params_from_iter(row.iter().map(to_sql)))? as u64;
        }
    }
    tx.commit()?;
    Ok(written)
}

fn read_blocking(path: &Path, table: &str) -> std::result::Result<RecordBatch, String> {
    let conn = Connection::open(path).map_err(|e| e.to_string())?;

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote_ident(table)))
        .map_err(|e| e.to_string())?;
    let columns = stmt
        .query_map(params![], |row| {
            let name: String = row.get(1)?;
            let decl: String = row.get(2)?;
            Ok(Column {
                name,
                column_type: column_type_from_decl(&decl),
            })
        })
        .map_err(|e| e.to_string())?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| e.to_string())?;
    if columns.is_empty() {
        return Err("no such table".to_string());
    }

    let select = format!(
        "SELECT {} FROM {} ORDER BY rowid",
        columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", "),
        quote_ident(table)
    );
    let width = columns.len();
    let mut stmt = conn.prepare(&select).map_err(|e| e.to_string())?;
    let rows = stmt
        .query_map(params![], |row| {
            (0..width)
                .map(|i| row.get_ref(i).map(from_sql))
                .collect::<rusqlite::Result<Vec<_>>>()
        })
        .map_err(|e| e.to_string())?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| e.to_string())?;

    Ok(RecordBatch { columns, rows })
}

#[async_trait]
impl TableStore for SqliteTableStore {
    fn backend(&self) -> &'static str {
        "sqlite"
    }

    async fn replace_table(&self, table: &str, batch: &RecordBatch) -> Result<u64> {
        check_batch(table, batch)?;
        let path = self.path.clone();
        let owned_table = table.to_string();
        let owned_batch = batch.clone();

        let written = tokio::task::spawn_blocking(move || {
            replace_blocking(&path, &owned_table, &owned_batch)
        })
        .await
        .map_err(|e| PipelineError::load(table, e))?
        .map_err(|e| PipelineError::load(table, e))?;

        info!(table, rows = written, path = %self.path.display(), "replaced sqlite table");
        Ok(written)
    }

    async fn read_table(&self, table: &str) -> Result<RecordBatch> {
        let path = self.path.clone();
        let owned_table = table.to_string();
        let batch = tokio::task::spawn_blocking(move || read_blocking(&path, &owned_table))
            .await
            .map_err(|e| PipelineError::load(table, e))?
            .map_err(|e| PipelineError::load(table, e))?;
        debug!(table, rows = batch.len(), "read sqlite table");
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    fn people(names: &[&str]) -> RecordBatch {
        let mut batch = RecordBatch::new(vec![
            Column::new("numeric_id", ColumnType::Integer),
            Column::new("name", ColumnType::Text),
        ]);
        batch.rows = names
            .iter()
            .enumerate()
            .map(|(i, n)| vec![SqlValue::Integer(i as i64 + 1), SqlValue::Text(n.to_string())])
            .collect();
        batch
    }

    #[tokio::test]
    async fn replace_is_a_full_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTableStore::new(dir.path().join("dest.db"));

        assert_eq!(store.replace_table("entities", &people(&["a", "b", "c"])).await.unwrap(), 3);
        assert_eq!(store.replace_table("entities", &people(&["z"])).await.unwrap(), 1);

        let read = store.read_table("entities").await.unwrap();
        assert_eq!(read, people(&["z"]));
    }

    #[tokio::test]
    async fn empty_batch_still_creates_the_table() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTableStore::new(dir.path().join("dest.db"));
        store.replace_table("edges", &people(&[])).await.unwrap();
        let read = store.read_table("edges").await.unwrap();
        assert!(read.is_empty());
        assert_eq!(read.column_names(), vec!["numeric_id", "name"]);
    }

    #[tokio::test]
    async fn unreachable_database_surfaces_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTableStore::new(dir.path().join("missing/dir/dest.db"));
        let err = store.replace_table("edges", &people(&["a"])).await.unwrap_err();
        assert!(matches!(err, PipelineError::Load { ref table, .. } if table == "edges"));
    }

    #[tokio::test]
    async fn reading_unknown_table_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteTableStore::new(dir.path().join("dest.db"));
        assert!(store.read_table("nothing").await.is_err());
    }
}
