// Destination stores: full-replace table loads

pub mod in_memory;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod sqlite;
pub mod traits;
#[cfg(feature = "db")]
pub mod turso;

pub use in_memory::InMemoryTableStore;
#[cfg(feature = "mysql")]
pub use mysql::MySqlTableStore;
#[cfg(feature = "db")]
pub use turso::LibsqlTableStore;
pub use sqlite::SqliteTableStore;
pub use traits::TableStore;

use crate::error::{PipelineError, Result};
use crate::types::{ColumnType, RecordBatch};

/// Double-quoted SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub(crate) fn check_batch(table: &str, batch: &RecordBatch) -> Result<()> {
    if table.trim().is_empty() {
        return Err(PipelineError::load(table, "table name is empty"));
    }
    if batch.columns.is_empty() {
        return Err(PipelineError::load(table, "batch has no columns"));
    }
    if let Some(column) = batch.columns.iter().find(|c| c.name.trim().is_empty()) {
        return Err(PipelineError::load(
            table,
            format!("column name '{}' is empty", column.name),
        ));
    }
    if let Some((i, row)) = batch
        .rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != batch.columns.len())
    {
        return Err(PipelineError::load(
            table,
            format!(
                "row {} has {} values for {} columns",
                i,
                row.len(),
                batch.columns.len()
            ),
        ));
    }
    Ok(())
}

/// DROP + CREATE statements for a full replace, columns in batch order.
pub(crate) fn recreate_table_sql(table: &str, batch: &RecordBatch) -> String {
    let columns = batch
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_type()))
        .collect::<Vec<_>>()
        .join(", ");
    let table = quote_ident(table);
    format!("DROP TABLE IF EXISTS {table};\nCREATE TABLE {table} ({columns});")
}

pub(crate) fn insert_sql(table: &str, batch: &RecordBatch) -> String {
    let names = batch
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=batch.columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(table),
        names,
        placeholders
    )
}

/// Maps a declared SQLite column type back to ours; anything not integer is read as text.
pub(crate) fn column_type_from_decl(decl: &str) -> ColumnType {
    if decl.to_ascii_uppercase().contains("INT") {
        ColumnType::Integer
    } else {
        ColumnType::Text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, SqlValue};

    fn batch() -> RecordBatch {
        let mut batch = RecordBatch::new(vec![
            Column::new("numeric_id", ColumnType::Integer),
            Column::new("we\"ird", ColumnType::Text),
        ]);
        batch.rows.push(vec![SqlValue::Integer(1), SqlValue::Text("a".into())]);
        batch
    }

    #[test]
    fn statements_quote_identifiers() {
        let b = batch();
        assert_eq!(
            recreate_table_sql("edges", &b),
            "DROP TABLE IF EXISTS \"edges\";\nCREATE TABLE \"edges\" (\"numeric_id\" INTEGER, \"we\"\"ird\" TEXT);"
        );
        assert_eq!(
            insert_sql("edges", &b),
            "INSERT INTO \"edges\" (\"numeric_id\", \"we\"\"ird\") VALUES (?1, ?2)"
        );
    }

    #[test]
    fn ragged_batch_is_rejected() {
        let mut b = batch();
        b.rows.push(vec![SqlValue::Null]);
        let err = check_batch("edges", &b).unwrap_err();
        assert!(matches!(err, PipelineError::Load { ref table, .. } if table == "edges"));
    }
}
