use super::traits::TableStore;
use super::check_batch;
use crate::error::{PipelineError, Result};
use crate::types::RecordBatch;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// In-memory table store for development/testing
#[derive(Default)]
pub struct InMemoryTableStore {
    tables: Arc<Mutex<HashMap<String, RecordBatch>>>,
    failing: Mutex<HashSet<String>>,
    writes: Mutex<Vec<String>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write to `table` fail with a load error.
    pub fn fail_on(&self, table: &str) {
        lock(&self.failing).insert(table.to_string());
    }

    /// Tables written so far, in write order.
    pub fn writes(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }

    pub fn table(&self, table: &str) -> Option<RecordBatch> {
        lock(&self.tables).get(table).cloned()
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn replace_table(&self, table: &str, batch: &RecordBatch) -> Result<u64> {
        check_batch(table, batch)?;
        if lock(&self.failing).contains(table) {
            return Err(PipelineError::load(table, "injected failure"));
        }

        lock(&self.tables).insert(table.to_string(), batch.clone());
        lock(&self.writes).push(table.to_string());

        debug!("Replaced table {} with {} rows", table, batch.len());
        Ok(batch.len() as u64)
    }

    async fn read_table(&self, table: &str) -> Result<RecordBatch> {
        self.table(table)
            .ok_or_else(|| PipelineError::load(table, "no such table"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, ColumnType, SqlValue};

    #[tokio::test]
    async fn replace_overwrites_previous_contents() {
        let store = InMemoryTableStore::new();
        let mut first = RecordBatch::new(vec![Column::new("id", ColumnType::Text)]);
        first.rows = vec![vec![SqlValue::Text("a".into())], vec![SqlValue::Text("b".into())]];
        let mut second = RecordBatch::new(vec![Column::new("id", ColumnType::Text)]);
        second.rows = vec![vec![SqlValue::Text("c".into())]];

        store.replace_table("t", &first).await.unwrap();
        store.replace_table("t", &second).await.unwrap();

        assert_eq!(store.read_table("t").await.unwrap(), second);
        assert_eq!(store.writes(), vec!["t", "t"]);
    }

    #[tokio::test]
    async fn injected_failure_names_the_table() {
        let store = InMemoryTableStore::new();
        store.fail_on("edges");
        let batch = RecordBatch::new(vec![Column::new("id", ColumnType::Text)]);
        let err = store.replace_table("edges", &batch).await.unwrap_err();
        assert!(matches!(err, PipelineError::Load { ref table, .. } if table == "edges"));
        assert!(store.table("edges").is_none());
    }
}
