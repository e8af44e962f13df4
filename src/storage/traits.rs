use crate::error::Result;
use crate::types::RecordBatch;
use async_trait::async_trait;

/// Destination of table loads. Implementations must be shareable across the load tasks of
/// a run; each `replace_table` call is its own transaction.
#[async_trait]
pub trait TableStore: Send + Sync {
    /// Short backend label for logs ("sqlite", "libsql", "memory").
    fn backend(&self) -> &'static str;

    /// Drops `table` if present, recreates it with the batch's columns (same names, same
    /// order, no index column) and inserts every row. Returns the number of rows written.
    async fn replace_table(&self, table: &str, batch: &RecordBatch) -> Result<u64>;

    /// Current contents of `table` in insertion order.
    async fn read_table(&self, table: &str) -> Result<RecordBatch>;
}
