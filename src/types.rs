use crate::constants::{
    DEFAULT_EDGE_WEIGHT, EXTERNAL_ID_COLUMN, FROM_NODE_COLUMN, NAME_COLUMN, NUMERIC_ID_COLUMN,
    TO_NODE_COLUMN, WEIGHT_COLUMN,
};
use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// A single spreadsheet cell, independent of the workbook reader.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    /// Empty cells and whitespace-only text.
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Loose numeric equality with 1: integer 1, float 1.0 or boolean true.
    /// Text never matches, even "1".
    pub fn is_one(&self) -> bool {
        match self {
            Cell::Int(v) => *v == 1,
            Cell::Float(v) => *v == 1.0,
            Cell::Bool(v) => *v,
            Cell::Empty | Cell::Text(_) => false,
        }
    }

    /// Identifier form of the cell. Integral floats lose their `.0` so that an id typed
    /// as a number in the sheet matches the same id typed as text.
    pub fn as_identifier(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Int(v) => Some(v.to_string()),
            Cell::Float(v) => Some(match integral(*v) {
                Some(i) => i.to_string(),
                None => v.to_string(),
            }),
            Cell::Bool(v) => Some(v.to_string()),
            Cell::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            }
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Cell::Int(v) => Some(*v),
            Cell::Float(v) => integral(*v),
            Cell::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// `v` as an i64 when it is a whole number inside the i64 range; `as` would saturate.
fn integral(v: f64) -> Option<i64> {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0; // 2^63
    (v.is_finite() && v.fract() == 0.0 && v >= -LIMIT && v < LIMIT).then(|| v as i64)
}

/// One participant of the relationship graph, as read from the entity sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub numeric_id: i64,
    pub external_id: String,
    pub name: String,
}

/// A data row of the adjacency sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRow {
    pub numeric_id: Option<i64>,
    pub external_id: String,
    pub cells: Vec<Cell>,
}

/// Rectangular adjacency matrix. `columns` holds the entity ids heading each data column;
/// every row carries exactly one cell per column.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AdjacencyGrid {
    columns: Vec<String>,
    rows: Vec<GridRow>,
}

impl AdjacencyGrid {
    pub fn new(columns: Vec<String>, rows: Vec<GridRow>) -> Result<Self> {
        if let Some(row) = rows.iter().find(|r| r.cells.len() != columns.len()) {
            return Err(PipelineError::Transformation(format!(
                "row '{}' has {} cells but the grid has {} entity columns",
                row.external_id,
                row.cells.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[GridRow] {
        &self.rows
    }

    pub fn cell_count(&self) -> usize {
        self.columns.len() * self.rows.len()
    }
}

/// A directed relationship derived from a `1`-valued grid cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from_node_id: String,
    pub to_node_id: String,
    pub weight: String,
}

impl EdgeRecord {
    pub fn new(from: &str, to: &str) -> Self {
        Self {
            from_node_id: from.to_string(),
            to_node_id: to.to_string(),
            weight: DEFAULT_EDGE_WEIGHT.to_string(),
        }
    }
}

/// Columnar edge list filled directly by the transformer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EdgeList {
    from_node_ids: Vec<String>,
    to_node_ids: Vec<String>,
    weights: Vec<String>,
}

impl EdgeList {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            from_node_ids: Vec::with_capacity(capacity),
            to_node_ids: Vec::with_capacity(capacity),
            weights: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, from: &str, to: &str, weight: &str) {
        self.from_node_ids.push(from.to_string());
        self.to_node_ids.push(to.to_string());
        self.weights.push(weight.to_string());
    }

    pub fn len(&self) -> usize {
        self.from_node_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.from_node_ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = EdgeRecord> + '_ {
        self.from_node_ids
            .iter()
            .zip(&self.to_node_ids)
            .zip(&self.weights)
            .map(|((from, to), weight)| EdgeRecord {
                from_node_id: from.clone(),
                to_node_id: to.clone(),
                weight: weight.clone(),
            })
    }

    pub fn to_records(&self) -> Vec<EdgeRecord> {
        self.iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Integer,
    Text,
}

impl ColumnType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
}

/// Row-major table handed to a [`crate::storage::TableStore`]; column order is preserved
/// in the destination.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordBatch {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RecordBatch {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn from_entities(entities: &[EntityRecord]) -> Self {
        let mut batch = Self::new(vec![
            Column::new(NUMERIC_ID_COLUMN, ColumnType::Integer),
            Column::new(EXTERNAL_ID_COLUMN, ColumnType::Text),
            Column::new(NAME_COLUMN, ColumnType::Text),
        ]);
        batch.rows = entities
            .iter()
            .map(|e| {
                vec![
                    SqlValue::Integer(e.numeric_id),
                    SqlValue::Text(e.external_id.clone()),
                    SqlValue::Text(e.name.clone()),
                ]
            })
            .collect();
        batch
    }

    pub fn from_edges(edges: &EdgeList) -> Self {
        let mut batch = Self::new(vec![
            Column::new(FROM_NODE_COLUMN, ColumnType::Text),
            Column::new(TO_NODE_COLUMN, ColumnType::Text),
            Column::new(WEIGHT_COLUMN, ColumnType::Text),
        ]);
        batch.rows = edges
            .iter()
            .map(|e| {
                vec![
                    SqlValue::Text(e.from_node_id),
                    SqlValue::Text(e.to_node_id),
                    SqlValue::Text(e.weight),
                ]
            })
            .collect();
        batch
    }
}
