use crate::error::{PipelineError, Result};
use crate::types::Cell;
use calamine::{open_workbook_auto, Data, Reader};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Physical rows of one worksheet, anchored at A1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetGrid {
    rows: Vec<Vec<Cell>>,
}

impl SheetGrid {
    pub fn new(rows: Vec<Vec<Cell>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&[Cell]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Read access to a multi-sheet workbook.
pub trait WorkbookSource: Send + Sync {
    /// Human-readable location used in error messages (usually the file path).
    fn location(&self) -> &str;

    fn read_sheet(&self, sheet: &str) -> Result<SheetGrid>;
}

/// Workbook on disk, read with calamine (xlsx, xlsm, xls, ods).
pub struct CalamineWorkbook {
    path: PathBuf,
    location: String,
}

impl CalamineWorkbook {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let location = path.display().to_string();
        Self { path, location }
    }
}

impl WorkbookSource for CalamineWorkbook {
    fn location(&self) -> &str {
        &self.location
    }

    fn read_sheet(&self, sheet: &str) -> Result<SheetGrid> {
        if !self.path.is_file() {
            return Err(PipelineError::extraction(
                &self.location,
                sheet,
                "workbook file does not exist",
            ));
        }
        let mut workbook = open_workbook_auto(&self.path).map_err(|e| {
            PipelineError::extraction(&self.location, sheet, format!("cannot open workbook: {e}"))
        })?;

        let available = workbook.sheet_names();
        if !available.iter().any(|name| name == sheet) {
            return Err(PipelineError::extraction(
                &self.location,
                sheet,
                format!("sheet not found (available: {})", available.join(", ")),
            ));
        }

        let range = workbook.worksheet_range(sheet).map_err(|e| {
            PipelineError::extraction(&self.location, sheet, format!("cannot read sheet: {e}"))
        })?;

        // calamine ranges start at the first used cell; pad back to A1 so row and column
        // indexes are physical positions.
        let (row_offset, col_offset) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));
        let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_offset];
        for source_row in range.rows() {
            let mut row = vec![Cell::Empty; col_offset];
            row.extend(source_row.iter().map(cell_from_data));
            rows.push(row);
        }
        debug!(sheet, rows = rows.len(), "read worksheet");
        Ok(SheetGrid::new(rows))
    }
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::Int(v) => Cell::Int(*v),
        Data::Float(v) => Cell::Float(*v),
        Data::Bool(v) => Cell::Bool(*v),
        Data::String(s) => Cell::Text(s.clone()),
        other => Cell::Text(other.to_string()),
    }
}

/// Workbook held in memory; used by tests and by callers that already parsed a sheet.
#[derive(Default)]
pub struct InMemoryWorkbook {
    location: String,
    sheets: HashMap<String, SheetGrid>,
    reads: AtomicUsize,
}

impl InMemoryWorkbook {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            ..Self::default()
        }
    }

    pub fn with_sheet(mut self, name: &str, rows: Vec<Vec<Cell>>) -> Self {
        self.sheets.insert(name.to_string(), SheetGrid::new(rows));
        self
    }

    /// Number of `read_sheet` calls served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl WorkbookSource for InMemoryWorkbook {
    fn location(&self) -> &str {
        &self.location
    }

    fn read_sheet(&self, sheet: &str) -> Result<SheetGrid> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.sheets.get(sheet).cloned().ok_or_else(|| {
            PipelineError::extraction(&self.location, sheet, "sheet not found")
        })
    }
}
