use crate::constants::{ADJACENCY_HEADER_ROW, ENTITY_SHEET_SKIP_ROWS};
use crate::error::{PipelineError, Result};
use crate::resources::FileResource;
use crate::types::{AdjacencyGrid, Cell, EntityRecord, GridRow};
use crate::workbook::{SheetGrid, WorkbookSource};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

static EMPTY: Cell = Cell::Empty;

fn cell(row: &[Cell], index: usize) -> &Cell {
    row.get(index).unwrap_or(&EMPTY)
}

/// Reads the entity sheet. The sheet has no header row of its own: the first
/// `skip_rows` rows are a banner and the three columns are named positionally.
#[derive(Debug, Clone)]
pub struct EntityExtractor {
    skip_rows: usize,
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self {
            skip_rows: ENTITY_SHEET_SKIP_ROWS,
        }
    }
}

impl EntityExtractor {
    pub fn new(skip_rows: usize) -> Self {
        Self { skip_rows }
    }

    pub fn extract(
        &self,
        workbook: &dyn WorkbookSource,
        file: &FileResource,
    ) -> Result<Vec<EntityRecord>> {
        let sheet = file.entity_sheet_name();
        info!("Reading {} sheet from {}", sheet, workbook.location());
        let grid = workbook.read_sheet(sheet)?;
        let entities = self.parse(&grid, workbook.location(), sheet)?;
        info!(sheet, entities = entities.len(), "entity sheet extracted");
        Ok(entities)
    }

    pub fn parse(&self, grid: &SheetGrid, file: &str, sheet: &str) -> Result<Vec<EntityRecord>> {
        let mut entities = Vec::new();
        let mut first_seen: HashMap<String, usize> = HashMap::new();

        for (index, row) in grid.rows().iter().enumerate().skip(self.skip_rows) {
            let sheet_row = index + 1;
            let (id_cell, external_cell, name_cell) = (cell(row, 0), cell(row, 1), cell(row, 2));
            if id_cell.is_blank() && external_cell.is_blank() && name_cell.is_blank() {
                continue;
            }

            let external_id = external_cell.as_identifier().ok_or_else(|| {
                PipelineError::extraction(file, sheet, format!("row {sheet_row}: external_id is blank"))
            })?;
            let Some(numeric_id) = id_cell.as_integer() else {
                warn!(
                    row = sheet_row,
                    external_id = %external_id,
                    numeric_id = ?id_cell,
                    "entity row has no integer numeric_id; row skipped"
                );
                continue;
            };
            if let Some(previous) = first_seen.insert(external_id.clone(), sheet_row) {
                return Err(PipelineError::extraction(
                    file,
                    sheet,
                    format!("duplicate external_id '{external_id}' on rows {previous} and {sheet_row}"),
                ));
            }

            entities.push(EntityRecord {
                numeric_id,
                external_id,
                name: name_cell.as_identifier().unwrap_or_default(),
            });
        }
        Ok(entities)
    }
}

/// Reads the adjacency sheet. Physical row `header_row` carries the entity ids heading each
/// data column; the two leading columns are the row's numeric id and external id.
#[derive(Debug, Clone)]
pub struct MatrixExtractor {
    header_row: usize,
}

impl Default for MatrixExtractor {
    fn default() -> Self {
        Self {
            header_row: ADJACENCY_HEADER_ROW,
        }
    }
}

impl MatrixExtractor {
    pub fn new(header_row: usize) -> Self {
        Self { header_row }
    }

    pub fn extract(
        &self,
        workbook: &dyn WorkbookSource,
        file: &FileResource,
    ) -> Result<AdjacencyGrid> {
        let sheet = file.adjacency_sheet_name();
        info!("Reading {} sheet from {}", sheet, workbook.location());
        let grid = workbook.read_sheet(sheet)?;
        let adjacency = self.parse(&grid, workbook.location(), sheet)?;
        info!(
            sheet,
            rows = adjacency.rows().len(),
            columns = adjacency.columns().len(),
            "adjacency sheet extracted"
        );
        Ok(adjacency)
    }

    pub fn parse(&self, grid: &SheetGrid, file: &str, sheet: &str) -> Result<AdjacencyGrid> {
        let header = grid.row(self.header_row).ok_or_else(|| {
            PipelineError::extraction(
                file,
                sheet,
                format!("sheet has no header row (expected at row {})", self.header_row + 1),
            )
        })?;
        let data_rows = grid.rows().get(self.header_row + 1..).unwrap_or(&[]);

        // (physical column index, entity id) for every usable data column
        let mut columns: Vec<(usize, String)> = Vec::new();
        let mut labels: HashSet<String> = HashSet::new();
        let width = grid.rows().iter().map(Vec::len).max().unwrap_or(0);
        for index in 2..width {
            match cell(header, index).as_identifier() {
                Some(id) => {
                    if !labels.insert(id.clone()) {
                        warn!(column = index + 1, entity = %id, "duplicate adjacency column header");
                    }
                    columns.push((index, id));
                }
                None => {
                    if data_rows.iter().any(|row| !cell(row, index).is_blank()) {
                        warn!(column = index + 1, "adjacency column has no header; column skipped");
                    }
                }
            }
        }

        let mut rows = Vec::with_capacity(data_rows.len());
        for (offset, row) in data_rows.iter().enumerate() {
            let sheet_row = self.header_row + offset + 2;
            let Some(external_id) = cell(row, 1).as_identifier() else {
                if row.iter().any(|c| !c.is_blank()) {
                    warn!(row = sheet_row, "adjacency row has no external_id; row skipped");
                }
                continue;
            };
            rows.push(GridRow {
                numeric_id: cell(row, 0).as_integer(),
                external_id,
                cells: columns.iter().map(|(i, _)| cell(row, *i).clone()).collect(),
            });
        }

        AdjacencyGrid::new(columns.into_iter().map(|(_, id)| id).collect(), rows)
    }
}
