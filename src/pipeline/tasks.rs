use super::extract::{EntityExtractor, MatrixExtractor};
use super::orchestrator::RunContext;
use super::transform::{MatrixToEdgeListTransformer, TransformReport};
use crate::error::{PipelineError, Result};
use crate::types::{AdjacencyGrid, EdgeList, EntityRecord, RecordBatch};
use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use std::fmt;
use tracing::info;

/// Named data handed from one task to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Slot {
    Entities,
    Grid,
    Edges,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Slot::Entities => "entities",
            Slot::Grid => "grid",
            Slot::Edges => "edges",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceSheet {
    Entities,
    Matrix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    Entities,
    Edges,
}

/// What a task is doing, as reported in the run's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "stage", content = "of")]
pub enum Stage {
    Extracting(SourceSheet),
    Transforming,
    Loading(Destination),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extracting(SourceSheet::Entities) => f.write_str("extracting(entities)"),
            Stage::Extracting(SourceSheet::Matrix) => f.write_str("extracting(matrix)"),
            Stage::Transforming => f.write_str("transforming"),
            Stage::Loading(Destination::Entities) => f.write_str("loading(entities)"),
            Stage::Loading(Destination::Edges) => f.write_str("loading(edges)"),
        }
    }
}

/// Outputs produced so far in a run, keyed by slot.
#[derive(Debug, Default)]
pub struct Artifacts {
    entities: Option<Vec<EntityRecord>>,
    grid: Option<AdjacencyGrid>,
    edges: Option<EdgeList>,
    pub transform_report: Option<TransformReport>,
}

fn missing(slot: Slot) -> PipelineError {
    PipelineError::Configuration(format!("input '{slot}' was not produced by any earlier task"))
}

impl Artifacts {
    pub fn contains(&self, slot: Slot) -> bool {
        match slot {
            Slot::Entities => self.entities.is_some(),
            Slot::Grid => self.grid.is_some(),
            Slot::Edges => self.edges.is_some(),
        }
    }

    pub fn entities(&self) -> Result<&[EntityRecord]> {
        self.entities.as_deref().ok_or_else(|| missing(Slot::Entities))
    }

    pub fn grid(&self) -> Result<&AdjacencyGrid> {
        self.grid.as_ref().ok_or_else(|| missing(Slot::Grid))
    }

    pub fn edges(&self) -> Result<&EdgeList> {
        self.edges.as_ref().ok_or_else(|| missing(Slot::Edges))
    }

    pub fn put_entities(&mut self, entities: Vec<EntityRecord>) {
        self.entities = Some(entities);
    }

    pub fn put_grid(&mut self, grid: AdjacencyGrid) {
        self.grid = Some(grid);
    }

    pub fn put_edges(&mut self, edges: EdgeList) {
        self.edges = Some(edges);
    }

    pub fn into_parts(self) -> (Option<Vec<EntityRecord>>, Option<EdgeList>) {
        (self.entities, self.edges)
    }
}

/// One node of the pipeline graph: declared inputs and outputs plus the work itself.
#[async_trait]
pub trait Task: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> Stage;

    fn inputs(&self) -> &'static [Slot];

    fn outputs(&self) -> &'static [Slot];

    /// Runs the task, reading its inputs from and writing its outputs to `artifacts`.
    /// Returns the number of rows produced or written.
    async fn run(&self, ctx: &RunContext, artifacts: &mut Artifacts) -> Result<usize>;
}

pub struct ExtractEntitiesTask {
    pub extractor: EntityExtractor,
}

#[async_trait]
impl Task for ExtractEntitiesTask {
    fn name(&self) -> &'static str {
        "extract_entities"
    }

    fn stage(&self) -> Stage {
        Stage::Extracting(SourceSheet::Entities)
    }

    fn inputs(&self) -> &'static [Slot] {
        &[]
    }

    fn outputs(&self) -> &'static [Slot] {
        &[Slot::Entities]
    }

    async fn run(&self, ctx: &RunContext, artifacts: &mut Artifacts) -> Result<usize> {
        let resources = ctx.resources();
        let entities = self
            .extractor
            .extract(resources.workbook.as_ref(), &resources.file)?;
        let count = entities.len();
        artifacts.put_entities(entities);
        Ok(count)
    }
}

pub struct ExtractMatrixTask {
    pub extractor: MatrixExtractor,
}

#[async_trait]
impl Task for ExtractMatrixTask {
    fn name(&self) -> &'static str {
        "extract_matrix"
    }

    fn stage(&self) -> Stage {
        Stage::Extracting(SourceSheet::Matrix)
    }

    fn inputs(&self) -> &'static [Slot] {
        &[]
    }

    fn outputs(&self) -> &'static [Slot] {
        &[Slot::Grid]
    }

    async fn run(&self, ctx: &RunContext, artifacts: &mut Artifacts) -> Result<usize> {
        let resources = ctx.resources();
        let grid = self
            .extractor
            .extract(resources.workbook.as_ref(), &resources.file)?;
        let count = grid.rows().len();
        artifacts.put_grid(grid);
        Ok(count)
    }
}

pub struct TransformMatrixTask {
    pub transformer: MatrixToEdgeListTransformer,
}

#[async_trait]
impl Task for TransformMatrixTask {
    fn name(&self) -> &'static str {
        "transform_matrix"
    }

    fn stage(&self) -> Stage {
        Stage::Transforming
    }

    fn inputs(&self) -> &'static [Slot] {
        &[Slot::Grid]
    }

    fn outputs(&self) -> &'static [Slot] {
        &[Slot::Edges]
    }

    async fn run(&self, _ctx: &RunContext, artifacts: &mut Artifacts) -> Result<usize> {
        let (edges, report) = self.transformer.transform(artifacts.grid()?)?;
        let count = edges.len();
        artifacts.put_edges(edges);
        artifacts.transform_report = Some(report);
        Ok(count)
    }
}

async fn load(ctx: &RunContext, table: &str, batch: RecordBatch) -> Result<usize> {
    let store = ctx.resources().store()?;
    info!("Loading {} rows into {} ({})", batch.len(), table, store.backend());
    let written = store.replace_table(table, &batch).await?;
    counter!("pipeline_rows_loaded_total", "table" => table.to_string()).increment(written);
    info!("{} data loaded successfully", table);
    Ok(written as usize)
}

pub struct LoadEntitiesTask {
    pub table: String,
}

#[async_trait]
impl Task for LoadEntitiesTask {
    fn name(&self) -> &'static str {
        "load_entities"
    }

    fn stage(&self) -> Stage {
        Stage::Loading(Destination::Entities)
    }

    fn inputs(&self) -> &'static [Slot] {
        &[Slot::Entities]
    }

    fn outputs(&self) -> &'static [Slot] {
        &[]
    }

    async fn run(&self, ctx: &RunContext, artifacts: &mut Artifacts) -> Result<usize> {
        let batch = RecordBatch::from_entities(artifacts.entities()?);
        load(ctx, &self.table, batch).await
    }
}

pub struct LoadEdgesTask {
    pub table: String,
}

#[async_trait]
impl Task for LoadEdgesTask {
    fn name(&self) -> &'static str {
        "load_edges"
    }

    fn stage(&self) -> Stage {
        Stage::Loading(Destination::Edges)
    }

    fn inputs(&self) -> &'static [Slot] {
        &[Slot::Edges]
    }

    fn outputs(&self) -> &'static [Slot] {
        &[]
    }

    async fn run(&self, ctx: &RunContext, artifacts: &mut Artifacts) -> Result<usize> {
        let batch = RecordBatch::from_edges(artifacts.edges()?);
        load(ctx, &self.table, batch).await
    }
}
