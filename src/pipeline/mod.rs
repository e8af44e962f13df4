// Extract → transform → load, driven by a static task graph

pub mod extract;
pub mod orchestrator;
pub mod tasks;
pub mod transform;

pub use extract::{EntityExtractor, MatrixExtractor};
pub use orchestrator::{Pipeline, RunContext, RunReport, RunState, TaskGraph, TaskRecord};
pub use tasks::{Artifacts, Slot, Stage, Task};
pub use transform::{MatrixToEdgeListTransformer, SelfLoopPolicy, TransformReport};

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::resources::Resources;
use crate::types::{EdgeList, EntityRecord};

/// One full run: validate, resolve resources, then execute the standard graph.
/// A configuration problem fails here, before any sheet is read.
pub async fn run_once(config: &PipelineConfig) -> Result<RunReport> {
    config.validate()?;
    let resources = Resources::resolve(config)?;
    run_with_resources(config, resources).await
}

pub async fn run_with_resources(config: &PipelineConfig, resources: Resources) -> Result<RunReport> {
    let pipeline = Pipeline::standard(config)?;
    pipeline.run(RunContext::new(resources)).await
}

/// Result of a dry run: what would have been loaded.
#[derive(Debug)]
pub struct Inspection {
    pub report: RunReport,
    pub entities: Vec<EntityRecord>,
    pub edges: EdgeList,
}

/// Extract and transform without touching the destination store.
pub async fn inspect(config: &PipelineConfig) -> Result<Inspection> {
    config.validate()?;
    let resources = Resources::source_only(config)?;
    inspect_with_resources(config, resources).await
}

pub async fn inspect_with_resources(config: &PipelineConfig, resources: Resources) -> Result<Inspection> {
    let pipeline = Pipeline::extract_and_transform(config)?;
    let ctx = RunContext::new(resources);
    let mut report = RunReport::new(&ctx);
    let artifacts = pipeline.execute(ctx, &mut report).await?;
    let (entities, edges) = artifacts.into_parts();
    Ok(Inspection {
        report,
        entities: entities.unwrap_or_default(),
        edges: edges.unwrap_or_default(),
    })
}
