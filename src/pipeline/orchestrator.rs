use super::extract::{EntityExtractor, MatrixExtractor};
use super::tasks::{
    Artifacts, ExtractEntitiesTask, ExtractMatrixTask, LoadEdgesTask, LoadEntitiesTask, Slot,
    Stage, Task, TransformMatrixTask,
};
use super::transform::{MatrixToEdgeListTransformer, TransformReport};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::resources::Resources;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

/// Per-run context handed to every task: run identity plus the resolved external handles.
/// Owned by a single run and dropped when it ends.
pub struct RunContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    resources: Resources,
}

impl RunContext {
    pub fn new(resources: Resources) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            resources,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "during")]
pub enum RunState {
    NotStarted,
    InProgress(Stage),
    Completed,
    Failed(Stage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub name: &'static str,
    pub stage: Stage,
    pub rows: usize,
    pub duration_ms: u64,
}

/// What happened during one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state: RunState,
    pub transitions: Vec<RunState>,
    pub tasks: Vec<TaskRecord>,
    pub transform: Option<TransformReport>,
}

impl RunReport {
    pub fn new(ctx: &RunContext) -> Self {
        Self {
            run_id: ctx.run_id(),
            started_at: ctx.started_at(),
            finished_at: None,
            state: RunState::NotStarted,
            transitions: vec![RunState::NotStarted],
            tasks: Vec::new(),
            transform: None,
        }
    }

    fn transition(&mut self, state: RunState) {
        self.state = state;
        self.transitions.push(state);
    }

    fn finish(&mut self, state: RunState) {
        self.transition(state);
        self.finished_at = Some(Utc::now());
    }

    pub fn rows_for(&self, task: &str) -> Option<usize> {
        self.tasks.iter().find(|t| t.name == task).map(|t| t.rows)
    }

    pub fn executed_tasks(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name).collect()
    }
}

/// Static task graph with its execution order resolved up front.
pub struct TaskGraph {
    tasks: Vec<Box<dyn Task>>,
    order: Vec<usize>,
}

impl TaskGraph {
    /// Validates the declared slots and computes a topological order. Ties are broken by
    /// declaration order, so a graph declared in a valid order runs in exactly that order.
    pub fn new(tasks: Vec<Box<dyn Task>>) -> Result<Self> {
        let mut names = HashSet::new();
        for task in &tasks {
            if !names.insert(task.name()) {
                return Err(PipelineError::Configuration(format!(
                    "task '{}' is declared twice",
                    task.name()
                )));
            }
        }

        let mut producers: HashMap<Slot, usize> = HashMap::new();
        for (i, task) in tasks.iter().enumerate() {
            for slot in task.outputs() {
                if let Some(other) = producers.insert(*slot, i) {
                    return Err(PipelineError::Configuration(format!(
                        "slot '{}' is produced by both '{}' and '{}'",
                        slot,
                        tasks[other].name(),
                        task.name()
                    )));
                }
            }
        }

        let mut dependencies: Vec<Vec<usize>> = Vec::with_capacity(tasks.len());
        for task in &tasks {
            let mut deps = Vec::new();
            for slot in task.inputs() {
                let producer = producers.get(slot).ok_or_else(|| {
                    PipelineError::Configuration(format!(
                        "task '{}' needs '{}' but no task produces it",
                        task.name(),
                        slot
                    ))
                })?;
                deps.push(*producer);
            }
            dependencies.push(deps);
        }

        let mut order = Vec::with_capacity(tasks.len());
        let mut done = vec![false; tasks.len()];
        while order.len() < tasks.len() {
            let next = (0..tasks.len())
                .find(|&i| !done[i] && dependencies[i].iter().all(|&d| done[d]))
                .ok_or_else(|| {
                    PipelineError::Configuration("task graph contains a cycle".to_string())
                })?;
            done[next] = true;
            order.push(next);
        }

        Ok(Self { tasks, order })
    }

    pub fn ordered(&self) -> impl Iterator<Item = &dyn Task> + '_ {
        self.order.iter().map(|&i| self.tasks[i].as_ref())
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.ordered().map(|t| t.name()).collect()
    }
}

pub struct Pipeline {
    graph: TaskGraph,
}

impl Pipeline {
    pub fn new(graph: TaskGraph) -> Self {
        Self { graph }
    }

    /// extract_entities → load_entities, extract_matrix → transform_matrix → load_edges.
    pub fn standard(config: &PipelineConfig) -> Result<Self> {
        let tasks: Vec<Box<dyn Task>> = vec![
            Box::new(ExtractEntitiesTask {
                extractor: EntityExtractor::default(),
            }),
            Box::new(LoadEntitiesTask {
                table: config.tables.entities.clone(),
            }),
            Box::new(ExtractMatrixTask {
                extractor: MatrixExtractor::default(),
            }),
            Box::new(TransformMatrixTask {
                transformer: MatrixToEdgeListTransformer::new(config.transform.self_loop_policy),
            }),
            Box::new(LoadEdgesTask {
                table: config.tables.edges.clone(),
            }),
        ];
        Ok(Self::new(TaskGraph::new(tasks)?))
    }

    /// The standard graph without its load tasks; touches nothing but the workbook.
    pub fn extract_and_transform(config: &PipelineConfig) -> Result<Self> {
        let tasks: Vec<Box<dyn Task>> = vec![
            Box::new(ExtractEntitiesTask {
                extractor: EntityExtractor::default(),
            }),
            Box::new(ExtractMatrixTask {
                extractor: MatrixExtractor::default(),
            }),
            Box::new(TransformMatrixTask {
                transformer: MatrixToEdgeListTransformer::new(config.transform.self_loop_policy),
            }),
        ];
        Ok(Self::new(TaskGraph::new(tasks)?))
    }

    pub fn graph(&self) -> &TaskGraph {
        &self.graph
    }

    pub async fn run(&self, ctx: RunContext) -> Result<RunReport> {
        let mut report = RunReport::new(&ctx);
        self.execute(ctx, &mut report).await?;
        Ok(report)
    }

    /// Runs every task once in graph order, recording progress in `report`. The first
    /// failing task stops the run; anything already loaded stays loaded.
    pub async fn execute(&self, ctx: RunContext, report: &mut RunReport) -> Result<Artifacts> {
        let span = info_span!(
            "pipeline_run",
            run_id = %ctx.run_id(),
            started_at = %ctx.started_at()
        );
        async move {
            info!(tasks = ?self.graph.task_names(), "pipeline run started");
            let mut artifacts = Artifacts::default();

            for task in self.graph.ordered() {
                let stage = task.stage();
                report.transition(RunState::InProgress(stage));

                let started = Instant::now();
                let result = task
                    .run(&ctx, &mut artifacts)
                    .instrument(info_span!("task", task = task.name()))
                    .await;
                let elapsed = started.elapsed();
                histogram!("pipeline_task_duration_seconds", "task" => task.name())
                    .record(elapsed.as_secs_f64());

                match result {
                    Ok(rows) => report.tasks.push(TaskRecord {
                        name: task.name(),
                        stage,
                        rows,
                        duration_ms: elapsed.as_millis() as u64,
                    }),
                    Err(e) => {
                        report.transform = artifacts.transform_report.clone();
                        report.finish(RunState::Failed(stage));
                        counter!("pipeline_runs_total", "outcome" => "failed").increment(1);
                        error!(
                            task = task.name(),
                            stage = %stage,
                            error_kind = e.kind(),
                            error = %e,
                            "pipeline run failed"
                        );
                        return Err(PipelineError::TaskFailed {
                            task: task.name(),
                            source: Box::new(e),
                        });
                    }
                }
            }

            report.transform = artifacts.transform_report.clone();
            report.finish(RunState::Completed);
            counter!("pipeline_runs_total", "outcome" => "completed").increment(1);
            info!(
                tasks = report.tasks.len(),
                entities = ?report.rows_for("load_entities"),
                edges = ?report.rows_for("load_edges"),
                "pipeline run completed"
            );
            Ok(artifacts)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{DEFAULT_ADJACENCY_SHEET, DEFAULT_ENTITY_SHEET};
    use crate::pipeline::tasks::{Destination, SourceSheet};
    use crate::resources::FileResource;
    use crate::storage::InMemoryTableStore;
    use crate::types::Cell;
    use crate::workbook::InMemoryWorkbook;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Stub {
        name: &'static str,
        inputs: &'static [Slot],
        outputs: &'static [Slot],
    }

    #[async_trait]
    impl Task for Stub {
        fn name(&self) -> &'static str {
            self.name
        }
        fn stage(&self) -> Stage {
            Stage::Transforming
        }
        fn inputs(&self) -> &'static [Slot] {
            self.inputs
        }
        fn outputs(&self) -> &'static [Slot] {
            self.outputs
        }
        async fn run(&self, _ctx: &RunContext, _artifacts: &mut Artifacts) -> Result<usize> {
            Ok(0)
        }
    }

    fn stub(name: &'static str, inputs: &'static [Slot], outputs: &'static [Slot]) -> Box<dyn Task> {
        Box::new(Stub { name, inputs, outputs })
    }

    fn t(s: &str) -> Cell {
        Cell::text(s)
    }

    fn workbook() -> InMemoryWorkbook {
        InMemoryWorkbook::new("memory.xlsx")
            .with_sheet(
                DEFAULT_ENTITY_SHEET,
                vec![
                    vec![],
                    vec![],
                    vec![],
                    vec![Cell::Int(1), t("A"), t("Alpha")],
                    vec![Cell::Int(2), t("B"), t("Beta")],
                ],
            )
            .with_sheet(
                DEFAULT_ADJACENCY_SHEET,
                vec![
                    vec![],
                    vec![Cell::Empty, Cell::Empty, t("A"), t("B")],
                    vec![Cell::Int(1), t("A"), Cell::Int(1), Cell::Int(1)],
                    vec![Cell::Int(2), t("B"), Cell::Int(0), Cell::Int(0)],
                ],
            )
    }

    fn context(store: Arc<InMemoryTableStore>) -> RunContext {
        let config = PipelineConfig::new("memory.xlsx", "UNUSED");
        let file = FileResource::resolve(&config.workbook).unwrap();
        RunContext::new(Resources::with_store(file, Arc::new(workbook()), store))
    }

    #[test]
    fn standard_graph_keeps_declared_order() {
        let config = PipelineConfig::new("m.xlsx", "UNUSED");
        let pipeline = Pipeline::standard(&config).unwrap();
        assert_eq!(
            pipeline.graph().task_names(),
            vec![
                "extract_entities",
                "load_entities",
                "extract_matrix",
                "transform_matrix",
                "load_edges"
            ]
        );
    }

    #[test]
    fn consumers_declared_first_still_run_after_producers() {
        let graph = TaskGraph::new(vec![
            stub("load", &[Slot::Edges], &[]),
            stub("transform", &[Slot::Grid], &[Slot::Edges]),
            stub("extract", &[], &[Slot::Grid]),
        ])
        .unwrap();
        assert_eq!(graph.task_names(), vec!["extract", "transform", "load"]);
    }

    #[test]
    fn invalid_graphs_are_rejected() {
        assert!(TaskGraph::new(vec![stub("load", &[Slot::Edges], &[])]).is_err());
        assert!(TaskGraph::new(vec![
            stub("a", &[], &[Slot::Grid]),
            stub("b", &[], &[Slot::Grid]),
        ])
        .is_err());
        assert!(TaskGraph::new(vec![
            stub("a", &[Slot::Edges], &[Slot::Grid]),
            stub("b", &[Slot::Grid], &[Slot::Edges]),
        ])
        .is_err());
        assert!(TaskGraph::new(vec![stub("a", &[], &[]), stub("a", &[], &[])]).is_err());
    }

    #[tokio::test]
    async fn successful_run_walks_every_state() {
        let store = Arc::new(InMemoryTableStore::new());
        let config = PipelineConfig::new("memory.xlsx", "UNUSED");
        let report = Pipeline::standard(&config)
            .unwrap()
            .run(context(store.clone()))
            .await
            .unwrap();

        assert_eq!(
            report.transitions,
            vec![
                RunState::NotStarted,
                RunState::InProgress(Stage::Extracting(SourceSheet::Entities)),
                RunState::InProgress(Stage::Loading(Destination::Entities)),
                RunState::InProgress(Stage::Extracting(SourceSheet::Matrix)),
                RunState::InProgress(Stage::Transforming),
                RunState::InProgress(Stage::Loading(Destination::Edges)),
                RunState::Completed,
            ]
        );
        assert_eq!(report.rows_for("load_entities"), Some(2));
        // A -> A is dropped, A -> B survives
        assert_eq!(report.rows_for("load_edges"), Some(1));
        assert_eq!(report.transform.as_ref().map(|t| t.self_loops), Some(1));
        assert_eq!(store.writes(), vec!["entities", "edges"]);
        assert!(report.finished_at.is_some());
    }

    #[tokio::test]
    async fn failure_halts_remaining_tasks_without_rollback() {
        let store = Arc::new(InMemoryTableStore::new());
        store.fail_on("edges");
        let config = PipelineConfig::new("memory.xlsx", "UNUSED");
        let pipeline = Pipeline::standard(&config).unwrap();
        let ctx = context(store.clone());
        let mut report = RunReport::new(&ctx);

        let err = pipeline.execute(ctx, &mut report).await.unwrap_err();

        assert!(matches!(err, PipelineError::TaskFailed { task: "load_edges", .. }));
        assert!(matches!(err.root(), PipelineError::Load { .. }));
        assert_eq!(report.state, RunState::Failed(Stage::Loading(Destination::Edges)));
        // the entity load committed before the failure stays in place
        assert_eq!(store.table("entities").map(|b| b.len()), Some(2));
    }

    #[tokio::test]
    async fn extraction_failure_stops_before_any_later_task() {
        let store = Arc::new(InMemoryTableStore::new());
        let config = PipelineConfig::new("memory.xlsx", "UNUSED");
        let file = FileResource::resolve(&config.workbook).unwrap();
        let empty = Arc::new(InMemoryWorkbook::new("memory.xlsx"));
        let ctx = RunContext::new(Resources::with_store(file, empty, store.clone()));
        let mut report = RunReport::new(&ctx);

        let err = Pipeline::standard(&config)
            .unwrap()
            .execute(ctx, &mut report)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "extraction");
        assert!(matches!(err, PipelineError::TaskFailed { task: "extract_entities", .. }));
        assert!(report.tasks.is_empty());
        assert!(store.writes().is_empty());
    }
}
