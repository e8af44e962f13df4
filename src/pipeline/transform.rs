//! Adjacency matrix → edge list.
//!
//! The grid is scanned row by row, column by column; every cell equal to `1` becomes a
//! directed edge from the row's entity to the column's entity. Output order follows the
//! scan and is deterministic for a given grid, though nothing downstream relies on it.

use crate::constants::DEFAULT_EDGE_WEIGHT;
use crate::error::{PipelineError, Result};
use crate::types::{AdjacencyGrid, EdgeList};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// What to do with a `1` on the diagonal (an entity related to itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelfLoopPolicy {
    /// Skip the cell and log a warning.
    #[default]
    Drop,
    /// Emit the self-loop like any other edge.
    Keep,
    /// Fail the transformation.
    Error,
}

impl fmt::Display for SelfLoopPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SelfLoopPolicy::Drop => "drop",
            SelfLoopPolicy::Keep => "keep",
            SelfLoopPolicy::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for SelfLoopPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(SelfLoopPolicy::Drop),
            "keep" => Ok(SelfLoopPolicy::Keep),
            "error" => Ok(SelfLoopPolicy::Error),
            other => Err(format!(
                "unknown self-loop policy '{other}' (expected drop, keep or error)"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformReport {
    pub cells_scanned: usize,
    pub edges_emitted: usize,
    pub self_loops: usize,
    pub duplicates_skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MatrixToEdgeListTransformer {
    policy: SelfLoopPolicy,
}

impl MatrixToEdgeListTransformer {
    pub fn new(policy: SelfLoopPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> SelfLoopPolicy {
        self.policy
    }

    pub fn transform(&self, grid: &AdjacencyGrid) -> Result<(EdgeList, TransformReport)> {
        let mut report = TransformReport::default();
        let mut edges = EdgeList::default();
        let mut emitted: HashSet<(&str, &str)> = HashSet::new();

        for row in grid.rows() {
            let from = row.external_id.as_str();
            for (to, cell) in grid.columns().iter().zip(&row.cells) {
                report.cells_scanned += 1;
                if !cell.is_one() {
                    continue;
                }
                let to = to.as_str();

                if from == to {
                    report.self_loops += 1;
                    match self.policy {
                        SelfLoopPolicy::Drop => {
                            warn!(node_id = from, "self-loop in adjacency matrix dropped");
                            continue;
                        }
                        SelfLoopPolicy::Error => {
                            return Err(PipelineError::Transformation(format!(
                                "self-loop on entity '{from}'"
                            )));
                        }
                        SelfLoopPolicy::Keep => {
                            debug!(node_id = from, "self-loop kept");
                        }
                    }
                }

                if !emitted.insert((from, to)) {
                    report.duplicates_skipped += 1;
                    debug!(from, to, "duplicate edge skipped");
                    continue;
                }
                edges.push(from, to, DEFAULT_EDGE_WEIGHT);
            }
        }

        report.edges_emitted = edges.len();
        counter!("pipeline_edges_emitted_total").increment(report.edges_emitted as u64);
        counter!("pipeline_self_loops_total", "policy" => self.policy.to_string())
            .increment(report.self_loops as u64);
        info!(
            cells = report.cells_scanned,
            edges = report.edges_emitted,
            self_loops = report.self_loops,
            duplicates = report.duplicates_skipped,
            "adjacency matrix transformed"
        );
        Ok((edges, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, EdgeRecord, GridRow};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn square(ids: &[&str], ones: &[(usize, usize)]) -> AdjacencyGrid {
        let n = ids.len();
        let rows = ids
            .iter()
            .enumerate()
            .map(|(r, id)| GridRow {
                numeric_id: Some(r as i64 + 1),
                external_id: id.to_string(),
                cells: (0..n)
                    .map(|c| if ones.contains(&(r, c)) { Cell::Int(1) } else { Cell::Int(0) })
                    .collect(),
            })
            .collect();
        AdjacencyGrid::new(ids.iter().map(|s| s.to_string()).collect(), rows).unwrap()
    }

    #[test]
    fn three_entity_scenario() {
        // A -> B, A -> A, B -> C
        let grid = square(&["A", "B", "C"], &[(0, 1), (0, 0), (1, 2)]);
        let (edges, report) = MatrixToEdgeListTransformer::default().transform(&grid).unwrap();
        assert_eq!(
            edges.to_records(),
            vec![EdgeRecord::new("A", "B"), EdgeRecord::new("B", "C")]
        );
        assert!(edges.iter().all(|e| e.weight == "1"));
        assert_eq!(report.self_loops, 1);
        assert_eq!(report.cells_scanned, 9);
    }

    #[test]
    fn edge_count_is_ones_minus_diagonal_ones() {
        let ids = ["n0", "n1", "n2", "n3", "n4"];
        // deterministic pseudo-random fill
        let ones: Vec<(usize, usize)> = (0..5)
            .flat_map(|r| (0..5).map(move |c| (r, c)))
            .filter(|(r, c)| (r * 7 + c * 3) % 4 == 0)
            .collect();
        let diagonal = ones.iter().filter(|(r, c)| r == c).count();
        let grid = square(&ids, &ones);

        let (edges, report) = MatrixToEdgeListTransformer::default().transform(&grid).unwrap();
        assert_eq!(edges.len(), ones.len() - diagonal);
        assert_eq!(report.self_loops, diagonal);
        assert!(edges.iter().all(|e| e.from_node_id != e.to_node_id));
    }

    #[test]
    fn each_dropped_self_loop_logs_exactly_one_warning() {
        let grid = square(&["A", "B", "C"], &[(0, 0), (1, 1), (2, 2), (0, 2)]);
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));

        let (edges, _) = tracing::subscriber::with_default(subscriber, || {
            MatrixToEdgeListTransformer::default().transform(&grid).unwrap()
        });

        assert_eq!(edges.to_records(), vec![EdgeRecord::new("A", "C")]);
        assert_eq!(warnings.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_blank_and_non_numeric_cells_never_produce_edges() {
        let grid = AdjacencyGrid::new(
            vec!["A".into(), "B".into(), "C".into(), "D".into(), "E".into()],
            vec![GridRow {
                numeric_id: None,
                external_id: "X".into(),
                cells: vec![
                    Cell::Int(0),
                    Cell::Empty,
                    Cell::text("yes"),
                    Cell::text("1"),
                    Cell::Float(2.0),
                ],
            }],
        )
        .unwrap();
        let (edges, report) = MatrixToEdgeListTransformer::default().transform(&grid).unwrap();
        assert!(edges.is_empty());
        assert_eq!(report.cells_scanned, 5);
    }

    #[test]
    fn float_and_boolean_ones_count() {
        let grid = AdjacencyGrid::new(
            vec!["A".into(), "B".into()],
            vec![GridRow {
                numeric_id: None,
                external_id: "X".into(),
                cells: vec![Cell::Float(1.0), Cell::Bool(true)],
            }],
        )
        .unwrap();
        let (edges, _) = MatrixToEdgeListTransformer::default().transform(&grid).unwrap();
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn unmatched_identifiers_are_tolerated() {
        // row D has no column; column C has no row
        let grid = AdjacencyGrid::new(
            vec!["A".into(), "C".into()],
            vec![
                GridRow { numeric_id: None, external_id: "A".into(), cells: vec![Cell::Int(0), Cell::Int(1)] },
                GridRow { numeric_id: None, external_id: "D".into(), cells: vec![Cell::Int(1), Cell::Int(0)] },
            ],
        )
        .unwrap();
        let (edges, _) = MatrixToEdgeListTransformer::default().transform(&grid).unwrap();
        assert_eq!(
            edges.to_records(),
            vec![EdgeRecord::new("A", "C"), EdgeRecord::new("D", "A")]
        );
    }

    #[test]
    fn duplicate_rows_are_emitted_once() {
        let grid = AdjacencyGrid::new(
            vec!["B".into()],
            vec![
                GridRow { numeric_id: None, external_id: "A".into(), cells: vec![Cell::Int(1)] },
                GridRow { numeric_id: None, external_id: "A".into(), cells: vec![Cell::Int(1)] },
            ],
        )
        .unwrap();
        let (edges, report) = MatrixToEdgeListTransformer::default().transform(&grid).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(report.duplicates_skipped, 1);
    }

    #[test]
    fn keep_and_error_policies() {
        let grid = square(&["A", "B"], &[(0, 0), (0, 1)]);

        let (edges, report) = MatrixToEdgeListTransformer::new(SelfLoopPolicy::Keep)
            .transform(&grid)
            .unwrap();
        assert_eq!(
            edges.to_records(),
            vec![EdgeRecord::new("A", "A"), EdgeRecord::new("A", "B")]
        );
        assert_eq!(report.self_loops, 1);

        let err = MatrixToEdgeListTransformer::new(SelfLoopPolicy::Error)
            .transform(&grid)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Transformation(ref m) if m.contains("'A'")));
    }

    #[test]
    fn policy_parses_from_cli_text() {
        assert_eq!("DROP".parse::<SelfLoopPolicy>().unwrap(), SelfLoopPolicy::Drop);
        assert_eq!("keep".parse::<SelfLoopPolicy>().unwrap(), SelfLoopPolicy::Keep);
        assert!("ignore".parse::<SelfLoopPolicy>().is_err());
    }
}
