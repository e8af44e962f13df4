/// Workbook layout and destination naming shared across the pipeline.

// Default sheet names of the source workbook
pub const DEFAULT_ADJACENCY_SHEET: &str = "Matriz de adyacencia";
pub const DEFAULT_ENTITY_SHEET: &str = "Lista de actores";

// The entity sheet reserves its first rows for a non-tabular banner
pub const ENTITY_SHEET_SKIP_ROWS: usize = 3;
// Physical row of the adjacency sheet holding the entity ids; data starts right after it
pub const ADJACENCY_HEADER_ROW: usize = 1;

// Column names
pub const NUMERIC_ID_COLUMN: &str = "numeric_id";
pub const EXTERNAL_ID_COLUMN: &str = "external_id";
pub const NAME_COLUMN: &str = "name";
pub const FROM_NODE_COLUMN: &str = "from_node_id";
pub const TO_NODE_COLUMN: &str = "to_node_id";
pub const WEIGHT_COLUMN: &str = "weight";

/// Placeholder weight for every emitted edge; kept as text to match the destination schema.
pub const DEFAULT_EDGE_WEIGHT: &str = "1";

// Destination tables
pub const ENTITIES_TABLE: &str = "entities";
pub const EDGES_TABLE: &str = "edges";
pub const LEGACY_ENTITIES_TABLE: &str = "actors";
pub const LEGACY_EDGES_TABLE: &str = "adjacency_list";

// Connection
pub const DEFAULT_DB_ENV_VAR: &str = "ADJACENCY_DB_URL";

// Schedule: the job has always run at 9 AM Mexico City time
pub const DEFAULT_SCHEDULE_TIME: &str = "09:00";
pub const DEFAULT_SCHEDULE_TIMEZONE: &str = "America/Mexico_City";

pub const DEFAULT_CONFIG_PATH: &str = "pipeline.toml";
pub const DEFAULT_LOG_DIR: &str = "logs";
