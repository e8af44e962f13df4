use crate::constants::{
    DEFAULT_ADJACENCY_SHEET, DEFAULT_DB_ENV_VAR, DEFAULT_ENTITY_SHEET, DEFAULT_LOG_DIR,
    DEFAULT_SCHEDULE_TIME, DEFAULT_SCHEDULE_TIMEZONE, EDGES_TABLE, ENTITIES_TABLE,
    LEGACY_EDGES_TABLE, LEGACY_ENTITIES_TABLE,
};
use crate::error::{PipelineError, Result};
use crate::pipeline::transform::SelfLoopPolicy;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Everything one pipeline run needs, built once at process start and passed down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub workbook: WorkbookConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub tables: TablesConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookConfig {
    pub file_path: String,
    #[serde(default = "default_adjacency_sheet")]
    pub adjacency_sheet_name: String,
    #[serde(default = "default_entity_sheet", alias = "actors_sheet_name", alias = "nodes_sheet_name")]
    pub entity_sheet_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Name of the environment variable holding the destination connection string.
    #[serde(default = "default_env_var", alias = "var_name")]
    pub env_var_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablesConfig {
    #[serde(default = "default_entities_table")]
    pub entities: String,
    #[serde(default = "default_edges_table")]
    pub edges: String,
}

impl TablesConfig {
    /// `actors` / `adjacency_list`, the names used before the tables were renamed.
    pub fn legacy() -> Self {
        Self {
            entities: LEGACY_ENTITIES_TABLE.to_string(),
            edges: LEGACY_EDGES_TABLE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub self_loop_policy: SelfLoopPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_schedule_time")]
    pub time: String,
    #[serde(default = "default_schedule_timezone")]
    pub timezone: String,
}

impl ScheduleConfig {
    pub fn local_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(self.time.trim(), "%H:%M").map_err(|e| {
            PipelineError::Configuration(format!(
                "schedule time '{}' is not HH:MM: {e}",
                self.time
            ))
        })
    }

    pub fn tz(&self) -> Result<Tz> {
        self.timezone.trim().parse::<Tz>().map_err(|e| {
            PipelineError::Configuration(format!("unknown timezone '{}': {e}", self.timezone))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub directory: String,
}

fn default_adjacency_sheet() -> String {
    DEFAULT_ADJACENCY_SHEET.to_string()
}
fn default_entity_sheet() -> String {
    DEFAULT_ENTITY_SHEET.to_string()
}
fn default_env_var() -> String {
    DEFAULT_DB_ENV_VAR.to_string()
}
fn default_entities_table() -> String {
    ENTITIES_TABLE.to_string()
}
fn default_edges_table() -> String {
    EDGES_TABLE.to_string()
}
fn default_schedule_time() -> String {
    DEFAULT_SCHEDULE_TIME.to_string()
}
fn default_schedule_timezone() -> String {
    DEFAULT_SCHEDULE_TIMEZONE.to_string()
}
fn default_log_dir() -> String {
    DEFAULT_LOG_DIR.to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            env_var_name: default_env_var(),
        }
    }
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            entities: default_entities_table(),
            edges: default_edges_table(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time: default_schedule_time(),
            timezone: default_schedule_timezone(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_log_dir(),
        }
    }
}

impl PipelineConfig {
    /// Config with default sheets, tables and schedule for the given workbook and variable.
    pub fn new(file_path: &str, env_var_name: &str) -> Self {
        Self {
            workbook: WorkbookConfig {
                file_path: file_path.to_string(),
                adjacency_sheet_name: default_adjacency_sheet(),
                entity_sheet_name: default_entity_sheet(),
            },
            database: DatabaseConfig {
                env_var_name: env_var_name.to_string(),
            },
            tables: TablesConfig::default(),
            transform: TransformConfig::default(),
            schedule: ScheduleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Checks every required value; called before any resource is resolved.
    pub fn validate(&self) -> Result<()> {
        if self.workbook.file_path.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "file_path cannot be empty".to_string(),
            ));
        }
        if self.workbook.entity_sheet_name.is_empty() || self.workbook.adjacency_sheet_name.is_empty() {
            return Err(PipelineError::Configuration(
                "sheet names cannot be empty".to_string(),
            ));
        }
        if self.database.env_var_name.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "env_var_name cannot be empty".to_string(),
            ));
        }
        if self.tables.entities.trim().is_empty() || self.tables.edges.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "destination table names cannot be empty".to_string(),
            ));
        }
        if self.tables.entities == self.tables.edges {
            return Err(PipelineError::Configuration(format!(
                "entities and edges cannot share table '{}'",
                self.tables.entities
            )));
        }
        self.schedule.local_time()?;
        self.schedule.tz()?;
        Ok(())
    }
}
