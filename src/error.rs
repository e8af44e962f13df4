use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Extraction failed for sheet '{sheet}' in '{file}': {message}")]
    Extraction {
        file: String,
        sheet: String,
        message: String,
    },

    #[error("Transformation error: {0}")]
    Transformation(String),

    #[error("Load into table '{table}' failed: {message}")]
    Load { table: String, message: String },

    #[error("Task '{task}' failed: {source}")]
    TaskFailed {
        task: &'static str,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn extraction(file: &str, sheet: &str, message: impl Into<String>) -> Self {
        PipelineError::Extraction {
            file: file.to_string(),
            sheet: sheet.to_string(),
            message: message.into(),
        }
    }

    pub fn load(table: &str, message: impl std::fmt::Display) -> Self {
        PipelineError::Load {
            table: table.to_string(),
            message: message.to_string(),
        }
    }

    /// Short label used as a structured log field and metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Configuration(_) | PipelineError::Toml(_) => "configuration",
            PipelineError::Extraction { .. } => "extraction",
            PipelineError::Transformation(_) => "transformation",
            PipelineError::Load { .. } => "load",
            PipelineError::TaskFailed { source, .. } => source.kind(),
            PipelineError::Io(_) => "io",
        }
    }

    /// The error that started a failure chain, looking through `TaskFailed` wrappers.
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::TaskFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
