use crate::config::{PipelineConfig, WorkbookConfig};
use crate::error::{PipelineError, Result};
use crate::storage::{SqliteTableStore, TableStore};
use crate::workbook::{CalamineWorkbook, WorkbookSource};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

/// Immutable handle on the source workbook: where it is and which sheets to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    file_path: String,
    adjacency_sheet_name: String,
    entity_sheet_name: String,
}

impl FileResource {
    pub fn resolve(config: &WorkbookConfig) -> Result<Self> {
        // TODO: validate that file_path exists here instead of at extraction time
        if config.file_path.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "file_path cannot be empty".to_string(),
            ));
        }
        Ok(Self {
            file_path: config.file_path.clone(),
            adjacency_sheet_name: config.adjacency_sheet_name.clone(),
            entity_sheet_name: config.entity_sheet_name.clone(),
        })
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn adjacency_sheet_name(&self) -> &str {
        &self.adjacency_sheet_name
    }

    pub fn entity_sheet_name(&self) -> &str {
        &self.entity_sheet_name
    }
}

/// Where a connection string points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    Sqlite(PathBuf),
    Remote { url: String, auth_token: String },
    MySql { url: String },
}

impl ConnectionTarget {
    /// `sqlite://path`, `file:path` or a bare path select a local SQLite file.
    /// `libsql://`, `https://` and `http://` select a remote libSQL server, with an optional
    /// `authToken` query parameter. `mysql://`, `mysql+<driver>://` and `mariadb://` select a
    /// MySQL server.
    pub fn parse(connection_string: &str) -> Result<Self> {
        let s = connection_string.trim();
        if let Some(path) = s.strip_prefix("sqlite://").or_else(|| s.strip_prefix("file:")) {
            if path.is_empty() {
                return Err(PipelineError::Configuration(
                    "sqlite connection string has no path".to_string(),
                ));
            }
            return Ok(ConnectionTarget::Sqlite(PathBuf::from(path)));
        }
        if !s.contains("://") {
            return Ok(ConnectionTarget::Sqlite(PathBuf::from(s)));
        }

        // the parse error never echoes the input, which may carry credentials
        let mut url = Url::parse(s).map_err(|e| {
            PipelineError::Configuration(format!("invalid connection string: {e}"))
        })?;
        let scheme = url.scheme().to_string();
        match scheme.as_str() {
            "libsql" | "https" | "http" => {
                let mut auth_token = String::new();
                for (key, value) in url.query_pairs() {
                    match key.as_ref() {
                        "authToken" => auth_token = value.into_owned(),
                        other => {
                            return Err(PipelineError::Configuration(format!(
                                "unsupported connection parameter '{other}'"
                            )))
                        }
                    }
                }
                url.set_query(None);
                Ok(ConnectionTarget::Remote {
                    url: url.to_string(),
                    auth_token,
                })
            }
            scheme if scheme == "mysql" || scheme.starts_with("mysql+") || scheme == "mariadb" => {
                if url.host_str().map_or(true, str::is_empty) {
                    return Err(PipelineError::Configuration(
                        "mysql connection string has no host".to_string(),
                    ));
                }
                // driver suffixes such as `+pymysql` name a client library, not a protocol
                url.set_scheme("mysql").map_err(|_| {
                    PipelineError::Configuration(format!("cannot use scheme '{scheme}' as mysql"))
                })?;
                Ok(ConnectionTarget::MySql {
                    url: url.to_string(),
                })
            }
            scheme => Err(PipelineError::Configuration(format!(
                "unsupported connection scheme '{scheme}'"
            ))),
        }
    }

    pub fn open(self) -> Result<Arc<dyn TableStore>> {
        match self {
            ConnectionTarget::Sqlite(path) => Ok(Arc::new(SqliteTableStore::new(path))),
            #[cfg(feature = "db")]
            ConnectionTarget::Remote { url, auth_token } => Ok(Arc::new(
                crate::storage::LibsqlTableStore::new(&url, &auth_token),
            )),
            #[cfg(not(feature = "db"))]
            ConnectionTarget::Remote { url, .. } => Err(PipelineError::Configuration(format!(
                "connection to '{url}' needs a build with the `db` feature"
            ))),
            #[cfg(feature = "mysql")]
            ConnectionTarget::MySql { url } => {
                Ok(Arc::new(crate::storage::MySqlTableStore::new(&url)))
            }
            #[cfg(not(feature = "mysql"))]
            ConnectionTarget::MySql { .. } => Err(PipelineError::Configuration(
                "mysql connections need a build with the `mysql` feature".to_string(),
            )),
        }
    }
}

/// Resolves configuration into the handles a run needs.
pub struct ResourceProvider<'a> {
    config: &'a PipelineConfig,
}

impl<'a> ResourceProvider<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn file(&self) -> Result<FileResource> {
        FileResource::resolve(&self.config.workbook)
    }

    /// Looks up the configured environment variable and builds a store for the connection
    /// string it holds. No connection is made here.
    pub fn database(&self) -> Result<Arc<dyn TableStore>> {
        let var_name = self.config.database.env_var_name.trim();
        if var_name.is_empty() {
            return Err(PipelineError::Configuration(
                "env_var_name cannot be empty".to_string(),
            ));
        }
        let connection_string = match env::var(var_name) {
            Ok(v) if !v.trim().is_empty() => v,
            Ok(_) => {
                return Err(PipelineError::Configuration(format!(
                    "Environment variable {var_name} is empty"
                )))
            }
            Err(_) => {
                return Err(PipelineError::Configuration(format!(
                    "Environment variable {var_name} not set"
                )))
            }
        };
        let store = ConnectionTarget::parse(&connection_string)?.open()?;
        debug!(env_var = var_name, backend = store.backend(), "resolved destination store");
        Ok(store)
    }
}

/// The external handles of one run, threaded explicitly through every task.
#[derive(Clone)]
pub struct Resources {
    pub file: FileResource,
    pub workbook: Arc<dyn WorkbookSource>,
    pub store: Option<Arc<dyn TableStore>>,
}

impl Resources {
    /// File handle, workbook reader and destination store; fails before any I/O on a
    /// missing or empty required value.
    pub fn resolve(config: &PipelineConfig) -> Result<Self> {
        let provider = ResourceProvider::new(config);
        let file = provider.file()?;
        let workbook: Arc<dyn WorkbookSource> = Arc::new(CalamineWorkbook::new(file.file_path()));
        let store = provider.database()?;
        info!(file = file.file_path(), backend = store.backend(), "resources resolved");
        Ok(Self {
            file,
            workbook,
            store: Some(store),
        })
    }

    /// Same as [`Resources::resolve`] but reading from an already opened workbook.
    pub fn resolve_with_workbook(
        config: &PipelineConfig,
        workbook: Arc<dyn WorkbookSource>,
    ) -> Result<Self> {
        let provider = ResourceProvider::new(config);
        let file = provider.file()?;
        let store = provider.database()?;
        Ok(Self {
            file,
            workbook,
            store: Some(store),
        })
    }

    /// Read-only resources: no destination store is resolved.
    pub fn source_only(config: &PipelineConfig) -> Result<Self> {
        let file = ResourceProvider::new(config).file()?;
        let workbook: Arc<dyn WorkbookSource> = Arc::new(CalamineWorkbook::new(file.file_path()));
        Ok(Self {
            file,
            workbook,
            store: None,
        })
    }

    pub fn with_store(file: FileResource, workbook: Arc<dyn WorkbookSource>, store: Arc<dyn TableStore>) -> Self {
        Self {
            file,
            workbook,
            store: Some(store),
        }
    }

    pub fn store(&self) -> Result<&Arc<dyn TableStore>> {
        self.store.as_ref().ok_or_else(|| {
            PipelineError::Configuration("no destination store resolved for this run".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_path_is_rejected() {
        let config = PipelineConfig::new("  ", "UNUSED");
        assert!(matches!(
            FileResource::resolve(&config.workbook),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn file_resource_carries_values_unchanged() {
        let config = PipelineConfig::new("data/m.xlsx", "UNUSED");
        let file = FileResource::resolve(&config.workbook).unwrap();
        assert_eq!(file.file_path(), "data/m.xlsx");
        assert_eq!(file.entity_sheet_name(), "Lista de actores");
        assert_eq!(file.adjacency_sheet_name(), "Matriz de adyacencia");
    }

    #[test]
    fn unset_variable_is_named_in_the_error() {
        let config = PipelineConfig::new("m.xlsx", "ADJ_TEST_UNSET_VARIABLE_3f1c");
        env::remove_var("ADJ_TEST_UNSET_VARIABLE_3f1c");
        match ResourceProvider::new(&config).database() {
            Err(PipelineError::Configuration(message)) => {
                assert!(message.contains("ADJ_TEST_UNSET_VARIABLE_3f1c"))
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected a configuration error"),
        }
    }

    #[test]
    fn empty_variable_is_a_configuration_error() {
        env::set_var("ADJ_TEST_EMPTY_VARIABLE_9a2e", "   ");
        let config = PipelineConfig::new("m.xlsx", "ADJ_TEST_EMPTY_VARIABLE_9a2e");
        assert!(matches!(
            ResourceProvider::new(&config).database(),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn sqlite_variable_resolves_to_a_sqlite_store() {
        env::set_var("ADJ_TEST_SQLITE_VARIABLE_77b0", "sqlite:///tmp/adjacency.db");
        let config = PipelineConfig::new("m.xlsx", "ADJ_TEST_SQLITE_VARIABLE_77b0");
        let store = ResourceProvider::new(&config).database().unwrap();
        assert_eq!(store.backend(), "sqlite");
    }

    #[test]
    fn connection_strings_select_a_backend() {
        assert_eq!(
            ConnectionTarget::parse("sqlite://data/out.db").unwrap(),
            ConnectionTarget::Sqlite(PathBuf::from("data/out.db"))
        );
        assert_eq!(
            ConnectionTarget::parse("file:out.db").unwrap(),
            ConnectionTarget::Sqlite(PathBuf::from("out.db"))
        );
        assert_eq!(
            ConnectionTarget::parse("out.db").unwrap(),
            ConnectionTarget::Sqlite(PathBuf::from("out.db"))
        );
        assert_eq!(
            ConnectionTarget::parse("libsql://graph.turso.io?authToken=abc").unwrap(),
            ConnectionTarget::Remote {
                url: "libsql://graph.turso.io".to_string(),
                auth_token: "abc".to_string()
            }
        );
        assert!(matches!(
            ConnectionTarget::parse("postgres://user:pw@host/db"),
            Err(PipelineError::Configuration(ref m)) if m.contains("postgres")
        ));
    }

    #[test]
    fn auth_token_is_percent_decoded_and_dropped_from_the_url() {
        assert_eq!(
            ConnectionTarget::parse("libsql://db.turso.io?authToken=abc%3D%3D").unwrap(),
            ConnectionTarget::Remote {
                url: "libsql://db.turso.io".to_string(),
                auth_token: "abc==".to_string()
            }
        );
    }

    #[test]
    fn unknown_remote_parameters_are_rejected() {
        assert!(matches!(
            ConnectionTarget::parse("libsql://db.turso.io?authToken=abc&tls=0"),
            Err(PipelineError::Configuration(ref m)) if m.contains("'tls'")
        ));
    }

    #[test]
    fn mysql_schemes_select_a_mysql_target() {
        assert_eq!(
            ConnectionTarget::parse("mysql+pymysql://u:p@localhost/graph").unwrap(),
            ConnectionTarget::MySql {
                url: "mysql://u:p@localhost/graph".to_string()
            }
        );
        assert_eq!(
            ConnectionTarget::parse("mysql://u:p@db.internal:3307/graph?ssl-mode=required").unwrap(),
            ConnectionTarget::MySql {
                url: "mysql://u:p@db.internal:3307/graph?ssl-mode=required".to_string()
            }
        );
        assert!(ConnectionTarget::parse("mysql:///graph").is_err());
    }

    #[test]
    fn legacy_mysql_variable_resolves_to_a_store_or_names_the_feature() {
        env::set_var("ADJ_TEST_MYSQL_VARIABLE_e41d", "mysql+pymysql://u:p@localhost/graph");
        let config = PipelineConfig::new("m.xlsx", "ADJ_TEST_MYSQL_VARIABLE_e41d");
        let result = ResourceProvider::new(&config).database();
        #[cfg(feature = "mysql")]
        assert_eq!(result.map(|store| store.backend()).ok(), Some("mysql"));
        #[cfg(not(feature = "mysql"))]
        assert!(matches!(result, Err(PipelineError::Configuration(ref m)) if m.contains("`mysql` feature")));
    }
}
