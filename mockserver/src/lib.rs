//! Environment-driven backend selection and logging setup (`§6`).
//!
//! The core itself never decides which `RuleRepository` backend to talk
//! to -- that choice, and the process-wide `tracing` subscriber, are the
//! collaborator surface this crate covers: a factory over `BackendConfig`
//! and a one-line logging initialiser, in the same spirit as the
//! teacher's `actix`/`tauri` example binaries wiring a concrete `DbConn`
//! before handing it to the framework.

use mockserver_core::{Error, RuleRepository, RuleStore};
use mockserver_elastic::ElasticRuleRepository;
use mockserver_memory::MemoryRuleRepository;
use mockserver_postgres::PgRuleRepository;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Runtime;

/// Which rule repository to build, and its backend-specific parameters
/// (`§6 Environment-driven selection`).
#[derive(Debug, Clone)]
pub enum BackendConfig {
    /// `file_path = None` runs a purely in-memory store with no
    /// persistence, used by tests and ephemeral setups.
    Memory { file_path: Option<PathBuf> },
    Relational { dsn: String },
    Document { url: String, index: String },
}

/// Read `MOCKSERVER_BACKEND` (`memory` | `relational` | `document`, case
/// insensitive) and the backend's own variables from the process
/// environment.
///
/// | Backend | Variables |
/// |---|---|
/// | `memory` | `MOCKSERVER_RULE_FILE` (optional) |
/// | `relational` | `MOCKSERVER_POSTGRES_DSN` (required) |
/// | `document` | `MOCKSERVER_ELASTIC_URL`, `MOCKSERVER_ELASTIC_INDEX` (both required) |
pub fn config_from_env() -> Result<BackendConfig, Error> {
    let backend = std::env::var("MOCKSERVER_BACKEND").unwrap_or_else(|_| "memory".to_string());
    match backend.to_ascii_lowercase().as_str() {
        "memory" => Ok(BackendConfig::Memory {
            file_path: std::env::var("MOCKSERVER_RULE_FILE").ok().map(PathBuf::from),
        }),
        "relational" => {
            let dsn = std::env::var("MOCKSERVER_POSTGRES_DSN").map_err(|_| {
                Error::backend("MOCKSERVER_POSTGRES_DSN is required for the relational backend")
            })?;
            Ok(BackendConfig::Relational { dsn })
        }
        "document" => {
            let url = std::env::var("MOCKSERVER_ELASTIC_URL").map_err(|_| {
                Error::backend("MOCKSERVER_ELASTIC_URL is required for the document backend")
            })?;
            let index = std::env::var("MOCKSERVER_ELASTIC_INDEX").map_err(|_| {
                Error::backend("MOCKSERVER_ELASTIC_INDEX is required for the document backend")
            })?;
            Ok(BackendConfig::Document { url, index })
        }
        other => Err(Error::backend(format!(
            "unknown MOCKSERVER_BACKEND '{}', expected memory, relational or document",
            other
        ))),
    }
}

/// Build the `RuleStore` handle `config` describes.
pub fn build_store(config: BackendConfig) -> Result<RuleStore, Error> {
    let repository: Arc<dyn RuleRepository> = match config {
        BackendConfig::Memory { file_path: Some(path) } => {
            Arc::new(MemoryRuleRepository::open_file(path)?)
        }
        BackendConfig::Memory { file_path: None } => Arc::new(MemoryRuleRepository::in_memory()),
        BackendConfig::Relational { dsn } => {
            let client = connect_postgres(&dsn)?;
            let repo = PgRuleRepository::new(client);
            repo.ensure_schema()?;
            Arc::new(repo)
        }
        BackendConfig::Document { url, index } => {
            let repo = ElasticRuleRepository::new(&url, index)?;
            repo.ensure_index()?;
            Arc::new(repo)
        }
    };
    Ok(RuleStore::new(repository))
}

/// Connect to Postgres and keep its connection task alive on a shared
/// background runtime for the rest of the process -- mirrors
/// `tokio_postgres`'s usual `tokio::spawn(connection)` idiom, just with
/// the runtime owned here instead of by the caller's own async main.
fn connect_postgres(dsn: &str) -> Result<tokio_postgres::Client, Error> {
    static RUNTIME: OnceLock<Runtime> = OnceLock::new();
    let rt = RUNTIME.get_or_init(|| {
        Runtime::new().expect("failed to start postgres connection runtime")
    });

    let (client, connection) = rt
        .block_on(tokio_postgres::connect(dsn, tokio_postgres::NoTls))
        .map_err(|e| Error::backend(format!("error connecting to postgres: {}", e)))?;

    rt.spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!(error = %e, "postgres connection terminated");
        }
    });

    Ok(client)
}

/// Install a `tracing-subscriber` formatter honouring `RUST_LOG`,
/// defaulting to `info`. Idempotent: a second call is a silent no-op,
/// same as every `tracing_subscriber::fmt().try_init()` callsite.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_backend_builds_without_env() {
        let store = build_store(BackendConfig::Memory { file_path: None }).unwrap();
        let filter = mockserver_core::model::RuleFilter::default();
        let page = store.search(&filter, 0, 30).unwrap();
        assert_eq!(page.results.len(), 0);
    }

    #[test]
    fn memory_backend_with_file_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        let store = build_store(BackendConfig::Memory {
            file_path: Some(path.clone()),
        })
        .unwrap();
        assert!(path.exists());
        drop(store);
    }

    #[test]
    fn unknown_backend_name_is_rejected() {
        std::env::set_var("MOCKSERVER_BACKEND", "carrier-pigeon");
        let err = config_from_env().unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
        std::env::remove_var("MOCKSERVER_BACKEND");
    }
}
