//! Shared fixtures for pipeline integration tests
//!
//! - In-memory [`MemorySource`] and [`MemoryWarehouse`] implementing the
//!   pipeline's capability traits
//! - A [`TestPostgres`] container wrapper for the Docker-backed tests
//! - Helpers to assemble a [`Pipeline`] over a temporary landing directory
//!
//! Each test binary uses a different subset of these.
#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use banvic_pipeline::extract::{FlatFileExtractor, SourceTableExtractor};
use banvic_pipeline::landing::LandingZone;
use banvic_pipeline::load::WarehouseLoader;
use banvic_pipeline::source::SourceDatabase;
use banvic_pipeline::warehouse::Warehouse;
use banvic_pipeline::{LoadScope, Pipeline, PipelineError, PipelineResult, Table};
use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("valid test date")
}

/// Initialize tracing for tests; safe to call more than once
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,banvic_pipeline=debug,sqlx=warn,testcontainers=info")
        }))
        .with_test_writer()
        .try_init();
}

// ============================================================================
// In-memory source
// ============================================================================

/// Source database backed by a map of tables
///
/// Every fetch sleeps for `latency` so that concurrent extraction can be
/// observed through [`MemorySource::max_in_flight`].
#[derive(Default)]
pub struct MemorySource {
    tables: HashMap<String, Table>,
    failing: HashSet<String>,
    latency: Duration,
    fetched: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, name: &str, table: Table) -> Self {
        self.tables.insert(name.to_string(), table);
        self
    }

    /// Queries against `name` fail as if the connection dropped
    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().expect("fetch log poisoned").clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceDatabase for MemorySource {
    async fn fetch_table(&self, table: &str) -> PipelineResult<Table> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.fetched
            .lock()
            .expect("fetch log poisoned")
            .push(table.to_string());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(table) {
            return Err(PipelineError::Query {
                table: table.to_string(),
                source: sqlx::Error::PoolClosed,
            });
        }
        self.tables
            .get(table)
            .cloned()
            .ok_or_else(|| PipelineError::TableNotFound {
                table: table.to_string(),
            })
    }
}

// ============================================================================
// In-memory warehouse
// ============================================================================

/// Warehouse that records every replacement
#[derive(Default)]
pub struct MemoryWarehouse {
    tables: Mutex<HashMap<String, Table>>,
    replacements: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn table(&self, name: &str) -> Option<Table> {
        self.tables.lock().expect("warehouse poisoned").get(name).cloned()
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tables
            .lock()
            .expect("warehouse poisoned")
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Destination names in the order they were replaced
    pub fn replacements(&self) -> Vec<String> {
        self.replacements.lock().expect("warehouse poisoned").clone()
    }
}

#[async_trait]
impl Warehouse for MemoryWarehouse {
    async fn replace_table(&self, name: &str, table: &Table) -> PipelineResult<u64> {
        if self.failing.contains(name) {
            return Err(PipelineError::Load {
                table: name.to_string(),
                source: sqlx::Error::PoolClosed,
            });
        }
        self.tables
            .lock()
            .expect("warehouse poisoned")
            .insert(name.to_string(), table.clone());
        self.replacements
            .lock()
            .expect("warehouse poisoned")
            .push(name.to_string());
        Ok(table.len() as u64)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn clientes() -> Table {
    Table::from_literals(
        &["cod_cliente", "primeiro_nome", "ativo"],
        &[&["1", "Ana", "true"], &["2", "Bruno", "false"], &["3", "", "true"]],
    )
}

pub fn agencias() -> Table {
    Table::from_literals(
        &["cod_agencia", "nome", "cidade"],
        &[&["7", "Agência Central", "Vitória"], &["8", "Agência Norte", "Serra"]],
    )
}

pub fn colaborador_agencia() -> Table {
    Table::from_literals(
        &["cod_colaborador", "cod_agencia"],
        &[&["1", "7"], &["2", "8"]],
    )
}

pub fn transacoes() -> Table {
    Table::from_literals(
        &["cod_transacao", "num_conta", "data_transacao", "nome_transacao", "valor_transacao"],
        &[
            &["100", "1", "2025-01-01 10:00:00", "Pix - Realizado", "-25.5"],
            &["101", "2", "2025-01-01 11:30:00", "Depósito em espécie", "300"],
        ],
    )
}

/// A temporary directory holding the flat source file and the landing zone
pub struct Workspace {
    _dir: tempfile::TempDir,
    pub csv_source: PathBuf,
    pub landing_dir: PathBuf,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let csv_source = dir.path().join("transacoes.csv");
        let landing_dir = dir.path().join("datalake");
        Self {
            _dir: dir,
            csv_source,
            landing_dir,
        }
    }

    pub fn with_flat_file(self, table: &Table) -> Self {
        table.write_csv(&self.csv_source).expect("write flat file");
        self
    }

    pub fn landing(&self) -> LandingZone {
        LandingZone::new(&self.landing_dir)
    }

    /// Landing file names in directory order
    pub fn landed_files(&self) -> Vec<String> {
        if !self.landing_dir.exists() {
            return Vec::new();
        }
        self.landing()
            .list_csv_files()
            .expect("list landing dir")
            .iter()
            .map(|p| file_name(p))
            .collect()
    }

    pub fn pipeline(
        &self,
        source: Arc<MemorySource>,
        tables: &[&str],
        warehouse: Arc<MemoryWarehouse>,
        scope: LoadScope,
    ) -> Pipeline {
        let tables = tables.iter().map(|t| t.to_string()).collect();
        Pipeline::new(
            SourceTableExtractor::new(source, self.landing(), tables),
            FlatFileExtractor::new(&self.csv_source, self.landing()),
            WarehouseLoader::new(warehouse, self.landing()).with_scope(scope),
        )
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// Disposable PostgreSQL instance for the Docker-backed tests
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    connection_string: String,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let connection_string =
            format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);
        debug!("PostgreSQL connection: {}", connection_string);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
            connection_string,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn pool_clone(&self) -> PgPool {
        self.pool.clone()
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Create a separate database on the same server and return a pool for it
    pub async fn create_database(&self, name: &str) -> Result<PgPool> {
        sqlx::query(&format!("CREATE DATABASE \"{}\"", name))
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create database {}", name))?;

        let base = self
            .connection_string
            .rsplit_once('/')
            .map(|(base, _)| base)
            .context("Malformed connection string")?;
        PgPoolOptions::new()
            .max_connections(5)
            .connect(&format!("{}/{}", base, name))
            .await
            .context("Failed to connect to created database")
    }
}
