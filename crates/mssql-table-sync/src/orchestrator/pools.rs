//! Pooled tiberius connections and the sessions handed to table workers.
//!
//! One [`MssqlPool`] exists per connection role (source, destination,
//! staging). Workers check out an owned connection per role for the length of
//! one attempt, so concurrent workers never share a connection.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use tokio::sync::OnceCell;
use tiberius::{AuthMethod, Client, Config as TiberiusConfig, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::config::{Config, ConnectionConfig};
use crate::core::traits::{CatalogSession, SessionFactory, SqlSession};
use crate::error::{SyncError, Result};
use crate::source::{query_base_tables, query_columns, ColumnDescriptor};

/// Tiberius client over a tokio TCP stream.
pub type MssqlClient = Client<Compat<TcpStream>>;

/// Connection acquisition timeout from pool (30 seconds).
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Idle connection timeout (5 minutes).
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: ConnectionConfig,
}

impl TiberiusConnectionManager {
    fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }

    fn build_config(&self) -> TiberiusConfig {
        let mut config = TiberiusConfig::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encryption_enabled() {
            if self.config.trust_server_cert {
                config.trust_cert();
            }
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            }
        })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// bb8 pool of tiberius clients for one connection role.
pub struct MssqlPool {
    pool: Pool<TiberiusConnectionManager>,
    config: ConnectionConfig,
}

impl MssqlPool {
    /// Create a pool and verify it with a test query.
    pub async fn new(config: ConnectionConfig, max_size: u32) -> Result<Self> {
        let endpoint = config.endpoint();
        let manager = TiberiusConnectionManager::new(config.clone());
        let pool = Pool::builder()
            .max_size(max_size.max(1))
            .connection_timeout(POOL_CONNECTION_TIMEOUT)
            .idle_timeout(Some(POOL_IDLE_TIMEOUT))
            .test_on_check_out(true)
            .build(manager)
            .await
            .map_err(|e| SyncError::pool(e, format!("creating MSSQL pool for {}", endpoint)))?;

        // Test connection
        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| SyncError::pool(e, format!("testing MSSQL connection to {}", endpoint)))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!("Connected to MSSQL: {} (pool_size={})", endpoint, max_size.max(1));
        Ok(Self { pool, config })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Borrow a pooled connection.
    pub async fn get_conn(&self) -> Result<PooledConnection<'_, TiberiusConnectionManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| SyncError::pool(e, format!("getting connection to {}", self.config.endpoint())))
    }

    /// Check out a connection owned by the caller until dropped.
    pub async fn session(&self) -> Result<PooledSession> {
        let conn = self
            .pool
            .get_owned()
            .await
            .map_err(|e| SyncError::pool(e, format!("opening session on {}", self.config.endpoint())))?;
        Ok(PooledSession { conn })
    }

    /// Round-trip a trivial query and return its latency.
    pub async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        let mut conn = self.get_conn().await?;
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(start.elapsed())
    }
}

/// A pooled connection exclusively owned by one worker.
pub struct PooledSession {
    conn: PooledConnection<'static, TiberiusConnectionManager>,
}

#[async_trait]
impl SqlSession for PooledSession {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        debug!("Executing: {}", sql);
        // simple_query keeps BEGIN/COMMIT outside sp_executesql
        self.conn.simple_query(sql).await?.into_results().await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogSession for PooledSession {
    async fn base_tables(&mut self, schema: &str) -> Result<Vec<String>> {
        query_base_tables(&mut *self.conn, schema).await
    }

    async fn columns(&mut self, schema: &str, table: &str) -> Result<Vec<ColumnDescriptor>> {
        query_columns(&mut *self.conn, schema, table).await
    }
}

/// Session factory over the source, destination and staging pools.
pub struct MssqlSessionFactory {
    source: MssqlPool,
    destination: MssqlPool,
    staging: MssqlPool,
}

impl MssqlSessionFactory {
    /// Open the three role pools, each sized to the batch size.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let size = u32::try_from(config.sync.batch_size).unwrap_or(u32::MAX);

        let source = MssqlPool::new(config.source.clone(), size).await?;
        let destination = MssqlPool::new(config.destination.clone(), size).await?;
        let staging = MssqlPool::new(config.staging_config(), size).await?;

        Ok(Self {
            source,
            destination,
            staging,
        })
    }
}

#[async_trait]
impl SessionFactory for MssqlSessionFactory {
    async fn source(&self) -> Result<Box<dyn CatalogSession>> {
        Ok(Box::new(self.source.session().await?))
    }

    async fn destination(&self) -> Result<Box<dyn SqlSession>> {
        Ok(Box::new(self.destination.session().await?))
    }

    async fn staging(&self) -> Result<Box<dyn SqlSession>> {
        Ok(Box::new(self.staging.session().await?))
    }
}

/// Session factory that opens its pools on first use.
///
/// Nothing connects until [`SessionFactory::connect`] or the first session
/// request, so a disabled job never reaches the source, destination or
/// staging servers.
pub struct LazySessionFactory {
    config: Config,
    inner: OnceCell<MssqlSessionFactory>,
}

impl LazySessionFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            inner: OnceCell::new(),
        }
    }

    async fn factory(&self) -> Result<&MssqlSessionFactory> {
        self.inner
            .get_or_try_init(|| MssqlSessionFactory::from_config(&self.config))
            .await
    }
}

#[async_trait]
impl SessionFactory for LazySessionFactory {
    async fn connect(&self) -> Result<()> {
        self.factory().await.map(|_| ())
    }

    async fn source(&self) -> Result<Box<dyn CatalogSession>> {
        self.factory().await?.source().await
    }

    async fn destination(&self) -> Result<Box<dyn SqlSession>> {
        self.factory().await?.destination().await
    }

    async fn staging(&self) -> Result<Box<dyn SqlSession>> {
        self.factory().await?.staging().await
    }
}
