//! SQL Server session owned by one [`MssqlDatabase`].

use std::time::{Duration, Instant};

use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Row, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::error::{MergeError, Result};

/// Maximum TDS packet size (32767 bytes, ~32KB).
const TDS_MAX_PACKET_SIZE: u32 = 32767;

/// TCP keepalive interval (30 seconds).
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) type MssqlClient = Client<Compat<TcpStream>>;

/// One SQL Server database reached over a single, exclusively owned session.
///
/// Session-scoped settings such as `IDENTITY_INSERT` persist between calls
/// because every statement runs on the same connection. Dropping the value
/// closes the socket; [`MssqlDatabase::close`] ends the session cleanly.
pub struct MssqlDatabase {
    client: Mutex<MssqlClient>,
    pub(crate) database: String,
    pub(crate) schema: String,
}

fn build_config(db: &DatabaseConfig) -> Config {
    let mut config = Config::new();
    config.host(&db.host);
    config.port(db.port);
    config.database(&db.database);
    config.authentication(AuthMethod::sql_server(&db.user, &db.password));

    if db.encrypt {
        if db.trust_server_cert {
            config.trust_cert();
        }
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::NotSupported);
    }

    config.packet_size(TDS_MAX_PACKET_SIZE);
    config
}

async fn open_tcp(config: &Config) -> Result<TcpStream> {
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|e| MergeError::connection(e, format!("connecting to {}", config.get_addr())))?;
    tcp.set_nodelay(true).ok();

    let std_tcp = match tcp.into_std() {
        Ok(std_tcp) => std_tcp,
        Err(e) => {
            warn!("Failed to configure TCP keepalives on MSSQL connection: {}", e);
            return TcpStream::connect(config.get_addr())
                .await
                .map_err(|e| MergeError::connection(e, "reconnecting without keepalive"));
        }
    };

    let socket = socket2::Socket::from(std_tcp);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(TCP_KEEPALIVE_INTERVAL)
        .with_interval(TCP_KEEPALIVE_INTERVAL);
    if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
        warn!("Failed to set TCP keepalive on MSSQL connection: {}", e);
    }

    let std_tcp: std::net::TcpStream = socket.into();
    std_tcp.set_nonblocking(true).ok();
    TcpStream::from_std(std_tcp).map_err(|e| MergeError::connection(e, "converting socket"))
}

impl MssqlDatabase {
    /// Open the session for one configured database.
    pub async fn connect(db: &DatabaseConfig) -> Result<Self> {
        let config = build_config(db);
        let tcp = open_tcp(&config).await?;
        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| MergeError::connection(e, format!("logging in to {}", db.display_name())))?;

        info!("Connected to MSSQL: {}", db.display_name());

        Ok(Self {
            client: Mutex::new(client),
            database: db.database.clone(),
            schema: db.schema.clone(),
        })
    }

    /// Round-trip a trivial query and report the latency.
    pub async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        let mut client = self.client.lock().await;
        client.simple_query("SELECT 1").await?.into_row().await?;
        Ok(start.elapsed())
    }

    /// End the session.
    pub async fn close(self) -> Result<()> {
        let client = self.client.into_inner();
        client.close().await?;
        debug!("Closed MSSQL session for {}", self.database);
        Ok(())
    }

    /// Run a parameterized query and collect the first result set.
    pub(crate) async fn query(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>> {
        let mut client = self.client.lock().await;
        let stream = client.query(sql, params).await?;
        Ok(stream.into_first_result().await?)
    }

    /// Run a parameterized statement and return the rows affected.
    pub(crate) async fn execute_raw(
        &self,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> std::result::Result<u64, tiberius::error::Error> {
        debug!("Executing: {}", sql);
        let mut client = self.client.lock().await;
        let result = client.execute(sql, params).await?;
        Ok(result.total())
    }

    /// Run a plain batch at session scope.
    ///
    /// `SET` options issued here outlive the batch, unlike inside `sp_executesql`.
    pub(crate) async fn batch_raw(&self, sql: &str) -> std::result::Result<(), tiberius::error::Error> {
        debug!("Executing batch: {}", sql);
        let mut client = self.client.lock().await;
        client.simple_query(sql).await?.into_results().await?;
        Ok(())
    }

    /// Run a structural statement; any failure becomes `MergeError::Structural`.
    pub(crate) async fn ddl(
        &self,
        operation: &str,
        object: &str,
        sql: &str,
        params: &[&dyn ToSql],
    ) -> Result<u64> {
        self.execute_raw(sql, params)
            .await
            .map_err(|e| MergeError::structural(operation, object, e))
    }
}
