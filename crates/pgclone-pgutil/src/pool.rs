use std::str::FromStr;

use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use postgres_openssl::MakeTlsConnector;
use tokio_postgres::Config;

use pgclone_common::Error;

/// A pooled connection source for phases that open many short-lived
/// connections against the same endpoint: vacuum workers, the sequence
/// worker, and `compare`. The copy and index pools intentionally do *not*
/// use a pool -- each of their workers owns one dedicated connection for the
/// lifetime of a work item, per spec.md §4.3/§4.4.
pub fn build_pool(uri: &str, max_size: usize) -> Result<Pool, Error> {
    let config = Config::from_str(uri)
        .map_err(|e| Error::Other(anyhow::anyhow!("invalid connection string: {e}")))?;
    let mut builder = SslConnector::builder(SslMethod::tls())
        .map_err(|e| Error::Other(anyhow::anyhow!("failed to build TLS connector: {e}")))?;
    builder.set_verify(SslVerifyMode::NONE);
    let connector = MakeTlsConnector::new(builder.build());

    let manager = Manager::from_config(
        config,
        connector,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    Pool::builder(manager)
        .max_size(max_size.max(1))
        .build()
        .map_err(|e| Error::Other(anyhow::anyhow!("building connection pool: {e}")))
}
