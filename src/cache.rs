//! Publishes the latest report for a symbol to the cache at `report:{symbol}`
//! with a TTL.
//!
//! Grounded on the report cache's TTL-on-read idiom (`ReportCache::get`/
//! `set`), adapted from an in-process `Mutex<HashMap<_, Instant>>` to an
//! external write-through KV store, since the read path that serves cached
//! reports runs in a separate process.

use crate::error::{EngineError, Result};
use crate::report::Report;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::error;

pub struct CachePublisher {
    conn: ConnectionManager,
    ttl: Duration,
}

impl CachePublisher {
    pub async fn connect(url: &str, password: Option<&str>, ttl: Duration) -> Result<Self> {
        let mut conn_url = url.to_string();
        if let Some(pw) = password {
            conn_url = inject_password(&conn_url, pw);
        }
        let client = redis::Client::open(conn_url)
            .map_err(|e| EngineError::CacheUnavailable(format!("invalid cache URL: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(EngineError::from)?;
        Ok(Self { conn, ttl })
    }

    /// Writes `report:{symbol}` with the configured TTL. Returns
    /// `CacheUnavailable`/`TransportError` on failure; callers must propagate
    /// this upward so the originating message is not acknowledged.
    pub async fn publish(&mut self, report: &Report) -> Result<()> {
        let key = format!("report:{}", report.symbol);
        let body = serde_json::to_string(report)?;
        let ttl_secs = self.ttl.as_secs().max(1);

        self.conn
            .set_ex::<_, _, ()>(&key, body, ttl_secs)
            .await
            .map_err(|e| {
                error!(symbol = %report.symbol, error = %e, "failed to publish report to cache");
                EngineError::from(e)
            })
    }

    pub async fn ping(&mut self) -> Result<()> {
        redis::cmd("PING")
            .query_async::<()>(&mut self.conn)
            .await
            .map_err(EngineError::from)
    }
}

fn inject_password(url: &str, password: &str) -> String {
    if let Some(rest) = url.strip_prefix("redis://") {
        format!("redis://:{password}@{rest}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_injection_leaves_scheme() {
        let url = inject_password("redis://127.0.0.1:6379", "s3cr3t");
        assert_eq!(url, "redis://:s3cr3t@127.0.0.1:6379");
    }
}
