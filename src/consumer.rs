//! Consumes event envelopes from the durable stream under a consumer-group
//! discipline: batch reads, explicit acknowledgement on success, fixed 1s
//! retry on transport failure.
//!
//! Grounded on the depth WebSocket client's always-on reconnect loop
//! (`DepthWebSocketClient::start`), generalized from exponential backoff on a
//! single connection to a flat 1s retry on a blocking batch read against a
//! consumer-group protocol.

use crate::error::{EngineError, Result};
use crate::model::EventEnvelope;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const BATCH_SIZE: usize = 10;
const BLOCK_MS: usize = 5000;
const RETRY_DELAY: Duration = Duration::from_secs(1);

pub struct Consumer {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    name: String,
}

impl Consumer {
    pub async fn connect(url: &str, password: Option<&str>, stream_key: String, group: String, name: String) -> Result<Self> {
        let mut conn_url = url.to_string();
        if let Some(pw) = password {
            if let Some(rest) = conn_url.strip_prefix("redis://") {
                conn_url = format!("redis://:{pw}@{rest}");
            }
        }
        let client = redis::Client::open(conn_url)
            .map_err(|e| EngineError::TransportError(format!("invalid stream URL: {e}")))?;
        let conn = client.get_connection_manager().await.map_err(EngineError::from)?;
        let mut consumer = Self { conn, stream_key, group, name };
        consumer.ensure_group().await?;
        Ok(consumer)
    }

    /// Creates the consumer group if it doesn't already exist. Idempotent:
    /// `BUSYGROUP` (already exists) is swallowed.
    async fn ensure_group(&mut self) -> Result<()> {
        let result: redis::RedisResult<()> = self
            .conn
            .xgroup_create_mkstream(&self.stream_key, &self.group, "$")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(EngineError::from(e)),
        }
    }

    /// Reads up to `BATCH_SIZE` new messages, blocking up to 5s, and invokes
    /// `handler` for each. Acknowledges only on success; on handler failure
    /// the message is left for redelivery unless the error says to ack
    /// anyway (malformed/unknown/invalid payloads that will never succeed).
    pub async fn run<F, Fut>(&mut self, cancel: CancellationToken, mut handler: F)
    where
        F: FnMut(EventEnvelope) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        loop {
            if cancel.is_cancelled() {
                info!("consumer loop cancelled, exiting");
                return;
            }

            match self.read_batch().await {
                Ok(entries) => {
                    for (id, data) in entries {
                        let outcome = match EventEnvelope::parse(&data) {
                            Ok(envelope) => handler(envelope).await,
                            Err(e) => Err(e),
                        };

                        match outcome {
                            Ok(()) => {
                                if let Err(e) = self.ack(&id).await {
                                    warn!(error = %e, id = %id, "failed to ack message");
                                }
                            }
                            Err(e) if e.should_ack() => {
                                warn!(error = %e, id = %id, "processing failed, acknowledging anyway");
                                if let Err(ack_err) = self.ack(&id).await {
                                    warn!(error = %ack_err, id = %id, "failed to ack message");
                                }
                            }
                            Err(e) => {
                                error!(error = %e, id = %id, "processing failed, leaving unacknowledged for redelivery");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "stream read failed, retrying in 1s");
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn read_batch(&mut self) -> Result<Vec<(String, String)>> {
        let opts = StreamReadOptions::default()
            .group(&self.group, &self.name)
            .count(BATCH_SIZE)
            .block(BLOCK_MS);

        let reply: StreamReadReply = self
            .conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .map_err(EngineError::from)?;

        let mut out = Vec::new();
        for key in reply.keys {
            for id in key.ids {
                match id.map.get("data") {
                    Some(redis::Value::BulkString(bytes)) => {
                        let data = String::from_utf8_lossy(bytes).to_string();
                        out.push((id.id.clone(), data));
                    }
                    Some(_) | None => {
                        debug!(id = %id.id, "message missing `data` field, will surface as malformed");
                        out.push((id.id.clone(), String::new()));
                    }
                }
            }
        }
        Ok(out)
    }

    async fn ack(&mut self, id: &str) -> Result<()> {
        self.conn
            .xack::<_, _, _, ()>(&self.stream_key, &self.group, &[id])
            .await
            .map_err(EngineError::from)
    }
}
