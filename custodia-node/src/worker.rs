//! The queue worker (section 4.7): consumes signed request envelopes off a
//! Redis stream consumer group and forwards each to the engine's own HTTP
//! surface, so the signature-verification middleware in `server` runs
//! uniformly whether a request arrived directly or through the queue.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use custodia_tokio::notify_once::NotifyOnce;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use reqwest::Client;

use crate::queue::{self, QueueMessage};

/// Fallback wait if the engine signals retry without naming a duration.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);
/// Messages pulled off the stream per `XREADGROUP` call.
const BATCH_SIZE: usize = 16;
/// How long a `XREADGROUP` blocks waiting for new entries before looping
/// back around to check for a shutdown signal.
const BLOCK_MS: usize = 2_000;
/// How often the worker sweeps the pending list for retry-after'd messages
/// whose cooldown may have elapsed.
const RECLAIM_INTERVAL: Duration = Duration::from_secs(5);
/// An entry must have sat unacked for at least this long before it's
/// eligible for reclaim, so a message still being forwarded isn't yanked
/// back mid-flight.
const RECLAIM_MIN_IDLE_MS: usize = 3_000;

pub struct WorkerConfig {
    pub redis_url: String,
    pub engine_base_url: String,
    pub stream: String,
    pub consumer_group: String,
    pub consumer_name: String,
}

/// Tracks `(stream, group, id)` triples already handled in this process, so
/// a redelivered message that raced a concurrent ack isn't processed twice
/// within the same worker.
#[derive(Default)]
struct SeenIds {
    seen: Mutex<HashSet<String>>,
}

impl SeenIds {
    fn mark_if_new(&self, key: &str) -> bool {
        self.seen.lock().unwrap().insert(key.to_owned())
    }

    /// Un-marks `key`, so a later reclaim of the same message id is treated
    /// as new rather than silently dropped as a duplicate.
    fn forget(&self, key: &str) {
        self.seen.lock().unwrap().remove(key);
    }
}

pub async fn run(
    config: WorkerConfig,
    mut shutdown: NotifyOnce,
) -> Result<(), EngineApiError> {
    let client = redis::Client::open(config.redis_url.as_str())
        .map_err(|e| EngineApiError::new(EngineErrorKind::Server, e))?;
    let mut conn = client
        .get_multiplexed_tokio_connection()
        .await
        .map_err(|e| EngineApiError::new(EngineErrorKind::Server, e))?;

    queue::ensure_consumer_group(&mut conn, &config.stream, &config.consumer_group).await?;

    let http = Client::new();
    let seen = SeenIds::default();
    let mut reclaim_tick = tokio::time::interval(RECLAIM_INTERVAL);
    reclaim_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.recv() => return Ok(()),
            result = queue::read_group(
                &mut conn,
                &config.stream,
                &config.consumer_group,
                &config.consumer_name,
                BATCH_SIZE,
                BLOCK_MS,
            ) => {
                for message in result? {
                    handle_message(&config, &mut conn, &http, &seen, message).await;
                }
            }
            _ = reclaim_tick.tick() => {
                match queue::claim_stale(
                    &mut conn,
                    &config.stream,
                    &config.consumer_group,
                    &config.consumer_name,
                    RECLAIM_MIN_IDLE_MS,
                    BATCH_SIZE,
                ).await {
                    Ok(reclaimed) => {
                        for message in reclaimed {
                            handle_message(&config, &mut conn, &http, &seen, message).await;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to reclaim pending queue messages"),
                }
            }
        }
    }
}

async fn handle_message(
    config: &WorkerConfig,
    conn: &mut MultiplexedConnection,
    http: &Client,
    seen: &SeenIds,
    message: QueueMessage,
) {
    let retry_key = format!("retry-after:{}", message.id);
    let blocked: bool = conn.exists(&retry_key).await.unwrap_or(false);
    if blocked {
        return;
    }

    let dedup_key = format!("{}:{}:{}", config.stream, config.consumer_group, message.id);
    if !seen.mark_if_new(&dedup_key) {
        return;
    }

    match forward(config, http, &message).await {
        Ok(Some(retry_after)) => {
            let seconds = retry_after.as_secs().max(1);
            if let Err(e) = conn
                .set_ex::<_, _, ()>(&retry_key, "1", seconds)
                .await
            {
                tracing::warn!(error = %e, id = %message.id, "failed to record retry-after key");
            }
            // Left un-acked on purpose: the message stays in the consumer
            // group's pending list until `claim_stale` hands it back after
            // the retry-after key above expires.
            seen.forget(&dedup_key);
        }
        Ok(None) => {
            if let Err(e) =
                queue::ack(conn, &config.stream, &config.consumer_group, &message.id).await
            {
                tracing::warn!(error = %e, id = %message.id, "failed to ack queue message");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, id = %message.id, "failed to forward queued request");
            // Not acked and not retry-keyed; `claim_stale` will hand this
            // back on the next sweep.
            seen.forget(&dedup_key);
        }
    }
}

/// Replays a signed request envelope against the engine's own HTTP surface.
/// Returns `Ok(Some(duration))` if the engine asked the worker to back off,
/// `Ok(None)` on success (message should be acked), or an error otherwise.
async fn forward(
    config: &WorkerConfig,
    http: &Client,
    message: &QueueMessage,
) -> Result<Option<Duration>, EngineApiError> {
    let req = &message.envelope.request;
    let url = format!(
        "{}{}",
        config.engine_base_url.trim_end_matches('/'),
        req.path
    );
    let method = reqwest::Method::from_bytes(req.method.as_bytes())
        .map_err(|e| EngineApiError::new(EngineErrorKind::Decode, e))?;

    let mut builder = http.request(method, url).body(req.body.clone());
    for (name, value) in &req.headers {
        builder = builder.header(name, value);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| EngineApiError::new(EngineErrorKind::Connect, e))?;

    let status = response.status();
    let header_retry_secs = response
        .headers()
        .get("x-retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let wants_retry = header_retry_secs.is_some() || matches!(status.as_u16(), 429 | 503);
    if wants_retry {
        let wait = header_retry_secs.map(Duration::from_secs).unwrap_or(DEFAULT_RETRY_AFTER);
        return Ok(Some(wait));
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EngineApiError::new(
            EngineErrorKind::Server,
            format!("engine returned {status}: {body}"),
        ));
    }

    Ok(None)
}
