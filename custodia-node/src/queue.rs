//! Queue protocol (section 6, "Queue protocol" and section 4.7): Redis
//! stream entries carrying a signed HTTP request envelope, plus a control
//! stream delivering [`StreamConfig`] messages.

use custodia_api_core::error::{EngineApiError, EngineErrorKind};
use custodia_api_core::models::{QueueEnvelope, SignedRequestFields, StreamConfig};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamAutoClaimOptions, StreamAutoClaimReply, StreamReadOptions, StreamReadReply};

/// Field name the envelope's JSON blob is stored under inside a stream
/// entry, matching section 6's `{data: <json>}` shape.
const DATA_FIELD: &str = "data";

/// One undelivered message read off a consumer group, along with its
/// stream-assigned id (needed to `XACK` it later).
pub struct QueueMessage {
    pub id: String,
    pub envelope: QueueEnvelope,
}

/// Ensures `stream`'s consumer group exists, tolerating `BUSYGROUP` (the
/// group already exists) the way section 4.7 specifies.
pub async fn ensure_consumer_group(
    conn: &mut MultiplexedConnection,
    stream: &str,
    group: &str,
) -> Result<(), EngineApiError> {
    let result: redis::RedisResult<()> = conn
        .xgroup_create_mkstream(stream, group, "$")
        .await;
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        Err(e) => Err(EngineApiError::new(EngineErrorKind::Server, e)),
    }
}

/// Publishes a signed request envelope onto `stream`.
pub async fn publish(
    conn: &mut MultiplexedConnection,
    stream: &str,
    request: SignedRequestFields,
) -> Result<String, EngineApiError> {
    let envelope = QueueEnvelope { request };
    let json = serde_json::to_string(&envelope)?;
    let id: String = conn
        .xadd(stream, "*", &[(DATA_FIELD, json)])
        .await
        .map_err(|e| EngineApiError::new(EngineErrorKind::Server, e))?;
    Ok(id)
}

/// Publishes a control-stream [`StreamConfig`] message.
pub async fn publish_stream_config(
    conn: &mut MultiplexedConnection,
    control_stream: &str,
    config: &StreamConfig,
) -> Result<String, EngineApiError> {
    let json = serde_json::to_string(config)?;
    let id: String = conn
        .xadd(control_stream, "*", &[(DATA_FIELD, json)])
        .await
        .map_err(|e| EngineApiError::new(EngineErrorKind::Server, e))?;
    Ok(id)
}

/// Reads up to `count` undelivered messages for `consumer` in `group` on
/// `stream`, blocking up to `block_ms` if nothing is immediately available.
pub async fn read_group(
    conn: &mut MultiplexedConnection,
    stream: &str,
    group: &str,
    consumer: &str,
    count: usize,
    block_ms: usize,
) -> Result<Vec<QueueMessage>, EngineApiError> {
    let opts = StreamReadOptions::default()
        .group(group, consumer)
        .count(count)
        .block(block_ms);
    let reply: StreamReadReply = conn
        .xread_options(&[stream], &[">"], &opts)
        .await
        .map_err(|e| EngineApiError::new(EngineErrorKind::Server, e))?;

    let mut messages = Vec::new();
    for stream_key in reply.keys {
        for entry in stream_key.ids {
            let Some(raw) = entry.map.get(DATA_FIELD) else { continue };
            let redis::Value::BulkString(bytes) = raw else { continue };
            let envelope: QueueEnvelope = serde_json::from_slice(bytes)?;
            messages.push(QueueMessage { id: entry.id, envelope });
        }
    }
    Ok(messages)
}

/// Reclaims entries that have sat unacked in `group`'s pending list for at
/// least `min_idle_ms`, reassigning them to `consumer`. This is what lets a
/// retry-after'd message (left un-acked by `worker::handle_message` so its
/// cooldown can run) come back around through `XREADGROUP` again instead of
/// sitting in the pending list forever: the worker calls this on a timer
/// and retries anything it gets back the same way it retries a fresh read.
pub async fn claim_stale(
    conn: &mut MultiplexedConnection,
    stream: &str,
    group: &str,
    consumer: &str,
    min_idle_ms: usize,
    count: usize,
) -> Result<Vec<QueueMessage>, EngineApiError> {
    let opts = StreamAutoClaimOptions::default().count(count);
    let reply: StreamAutoClaimReply = conn
        .xautoclaim_options(stream, group, consumer, min_idle_ms, "0-0", opts)
        .await
        .map_err(|e| EngineApiError::new(EngineErrorKind::Server, e))?;

    let mut messages = Vec::new();
    for entry in reply.claimed {
        let Some(raw) = entry.map.get(DATA_FIELD) else { continue };
        let redis::Value::BulkString(bytes) = raw else { continue };
        let envelope: QueueEnvelope = serde_json::from_slice(bytes)?;
        messages.push(QueueMessage { id: entry.id, envelope });
    }
    Ok(messages)
}

/// Acknowledges a successfully handled message so it won't be redelivered.
pub async fn ack(
    conn: &mut MultiplexedConnection,
    stream: &str,
    group: &str,
    id: &str,
) -> Result<(), EngineApiError> {
    let _: i64 = conn
        .xack(stream, group, &[id])
        .await
        .map_err(|e| EngineApiError::new(EngineErrorKind::Server, e))?;
    Ok(())
}
