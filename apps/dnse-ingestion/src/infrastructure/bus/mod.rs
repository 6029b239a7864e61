//! Redis Bus Gateway
//!
//! `BusPort` over Redis pub/sub. Publishes and queries share one
//! auto-reconnecting `ConnectionManager`; each subscription opens its own
//! dedicated pub/sub connection.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::application::ports::{BusError, BusMessage, BusPort};

/// Redis implementation of `BusPort`.
#[derive(Clone)]
pub struct RedisBus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl RedisBus {
    /// Connect to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns `BusError::Connection` if the URL is invalid or the server
    /// cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url).map_err(|e| BusError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Connection(e.to_string()))?;

        tracing::info!("Connected to Redis");
        Ok(Self { client, conn })
    }
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus").finish_non_exhaustive()
    }
}

#[async_trait]
impl BusPort for RedisBus {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let receivers: redis::RedisResult<i64> = conn.publish(channel, payload).await;
        receivers.map(|_| ()).map_err(|e| BusError::Publish {
            channel: channel.to_string(),
            message: e.to_string(),
        })
    }

    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, BusMessage>, BusError> {
        let subscribe_err = |e: redis::RedisError| BusError::Subscribe {
            channel: channel.to_string(),
            message: e.to_string(),
        };

        let mut pubsub = self.client.get_async_pubsub().await.map_err(subscribe_err)?;
        pubsub.subscribe(channel).await.map_err(subscribe_err)?;

        let stream = pubsub.into_on_message().map(|msg| BusMessage {
            channel: msg.get_channel_name().to_string(),
            payload: msg.get_payload_bytes().to_vec(),
        });
        Ok(stream.boxed())
    }

    async fn count_subscribers(&self, channels: &[String]) -> Result<HashMap<String, u64>, BusError> {
        if channels.is_empty() {
            return Ok(HashMap::new());
        }

        let mut cmd = redis::cmd("PUBSUB");
        cmd.arg("NUMSUB");
        for channel in channels {
            cmd.arg(channel);
        }

        let mut conn = self.conn.clone();
        let counts: Vec<(String, u64)> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::Query(e.to_string()))?;
        Ok(counts.into_iter().collect())
    }

    async fn health_check(&self) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| BusError::Query(e.to_string()))?;
        if pong.eq_ignore_ascii_case("PONG") {
            Ok(())
        } else {
            Err(BusError::Query(format!("unexpected PING reply: {pong}")))
        }
    }
}
