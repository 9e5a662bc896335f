use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};

/// Shared multiplexed Redis connection.
///
/// `ConnectionManager` reconnects on failure and is cheap to clone; one
/// instance is shared by the counter store and the pub/sub transport.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    pub async fn from_url(url: &str) -> RedisResult<Self> {
        let client = Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self { manager })
    }

    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}
