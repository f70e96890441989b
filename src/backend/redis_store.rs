use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::BackendError;

use super::Backend;

/// INCR plus EXPIRE-on-create in one server-side step. Two workers racing on
/// a fresh key cannot both observe "new" and overwrite each other's expiry.
const INCR_WITH_EXPIRY_LUA: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Backend shared by every worker through a Redis-compatible server.
///
/// The connection is opened on first use. A failed connect is reported as
/// [`BackendError::Unavailable`] and retried on the next call; once open, the
/// connection manager reconnects on its own.
pub struct RedisBackend {
    client: Client,
    connection: OnceCell<ConnectionManager>,
    key_prefix: String,
    incr_script: Script,
}

impl RedisBackend {
    /// Validate `url` and prepare a client. No network traffic happens here.
    pub fn open(url: &str, key_prefix: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::open(url).map_err(|err| {
            BackendError::unavailable(format!("invalid backend url: {err}"))
        })?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            key_prefix: key_prefix.into(),
            incr_script: Script::new(INCR_WITH_EXPIRY_LUA),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, BackendError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                debug!("Opening backend connection");
                ConnectionManager::new(self.client.clone()).await
            })
            .await?;
        Ok(manager.clone())
    }

    fn key(&self, key: &str) -> String {
        namespaced(&self.key_prefix, key)
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn incr_with_expiry(&self, key: &str, ttl_secs: u64) -> Result<u64, BackendError> {
        let mut conn = self.connection().await?;
        let count: i64 = self
            .incr_script
            .key(self.key(key))
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;

        u64::try_from(count)
            .map_err(|_| BackendError::protocol(format!("negative counter value {count}")))
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(self.key(key)).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set_with_ttl(
        &self,
        key: &str,
        value: Bytes,
        ttl_secs: u64,
    ) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let () = conn.set_ex(self.key(key), value.as_ref(), ttl_secs).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        let mut conn = self.connection().await?;
        let () = conn.del(self.key(key)).await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

fn namespaced(prefix: &str, key: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + key.len());
    out.push_str(prefix);
    out.push_str(key);
    out
}
