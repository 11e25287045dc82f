use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::time::timeout;

#[derive(Error, Debug, Clone)]
pub enum RedisError {
    #[error("redis command timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for RedisError {
    fn from(err: redis::RedisError) -> Self {
        RedisError::Redis(Arc::new(err))
    }
}

/// A very simplified redis wrapper, covering the two batch commands the seen set needs.
#[async_trait]
pub trait Client {
    /// `MGET`: one entry per key, in order, `None` for keys that do not exist.
    async fn mget(&self, keys: Vec<String>) -> Result<Vec<Option<Vec<u8>>>, RedisError>;
    /// `MSET`: set every pair in a single command.
    async fn mset(&self, items: Vec<(String, String)>) -> Result<(), RedisError>;
}

pub struct RedisClient {
    connection: MultiplexedConnection,
    command_timeout: Duration,
}

impl RedisClient {
    /// Connect to `addr`. The logical database is selected by the URL path, e.g. `redis://redis:6379/1`.
    /// The multiplexed connection is shared by every clone of the client's handle.
    pub async fn new(addr: &str, command_timeout: Duration) -> Result<RedisClient, RedisError> {
        if command_timeout.is_zero() {
            return Err(RedisError::InvalidConfiguration(
                "redis command timeout cannot be zero".to_owned(),
            ));
        }

        let client = redis::Client::open(addr)?;
        let connection = timeout(command_timeout, client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| RedisError::Timeout(command_timeout))??;

        Ok(RedisClient {
            connection,
            command_timeout,
        })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn mget(&self, keys: Vec<String>) -> Result<Vec<Option<Vec<u8>>>, RedisError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }
        let mut conn = self.connection.clone();

        // AsyncCommands::mget sends GET when given a single key, which replies with a bare value
        // instead of an array, so build the command ourselves.
        let mut cmd = redis::cmd("MGET");
        cmd.arg(&keys);
        let results = cmd.query_async(&mut conn);
        let values: Vec<Option<Vec<u8>>> = timeout(self.command_timeout, results)
            .await
            .map_err(|_| RedisError::Timeout(self.command_timeout))??;

        Ok(values)
    }

    async fn mset(&self, items: Vec<(String, String)>) -> Result<(), RedisError> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();

        let result = conn.set_multiple::<_, _, ()>(&items);
        timeout(self.command_timeout, result)
            .await
            .map_err(|_| RedisError::Timeout(self.command_timeout))??;

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRedisCall {
    Mget(Vec<String>),
    Mset(Vec<(String, String)>),
}

/// In-memory stand-in for redis, shared between clones so tests can inspect what was written.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    store: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
    error: Arc<Mutex<Option<RedisError>>>,
}

impl MockRedisClient {
    pub fn new() -> MockRedisClient {
        MockRedisClient::default()
    }

    /// Pre-populate the store.
    pub fn with_keys(self, keys: &[&str]) -> Self {
        {
            let mut store = lock(&self.store);
            for key in keys {
                store.insert(key.to_string(), String::new());
            }
        }
        self
    }

    /// Make every following command fail with `error`, or succeed again with `None`.
    pub fn fail_with(&self, error: Option<RedisError>) {
        *lock(&self.error) = error;
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        lock(&self.calls).clone()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = lock(&self.store).keys().cloned().collect();
        keys.sort();
        keys
    }

    fn check_error(&self) -> Result<(), RedisError> {
        match lock(&self.error).as_ref() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn mget(&self, keys: Vec<String>) -> Result<Vec<Option<Vec<u8>>>, RedisError> {
        lock(&self.calls).push(MockRedisCall::Mget(keys.clone()));
        self.check_error()?;

        let store = lock(&self.store);
        Ok(keys
            .iter()
            .map(|key| store.get(key).map(|value| value.clone().into_bytes()))
            .collect())
    }

    async fn mset(&self, items: Vec<(String, String)>) -> Result<(), RedisError> {
        lock(&self.calls).push(MockRedisCall::Mset(items.clone()));
        self.check_error()?;

        lock(&self.store).extend(items);
        Ok(())
    }
}

// A poisoned mock only means another test thread panicked; keep going with the data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_round_trips_through_shared_store() {
        let client = MockRedisClient::new().with_keys(&["old@mail.com"]);
        let handle = client.clone();

        client
            .mset(vec![("new@mail.com".to_owned(), String::new())])
            .await
            .unwrap();
        let values = handle
            .mget(vec![
                "old@mail.com".to_owned(),
                "new@mail.com".to_owned(),
                "none@mail.com".to_owned(),
            ])
            .await
            .unwrap();

        assert_eq!(values, vec![Some(vec![]), Some(vec![]), None]);
        assert_eq!(handle.keys(), vec!["new@mail.com", "old@mail.com"]);
        assert_eq!(handle.get_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_error_injection() {
        let client = MockRedisClient::new();
        client.fail_with(Some(RedisError::Timeout(Duration::from_millis(5))));

        assert!(client.mget(vec!["a@b.com".to_owned()]).await.is_err());
        assert!(client
            .mset(vec![("a@b.com".to_owned(), String::new())])
            .await
            .is_err());
        assert!(client.keys().is_empty());

        client.fail_with(None);
        assert!(client.mget(vec!["a@b.com".to_owned()]).await.is_ok());
    }
}
