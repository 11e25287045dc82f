//! The set of emails we have already seen, kept in redis.
//!
//! Each email is a redis key holding an empty marker value. Keys never expire: absence of a key
//! is the only signal that an email is new.
//!
//! `filter_unseen` and `mark_seen` are separate commands and nothing ties them together. Two
//! cycles that find the same new email at the same time can both see it as unseen and both count
//! it as unique. Counting is at-least-once; we accept that rather than lock across cycles.
use std::collections::HashSet;
use std::sync::Arc;

use tracing::debug;

use crate::redis::{Client, RedisError};

/// Value stored under each seen email.
pub const SEEN_MARKER: &str = "";

#[derive(Clone)]
pub struct SeenEmails {
    client: Arc<dyn Client + Send + Sync>,
}

impl SeenEmails {
    pub fn new(client: Arc<dyn Client + Send + Sync>) -> Self {
        Self { client }
    }

    /// Return the subset of `emails` that is not in the store yet, with a single `MGET`.
    /// The store is not modified.
    pub async fn filter_unseen(
        &self,
        emails: &HashSet<String>,
    ) -> Result<HashSet<String>, RedisError> {
        if emails.is_empty() {
            return Ok(HashSet::new());
        }

        let keys: Vec<String> = emails.iter().cloned().collect();
        let values = self.client.mget(keys.clone()).await?;

        let unseen: HashSet<String> = keys
            .into_iter()
            .zip(values)
            .filter_map(|(email, value)| value.is_none().then_some(email))
            .collect();

        debug!(
            candidates = emails.len(),
            unseen = unseen.len(),
            "filtered seen emails"
        );

        Ok(unseen)
    }

    /// Record every email in `emails` as seen, with a single `MSET`.
    pub async fn mark_seen(&self, emails: &HashSet<String>) -> Result<(), RedisError> {
        if emails.is_empty() {
            return Ok(());
        }

        let items = emails
            .iter()
            .map(|email| (email.clone(), SEEN_MARKER.to_owned()))
            .collect();

        self.client.mset(items).await
    }
}
