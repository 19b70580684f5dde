//! Job-result handoff.
//!
//! A packaged result can be parked here instead of being streamed in the
//! conversion response. The client gets a token and fetches the file once
//! with it; fetching removes the entry and the file goes away when the
//! returned [`StoredResult`] is dropped. Entries nobody collects are
//! removed by [`ResultStore::sweep_expired`].

use crate::error::{ConvertError, Result};
use crate::package::PackagedResult;
use crate::workspace::remove_file_quietly;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A parked result. Dropping it deletes the file.
#[derive(Debug)]
pub struct StoredResult {
    pub token: String,
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    stored_at: Instant,
}

impl StoredResult {
    pub fn age(&self) -> Duration {
        self.stored_at.elapsed()
    }
}

impl Drop for StoredResult {
    fn drop(&mut self) {
        if remove_file_quietly(&self.path) {
            debug!(token = %self.token, "stored result removed");
        }
    }
}

/// What the client receives instead of the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffTicket {
    pub token: String,
    pub file_name: String,
    pub content_type: String,
    pub size: u64,
    pub expires_in_secs: u64,
}

#[derive(Debug)]
pub struct ResultStore {
    dir: PathBuf,
    ttl: Duration,
    entries: RwLock<HashMap<String, StoredResult>>,
}

fn new_token() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

impl ResultStore {
    /// Opens the store in `dir`, removing anything a previous process left.
    pub async fn open(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ConvertError::workspace("create_results_dir", &dir, e))?;

        let mut stale = 0usize;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| ConvertError::workspace("read_results_dir", &dir, e))?;
        while let Some(entry) = entries.next_entry().await? {
            if remove_file_quietly(&entry.path()) {
                stale += 1;
            }
        }
        if stale > 0 {
            info!(stale, dir = %dir.display(), "removed results left by a previous run");
        }

        Ok(Self {
            dir,
            ttl,
            entries: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Moves the packaged file into the store and returns its ticket.
    pub async fn store(&self, packaged: &PackagedResult) -> Result<HandoffTicket> {
        let token = new_token();
        let destination = self.dir.join(&token);
        move_file(&packaged.path, &destination).await?;

        let ticket = HandoffTicket {
            token: token.clone(),
            file_name: packaged.download_name.clone(),
            content_type: packaged.content_type.clone(),
            size: packaged.size,
            expires_in_secs: self.ttl.as_secs(),
        };
        let stored = StoredResult {
            token: token.clone(),
            path: destination,
            file_name: packaged.download_name.clone(),
            content_type: packaged.content_type.clone(),
            size: packaged.size,
            stored_at: Instant::now(),
        };
        self.entries.write().await.insert(token, stored);
        debug!(token = %ticket.token, size = ticket.size, "result parked");
        Ok(ticket)
    }

    /// Removes and returns the entry for `token` unless it has expired.
    pub async fn take(&self, token: &str) -> Option<StoredResult> {
        let stored = self.entries.write().await.remove(token)?;
        if stored.age() > self.ttl {
            debug!(token, "result expired before it was fetched");
            return None;
        }
        Some(stored)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops every entry older than the TTL. Returns how many went.
    pub async fn sweep_expired(&self) -> usize {
        let expired: Vec<StoredResult> = {
            let mut entries = self.entries.write().await;
            let tokens: Vec<String> = entries
                .iter()
                .filter(|(_, stored)| stored.age() > self.ttl)
                .map(|(token, _)| token.clone())
                .collect();
            tokens.iter().filter_map(|token| entries.remove(token)).collect()
        };
        let removed = expired.len();
        drop(expired);
        if removed > 0 {
            info!(removed, "expired results swept");
        }
        removed
    }

    /// Drops every entry, expired or not.
    pub async fn clear(&self) -> usize {
        let drained: Vec<StoredResult> = self.entries.write().await.drain().map(|(_, stored)| stored).collect();
        drained.len()
    }
}

async fn move_file(from: &Path, to: &Path) -> Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        // Different filesystem: fall back to copy + unlink.
        Err(e) if e.kind() != io::ErrorKind::NotFound => {
            warn!(error = %e, "rename into result store failed, copying instead");
            tokio::fs::copy(from, to)
                .await
                .map_err(|e| ConvertError::workspace("copy_result", to, e))?;
            remove_file_quietly(from);
            Ok(())
        }
        Err(e) => Err(ConvertError::workspace("move_result", from, e)),
    }
}
