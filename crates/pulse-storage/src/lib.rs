//! Persisted state: the three JSON projections replaced at the end of a
//! successful run, plus a hash-addressed store for diagnostic page dumps.
//!
//! Every document write is a full-file replace through a temp file + atomic
//! rename; a run that aborts mid-way never leaves a partial document behind.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use pulse_core::{normalize_url, KeywordLabel, Post};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "pulse-storage";

pub const SNAPSHOT_FILE: &str = "data.json";
pub const HISTORY_FILE: &str = "history.json";
pub const LEADERBOARD_FILE: &str = "top10.json";

/// Today's view, fully replaced each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
    pub date: NaiveDate,
    pub keywords: Vec<KeywordLabel>,
    /// Today's top-N selection.
    pub posts: Vec<Post>,
    /// Every accepted candidate of the day, for client-side filtering.
    #[serde(rename = "allPosts")]
    pub all_posts: Vec<Post>,
}

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("reading {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// The three JSON documents the display layer reads.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.root.join(SNAPSHOT_FILE)
    }

    pub fn history_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    pub fn leaderboard_path(&self) -> PathBuf {
        self.root.join(LEADERBOARD_FILE)
    }

    /// History is read once at run start. A missing file is an empty
    /// history; an unparseable one is an error, so a bad deploy can never
    /// silently truncate the append-only record.
    pub async fn load_history(&self) -> Result<Vec<Post>, DocumentError> {
        let path = self.history_path();
        match fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|source| DocumentError::Parse {
                path: path.clone(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no history file yet, starting empty");
                Ok(Vec::new())
            }
            Err(source) => Err(DocumentError::Io { path, source }),
        }
    }

    pub async fn load_snapshot(&self) -> Result<Option<DailySnapshot>, DocumentError> {
        let path = self.snapshot_path();
        match fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|source| DocumentError::Parse {
                    path: path.clone(),
                    source,
                }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(DocumentError::Io { path, source }),
        }
    }

    pub async fn load_leaderboard(&self) -> Result<Vec<Post>, DocumentError> {
        let path = self.leaderboard_path();
        match fs::read_to_string(&path).await {
            Ok(text) => serde_json::from_str(&text).map_err(|source| DocumentError::Parse {
                path: path.clone(),
                source,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(DocumentError::Io { path, source }),
        }
    }

    pub async fn save_snapshot(&self, snapshot: &DailySnapshot) -> Result<()> {
        write_json_atomic(&self.snapshot_path(), snapshot).await
    }

    pub async fn save_history(&self, history: &[Post]) -> Result<()> {
        write_json_atomic(&self.history_path(), &history).await
    }

    pub async fn save_leaderboard(&self, leaderboard: &[Post]) -> Result<()> {
        write_json_atomic(&self.leaderboard_path(), &leaderboard).await
    }
}

/// Serialize `value` and replace `path` atomically via temp file + rename.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .with_context(|| format!("serializing {}", path.display()))?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .with_context(|| format!("creating {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    let mut file = fs::File::create(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(&bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

/// Append today's selection to history, skipping normalized URLs already
/// present and stamping the entry date. Returns how many posts were added.
pub fn merge_history(history: &mut Vec<Post>, selection: &[Post], date: NaiveDate) -> usize {
    let mut seen: HashSet<String> = history.iter().map(|p| normalize_url(&p.url)).collect();
    let mut added = 0;
    for post in selection {
        if seen.insert(normalize_url(&post.url)) {
            let mut stamped = post.clone();
            stamped.date = Some(date);
            history.push(stamped);
            added += 1;
        }
    }
    added
}

/// All-time top-N by engagement score, recomputed from the full history
/// every run. Stable sort: earlier history entries win ties.
pub fn leaderboard(history: &[Post], n: usize) -> Vec<Post> {
    let mut ranked = history.to_vec();
    ranked.sort_by(|a, b| b.score().cmp(&a.score()));
    ranked.truncate(n);
    ranked
}

#[derive(Debug, Clone)]
pub struct StoredDump {
    pub content_hash: String,
    pub path: PathBuf,
    pub deduplicated: bool,
}

/// Hash-addressed store for raw page dumps captured when a source degrades
/// (checkpoint, zero cards, cards-but-nothing-accepted).
#[derive(Debug, Clone)]
pub struct DebugStore {
    root: PathBuf,
}

impl DebugStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// File-system-safe label for a search source.
    pub fn slugify(source: &str) -> String {
        source
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }

    pub async fn store_page(
        &self,
        captured_at: DateTime<Utc>,
        source: &str,
        html: &str,
    ) -> Result<StoredDump> {
        let bytes = html.as_bytes();
        let content_hash = Self::sha256_hex(bytes);
        let dir = self
            .root
            .join(captured_at.format("%Y%m%d").to_string())
            .join(Self::slugify(source));
        let path = dir.join(format!("{content_hash}.html"));

        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating {}", dir.display()))?;

        if fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))?
        {
            return Ok(StoredDump {
                content_hash,
                path,
                deduplicated: true,
            });
        }

        let temp_path = dir.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp dump {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp dump {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp dump {}", temp_path.display()))?;
        drop(file);

        match fs::rename(&temp_path, &path).await {
            Ok(()) => Ok(StoredDump {
                content_hash,
                path,
                deduplicated: false,
            }),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                let _ = fs::remove_file(&temp_path).await;
                Ok(StoredDump {
                    content_hash,
                    path,
                    deduplicated: true,
                })
            }
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming {} -> {}",
                        temp_path.display(),
                        path.display()
                    )
                })
            }
        }
    }
}
