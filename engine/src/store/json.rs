//! Corpus store backed by a directory of JSON files.
//!
//! Layout:
//!
//! ```text
//! <root>/attendees.json       array of attendees
//! <root>/offerings.json       array of offerings (with embeddings)
//! <root>/requests.json        array of requests (with synthetic offerings)
//! <root>/matches/<source>.json one match set per source, e.g. request-7.json
//! ```
//!
//! Every write goes to a temporary file first and is renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use confmatch_embeddings::Embedding;

use super::{CorpusStore, CorpusTables};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    Attendee, EntityId, MatchSet, Offering, OfferingId, Request, RequestId, SyntheticOffering,
};

const ATTENDEES_FILE: &str = "attendees.json";
const OFFERINGS_FILE: &str = "offerings.json";
const REQUESTS_FILE: &str = "requests.json";
const MATCHES_DIR: &str = "matches";

/// A [`CorpusStore`] persisted as JSON files under one directory.
pub struct JsonCorpusStore {
    /// Root directory of the corpus.
    root: PathBuf,

    /// In-memory copy of every table, written through on change.
    tables: RwLock<CorpusTables>,
}

impl JsonCorpusStore {
    /// Open the corpus at `root`, creating the directory layout if needed.
    ///
    /// Missing table files are treated as empty tables.
    pub async fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();

        fs::create_dir_all(root.join(MATCHES_DIR))
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", root.display())))?;

        let attendees: Vec<Attendee> = read_table(&root.join(ATTENDEES_FILE)).await?;
        let offerings: Vec<Offering> = read_table(&root.join(OFFERINGS_FILE)).await?;
        let requests: Vec<Request> = read_table(&root.join(REQUESTS_FILE)).await?;

        let mut tables = CorpusTables::new(attendees, offerings, requests);
        load_match_sets(&root.join(MATCHES_DIR), &mut tables).await?;

        info!(
            "Opened corpus at {}: {} attendees, {} offerings, {} requests, {} match sets",
            root.display(),
            tables.attendees.len(),
            tables.offerings.len(),
            tables.requests.len(),
            tables.match_sets.len()
        );

        Ok(Self {
            root,
            tables: RwLock::new(tables),
        })
    }

    /// Create (or overwrite) a corpus at `root` from the given tables.
    pub async fn create(
        root: impl AsRef<Path>,
        attendees: Vec<Attendee>,
        offerings: Vec<Offering>,
        requests: Vec<Request>,
    ) -> StoreResult<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", root.display())))?;

        write_json(&root.join(ATTENDEES_FILE), &attendees).await?;
        write_json(&root.join(OFFERINGS_FILE), &offerings).await?;
        write_json(&root.join(REQUESTS_FILE), &requests).await?;

        Self::open(root).await
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn match_set_path(&self, source: EntityId) -> PathBuf {
        self.root
            .join(MATCHES_DIR)
            .join(format!("{}.json", source.file_stem()))
    }

    async fn write_offerings(
        &self,
        offerings: &IndexMap<OfferingId, Offering>,
    ) -> StoreResult<()> {
        let offerings: Vec<&Offering> = offerings.values().collect();
        write_json(&self.root.join(OFFERINGS_FILE), &offerings).await
    }

    async fn write_requests(&self, requests: &IndexMap<RequestId, Request>) -> StoreResult<()> {
        let requests: Vec<&Request> = requests.values().collect();
        write_json(&self.root.join(REQUESTS_FILE), &requests).await
    }

    /// Put back the files of match sets committed before a batch failed.
    async fn restore_match_sets(&self, tables: &CorpusTables, committed: &[MatchSet]) {
        for set in committed {
            let path = self.match_set_path(set.source);
            let restored = match tables.match_sets.get(&set.source) {
                Some(previous) => write_json(&path, previous).await,
                None => fs::remove_file(&path)
                    .await
                    .map_err(|e| StoreError::DeleteFile(format!("{}: {e}", path.display()))),
            };
            if let Err(e) = restored {
                warn!("Failed to roll back match set {}: {e}", set.source);
            }
        }
    }
}

#[async_trait]
impl CorpusStore for JsonCorpusStore {
    async fn attendees(&self) -> StoreResult<Vec<Attendee>> {
        Ok(self.tables.read().await.attendees.values().cloned().collect())
    }

    async fn offerings(&self) -> StoreResult<Vec<Offering>> {
        Ok(self.tables.read().await.offerings.values().cloned().collect())
    }

    async fn requests(&self) -> StoreResult<Vec<Request>> {
        Ok(self.tables.read().await.requests.values().cloned().collect())
    }

    async fn save_embeddings(&self, updates: Vec<(EntityId, Embedding)>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let count = updates.len();

        // Memory changes only once the file holding the change is on disk.
        let mut staged = tables.statements();
        let touched = staged.apply_embeddings(updates)?;
        if touched.offerings {
            self.write_offerings(&staged.offerings).await?;
            tables.offerings = staged.offerings;
        }
        if touched.requests {
            self.write_requests(&staged.requests).await?;
            tables.requests = staged.requests;
        }
        debug!("Saved {count} embeddings");
        Ok(())
    }

    async fn save_synthetic_offerings(
        &self,
        updates: Vec<(RequestId, SyntheticOffering)>,
    ) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let count = updates.len();

        let mut staged = tables.statements();
        staged.apply_synthetic(updates)?;
        self.write_requests(&staged.requests).await?;
        tables.requests = staged.requests;
        debug!("Saved {count} synthetic offerings");
        Ok(())
    }

    async fn save_match_sets(&self, sets: Vec<MatchSet>) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.check_match_sets(&sets)?;

        // Stage every file first so a failed write leaves no set behind.
        let mut staged: Vec<(PathBuf, PathBuf)> = Vec::with_capacity(sets.len());
        for set in &sets {
            let path = self.match_set_path(set.source);
            match write_temp(&path, set).await {
                Ok(temp_path) => staged.push((temp_path, path)),
                Err(e) => {
                    discard(&staged).await;
                    return Err(e);
                }
            }
        }

        for (committed, (temp_path, path)) in staged.iter().enumerate() {
            if let Err(e) = commit(temp_path, path).await {
                discard(&staged[committed..]).await;
                self.restore_match_sets(&tables, &sets[..committed]).await;
                return Err(e);
            }
        }

        debug!("Saved {} match sets", sets.len());
        for set in sets {
            tables.match_sets.insert(set.source, set);
        }
        Ok(())
    }

    async fn match_set(&self, source: EntityId) -> StoreResult<Option<MatchSet>> {
        Ok(self.tables.read().await.match_sets.get(&source).cloned())
    }

    async fn match_set_sources(&self) -> StoreResult<Vec<EntityId>> {
        Ok(self.tables.read().await.match_sets.keys().copied().collect())
    }

    async fn clear_match_sets(&self) -> StoreResult<usize> {
        let mut tables = self.tables.write().await;
        let sources: Vec<EntityId> = tables.match_sets.keys().copied().collect();
        for source in &sources {
            let path = self.match_set_path(*source);
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StoreError::DeleteFile(format!("{}: {e}", path.display())));
                }
            }
            tables.match_sets.shift_remove(source);
        }
        info!("Cleared {} match sets", sources.len());
        Ok(sources.len())
    }
}

/// Read a JSON array file, treating a missing file as an empty table.
async fn read_table<T: DeserializeOwned>(path: &Path) -> StoreResult<Vec<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No table at {}, starting empty", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(StoreError::ReadFile(format!("{}: {e}", path.display()))),
    };
    Ok(serde_json::from_str(&content)?)
}

/// Load every match set file, skipping unreadable ones.
async fn load_match_sets(dir: &Path, tables: &mut CorpusTables) -> StoreResult<()> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| StoreError::ReadFile(format!("{}: {e}", dir.display())))?;

    let mut sets = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StoreError::ReadFile(format!("{e}")))?
    {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "json") {
            continue;
        }
        match read_match_set(&path).await {
            Ok(set) if tables.contains(set.source) => sets.push(set),
            Ok(set) => warn!("Ignoring match set for unknown source {}", set.source),
            Err(e) => warn!("Failed to load match set {}: {e}", path.display()),
        }
    }

    // Directory order is arbitrary; keep sources in a stable order.
    sets.sort_by_key(|set| set.source);
    for set in sets {
        tables.match_sets.insert(set.source, set);
    }
    Ok(())
}

async fn read_match_set(path: &Path) -> StoreResult<MatchSet> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| StoreError::ReadFile(format!("{}: {e}", path.display())))?;
    Ok(serde_json::from_str(&content)?)
}

/// Write `value` as pretty JSON via a temp file and rename.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<()> {
    let temp_path = write_temp(path, value).await?;
    commit(&temp_path, path).await
}

/// Write `value` next to `path` without making it visible.
async fn write_temp<T: Serialize + ?Sized>(path: &Path, value: &T) -> StoreResult<PathBuf> {
    let content = serde_json::to_string_pretty(value)?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &content)
        .await
        .map_err(|e| StoreError::WriteFile(format!("{}: {e}", temp_path.display())))?;
    Ok(temp_path)
}

async fn commit(temp_path: &Path, path: &Path) -> StoreResult<()> {
    fs::rename(temp_path, path)
        .await
        .map_err(|e| StoreError::WriteFile(format!("{}: {e}", path.display())))
}

/// Remove staged temp files; they are never read back.
async fn discard(staged: &[(PathBuf, PathBuf)]) {
    for (temp_path, _) in staged {
        if let Err(e) = fs::remove_file(temp_path).await {
            debug!("Could not remove {}: {e}", temp_path.display());
        }
    }
}
