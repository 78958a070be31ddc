//! Snapshot persistence and upsert.
//!
//! The artifact is a single JSON document with three co-indexed fields:
//!
//! ```text
//! { "ids": [..], "names": [..], "embs": { "v": 1, "dim": [N, 512], "data": [..] } }
//! ```
//!
//! `embs` is read back with dynamic rank, so an artifact with the wrong rank
//! or width is caught here and replaced by an empty snapshot instead of
//! failing or leaking malformed rows.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use ndarray::{ArrayD, ArrayView2, Ix2};
use rollcall_core::Embedding;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::lock::{Unlocked, WriteLock};
use crate::snapshot::{Snapshot, UpsertAction};

const TEMP_SUFFIX: &str = ".tmp";

#[derive(Serialize)]
struct ArtifactRef<'a> {
    ids: &'a [String],
    names: &'a [String],
    embs: ArrayView2<'a, f32>,
}

#[derive(Deserialize)]
struct Artifact {
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    names: Vec<String>,
    #[serde(default)]
    embs: Option<ArrayD<f32>>,
}

/// Read the snapshot at `path`.
///
/// A missing file is an empty store. A malformed embedding matrix or
/// mismatched columns also yield an empty store, with a warning. A file that
/// cannot be read or parsed at all is an error.
pub fn load(path: &Path) -> Result<Snapshot, StoreError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no store file yet; starting empty");
            return Ok(Snapshot::empty());
        }
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let artifact: Artifact =
        serde_json::from_reader(BufReader::new(file)).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(into_snapshot(path, artifact))
}

fn into_snapshot(path: &Path, artifact: Artifact) -> Snapshot {
    let Artifact { ids, names, embs } = artifact;

    let embs = match embs {
        Some(embs) => embs,
        None if ids.is_empty() => return Snapshot::empty(),
        None => {
            tracing::warn!(path = %path.display(), ids = ids.len(), "store has ids but no embeddings; resetting");
            return Snapshot::empty();
        }
    };

    let shape = embs.shape().to_vec();
    let checked = embs
        .into_dimensionality::<Ix2>()
        .map_err(|e| StoreError::Shape(e.to_string()))
        .and_then(|embs| Snapshot::from_parts(ids, names, embs));

    match checked {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(path = %path.display(), ?shape, error = %e, "malformed store; resetting to empty");
            Snapshot::empty()
        }
    }
}

/// Write `snapshot` to `path`, replacing any previous content.
///
/// Written to a sibling temp file first and renamed into place. A
/// snapshot holding NaN or infinite values is refused before anything
/// touches disk, since JSON cannot represent them.
pub fn save(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(record) = snapshot
        .iter()
        .find(|r| r.embedding.iter().any(|x| !x.is_finite()))
    {
        return Err(StoreError::NonFinite {
            id: record.id.to_string(),
        });
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let temp = temp_path(path);
    if let Err(e) = write_artifact(&temp, snapshot) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    fs::rename(&temp, path).map_err(io_err)?;

    tracing::debug!(path = %path.display(), identities = snapshot.len(), "store saved");
    Ok(())
}

fn write_artifact(temp: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: temp.to_path_buf(),
        source,
    };

    let artifact = ArtifactRef {
        ids: snapshot.ids(),
        names: snapshot.names(),
        embs: snapshot.embeddings(),
    };

    let mut writer = BufWriter::new(File::create(temp).map_err(io_err)?);
    serde_json::to_writer(&mut writer, &artifact).map_err(StoreError::Encode)?;
    writer.flush().map_err(io_err)?;
    writer.get_ref().sync_all().map_err(io_err)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

/// What an upsert did and how many identities the store now holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Upsert {
    pub action: UpsertAction,
    pub total: usize,
}

/// Handle on one store file.
#[derive(Debug, Clone)]
pub struct VectorStore<L = Unlocked> {
    path: PathBuf,
    lock: L,
}

impl VectorStore<Unlocked> {
    /// Store without write serialization.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_lock(path, Unlocked)
    }
}

impl<L: WriteLock> VectorStore<L> {
    pub fn with_lock(path: impl Into<PathBuf>, lock: L) -> Self {
        Self {
            path: path.into(),
            lock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Snapshot, StoreError> {
        load(&self.path)
    }

    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        save(&self.path, snapshot)
    }

    /// Insert or update one identity: load, modify, save, under the lock.
    pub fn upsert(&self, id: &str, name: &str, embedding: &Embedding) -> Result<Upsert, StoreError> {
        self.lock.scoped(&self.path, || -> Result<Upsert, StoreError> {
            let mut snapshot = self.load()?;
            let action = snapshot.upsert(id, name, embedding)?;
            self.save(&snapshot)?;

            let total = snapshot.len();
            tracing::info!(id, %action, total, path = %self.path.display(), "identity upserted");
            Ok(Upsert { action, total })
        })
    }
}
