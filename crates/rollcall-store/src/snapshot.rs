use std::fmt;

use ndarray::{Array2, ArrayView1, ArrayView2};
use rollcall_core::{Embedding, EMBEDDING_DIM};
use serde::Serialize;

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertAction {
    Inserted,
    Updated,
}

impl fmt::Display for UpsertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
        })
    }
}

/// Borrowed view of one enrolled identity.
#[derive(Debug, Clone)]
pub struct IdentityRecord<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub embedding: ArrayView1<'a, f32>,
}

/// Full contents of the store at one point in time.
///
/// Three co-indexed columns: identity keys, display names, and an
/// `N × 512` embedding matrix. Lengths always agree.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    ids: Vec<String>,
    names: Vec<String>,
    embeddings: Array2<f32>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

impl Snapshot {
    /// No identities; a `0 × 512` matrix.
    pub fn empty() -> Self {
        Self {
            ids: Vec::new(),
            names: Vec::new(),
            embeddings: Array2::zeros((0, EMBEDDING_DIM)),
        }
    }

    /// Assemble a snapshot, checking width and co-indexing.
    pub fn from_parts(
        ids: Vec<String>,
        names: Vec<String>,
        embeddings: Array2<f32>,
    ) -> Result<Self, StoreError> {
        if embeddings.ncols() != EMBEDDING_DIM {
            return Err(StoreError::Shape(format!(
                "expected {EMBEDDING_DIM} embedding columns, got {}",
                embeddings.ncols()
            )));
        }
        if ids.len() != names.len() || ids.len() != embeddings.nrows() {
            return Err(StoreError::Shape(format!(
                "{} ids, {} names, {} embedding rows",
                ids.len(),
                names.len(),
                embeddings.nrows()
            )));
        }
        Ok(Self { ids, names, embeddings })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn embeddings(&self) -> ArrayView2<'_, f32> {
        self.embeddings.view()
    }

    pub fn get(&self, id: &str) -> Option<IdentityRecord<'_>> {
        self.position(id).map(|row| self.record(row))
    }

    pub fn iter(&self) -> impl Iterator<Item = IdentityRecord<'_>> + '_ {
        (0..self.len()).map(move |row| self.record(row))
    }

    /// Overwrite the row for `id` in place, or append a new one.
    pub fn upsert(
        &mut self,
        id: &str,
        name: &str,
        embedding: &Embedding,
    ) -> Result<UpsertAction, StoreError> {
        let row = ArrayView1::from(embedding.as_slice());

        match self.position(id) {
            Some(idx) => {
                self.embeddings.row_mut(idx).assign(&row);
                self.names[idx] = name.to_string();
                Ok(UpsertAction::Updated)
            }
            None => {
                self.embeddings
                    .push_row(row)
                    .map_err(|e| StoreError::Shape(e.to_string()))?;
                self.ids.push(id.to_string());
                self.names.push(name.to_string());
                Ok(UpsertAction::Inserted)
            }
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.ids.iter().position(|known| known == id)
    }

    fn record(&self, row: usize) -> IdentityRecord<'_> {
        IdentityRecord {
            id: &self.ids[row],
            name: &self.names[row],
            embedding: self.embeddings.row(row),
        }
    }
}
