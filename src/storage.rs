use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::matcher::Candidate;
use crate::Embedding;

const RECORD_FILE: &str = "collection.bin";

/// Collection identifier: 24 lowercase hexadecimal characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CollectionId(String);

impl CollectionId {
    pub const LEN: usize = 24;

    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self(hex[..Self::LEN].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CollectionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != Self::LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::InvalidInput(format!(
                "invalid collection id {s:?}: must be a {}-character hex string",
                Self::LEN
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }
}

impl TryFrom<String> for CollectionId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<CollectionId> for String {
    fn from(id: CollectionId) -> Self {
        id.0
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    pub location: String,
    pub embeddings: Vec<Embedding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub id: CollectionId,
    pub name: String,
    pub client: Option<String>,
    /// Embedding model every stored embedding came from.
    pub model: String,
    pub photos: Vec<PhotoRecord>,
}

/// Collection metadata without its photos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub id: CollectionId,
    pub name: String,
    pub client: Option<String>,
    pub model: String,
    pub photos: usize,
}

impl CollectionRecord {
    pub fn summary(&self) -> CollectionSummary {
        CollectionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            client: self.client.clone(),
            model: self.model.clone(),
            photos: self.photos.len(),
        }
    }

    /// Insert a photo, replacing the embeddings of an existing location.
    /// Returns `true` when the location was already present.
    pub fn upsert_photo(&mut self, location: &str, embeddings: Vec<Embedding>) -> bool {
        match self.photos.iter_mut().find(|p| p.location == location) {
            Some(photo) => {
                photo.embeddings = embeddings;
                true
            }
            None => {
                self.photos.push(PhotoRecord {
                    location: location.to_string(),
                    embeddings,
                });
                false
            }
        }
    }

    pub fn remove_photo(&mut self, location: &str) -> bool {
        let before = self.photos.len();
        self.photos.retain(|p| p.location != location);
        self.photos.len() != before
    }

    pub fn has_embeddings(&self) -> bool {
        self.photos.iter().any(|p| !p.embeddings.is_empty())
    }

    pub fn candidates(&self) -> Vec<Candidate> {
        self.photos
            .iter()
            .map(|p| Candidate::new(p.location.clone(), p.embeddings.clone()))
            .collect()
    }
}

/// File-backed collection store, one directory per collection.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| io_error(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, id: &CollectionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    pub fn create(&self, name: &str, client: Option<String>, model: &str) -> Result<CollectionRecord> {
        if name.trim().is_empty() {
            return Err(Error::InvalidInput("collection name is empty".into()));
        }
        let mut id = CollectionId::generate();
        while self.collection_dir(&id).exists() {
            id = CollectionId::generate();
        }
        let record = CollectionRecord {
            id,
            name: name.to_string(),
            client,
            model: model.to_string(),
            photos: Vec::new(),
        };
        self.save(&record)?;
        Ok(record)
    }

    pub fn load(&self, id: &CollectionId) -> Result<CollectionRecord> {
        let file = self.collection_dir(id).join(RECORD_FILE);
        if !file.exists() {
            return Err(Error::CollectionNotFound(id.to_string()));
        }
        let data = std::fs::read(&file).map_err(|e| io_error(&file, e))?;
        Ok(postcard::from_bytes(&data)?)
    }

    /// Write `record`, replacing the stored copy atomically.
    pub fn save(&self, record: &CollectionRecord) -> Result<()> {
        let dir = self.collection_dir(&record.id);
        std::fs::create_dir_all(&dir).map_err(|e| io_error(&dir, e))?;
        let data = postcard::to_allocvec(record)?;
        let tmp = dir.join(format!("{RECORD_FILE}.tmp"));
        let file = dir.join(RECORD_FILE);
        std::fs::write(&tmp, data).map_err(|e| io_error(&tmp, e))?;
        std::fs::rename(&tmp, &file).map_err(|e| io_error(&file, e))?;
        debug!("saved collection {} ({} photos)", record.id, record.photos.len());
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<CollectionSummary>> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| io_error(&self.root, e))?;
        let mut out = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| io_error(&self.root, e))?;
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<CollectionId>().ok())
            else {
                continue;
            };
            match self.load(&id) {
                Ok(record) => out.push(record.summary()),
                Err(Error::CollectionNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.as_str().cmp(b.id.as_str())));
        Ok(out)
    }

    pub fn delete(&self, id: &CollectionId) -> Result<()> {
        let dir = self.collection_dir(id);
        if !dir.exists() {
            return Err(Error::CollectionNotFound(id.to_string()));
        }
        std::fs::remove_dir_all(&dir).map_err(|e| io_error(&dir, e))
    }
}

fn io_error(path: &Path, err: std::io::Error) -> Error {
    Error::Storage(format!("{}: {}", path.display(), err))
}
