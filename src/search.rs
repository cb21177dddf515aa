//! Collection indexing and selfie search.
//!
//! Photos are fetched in parallel; extraction and matching run afterwards on
//! the calling thread.

use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fetch::PhotoSource;
use crate::matcher::{match_candidates, Candidate, MatchPolicy, MatchResult, SkippedCandidate};
use crate::storage::{CollectionId, CollectionRecord, CollectionSummary, Store};
use crate::{Embedding, Extractor, FaceModel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedPhoto {
    pub location: String,
    pub faces: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexReport {
    pub collection: CollectionSummary,
    pub indexed: Vec<IndexedPhoto>,
    pub skipped: Vec<SkippedCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchReport {
    pub collection: CollectionSummary,
    pub data: Vec<MatchResult>,
    pub count: usize,
    pub skipped: Vec<SkippedCandidate>,
}

/// Ties a collection store, a photo source and an extractor together.
pub struct Searcher<M, S> {
    store: Store,
    source: S,
    extractor: Extractor<M>,
}

impl<M: FaceModel, S: PhotoSource> Searcher<M, S> {
    pub fn new(store: Store, source: S, extractor: Extractor<M>) -> Self {
        Self {
            store,
            source,
            extractor,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn create_collection(&self, name: &str, client: Option<String>) -> Result<CollectionRecord> {
        self.store.create(name, client, self.extractor.model_id())
    }

    /// Fetch and embed `locations`, storing the result in the collection.
    /// Photos that fail to fetch or decode are skipped and reported.
    pub fn index(&mut self, id: &CollectionId, locations: &[String]) -> Result<IndexReport> {
        let mut record = self.store.load(id)?;
        self.check_model(&record)?;
        record.model = self.extractor.model_id().to_string();

        let (embedded, skipped) = self.embed_all(locations);
        let mut indexed = Vec::with_capacity(embedded.len());
        for (location, embeddings) in embedded {
            indexed.push(IndexedPhoto {
                location: location.clone(),
                faces: embeddings.len(),
            });
            record.upsert_photo(&location, embeddings);
        }
        self.store.save(&record)?;
        info!(
            "indexed {} photo(s) into {}, {} skipped",
            indexed.len(),
            record.id,
            skipped.len()
        );

        Ok(IndexReport {
            collection: record.summary(),
            indexed,
            skipped,
        })
    }

    /// Recompute every photo's embeddings with the current model.
    ///
    /// Photos that can no longer be fetched keep their old embeddings only
    /// when the model is unchanged.
    pub fn reindex(&mut self, id: &CollectionId) -> Result<IndexReport> {
        let mut record = self.store.load(id)?;
        let model_changed = record.model != self.extractor.model_id();
        let locations: Vec<String> = record.photos.iter().map(|p| p.location.clone()).collect();

        let (embedded, skipped) = self.embed_all(&locations);
        if model_changed {
            for photo in &mut record.photos {
                photo.embeddings.clear();
            }
        }
        let mut indexed = Vec::with_capacity(embedded.len());
        for (location, embeddings) in embedded {
            indexed.push(IndexedPhoto {
                location: location.clone(),
                faces: embeddings.len(),
            });
            record.upsert_photo(&location, embeddings);
        }
        record.model = self.extractor.model_id().to_string();
        self.store.save(&record)?;

        Ok(IndexReport {
            collection: record.summary(),
            indexed,
            skipped,
        })
    }

    /// Find the collection's photos showing any face of the selfie.
    ///
    /// Uses stored embeddings unless `refetch` is set, in which case every
    /// photo is fetched and embedded again.
    pub fn search(
        &mut self,
        id: &CollectionId,
        selfie: &[u8],
        policy: MatchPolicy,
        refetch: bool,
    ) -> Result<SearchReport> {
        let record = self.store.load(id)?;
        let reference = self.extractor.extract(selfie)?;
        if reference.is_empty() {
            return Err(Error::NoFaceDetected);
        }
        info!("selfie has {} face(s)", reference.len());

        let (candidates, mut skipped) = if refetch {
            let locations: Vec<String> =
                record.photos.iter().map(|p| p.location.clone()).collect();
            let (embedded, skipped) = self.embed_all(&locations);
            let candidates = embedded
                .into_iter()
                .map(|(location, embeddings)| Candidate::new(location, embeddings))
                .collect();
            (candidates, skipped)
        } else {
            self.check_model(&record)?;
            (record.candidates(), Vec::new())
        };

        let outcome = match_candidates(&reference, &candidates, policy)?;
        skipped.extend(outcome.skipped);
        info!(
            "{} of {} photo(s) in {} match",
            outcome.matches.len(),
            candidates.len(),
            record.id
        );

        Ok(SearchReport {
            collection: record.summary(),
            count: outcome.matches.len(),
            data: outcome.matches,
            skipped,
        })
    }

    fn check_model(&self, record: &CollectionRecord) -> Result<()> {
        let current = self.extractor.model_id();
        if record.model != current && record.has_embeddings() {
            return Err(Error::ModelMismatch {
                stored: record.model.clone(),
                current: current.to_string(),
            });
        }
        Ok(())
    }

    /// Fetch every location in parallel, then embed each in input order.
    fn embed_all(
        &mut self,
        locations: &[String],
    ) -> (Vec<(String, Vec<Embedding>)>, Vec<SkippedCandidate>) {
        let source = &self.source;
        let fetched: Vec<(&String, Result<Vec<u8>>)> = locations
            .par_iter()
            .map(|location| (location, source.fetch(location)))
            .collect();

        let mut embedded = Vec::with_capacity(fetched.len());
        let mut skipped = Vec::new();
        for (location, bytes) in fetched {
            let result = bytes.and_then(|b| self.extractor.extract(&b).map_err(Error::from));
            match result {
                Ok(embeddings) => embedded.push((location.clone(), embeddings)),
                Err(e) => {
                    warn!("skipping photo {}: {}", location, e);
                    skipped.push(SkippedCandidate {
                        id: location.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        (embedded, skipped)
    }
}
