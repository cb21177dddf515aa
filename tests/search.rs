use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Result;
use facefind::fetch::PhotoSource;
use facefind::matcher::{MatchPolicy, Metric};
use facefind::search::Searcher;
use facefind::storage::{CollectionId, Store};
use facefind::{Detection, Embedding, Error, Extractor, ExtractorConfig, FaceModel};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};

/// Treats a solid-color image as one face whose embedding is its color.
/// Black images have no face.
struct ColorModel {
    id: &'static str,
}

impl FaceModel for ColorModel {
    fn model_id(&self) -> &str {
        self.id
    }

    fn detect(&mut self, img: &DynamicImage) -> anyhow::Result<Vec<Detection>> {
        let (w, h) = img.dimensions();
        if img.get_pixel(0, 0).0[..3] == [0, 0, 0] {
            return Ok(vec![]);
        }
        Ok(vec![Detection {
            bbox: [0.0, 0.0, w as f32, h as f32],
            score: 0.99,
            landmarks: [0.0; 10],
        }])
    }

    fn embed(&mut self, img: &DynamicImage, _detection: &Detection) -> anyhow::Result<Embedding> {
        let [r, g, b, _] = img.get_pixel(0, 0).0;
        Ok(Embedding::from(vec![r as f32, g as f32, b as f32]).normalized())
    }
}

/// In-memory photo locations.
struct MapSource(HashMap<String, Vec<u8>>);

impl PhotoSource for MapSource {
    fn fetch(&self, location: &str) -> facefind::Result<Vec<u8>> {
        self.0
            .get(location)
            .cloned()
            .ok_or_else(|| Error::ExternalResource(format!("{location}: 404 Not Found")))
    }
}

fn photo(color: [u8; 3]) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 100, Rgb(color)));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Bmp).expect("encode bmp");
    buf.into_inner()
}

const RED: [u8; 3] = [200, 10, 10];
const DARK_RED: [u8; 3] = [150, 20, 5];
const BLUE: [u8; 3] = [10, 10, 200];
const BLACK: [u8; 3] = [0, 0, 0];

fn source() -> MapSource {
    MapSource(HashMap::from([
        ("s3://event/red.bmp".to_string(), photo(RED)),
        ("s3://event/dark-red.bmp".to_string(), photo(DARK_RED)),
        ("s3://event/blue.bmp".to_string(), photo(BLUE)),
        ("s3://event/empty-hall.bmp".to_string(), photo(BLACK)),
    ]))
}

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("facefind-search-{}", uuid::Uuid::new_v4()))
}

fn searcher(dir: &Path, model_id: &'static str) -> Searcher<ColorModel, MapSource> {
    let store = Store::open(dir).expect("open store");
    let extractor = Extractor::new(ColorModel { id: model_id }, ExtractorConfig::default());
    Searcher::new(store, source(), extractor)
}

fn locations(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| format!("s3://event/{n}")).collect()
}

#[test]
fn index_then_search_stored_embeddings() -> Result<()> {
    env_logger::try_init().ok();
    let dir = temp_dir();
    let mut searcher = searcher(&dir, "color-v1");
    let collection = searcher.create_collection("Wedding", Some("Ana".into()))?;

    let report = searcher.index(
        &collection.id,
        &locations(&["red.bmp", "blue.bmp", "missing.bmp", "empty-hall.bmp", "dark-red.bmp"]),
    )?;
    let faces: Vec<usize> = report.indexed.iter().map(|p| p.faces).collect();
    assert_eq!(faces, vec![1, 1, 0, 1]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].id, "s3://event/missing.bmp");
    assert_eq!(report.collection.photos, 4);

    let policy = MatchPolicy::new(Metric::InnerProduct, 0.95);
    let result = searcher.search(&collection.id, &photo(RED), policy, false)?;
    let ids: Vec<&str> = result.data.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["s3://event/red.bmp", "s3://event/dark-red.bmp"]);
    assert_eq!(result.count, 2);
    assert!(result.data[0].score >= result.data[1].score);
    assert_eq!(result.collection.name, "Wedding");
    assert_eq!(result.collection.client.as_deref(), Some("Ana"));

    let refetched = searcher.search(&collection.id, &photo(RED), policy, true)?;
    assert_eq!(refetched.data, result.data);

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

#[test]
fn euclidean_search_uses_distance_direction() -> Result<()> {
    let dir = temp_dir();
    let mut searcher = searcher(&dir, "color-v1");
    let collection = searcher.create_collection("Party", None)?;
    searcher.index(&collection.id, &locations(&["blue.bmp", "red.bmp"]))?;

    let result = searcher.search(
        &collection.id,
        &photo(RED),
        MatchPolicy::new(Metric::Euclidean, 0.3),
        false,
    )?;
    assert_eq!(result.count, 1);
    assert_eq!(result.data[0].id, "s3://event/red.bmp");
    assert!(result.data[0].score < 1e-5);

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

#[test]
fn selfie_failures_abort_the_request() -> Result<()> {
    let dir = temp_dir();
    let mut searcher = searcher(&dir, "color-v1");
    let collection = searcher.create_collection("Gala", None)?;
    searcher.index(&collection.id, &locations(&["red.bmp"]))?;
    let policy = MatchPolicy::from(Metric::InnerProduct);

    let err = searcher
        .search(&collection.id, &photo(BLACK), policy, false)
        .unwrap_err();
    assert!(matches!(err, Error::NoFaceDetected), "got {err:?}");

    let err = searcher
        .search(&collection.id, b"0123456789", policy, false)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)), "got {err:?}");

    let err = searcher
        .search(&collection.id, &[0x42u8; 2048], policy, false)
        .unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "got {err:?}");

    let unknown: CollectionId = "507f1f77bcf86cd799439011".parse()?;
    let err = searcher.search(&unknown, &photo(RED), policy, false).unwrap_err();
    assert!(matches!(err, Error::CollectionNotFound(_)), "got {err:?}");

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

#[test]
fn model_change_requires_reindex() -> Result<()> {
    let dir = temp_dir();
    let collection = {
        let mut old = searcher(&dir, "color-v1");
        let collection = old.create_collection("Reunion", None)?;
        old.index(&collection.id, &locations(&["red.bmp", "blue.bmp"]))?;
        collection
    };

    let mut new = searcher(&dir, "color-v2");
    let policy = MatchPolicy::new(Metric::InnerProduct, 0.95);
    let err = new
        .search(&collection.id, &photo(RED), policy, false)
        .unwrap_err();
    assert!(matches!(err, Error::ModelMismatch { .. }), "got {err:?}");
    assert!(matches!(
        new.index(&collection.id, &locations(&["dark-red.bmp"])),
        Err(Error::ModelMismatch { .. })
    ));

    // refetching embeds with the current model, so it works before reindexing
    assert_eq!(new.search(&collection.id, &photo(RED), policy, true)?.count, 1);

    let report = new.reindex(&collection.id)?;
    assert_eq!(report.indexed.len(), 2);
    assert_eq!(report.collection.model, "color-v2");
    assert_eq!(new.search(&collection.id, &photo(RED), policy, false)?.count, 1);

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}

#[test]
fn stored_embeddings_of_other_dimension_are_reported() -> Result<()> {
    let dir = temp_dir();
    let mut searcher = searcher(&dir, "color-v1");
    let mut collection = searcher.create_collection("Mixed", None)?;
    collection.upsert_photo("s3://event/legacy.jpg", vec![Embedding::from(vec![1.0; 128])]);
    collection.upsert_photo(
        "s3://event/red.bmp",
        vec![Embedding::from(vec![200.0, 10.0, 10.0]).normalized()],
    );
    searcher.store().save(&collection)?;

    let result = searcher.search(
        &collection.id,
        &photo(RED),
        MatchPolicy::new(Metric::InnerProduct, 0.95),
        false,
    )?;
    assert_eq!(result.count, 1);
    assert_eq!(result.skipped.len(), 1);
    assert_eq!(result.skipped[0].id, "s3://event/legacy.jpg");

    std::fs::remove_dir_all(&dir).ok();
    Ok(())
}
