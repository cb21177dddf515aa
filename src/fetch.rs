use std::io::Read;
use std::path::Path;
use std::time::Duration;

use log::debug;
use ureq::{Agent, AgentBuilder};

use crate::error::{Error, Result};

/// Upper bound on a single downloaded photo.
const MAX_PHOTO_BYTES: u64 = 64 * 1024 * 1024;

/// Resolves a photo location to its raw bytes.
pub trait PhotoSource: Sync {
    fn fetch(&self, location: &str) -> Result<Vec<u8>>;
}

/// Reads `http(s)://` locations over the network and anything else from disk.
#[derive(Clone)]
pub struct Fetcher {
    agent: Agent,
}

impl Fetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn fetch_remote(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .agent
            .get(url)
            .call()
            .map_err(|e| Error::ExternalResource(format!("fetching {url}: {e}")))?;

        if let Some(len) = response
            .header("Content-Length")
            .and_then(|v| v.parse::<u64>().ok())
        {
            if len > MAX_PHOTO_BYTES {
                return Err(too_large(url));
            }
        }

        let data = read_capped(response.into_reader(), url)?;
        debug!("fetched {} bytes from {}", data.len(), url);
        Ok(data)
    }
}

/// Read a whole body, failing instead of truncating past [`MAX_PHOTO_BYTES`].
fn read_capped(reader: impl Read, url: &str) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader
        .take(MAX_PHOTO_BYTES + 1)
        .read_to_end(&mut data)
        .map_err(|e| Error::ExternalResource(format!("reading {url}: {e}")))?;
    if data.len() as u64 > MAX_PHOTO_BYTES {
        return Err(too_large(url));
    }
    Ok(data)
}

fn too_large(url: &str) -> Error {
    Error::ExternalResource(format!("{url}: photo exceeds {MAX_PHOTO_BYTES} bytes"))
}

impl PhotoSource for Fetcher {
    fn fetch(&self, location: &str) -> Result<Vec<u8>> {
        if location.trim().is_empty() {
            return Err(Error::InvalidInput("photo location is empty".into()));
        }
        if is_remote(location) {
            self.fetch_remote(location)
        } else {
            read_local(location.strip_prefix("file://").unwrap_or(location))
        }
    }
}

fn is_remote(location: &str) -> bool {
    let lower = location.get(..8).unwrap_or(location).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn read_local(path: &str) -> Result<Vec<u8>> {
    std::fs::read(Path::new(path))
        .map_err(|e| Error::ExternalResource(format!("reading {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_locations() {
        assert!(is_remote("https://bucket.s3.amazonaws.com/uploads/a.jpg"));
        assert!(is_remote("HTTP://example.com/a.jpg"));
        assert!(!is_remote("/srv/photos/a.jpg"));
        assert!(!is_remote("file:///srv/photos/a.jpg"));
        assert!(!is_remote("ht"));
    }

    #[test]
    fn reads_local_files() {
        let path = std::env::temp_dir().join(format!("facefind-fetch-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"photo bytes").unwrap();
        let fetcher = Fetcher::new(Duration::from_secs(1));

        let plain = fetcher.fetch(path.to_str().unwrap()).unwrap();
        assert_eq!(plain, b"photo bytes");
        let with_scheme = fetcher
            .fetch(&format!("file://{}", path.display()))
            .unwrap();
        assert_eq!(with_scheme, b"photo bytes");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn oversized_bodies_fail_instead_of_truncating() {
        let url = "https://cdn.example/huge.jpg";
        let at_limit = read_capped(std::io::repeat(7).take(MAX_PHOTO_BYTES), url).unwrap();
        assert_eq!(at_limit.len() as u64, MAX_PHOTO_BYTES);

        let err = read_capped(std::io::repeat(7).take(MAX_PHOTO_BYTES + 1), url).unwrap_err();
        assert!(matches!(err, Error::ExternalResource(ref msg) if msg.contains("exceeds")));

        let small = read_capped(&b"photo bytes"[..], url).unwrap();
        assert_eq!(small, b"photo bytes");
    }

    #[test]
    fn missing_files_are_external_failures() {
        let fetcher = Fetcher::new(Duration::from_secs(1));
        let err = fetcher.fetch("/nonexistent/facefind/photo.jpg").unwrap_err();
        assert!(matches!(err, Error::ExternalResource(_)));
        assert!(matches!(fetcher.fetch(" "), Err(Error::InvalidInput(_))));
    }
}
