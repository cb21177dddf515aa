//! Structured-text inputs of the `compare` command.
//!
//! Arguments are inline JSON, or `@path` to read the JSON from a file.

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::matcher::Candidate;
use crate::Embedding;

#[derive(Deserialize)]
#[serde(untagged)]
enum ReferenceInput {
    Many(Vec<Embedding>),
    One(Embedding),
}

/// Parse the reference side: a single embedding or a list of embeddings.
pub fn parse_reference(arg: &str) -> Result<Vec<Embedding>> {
    let input: ReferenceInput = parse_json(arg, "reference embedding")?;
    Ok(match input {
        ReferenceInput::Many(list) => list,
        ReferenceInput::One(single) => vec![single],
    })
}

/// Parse a candidate collection: `[{"id": .., "embeddings": [[..], ..]}, ..]`.
pub fn parse_candidates(arg: &str) -> Result<Vec<Candidate>> {
    parse_json(arg, "candidate collection")
}

fn parse_json<T: DeserializeOwned>(arg: &str, what: &str) -> Result<T> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidInput(format!("reading {what} from {path}: {e}")))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| Error::InvalidInput(format!("malformed {what}: {e}")))
}
