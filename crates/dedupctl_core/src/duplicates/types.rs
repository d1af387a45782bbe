//! Duplicate-group query engine domain types (spec §4.4).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Blake3,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
        }
    }

    /// Expected hex-digest length for this algorithm. Kept as a function
    /// rather than an inlined constant: both currently supported
    /// algorithms produce 64-char digests, but a future algorithm need
    /// not (spec §9).
    pub fn expected_hash_hex_length(&self) -> usize {
        match self {
            HashAlgorithm::Blake3 | HashAlgorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" => Ok(HashAlgorithm::Sha256),
            other => Err(format!("unsupported hash algorithm: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroupSnapshot {
    pub group_key: String,
    pub hash_algorithm: HashAlgorithm,
    pub content_hash_hex: String,
    pub file_count: i64,
    pub total_size_bytes: i64,
    pub duplicate_waste_bytes: i64,
    pub sample_file_id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroupListResult {
    pub items: Vec<DuplicateGroupSnapshot>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateFileSnapshot {
    pub file_id: i64,
    pub library_id: i64,
    pub library_name: String,
    pub relative_path: String,
    pub size_bytes: i64,
    pub mtime_ns: i64,
    pub hashed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateFileListResult {
    pub items: Vec<DuplicateFileSnapshot>,
    pub next_cursor: Option<String>,
}
