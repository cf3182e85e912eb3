//! Core data models for legislation retrieval.
//!
//! A [`Document`] is one piece of law text (an Act, a regulation, a
//! practice note). It is split into [`Chunk`]s that form a two-level tree:
//! coarse `parent` chunks carry context, fine `child` chunks are what the
//! retrieval legs actually match against.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Jurisdiction tag attached to every document.
///
/// Covers the Commonwealth plus the eight states and territories. Anything
/// that cannot be mapped is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Jurisdiction {
    Federal,
    Nsw,
    Vic,
    Qld,
    Sa,
    Wa,
    Tas,
    Nt,
    Act,
    Unknown,
}

impl Jurisdiction {
    /// State and territory codes, in the order they are matched against
    /// free text.
    pub const STATES: [Jurisdiction; 8] = [
        Jurisdiction::Nsw,
        Jurisdiction::Vic,
        Jurisdiction::Qld,
        Jurisdiction::Sa,
        Jurisdiction::Wa,
        Jurisdiction::Tas,
        Jurisdiction::Nt,
        Jurisdiction::Act,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Jurisdiction::Federal => "FEDERAL",
            Jurisdiction::Nsw => "NSW",
            Jurisdiction::Vic => "VIC",
            Jurisdiction::Qld => "QLD",
            Jurisdiction::Sa => "SA",
            Jurisdiction::Wa => "WA",
            Jurisdiction::Tas => "TAS",
            Jurisdiction::Nt => "NT",
            Jurisdiction::Act => "ACT",
            Jurisdiction::Unknown => "UNKNOWN",
        }
    }

    /// Find a state/territory code inside free text such as
    /// `"User is in NSW"` or `"\"qld\""`.
    ///
    /// Matches whole words only so that `"SA"` is not found inside
    /// `"SAVINGS"`.
    pub fn detect(text: &str) -> Option<Jurisdiction> {
        let upper = text.to_uppercase();
        let words: Vec<&str> = upper
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        if words.contains(&"FEDERAL") || words.contains(&"CTH") {
            return Some(Jurisdiction::Federal);
        }
        Self::STATES
            .iter()
            .copied()
            .find(|j| words.contains(&j.as_str()))
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Jurisdiction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "FEDERAL" | "CTH" | "COMMONWEALTH" => Ok(Jurisdiction::Federal),
            "NSW" => Ok(Jurisdiction::Nsw),
            "VIC" => Ok(Jurisdiction::Vic),
            "QLD" => Ok(Jurisdiction::Qld),
            "SA" => Ok(Jurisdiction::Sa),
            "WA" => Ok(Jurisdiction::Wa),
            "TAS" => Ok(Jurisdiction::Tas),
            "NT" => Ok(Jurisdiction::Nt),
            "ACT" => Ok(Jurisdiction::Act),
            "UNKNOWN" | "" => Ok(Jurisdiction::Unknown),
            other => anyhow::bail!("Unknown jurisdiction: '{}'", other),
        }
    }
}

/// Immutable unit of law text.
///
/// `id` is the stable external identifier supplied at ingestion.
/// Re-ingesting the same `id` replaces the document and all its chunks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub citation: String,
    pub jurisdiction: Jurisdiction,
    pub source_url: Option<String>,
    pub text: String,
    pub effective_date: Option<NaiveDate>,
}

/// Position of a chunk in the two-level hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkRole {
    Parent,
    Child,
}

impl ChunkRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkRole::Parent => "parent",
            ChunkRole::Child => "child",
        }
    }
}

impl FromStr for ChunkRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parent" => Ok(ChunkRole::Parent),
            "child" => Ok(ChunkRole::Child),
            other => anyhow::bail!("Unknown chunk role: '{}'", other),
        }
    }
}

/// A retrievable slice of a document.
///
/// Children reference their parent by id (`parent_id`); parents have
/// `parent_id == None`. The tree is resolved through store lookups, never
/// through in-memory pointers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub parent_id: Option<String>,
    pub role: ChunkRole,
    /// Ordinal within the document, contiguous per role starting at 0.
    pub chunk_index: i64,
    pub text: String,
    pub token_count: usize,
    /// SHA-256 of `text`, used to detect stale embeddings.
    pub hash: String,
}
