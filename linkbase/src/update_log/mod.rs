//! Update-log batches and the applier that replays them.
//!
//! A batch is a flat list of quintuples
//! `(collection, operator, id | null, path | options | null, payload | null)`
//! under one batch id. On the wire it is a JSON object:
//!
//! ```json
//! {"id": "5f2b6e1c9a3d4b0012ab34cd",
//!  "log": ["", "_", null, null, "0.1.0",
//!          "users", "=", null, null, {"name": "Alice"}]}
//! ```

use crate::error::{LinkbaseError, Result};
use crate::id::Id;
use crate::store::Database;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of flat entries per quintuple.
pub const QUINTUPLE_LEN: usize = 5;

// ── Operators ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Assign,
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "!")]
    Delete,
    /// Version handshake; the payload is a `major.minor.patch` string.
    #[serde(rename = "_")]
    Version,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Assign => "=",
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Delete => "!",
            Operator::Version => "_",
        }
    }

    pub fn parse(symbol: &str) -> Result<Self> {
        match symbol {
            "=" => Ok(Operator::Assign),
            "+" => Ok(Operator::Add),
            "-" => Ok(Operator::Subtract),
            "!" => Ok(Operator::Delete),
            "_" => Ok(Operator::Version),
            other => Err(LinkbaseError::UpdateLog(format!("Unknown operator '{other}'"))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ── Versions ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// The version of this build of the crate.
    pub fn current() -> Self {
        let fallback = Version {
            major: 0,
            minor: 0,
            patch: 0,
        };
        Version::parse(env!("CARGO_PKG_VERSION")).unwrap_or(fallback)
    }

    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || LinkbaseError::UpdateLog(format!("Invalid version '{input}'"));
        let mut parts = input.trim().splitn(3, '.');
        let mut next = || -> Result<u64> {
            let part = parts.next().ok_or_else(invalid)?;
            // Pre-release and build suffixes are ignored.
            let digits = part.split(|c: char| c == '-' || c == '+').next().unwrap_or(part);
            digits.parse().map_err(|_| invalid())
        };
        Ok(Version {
            major: next()?,
            minor: next()?,
            patch: next()?,
        })
    }

    /// Whether a log written by `remote` can be applied here: same major,
    /// and no older minor.
    pub fn accepts(&self, remote: &Version) -> bool {
        remote.major == self.major && remote.minor >= self.minor
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = LinkbaseError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

// ── Quintuples ─────────────────────────────────────────────────

/// One update-log operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Quintuple {
    pub collection: String,
    pub operator: Operator,
    pub id: Option<Id>,
    /// Property path. Option objects in this position are not interpreted.
    pub path: Option<String>,
    pub payload: Option<Json>,
}

impl Quintuple {
    pub fn new(
        collection: impl Into<String>,
        operator: Operator,
        id: Option<Id>,
        path: Option<String>,
        payload: Option<Json>,
    ) -> Self {
        Quintuple {
            collection: collection.into(),
            operator,
            id,
            path,
            payload,
        }
    }

    pub fn assign(collection: impl Into<String>, id: Option<Id>, path: Option<String>, payload: Option<Json>) -> Self {
        Quintuple::new(collection, Operator::Assign, id, path, payload)
    }

    /// The handshake entry that opens a batch.
    pub fn version(version: &Version) -> Self {
        Quintuple::new("", Operator::Version, None, None, Some(Json::String(version.to_string())))
    }

    pub fn to_flat(&self) -> [Json; QUINTUPLE_LEN] {
        [
            Json::String(self.collection.clone()),
            Json::String(self.operator.symbol().to_string()),
            self.id.as_ref().map_or(Json::Null, |id| Json::String(id.to_string())),
            self.path.clone().map_or(Json::Null, Json::String),
            self.payload.clone().unwrap_or(Json::Null),
        ]
    }

    pub fn from_flat(entries: &[Json]) -> Result<Self> {
        let [collection, operator, id, path, payload] = entries else {
            return Err(LinkbaseError::UpdateLog(format!(
                "A quintuple has {QUINTUPLE_LEN} entries, got {}",
                entries.len()
            )));
        };
        let collection = collection
            .as_str()
            .ok_or_else(|| LinkbaseError::UpdateLog(format!("Collection name must be a string, got {collection}")))?;
        let operator = operator
            .as_str()
            .ok_or_else(|| LinkbaseError::UpdateLog(format!("Operator must be a string, got {operator}")))
            .and_then(Operator::parse)?;
        let id = match id {
            Json::Null => None,
            Json::String(raw) => Some(Id::parse(raw)?),
            other => return Err(LinkbaseError::UpdateLog(format!("Item id must be a string, got {other}"))),
        };
        Ok(Quintuple {
            collection: collection.to_string(),
            operator,
            id,
            path: path.as_str().map(str::to_string),
            payload: (!payload.is_null()).then(|| payload.clone()),
        })
    }
}

// ── Batches ────────────────────────────────────────────────────

/// An ordered batch of quintuples sharing one id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBatch", into = "RawBatch")]
pub struct UpdateBatch {
    pub id: Id,
    pub log: Vec<Quintuple>,
}

#[derive(Serialize, Deserialize)]
struct RawBatch {
    id: Id,
    log: Vec<Json>,
}

impl TryFrom<RawBatch> for UpdateBatch {
    type Error = LinkbaseError;

    fn try_from(raw: RawBatch) -> Result<Self> {
        if raw.log.len() % QUINTUPLE_LEN != 0 {
            return Err(LinkbaseError::UpdateLog(format!(
                "Batch {} has {} log entries, not a multiple of {QUINTUPLE_LEN}",
                raw.id,
                raw.log.len()
            )));
        }
        let log = raw
            .log
            .chunks(QUINTUPLE_LEN)
            .map(Quintuple::from_flat)
            .collect::<Result<Vec<_>>>()?;
        Ok(UpdateBatch { id: raw.id, log })
    }
}

impl From<UpdateBatch> for RawBatch {
    fn from(batch: UpdateBatch) -> Self {
        RawBatch {
            id: batch.id,
            log: batch.log.iter().flat_map(Quintuple::to_flat).collect(),
        }
    }
}

impl UpdateBatch {
    /// An empty batch under a fresh id.
    pub fn new() -> Self {
        UpdateBatch {
            id: Id::generate(),
            log: Vec::new(),
        }
    }

    pub fn push(&mut self, quintuple: Quintuple) {
        self.log.push(quintuple);
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl Default for UpdateBatch {
    fn default() -> Self {
        UpdateBatch::new()
    }
}

// ── Applier ────────────────────────────────────────────────────

/// A batch that stopped part-way. Quintuples before `index` stay applied.
#[derive(Error, Debug)]
#[error("Batch {batch_id} failed at quintuple {index} ({applied} applied, {} skipped): {source}", .unapplied.len())]
pub struct ApplyError {
    pub batch_id: Id,
    pub index: usize,
    pub applied: usize,
    /// The failing quintuple and everything after it.
    pub unapplied: Vec<Quintuple>,
    pub source: LinkbaseError,
}

impl ApplyError {
    /// The unapplied tail as a new batch under the same id, for retrying.
    pub fn unapplied_batch(&self) -> UpdateBatch {
        UpdateBatch {
            id: self.batch_id.clone(),
            log: self.unapplied.clone(),
        }
    }
}

/// Replays update batches against a database, in order and without
/// atomicity across quintuples.
#[derive(Debug, Clone)]
pub struct UpdateApplier {
    local: Version,
}

impl Default for UpdateApplier {
    fn default() -> Self {
        UpdateApplier::new(Version::current())
    }
}

impl UpdateApplier {
    pub fn new(local: Version) -> Self {
        UpdateApplier { local }
    }

    pub fn local_version(&self) -> Version {
        self.local
    }

    /// Apply every quintuple of `batch`. Returns how many were applied.
    pub fn apply(&self, db: &mut Database, batch: &UpdateBatch) -> std::result::Result<usize, ApplyError> {
        for (index, quintuple) in batch.log.iter().enumerate() {
            if let Err(source) = self.apply_one(db, quintuple) {
                log::warn!("Batch {} stopped at quintuple {index}: {source}", batch.id);
                return Err(ApplyError {
                    batch_id: batch.id.clone(),
                    index,
                    applied: index,
                    unapplied: batch.log[index..].to_vec(),
                    source,
                });
            }
        }
        log::debug!("Applied batch {} ({} quintuples)", batch.id, batch.len());
        Ok(batch.len())
    }

    fn apply_one(&self, db: &mut Database, quintuple: &Quintuple) -> Result<()> {
        if quintuple.operator == Operator::Version {
            return self.handshake(quintuple.payload.as_ref());
        }
        db.apply_operator(
            &quintuple.collection,
            quintuple.operator,
            quintuple.id.as_ref(),
            quintuple.path.as_deref(),
            quintuple.payload.as_ref(),
        )
    }

    fn handshake(&self, payload: Option<&Json>) -> Result<()> {
        let remote = payload
            .and_then(Json::as_str)
            .ok_or_else(|| LinkbaseError::UpdateLog("Version quintuple needs a version string".to_string()))
            .and_then(Version::parse)?;
        if !self.local.accepts(&remote) {
            return Err(LinkbaseError::VersionMismatch {
                local: self.local.to_string(),
                remote: remote.to_string(),
            });
        }
        Ok(())
    }
}
