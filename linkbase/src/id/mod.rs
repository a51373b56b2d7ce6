//! Item and batch identifiers.
//!
//! An identifier is 12 bytes rendered as 24 lowercase hex digits:
//!
//! | bytes | content |
//! |---|---|
//! | 0..4 | seconds since the Unix epoch, big endian |
//! | 4..7 | machine hash |
//! | 7..9 | process id |
//! | 9..12 | rolling counter |
//!
//! The machine hash, process id and counter seed are process-wide and are
//! fixed the first time an id is generated.

use crate::error::{LinkbaseError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of the hex rendering of an id.
pub const ID_LENGTH: usize = 24;

const COUNTER_MASK: u32 = 0x00ff_ffff;

/// A validated 24-hex-digit identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id(String);

impl Id {
    /// Generate a fresh id from the process-wide generator.
    pub fn generate() -> Self {
        generate()
    }

    /// Parse and normalise (lowercase) an id string.
    pub fn parse(input: &str) -> Result<Self> {
        if !is_valid(input) {
            return Err(LinkbaseError::InvalidId(input.to_string()));
        }
        Ok(Id(input.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The creation second embedded in the first four bytes.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let secs = u32::from_str_radix(&self.0[..8], 16).ok()?;
        DateTime::<Utc>::from_timestamp(i64::from(secs), 0)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Id {
    type Err = LinkbaseError;

    fn from_str(s: &str) -> Result<Self> {
        Id::parse(s)
    }
}

impl TryFrom<String> for Id {
    type Error = LinkbaseError;

    fn try_from(value: String) -> Result<Self> {
        Id::parse(&value)
    }
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        id.0
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Check that `input` has the shape of an id: exactly 24 hex digits.
pub fn is_valid(input: &str) -> bool {
    input.len() == ID_LENGTH && input.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Generate a fresh id.
///
/// Ids generated within one process are distinct as long as the 24-bit counter
/// does not wrap within a single second.
pub fn generate() -> Id {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default();
    generator().encode(secs)
}

/// Process-wide generator state. Built once by [`generator`]; the counter is
/// the only field that changes afterwards.
struct IdGenerator {
    machine: [u8; 3],
    pid: [u8; 2],
    counter: AtomicU32,
}

static GENERATOR: OnceLock<IdGenerator> = OnceLock::new();

fn generator() -> &'static IdGenerator {
    GENERATOR.get_or_init(IdGenerator::seed)
}

impl IdGenerator {
    fn seed() -> Self {
        let mut hasher = DefaultHasher::new();
        machine_name().hash(&mut hasher);
        let hash = hasher.finish().to_be_bytes();
        let pid = (std::process::id() & 0xffff) as u16;

        IdGenerator {
            machine: [hash[0], hash[1], hash[2]],
            pid: pid.to_be_bytes(),
            counter: AtomicU32::new(rand::random::<u32>() & COUNTER_MASK),
        }
    }

    fn next_count(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::Relaxed) & COUNTER_MASK
    }

    fn encode(&self, secs: u32) -> Id {
        let count = self.next_count().to_be_bytes();
        let secs = secs.to_be_bytes();

        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs);
        bytes[4..7].copy_from_slice(&self.machine);
        bytes[7..9].copy_from_slice(&self.pid);
        bytes[9..].copy_from_slice(&count[1..]);

        Id(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }
}

/// Best-effort host name; falls back to random bytes so that two hosts
/// without a name do not share a machine hash.
fn machine_name() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("{:016x}", rand::random::<u64>()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_shape() {
        let id = generate();
        assert_eq!(id.as_str().len(), ID_LENGTH);
        assert!(is_valid(id.as_str()));
        assert_eq!(id.as_str(), id.as_str().to_ascii_lowercase());
    }

    #[test]
    fn test_generate_unique() {
        let ids: HashSet<Id> = (0..10_000).map(|_| generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_shared_machine_and_pid() {
        let a = generate();
        let b = generate();
        assert_eq!(&a.as_str()[8..18], &b.as_str()[8..18]);
    }

    #[test]
    fn test_is_valid() {
        assert!(is_valid("5f2b6e1c9a3d4b0012ab34cd"));
        assert!(is_valid("5F2B6E1C9A3D4B0012AB34CD"));
        assert!(!is_valid("5f2b6e1c9a3d4b0012ab34c"));
        assert!(!is_valid("5f2b6e1c9a3d4b0012ab34cde"));
        assert!(!is_valid("5f2b6e1c9a3d4b0012ab34cg"));
        assert!(!is_valid(""));
    }

    #[test]
    fn test_parse_normalises_case() {
        let id = Id::parse("5F2B6E1C9A3D4B0012AB34CD").unwrap();
        assert_eq!(id.as_str(), "5f2b6e1c9a3d4b0012ab34cd");
        assert!(Id::parse("not-an-id").is_err());
    }

    #[test]
    fn test_timestamp() {
        let id = Id::parse("5f2b6e1c0000000000000000").unwrap();
        assert_eq!(id.timestamp().unwrap().timestamp(), 0x5f2b6e1c);

        let now = Utc::now().timestamp();
        let fresh = generate().timestamp().unwrap().timestamp();
        assert!((fresh - now).abs() <= 1);
    }

    #[test]
    fn test_serde_validates() {
        let id: Id = serde_json::from_str("\"5f2b6e1c9a3d4b0012ab34cd\"").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"5f2b6e1c9a3d4b0012ab34cd\"");
        assert!(serde_json::from_str::<Id>("\"xyz\"").is_err());
    }
}
