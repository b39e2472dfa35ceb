//! MongoDB resume position
//!
//! A [`Cursor`] wraps the `_id` ObjectId of the last document processed in a
//! collection. ObjectIds start with a big-endian creation timestamp, so their
//! byte order follows insertion order and "greater than the cursor" means
//! "not yet processed".

use std::cmp::Ordering;
use std::fmt;

use anyhow::Result;
use bson::oid::ObjectId;
use chrono::{DateTime, SecondsFormat, Utc};

/// Width of the stored encoding (hex digits of a 12-byte ObjectId).
pub const ENCODED_LEN: usize = 24;

/// Resume position within one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cursor(ObjectId);

impl Cursor {
    pub fn new(oid: ObjectId) -> Self {
        Self(oid)
    }

    pub fn object_id(&self) -> ObjectId {
        self.0
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0.bytes()
    }

    /// Lowercase 24-character hex form.
    pub fn to_hex(&self) -> String {
        self.0.to_hex()
    }

    /// Creation time embedded in the ObjectId (second precision).
    pub fn generation_time(&self) -> DateTime<Utc> {
        self.0.timestamp().to_chrono()
    }

    /// Creation time as RFC 3339, e.g. `2015-06-27T00:00:00Z`.
    pub fn generation_time_rfc3339(&self) -> String {
        self.generation_time()
            .to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// The cursor immediately before this one in 96-bit order.
    ///
    /// Returns `None` for the all-zero ObjectId.
    pub fn predecessor(&self) -> Option<Cursor> {
        let value = bytes_to_u128(&self.bytes()).checked_sub(1)?;
        Some(Cursor(ObjectId::from_bytes(u128_to_bytes(value))))
    }

    /// The fields of the ObjectId layout (timestamp, machine, process, counter).
    pub fn unpack(&self) -> UnpackedId {
        let b = self.bytes();
        UnpackedId {
            timestamp: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            machine_id: u32::from_be_bytes([0, b[4], b[5], b[6]]),
            process_id: u16::from_be_bytes([b[7], b[8]]),
            counter: u32::from_be_bytes([0, b[9], b[10], b[11]]),
        }
    }
}

/// Components of a classic ObjectId.
///
/// Drivers since MongoDB 3.4 fill bytes 4..9 with a per-process random value;
/// the split is kept for compatibility with existing dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnpackedId {
    pub timestamp: u32,
    pub machine_id: u32,
    pub process_id: u16,
    pub counter: u32,
}

fn bytes_to_u128(bytes: &[u8; 12]) -> u128 {
    bytes.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b))
}

fn u128_to_bytes(value: u128) -> [u8; 12] {
    let wide = value.to_be_bytes();
    let mut out = [0u8; 12];
    out.copy_from_slice(&wide[4..]);
    out
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.bytes().cmp(&other.bytes())
    }
}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<ObjectId> for Cursor {
    fn from(oid: ObjectId) -> Self {
        Self(oid)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl checkpoint::Checkpoint for Cursor {
    const DATABASE_TYPE: &'static str = "mongodb";

    fn to_cli_string(&self) -> String {
        self.to_hex()
    }

    fn from_cli_string(s: &str) -> Result<Self> {
        if s.len() != ENCODED_LEN {
            anyhow::bail!(
                "Invalid MongoDB cursor: expected {ENCODED_LEN} hex characters, got '{s}'"
            );
        }
        let oid = ObjectId::parse_str(s)
            .map_err(|e| anyhow::anyhow!("Invalid MongoDB cursor '{s}': {e}"))?;
        Ok(Self(oid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkpoint::Checkpoint;

    fn cursor(hex: &str) -> Cursor {
        Cursor::from_cli_string(hex).unwrap()
    }

    #[test]
    fn test_cursor_cli_string_roundtrip() {
        let original = cursor("558de77ec5ed007567574a58");
        assert_eq!(original.to_cli_string(), "558de77ec5ed007567574a58");
        assert_eq!(Cursor::from_cli_string(&original.to_cli_string()).unwrap(), original);
    }

    #[test]
    fn test_cursor_rejects_bad_encoding() {
        assert!(Cursor::from_cli_string("").is_err());
        assert!(Cursor::from_cli_string("558de77e").is_err());
        assert!(Cursor::from_cli_string("zz8de77ec5ed007567574a58").is_err());
    }

    #[test]
    fn test_cursor_database_type() {
        assert_eq!(Cursor::DATABASE_TYPE, "mongodb");
    }

    #[test]
    fn test_cursor_ordering_follows_bytes() {
        let a = cursor("558de77ec5ed007567574a58");
        let b = cursor("558de77ec5ed007567574a59");
        let c = cursor("558de77fc5ed007567574a00");
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.max(c), c);
    }

    #[test]
    fn test_generation_time() {
        let c = cursor("558de77ec5ed007567574a58");
        assert_eq!(c.generation_time().timestamp(), 0x558de77e);
        assert_eq!(c.generation_time_rfc3339(), "2015-06-26T23:59:58Z");
    }

    #[test]
    fn test_predecessor() {
        assert_eq!(
            cursor("558de77ec5ed007567574a58").predecessor(),
            Some(cursor("558de77ec5ed007567574a57"))
        );
        // Borrow ripples across bytes
        assert_eq!(
            cursor("558de77f0000000000000000").predecessor(),
            Some(cursor("558de77effffffffffffffff"))
        );
        assert_eq!(cursor("000000000000000000000000").predecessor(), None);

        let c = cursor("558de77ec5ed007567574a58");
        assert!(c.predecessor().unwrap() < c);
    }

    #[test]
    fn test_unpack() {
        let unpacked = cursor("558de77ec5ed007567574a58").unpack();
        assert_eq!(unpacked.timestamp, 0x558de77e);
        assert_eq!(unpacked.machine_id, 0xc5ed00);
        assert_eq!(unpacked.process_id, 0x7567);
        assert_eq!(unpacked.counter, 0x574a58);
    }
}
