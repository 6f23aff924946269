//! Scan positions over a payload store's keyspace.
//!
//! A [`ScanCursor`] is an opaque byte string ordered byte-lexicographically.
//! Wide-column stores use partitioner tokens, which are encoded so that byte
//! order equals numeric order; object stores use the object path relative to
//! the datastore root. Both share the same cursor type, so the scanner and
//! the reconciliation engine never need to know which backend they drive.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const SIGN_BIT: u64 = 1 << 63;

/// An opaque, totally ordered scan position.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScanCursor(Vec<u8>);

impl ScanCursor {
    /// The minimum cursor: the beginning of the keyspace.
    pub const MIN: ScanCursor = ScanCursor(Vec::new());

    /// Creates a cursor from raw bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Creates a cursor from an object key.
    pub fn from_key(key: &str) -> Self {
        Self(key.as_bytes().to_vec())
    }

    /// Creates a cursor from a partitioner token.
    ///
    /// The encoding flips the sign bit and stores the value big-endian, so
    /// `from_token(a) < from_token(b)` iff `a < b`.
    pub fn from_token(token: i64) -> Self {
        Self(((token as u64) ^ SIGN_BIT).to_be_bytes().to_vec())
    }

    /// Decodes a cursor produced by [`from_token`](Self::from_token).
    pub fn to_token(&self) -> Option<i64> {
        let bytes: [u8; 8] = self.0.as_slice().try_into().ok()?;
        Some((u64::from_be_bytes(bytes) ^ SIGN_BIT) as i64)
    }

    /// Smallest token whose cursor is `>= self`, or `None` if every token
    /// sorts below this cursor.
    pub fn token_lower_bound(&self) -> Option<i64> {
        if self.0.len() <= 8 {
            let mut padded = [0u8; 8];
            padded[..self.0.len()].copy_from_slice(&self.0);
            return Some((u64::from_be_bytes(padded) ^ SIGN_BIT) as i64);
        }

        let mut head = [0u8; 8];
        head.copy_from_slice(&self.0[..8]);
        let token = (u64::from_be_bytes(head) ^ SIGN_BIT) as i64;
        // The 8-byte head is a proper prefix, so it sorts strictly below.
        token.checked_add(1)
    }

    /// The smallest cursor strictly greater than this one.
    pub fn successor(&self) -> Self {
        let mut bytes = Vec::with_capacity(self.0.len() + 1);
        bytes.extend_from_slice(&self.0);
        bytes.push(0);
        Self(bytes)
    }

    /// Returns true for [`ScanCursor::MIN`].
    pub fn is_min(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the raw cursor bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex rendering used for logs and persisted resume points.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parses the output of [`to_hex`](Self::to_hex).
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() % 2 != 0 {
            return None;
        }
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
            .collect::<Option<Vec<u8>>>()
            .map(Self)
    }
}

impl fmt::Display for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_min() {
            write!(f, "MIN")
        } else {
            write!(f, "{}", self.to_hex())
        }
    }
}

impl fmt::Debug for ScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ScanCursor({})", self)
    }
}

impl Serialize for ScanCursor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ScanCursor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        ScanCursor::from_hex(&hex)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid scan cursor '{hex}'")))
    }
}

/// A half-open range of cursors: `start <= cursor < end`.
///
/// `end == None` extends the range to the end of the keyspace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ScanRange {
    /// Inclusive lower bound.
    pub start: ScanCursor,
    /// Exclusive upper bound.
    pub end: Option<ScanCursor>,
}

impl ScanRange {
    /// The whole keyspace.
    pub fn full() -> Self {
        Self::default()
    }

    /// `[start, +inf)`.
    pub fn from(start: ScanCursor) -> Self {
        Self { start, end: None }
    }

    /// `[start, end)`.
    pub fn between(start: ScanCursor, end: ScanCursor) -> Self {
        Self {
            start,
            end: Some(end),
        }
    }

    /// The range holding exactly the records at `cursor`.
    pub fn exactly(cursor: &ScanCursor) -> Self {
        Self::between(cursor.clone(), cursor.successor())
    }

    /// Returns true if `cursor` lies within this range.
    pub fn contains(&self, cursor: &ScanCursor) -> bool {
        *cursor >= self.start && self.end.as_ref().is_none_or(|end| cursor < end)
    }

    /// Returns true if no cursor can lie within this range.
    pub fn is_empty(&self) -> bool {
        self.end.as_ref().is_some_and(|end| *end <= self.start)
    }

    /// Same range with a new lower bound.
    pub fn resume_at(&self, start: ScanCursor) -> Self {
        Self {
            start,
            end: self.end.clone(),
        }
    }

    /// Splits the whole keyspace into `parts` disjoint ranges that together
    /// cover it, cut on the first two cursor bytes.
    ///
    /// Token cursors are uniformly distributed, so shards are balanced for
    /// wide-column stores. Object-key shards are correct but may be skewed.
    pub fn partition(parts: usize) -> Vec<ScanRange> {
        let parts = parts.clamp(1, 1 << 16);
        let mut ranges = Vec::with_capacity(parts);
        let mut start = ScanCursor::MIN;
        for i in 1..parts {
            let boundary = ((i << 16) / parts) as u16;
            let end = ScanCursor::from_bytes(boundary.to_be_bytes().to_vec());
            ranges.push(ScanRange::between(start, end.clone()));
            start = end;
        }
        ranges.push(ScanRange::from(start));
        ranges
    }
}

impl fmt::Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.end {
            Some(end) => write!(f, "[{}, {})", self.start, end),
            None => write!(f, "[{}, +inf)", self.start),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_order_preserved() {
        let tokens = [i64::MIN, -1_000, -1, 0, 1, 42, i64::MAX];
        for pair in tokens.windows(2) {
            assert!(ScanCursor::from_token(pair[0]) < ScanCursor::from_token(pair[1]));
        }
        for token in tokens {
            assert_eq!(ScanCursor::from_token(token).to_token(), Some(token));
        }
        assert!(ScanCursor::MIN < ScanCursor::from_token(i64::MIN));
    }

    #[test]
    fn test_successor_is_next_cursor() {
        let c = ScanCursor::from_token(7);
        let next = c.successor();
        assert!(next > c);
        assert!(next < ScanCursor::from_token(8));
        assert_eq!(next.token_lower_bound(), Some(8));
        assert_eq!(ScanCursor::from_token(i64::MAX).successor().token_lower_bound(), None);
    }

    #[test]
    fn test_token_lower_bound_of_short_cursors() {
        assert_eq!(ScanCursor::MIN.token_lower_bound(), Some(i64::MIN));
        assert_eq!(ScanCursor::from_bytes(vec![0x80, 0x00]).token_lower_bound(), Some(0));
        assert_eq!(ScanCursor::from_token(-5).token_lower_bound(), Some(-5));
    }

    #[test]
    fn test_key_cursor_order() {
        let a = ScanCursor::from_key("1/p1/1/k1");
        let b = ScanCursor::from_key("1/p1/2/k2");
        assert!(a < b);
        assert!(a.successor() < b);
        assert!(ScanRange::exactly(&a).contains(&a));
        assert!(!ScanRange::exactly(&a).contains(&b));
    }

    #[test]
    fn test_hex_round_trip() {
        let c = ScanCursor::from_token(-42);
        assert_eq!(ScanCursor::from_hex(&c.to_hex()), Some(c.clone()));
        assert_eq!(ScanCursor::from_hex(""), Some(ScanCursor::MIN));
        assert_eq!(ScanCursor::from_hex("abc"), None);
        assert_eq!(ScanCursor::from_hex("zz"), None);

        let json = serde_json::to_string(&c).unwrap();
        let back: ScanCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn test_partition_covers_keyspace() {
        let ranges = ScanRange::partition(4);
        assert_eq!(ranges.len(), 4);
        assert_eq!(ranges[0].start, ScanCursor::MIN);
        assert!(ranges[3].end.is_none());
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end.as_ref(), Some(&pair[1].start));
        }

        let samples = [
            ScanCursor::MIN,
            ScanCursor::from_token(i64::MIN),
            ScanCursor::from_token(-1),
            ScanCursor::from_token(0),
            ScanCursor::from_token(i64::MAX),
            ScanCursor::from_key("9/x/1/k"),
        ];
        for sample in &samples {
            let owners = ranges.iter().filter(|r| r.contains(sample)).count();
            assert_eq!(owners, 1, "cursor {sample} must be owned by one shard");
        }
    }

    #[test]
    fn test_partition_single() {
        assert_eq!(ScanRange::partition(0), vec![ScanRange::full()]);
        assert_eq!(ScanRange::partition(1), vec![ScanRange::full()]);
    }
}
