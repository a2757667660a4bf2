//! Hybrid logical clock timestamps.
//!
//! The authoritative store stamps every accepted write with its own clock. Clients stamp
//! their pending edits from a local clock that has merged every stamp it has observed, so
//! staleness is always judged between timestamps of the same clock family.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::CoreError;

pub const MAX_DRIFT_MS: u64 = 300_000; // 5 minutes

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<u64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// A 12-byte timestamp: 8 bytes wall_ms (big-endian u64) followed by 4 bytes
/// counter (big-endian u32). Field order makes the derived ordering match the byte order.
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Hlc {
    wall_ms: u64,
    counter: u32,
}

impl Hlc {
    pub const ZERO: Hlc = Hlc {
        wall_ms: 0,
        counter: 0,
    };

    pub fn new(wall_ms: u64, counter: u32) -> Self {
        Self { wall_ms, counter }
    }

    pub fn wall_ms(&self) -> u64 {
        self.wall_ms
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn to_bytes(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[..8].copy_from_slice(&self.wall_ms.to_be_bytes());
        buf[8..].copy_from_slice(&self.counter.to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        let mut wall = [0u8; 8];
        let mut counter = [0u8; 4];
        wall.copy_from_slice(&bytes[..8]);
        counter.copy_from_slice(&bytes[8..]);
        Self {
            wall_ms: u64::from_be_bytes(wall),
            counter: u32::from_be_bytes(counter),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
        let arr: [u8; 12] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidData(format!("hlc must be 12 bytes, got {}", bytes.len())))?;
        Ok(Self::from_bytes(&arr))
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.wall_ms, self.counter)
    }
}

impl Serialize for Hlc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

struct HlcVisitor;

impl<'de> Visitor<'de> for HlcVisitor {
    type Value = Hlc;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("12 timestamp bytes")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Hlc, E> {
        Hlc::from_slice(v).map_err(E::custom)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Hlc, A::Error> {
        let mut bytes = Vec::with_capacity(12);
        while let Some(byte) = seq.next_element::<u8>()? {
            bytes.push(byte);
        }
        Hlc::from_slice(&bytes).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Hlc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_bytes(HlcVisitor)
    }
}

/// Issues monotonically increasing timestamps and folds in remote ones.
#[derive(Debug, Default)]
pub struct HlcClock {
    last: Hlc,
}

impl HlcClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The most recent timestamp issued or merged.
    pub fn last(&self) -> Hlc {
        self.last
    }

    /// Next local timestamp, strictly greater than anything issued or observed so far.
    pub fn tick(&mut self) -> Result<Hlc, CoreError> {
        let now = physical_now()?;
        self.last = if now > self.last.wall_ms {
            Hlc::new(now, 0)
        } else {
            Hlc::new(self.last.wall_ms, self.last.counter.saturating_add(1))
        };
        Ok(self.last)
    }

    /// Merge an observed remote timestamp. The result is greater than both the previous
    /// local state and `remote`. Stamps too far ahead of physical time are rejected and
    /// leave the clock untouched.
    pub fn receive(&mut self, remote: Hlc) -> Result<Hlc, CoreError> {
        let now = physical_now()?;
        if remote.wall_ms > now + MAX_DRIFT_MS {
            return Err(CoreError::HlcDriftTooLarge {
                delta_ms: remote.wall_ms - now,
                max_ms: MAX_DRIFT_MS,
            });
        }

        let wall = now.max(self.last.wall_ms).max(remote.wall_ms);
        let counter = match (wall == self.last.wall_ms, wall == remote.wall_ms) {
            (true, true) => self.last.counter.max(remote.counter).saturating_add(1),
            (true, false) => self.last.counter.saturating_add(1),
            (false, true) => remote.counter.saturating_add(1),
            (false, false) => 0,
        };
        self.last = Hlc::new(wall, counter);
        Ok(self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_is_monotonic() {
        let mut clock = HlcClock::new();
        let mut prev = clock.tick().unwrap();
        for _ in 0..100 {
            let next = clock.tick().unwrap();
            assert!(next > prev, "expected {next:?} > {prev:?}");
            prev = next;
        }
    }

    #[test]
    fn tick_after_future_remote_stays_ahead() {
        let mut clock = HlcClock::new();
        let ahead = Hlc::new(physical_now().unwrap() + 60_000, 4);
        clock.receive(ahead).unwrap();

        let t1 = clock.tick().unwrap();
        let t2 = clock.tick().unwrap();
        assert!(t1 > ahead);
        assert_eq!(t1.wall_ms(), ahead.wall_ms());
        assert_eq!(t2.counter(), t1.counter() + 1);
    }

    #[test]
    fn byte_order_matches_ord() {
        let pairs = [
            (Hlc::new(100, 0), Hlc::new(200, 0)),
            (Hlc::new(100, 0), Hlc::new(100, 1)),
            (Hlc::new(100, 999), Hlc::new(101, 0)),
            (Hlc::ZERO, Hlc::new(0, 1)),
        ];
        for (a, b) in &pairs {
            assert!(a < b);
            assert!(a.to_bytes() < b.to_bytes(), "byte order disagrees for {a:?} vs {b:?}");
            assert_eq!(Hlc::from_bytes(&a.to_bytes()), *a);
        }
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(Hlc::from_slice(&[0u8; 11]).is_err());
        assert!(Hlc::from_slice(&[0u8; 12]).is_ok());
    }

    #[test]
    fn receive_rejects_excessive_drift() {
        let mut clock = HlcClock::new();
        let before = clock.last();
        let remote = Hlc::new(physical_now().unwrap() + MAX_DRIFT_MS + 1_000, 0);
        match clock.receive(remote) {
            Err(CoreError::HlcDriftTooLarge { delta_ms, max_ms }) => {
                assert!(delta_ms > MAX_DRIFT_MS);
                assert_eq!(max_ms, MAX_DRIFT_MS);
            }
            other => panic!("expected HlcDriftTooLarge, got {other:?}"),
        }
        assert_eq!(clock.last(), before);
    }

    #[test]
    fn receive_exceeds_both_sides() {
        let mut clock = HlcClock::new();
        let local = clock.tick().unwrap();
        let remote = Hlc::new(local.wall_ms() + 1, 10);
        let merged = clock.receive(remote).unwrap();
        assert!(merged > local);
        assert!(merged > remote);
    }

    #[test]
    fn receive_of_old_stamp_still_advances() {
        let mut clock = HlcClock::new();
        let local = clock.tick().unwrap();
        let merged = clock.receive(Hlc::new(1, 0)).unwrap();
        assert!(merged > local);
    }
}
