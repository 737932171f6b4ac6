use crate::error::{NasError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const TICKS_PER_SEC: u64 = 100_000;
const FRACTION_DIGITS: usize = 5;

/// Request timestamp with 10 microsecond resolution.
///
/// Ordering on this type is the last-writer-wins order of object entries.
/// Its text form is the zero padded `%016.05f` rendering used in request
/// headers, so lexical and numeric order agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(TICKS_PER_SEC))
    }

    pub fn now() -> Self {
        let micros = chrono::Utc::now().timestamp_micros().max(0) as u64;
        Self(micros / 10)
    }

    pub fn ticks(&self) -> u64 {
        self.0
    }

    pub fn as_secs(&self) -> u64 {
        self.0 / TICKS_PER_SEC
    }

    pub fn normal(&self) -> String {
        format!(
            "{:010}.{:05}",
            self.0 / TICKS_PER_SEC,
            self.0 % TICKS_PER_SEC
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normal())
    }
}

impl FromStr for Timestamp {
    type Err = NasError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || NasError::InvalidRequest(format!("invalid timestamp '{}'", raw));
        let trimmed = raw.trim();
        let (secs_raw, frac_raw) = match trimmed.split_once('.') {
            Some((secs, frac)) => (secs, frac),
            None => (trimmed, ""),
        };

        if secs_raw.is_empty() || !secs_raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !frac_raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let secs: u64 = secs_raw.parse().map_err(|_| invalid())?;

        let mut ticks_frac = 0u64;
        for (index, digit) in frac_raw.bytes().take(FRACTION_DIGITS).enumerate() {
            ticks_frac += u64::from(digit - b'0') * 10u64.pow((FRACTION_DIGITS - 1 - index) as u32);
        }
        if let Some(next) = frac_raw.bytes().nth(FRACTION_DIGITS) {
            if next >= b'5' {
                ticks_frac += 1;
            }
        }

        secs.checked_mul(TICKS_PER_SEC)
            .and_then(|ticks| ticks.checked_add(ticks_frac))
            .map(Timestamp)
            .ok_or_else(invalid)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.normal())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_normalize() {
        let ts: Timestamp = "1400000000.12345".parse().unwrap();
        assert_eq!(ts.normal(), "1400000000.12345");
        assert_eq!(ts.as_secs(), 1_400_000_000);

        let short: Timestamp = "100".parse().unwrap();
        assert_eq!(short.normal(), "0000000100.00000");
        assert_eq!(short, Timestamp::from_secs(100));

        let rounded: Timestamp = "1.000006".parse().unwrap();
        assert_eq!(rounded.normal(), "0000000001.00001");
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("".parse::<Timestamp>().is_err());
        assert!("-1".parse::<Timestamp>().is_err());
        assert!("12a.5".parse::<Timestamp>().is_err());
        assert!("1.2.3".parse::<Timestamp>().is_err());
    }

    #[test]
    fn test_order_matches_text_order() {
        let older = Timestamp::from_secs(99);
        let newer: Timestamp = "99.00001".parse().unwrap();
        assert!(older < newer);
        assert!(older.normal() < newer.normal());
    }
}
