//! Scalar types that have no direct Rust primitive: object identity,
//! timestamps, 128-bit decimals and 12-byte object ids.

use crate::error::{CodecError, CodecResult};
use chrono::{DateTime, TimeZone, Utc};
use rand::RngCore;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::OnceLock;

/// Internal stable identity of a stored object.
///
/// Keys are handed out from a single counter per store and never reused,
/// so a key uniquely names one object for the life of the store, distinct
/// from any user-visible primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjKey(pub u64);

impl ObjKey {
    /// Wraps a raw key.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw key value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj:{}", self.0)
    }
}

/// A typed reference to a stored object: the class it belongs to plus its key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjLink {
    /// Name of the object's class.
    pub class: String,
    /// Key within that class.
    pub key: ObjKey,
}

impl ObjLink {
    /// Creates a link.
    pub fn new(class: impl Into<String>, key: ObjKey) -> Self {
        Self {
            class: class.into(),
            key,
        }
    }
}

impl fmt::Display for ObjLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.class, self.key.0)
    }
}

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// A point in time with nanosecond precision.
///
/// `nanoseconds` is always normalized into `0..1_000_000_000`, so the
/// derived ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    seconds: i64,
    nanoseconds: u32,
}

impl Timestamp {
    /// Unix epoch.
    pub const EPOCH: Self = Self {
        seconds: 0,
        nanoseconds: 0,
    };

    /// Builds a timestamp, carrying excess nanoseconds into seconds.
    #[must_use]
    pub fn new(seconds: i64, nanoseconds: i64) -> Self {
        let carry = nanoseconds.div_euclid(NANOS_PER_SECOND);
        let nanos = nanoseconds.rem_euclid(NANOS_PER_SECOND);
        Self {
            seconds: seconds.saturating_add(carry),
            nanoseconds: nanos as u32,
        }
    }

    /// Timestamp from milliseconds since the epoch.
    #[must_use]
    pub fn from_millis(millis: i64) -> Self {
        Self::new(millis.div_euclid(1000), millis.rem_euclid(1000) * 1_000_000)
    }

    /// The current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Whole seconds since the epoch.
    #[must_use]
    pub const fn seconds(self) -> i64 {
        self.seconds
    }

    /// Sub-second part.
    #[must_use]
    pub const fn nanoseconds(self) -> u32 {
        self.nanoseconds
    }

    /// Milliseconds since the epoch, truncated.
    #[must_use]
    pub fn as_millis(self) -> i64 {
        self.seconds
            .saturating_mul(1000)
            .saturating_add(i64::from(self.nanoseconds / 1_000_000))
    }

    /// Converts to a chrono UTC datetime when the value is in chrono's range.
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.nanoseconds).single()
    }

    /// Parses an RFC 3339 string.
    ///
    /// # Errors
    ///
    /// Fails when `input` is not RFC 3339.
    pub fn parse_rfc3339(input: &str) -> CodecResult<Self> {
        DateTime::parse_from_rfc3339(input)
            .map(|dt| Self::from(dt.with_timezone(&Utc)))
            .map_err(|_| CodecError::parse("date", input))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::new(dt.timestamp(), i64::from(dt.timestamp_subsec_nanos()))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true)),
            None => write!(f, "T{}:{}", self.seconds, self.nanoseconds),
        }
    }
}

/// A decimal number `coefficient * 10^exponent`.
///
/// Values are kept normalized (no trailing zeros in the coefficient, zero
/// has exponent 0), so structural equality is numeric equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Decimal128 {
    coefficient: i128,
    exponent: i32,
}

impl Decimal128 {
    /// Zero.
    pub const ZERO: Self = Self {
        coefficient: 0,
        exponent: 0,
    };

    /// Builds and normalizes a decimal.
    #[must_use]
    pub fn new(coefficient: i128, exponent: i32) -> Self {
        if coefficient == 0 {
            return Self::ZERO;
        }
        let mut coefficient = coefficient;
        let mut exponent = exponent;
        while coefficient % 10 == 0 {
            coefficient /= 10;
            exponent += 1;
        }
        Self {
            coefficient,
            exponent,
        }
    }

    /// Coefficient of the normalized form.
    #[must_use]
    pub const fn coefficient(self) -> i128 {
        self.coefficient
    }

    /// Exponent of the normalized form.
    #[must_use]
    pub const fn exponent(self) -> i32 {
        self.exponent
    }

    /// Nearest `f64`.
    #[must_use]
    pub fn to_f64(self) -> f64 {
        self.coefficient as f64 * 10f64.powi(self.exponent)
    }

    /// Exact sum, or `None` when the aligned coefficients overflow.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        let (a, b, exponent) = Self::align(self, other)?;
        Some(Self::new(a.checked_add(b)?, exponent))
    }

    /// Divides by an integer count, rounding to 18 fractional digits.
    #[must_use]
    pub fn checked_div_int(self, divisor: i64) -> Option<Self> {
        if divisor == 0 {
            return None;
        }
        let scale = 18i32;
        let scaled = Self::rescale(self.coefficient, self.exponent, self.exponent.min(-scale))?;
        let exponent = self.exponent.min(-scale);
        Some(Self::new(scaled / i128::from(divisor), exponent))
    }

    fn rescale(coefficient: i128, from: i32, to: i32) -> Option<i128> {
        let shift = u32::try_from(from - to).ok()?;
        10i128.checked_pow(shift)?.checked_mul(coefficient)
    }

    fn align(a: Self, b: Self) -> Option<(i128, i128, i32)> {
        let exponent = a.exponent.min(b.exponent);
        Some((
            Self::rescale(a.coefficient, a.exponent, exponent)?,
            Self::rescale(b.coefficient, b.exponent, exponent)?,
            exponent,
        ))
    }
}

impl Ord for Decimal128 {
    fn cmp(&self, other: &Self) -> Ordering {
        match Self::align(*self, *other) {
            Some((a, b, _)) => a.cmp(&b),
            None => self.to_f64().total_cmp(&other.to_f64()),
        }
    }
}

impl PartialOrd for Decimal128 {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i64> for Decimal128 {
    fn from(v: i64) -> Self {
        Self::new(i128::from(v), 0)
    }
}

impl FromStr for Decimal128 {
    type Err = CodecError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let err = || CodecError::parse("decimal128", input);
        let trimmed = input.trim();
        let (mantissa, exp_part) = match trimmed.find(['e', 'E']) {
            Some(pos) => (&trimmed[..pos], Some(&trimmed[pos + 1..])),
            None => (trimmed, None),
        };
        let mut exponent: i32 = match exp_part {
            Some(e) => e.parse().map_err(|_| err())?,
            None => 0,
        };
        let (negative, digits) = match mantissa.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, mantissa.strip_prefix('+').unwrap_or(mantissa)),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err());
        }
        let mut coefficient: i128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let d = c.to_digit(10).ok_or_else(err)?;
            coefficient = coefficient
                .checked_mul(10)
                .and_then(|v| v.checked_add(i128::from(d)))
                .ok_or_else(err)?;
        }
        exponent -= i32::try_from(frac_part.len()).map_err(|_| err())?;
        if negative {
            coefficient = -coefficient;
        }
        Ok(Self::new(coefficient, exponent))
    }
}

impl fmt::Display for Decimal128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exponent >= 0 {
            if self.exponent <= 20 {
                write!(f, "{}", self.coefficient)?;
                for _ in 0..self.exponent {
                    f.write_str("0")?;
                }
                return Ok(());
            }
            return write!(f, "{}E{}", self.coefficient, self.exponent);
        }
        let digits = self.coefficient.unsigned_abs().to_string();
        let frac_len = self.exponent.unsigned_abs() as usize;
        if self.coefficient < 0 {
            f.write_str("-")?;
        }
        if digits.len() > frac_len {
            let (int_part, frac_part) = digits.split_at(digits.len() - frac_len);
            write!(f, "{int_part}.{frac_part}")
        } else {
            write!(f, "0.{}{}", "0".repeat(frac_len - digits.len()), digits)
        }
    }
}

/// A 12-byte object id: 4 bytes of big-endian seconds, 5 bytes fixed per
/// process, 3 bytes of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId([u8; 12]);

struct ObjectIdSeed {
    process: [u8; 5],
    counter: AtomicU32,
}

fn object_id_seed() -> &'static ObjectIdSeed {
    static SEED: OnceLock<ObjectIdSeed> = OnceLock::new();
    SEED.get_or_init(|| {
        let mut rng = rand::thread_rng();
        let mut process = [0u8; 5];
        rng.fill_bytes(&mut process);
        ObjectIdSeed {
            process,
            counter: AtomicU32::new(rng.next_u32() & 0x00FF_FFFF),
        }
    })
}

impl ObjectId {
    /// Wraps raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh id.
    #[must_use]
    pub fn generate() -> Self {
        let seed = object_id_seed();
        let seconds = Utc::now().timestamp() as u32;
        let count = seed.counter.fetch_add(1, AtomicOrdering::Relaxed);
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&seed.process);
        bytes[9..].copy_from_slice(&count.to_be_bytes()[1..]);
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// The creation second encoded in the id.
    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        Timestamp::new(i64::from(secs), 0)
    }
}

impl FromStr for ObjectId {
    type Err = CodecError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(input, &mut bytes).map_err(|_| CodecError::parse("objectId", input))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_normalizes_nanoseconds() {
        let t = Timestamp::new(10, -1);
        assert_eq!(t.seconds(), 9);
        assert_eq!(t.nanoseconds(), 999_999_999);
        assert!(Timestamp::new(-1, 5) < Timestamp::EPOCH);
        assert_eq!(Timestamp::from_millis(1_500).as_millis(), 1_500);
    }

    #[test]
    fn timestamp_rfc3339() {
        let t = Timestamp::parse_rfc3339("2021-03-04T05:06:07Z").unwrap();
        assert_eq!(t.to_string(), "2021-03-04T05:06:07Z");
        assert!(Timestamp::parse_rfc3339("yesterday").is_err());
    }

    #[test]
    fn decimal_parse_and_display() {
        let d: Decimal128 = "12.50".parse().unwrap();
        assert_eq!(d, Decimal128::new(125, -1));
        assert_eq!(d.to_string(), "12.5");
        assert_eq!("-0.05".parse::<Decimal128>().unwrap().to_string(), "-0.05");
        assert_eq!("3e2".parse::<Decimal128>().unwrap().to_string(), "300");
        assert!("1.2.3".parse::<Decimal128>().is_err());
    }

    #[test]
    fn decimal_ordering_across_exponents() {
        let a: Decimal128 = "1.1".parse().unwrap();
        let b: Decimal128 = "1.05".parse().unwrap();
        assert!(b < a);
        assert_eq!(a.checked_add(b).unwrap().to_string(), "2.15");
        assert_eq!(
            Decimal128::from(7).checked_div_int(2).unwrap().to_string(),
            "3.5"
        );
    }

    #[test]
    fn object_id_hex_roundtrip() {
        let id = ObjectId::generate();
        let text = id.to_string();
        assert_eq!(text.len(), 24);
        assert_eq!(text.parse::<ObjectId>().unwrap(), id);
        assert!("xyz".parse::<ObjectId>().is_err());
    }

    #[test]
    fn object_ids_are_distinct() {
        let a = ObjectId::generate();
        let b = ObjectId::generate();
        assert_ne!(a, b);
    }
}
