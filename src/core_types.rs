//! Core types used throughout the system
//!
//! Fundamental identifiers and the canonical seat code. They provide
//! semantic meaning and enable future type evolution.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::EngineError;

/// User ID - globally unique, immutable after registration.
pub type UserId = Uuid;

/// Function (screening) ID - globally unique.
pub type FunctionId = Uuid;

/// Film ID - referenced by functions and the sales ranking.
pub type FilmId = Uuid;

/// Transaction ID - unique within the system.
pub type TransactionId = Uuid;

/// Selection ID - identifies one durable seat-selection row.
pub type SelectionId = Uuid;

/// Canonical seat code: row letter + 1-based number (`A5`, `B10`).
///
/// The row letter is normalized to uppercase on parse. The code is the only
/// seat identity crossing module boundaries; the bitmap offset derived from
/// it stays inside the inventory layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeatCode {
    row: char,
    number: u16,
}

impl SeatCode {
    /// Parse a seat code such as `"A5"` or `"b10"`.
    pub fn parse(raw: &str) -> Result<Self, EngineError> {
        let mut chars = raw.chars();
        let row = chars
            .next()
            .filter(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_uppercase())
            .ok_or_else(|| EngineError::InvalidSeat(raw.to_string()))?;

        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EngineError::InvalidSeat(raw.to_string()));
        }
        let number: u16 = digits
            .parse()
            .map_err(|_| EngineError::InvalidSeat(raw.to_string()))?;
        if number == 0 {
            return Err(EngineError::InvalidSeat(raw.to_string()));
        }

        Ok(Self { row, number })
    }

    /// Row letter, always uppercase.
    #[inline]
    pub fn row(&self) -> char {
        self.row
    }

    /// 1-based seat number within the row.
    #[inline]
    pub fn number(&self) -> u16 {
        self.number
    }

    /// 0-based row index (`A` = 0).
    #[inline]
    pub fn row_index(&self) -> u16 {
        (self.row as u8 - b'A') as u16
    }

    /// Deterministic bit offset inside a function's seat bitmap.
    ///
    /// `seats_per_row` comes from the function's hall descriptor, never from
    /// a global constant.
    #[inline]
    pub fn bit_offset(&self, seats_per_row: u16) -> u64 {
        (self.row_index() as u64 * seats_per_row as u64) + self.number as u64
    }
}

impl fmt::Display for SeatCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.number)
    }
}

impl Serialize for SeatCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SeatCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        SeatCode::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_codes() {
        let seat = SeatCode::parse("A5").unwrap();
        assert_eq!(seat.row(), 'A');
        assert_eq!(seat.number(), 5);
        assert_eq!(seat.to_string(), "A5");

        // Lowercase rows are normalized
        let seat = SeatCode::parse("b10").unwrap();
        assert_eq!(seat.row(), 'B');
        assert_eq!(seat.number(), 10);
        assert_eq!(seat.to_string(), "B10");
    }

    #[test]
    fn test_parse_invalid_codes() {
        for raw in ["", "5", "A", "A0", "AB5", "A5x", "!3"] {
            assert!(
                matches!(SeatCode::parse(raw), Err(EngineError::InvalidSeat(_))),
                "expected InvalidSeat for {raw:?}"
            );
        }
    }

    #[test]
    fn test_bit_offset_layout() {
        // Row A, 20 seats per row: A1..A20 -> 1..20
        assert_eq!(SeatCode::parse("A1").unwrap().bit_offset(20), 1);
        assert_eq!(SeatCode::parse("A20").unwrap().bit_offset(20), 20);
        // Row B starts after row A's range
        assert_eq!(SeatCode::parse("B1").unwrap().bit_offset(20), 21);
        // Layout depends on the hall's seats-per-row
        assert_eq!(SeatCode::parse("B1").unwrap().bit_offset(15), 16);
    }

    #[test]
    fn test_offsets_never_collide_within_row_bound() {
        let spr = 12u16;
        let mut seen = std::collections::HashSet::new();
        for row in ['A', 'B', 'C', 'D'] {
            for n in 1..=spr {
                let code = SeatCode::parse(&format!("{row}{n}")).unwrap();
                assert!(seen.insert(code.bit_offset(spr)));
            }
        }
    }

    #[test]
    fn test_serde_round_trip() {
        let seat = SeatCode::parse("C7").unwrap();
        let json = serde_json::to_string(&seat).unwrap();
        assert_eq!(json, "\"C7\"");
        let back: SeatCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, seat);
    }
}
