//! Room code type for the Pairsig relay.
//!
//! Rooms are identified by a short numeric code typed by users into both
//! clients. The code format is fixed at exactly four ASCII digits; anything
//! else is rejected before any room state is touched.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of digits in a room code.
pub const ROOM_CODE_LEN: usize = 4;

/// Error returned when a string fails room code validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid room code: expected exactly {ROOM_CODE_LEN} digits")]
pub struct RoomCodeError;

/// A validated four-digit room code.
///
/// Construction goes through [`FromStr`] (or [`RoomCode::parse`]), which
/// enforces the `\d{4}` format. Serializes as a plain string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Validates and wraps a raw room code string.
    ///
    /// # Errors
    ///
    /// Returns [`RoomCodeError`] unless the input is exactly four
    /// ASCII digits.
    pub fn parse(raw: &str) -> Result<Self, RoomCodeError> {
        if raw.len() == ROOM_CODE_LEN && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(RoomCodeError)
        }
    }

    /// Returns the code as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomCode {
    type Err = RoomCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = RoomCodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
