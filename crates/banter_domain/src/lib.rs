#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing domain values from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
	#[error("empty value")]
	Empty,
	#[error("invalid timestamp: {0}")]
	InvalidTimestamp(String),
}

/// Account name of a chat participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Username(String);

impl Username {
	/// Create a non-empty `Username`.
	pub fn new(name: impl Into<String>) -> Result<Self, ParseError> {
		let name = name.into();
		if name.trim().is_empty() {
			return Err(ParseError::Empty);
		}
		Ok(Self(name))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for Username {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for Username {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Username::new(s.to_string())
	}
}

/// Server-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct MessageId(pub uuid::Uuid);

impl MessageId {
	/// Create a new random message id.
	pub fn new_v4() -> Self {
		Self(uuid::Uuid::new_v4())
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Server-assigned creation instant, kept as the RFC3339 UTC string the
/// backend hands out. With the trailing `Z` form and fixed field widths,
/// byte order is chronological order, so `Ord` derives straight through.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct Timestamp(String);

impl Timestamp {
	/// Accept an RFC3339 UTC timestamp. Only the UTC (`Z`) form keeps
	/// string comparison meaningful, so offsets are rejected.
	pub fn new(raw: impl Into<String>) -> Result<Self, ParseError> {
		let raw = raw.into();
		if raw.trim().is_empty() {
			return Err(ParseError::Empty);
		}
		if !raw.ends_with('Z') {
			return Err(ParseError::InvalidTimestamp(raw));
		}
		Ok(Self(raw))
	}
	pub fn as_str(&self) -> &str {
		&self.0
	}
	pub fn into_string(self) -> String {
		self.0
	}
}

impl fmt::Display for Timestamp {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for Timestamp {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Timestamp::new(s.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn username_parse_and_display() {
		let name = "julia".parse::<Username>().unwrap();
		assert_eq!(name.as_str(), "julia");
		assert_eq!(name.to_string(), "julia");
	}

	#[test]
	fn message_ids_are_unique() {
		assert_ne!(MessageId::new_v4(), MessageId::new_v4());
	}

	#[test]
	fn timestamps_order_chronologically() {
		let older = Timestamp::new("2024-01-01T00:00:00Z").unwrap();
		let newer = Timestamp::new("2024-01-02T00:00:00Z").unwrap();
		assert!(newer > older);
	}

	#[test]
	fn rejects_empty_and_offset_values() {
		assert!(Username::new("   ").is_err());
		assert!(Timestamp::new("").is_err());
		assert!(Timestamp::new("2024-01-01T00:00:00+02:00").is_err());
	}
}
