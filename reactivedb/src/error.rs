//! Crate-wide error type.
//!
//! Mirrors the error style used throughout the storage adapters this crate
//! is modeled on: a hand-written enum with manual `Display`/`Error` impls
//! and `From` conversions, rather than `thiserror`/`anyhow`.

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type covering every failure mode named in the
/// reactive-database error taxonomy.
#[derive(Debug)]
pub enum Error {
	/// A read that requires data found none (`ItemRef::require`-style getters).
	NotFound { collection: Box<str>, id: Box<str> },
	/// A query/update builder call was given a malformed argument.
	InvalidArgument(String),
	/// An internal invariant was violated (e.g. a dotted update path ran
	/// through a non-object). Fatal; not expected to be caught.
	Invariant(String),
	/// A storage provider reported a transient failure (network error,
	/// serialization error, etc). Surfaced through a `State`'s error
	/// channel; retryable via `refresh`.
	Provider(String),
	Json(serde_json::Error),
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::NotFound { collection, id } => {
				write!(f, "document not found: {collection}/{id}")
			}
			Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
			Error::Invariant(msg) => write!(f, "invariant violated: {msg}"),
			Error::Provider(msg) => write!(f, "provider error: {msg}"),
			Error::Json(e) => write!(f, "json error: {e}"),
		}
	}
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Self {
		Error::Json(e)
	}
}

/// Helper for provider implementations to wrap an arbitrary displayable
/// failure as a transient provider error.
pub fn from_provider_error<E: fmt::Display>(err: E) -> Error {
	Error::Provider(err.to_string())
}

// vim: ts=4
