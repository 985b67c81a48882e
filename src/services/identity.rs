//! Job identity.
//!
//! A job id is the URL-safe, unpadded base64 encoding of the raw request
//! bytes. Identical input always maps to the same id, distinct input never
//! collides, and the id can be decoded back into the request it stands for.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Derive the id for a request payload.
    pub fn from_input(input: &str) -> Result<Self, IdentityError> {
        if input.is_empty() {
            return Err(IdentityError::Empty);
        }
        Ok(Self(URL_SAFE_NO_PAD.encode(input.as_bytes())))
    }

    /// Accept an id received from a client, checking that it decodes to text.
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        if raw.is_empty() {
            return Err(IdentityError::Empty);
        }
        decode_input(raw)?;
        Ok(Self(raw.to_string()))
    }

    /// Recover the request payload this id was derived from.
    pub fn input(&self) -> Result<String, IdentityError> {
        decode_input(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn decode_input(raw: &str) -> Result<String, IdentityError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(raw)
        .map_err(|_| IdentityError::Malformed)?;
    String::from_utf8(bytes).map_err(|_| IdentityError::Malformed)
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("Job input is empty")]
    Empty,

    #[error("Job id is not a valid encoding of a request")]
    Malformed,
}
