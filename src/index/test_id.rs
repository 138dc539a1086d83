use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::error::MantraError;

const FNV64_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Salt used for documents without a category.
pub const DEFAULT_SALT: &str = "mantra!";

/// 64-bit FNV-1 (multiply, then xor).
pub fn fnv64(data: &[u8]) -> u64 {
    data.iter().fold(FNV64_OFFSET_BASIS, |hash, byte| {
        hash.wrapping_mul(FNV64_PRIME) ^ u64::from(*byte)
    })
}

/// Stable identifier of one source document.
///
/// Derived from the document's category and file name only, so relocating the source and
/// destination trees keeps every id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    pub fn derive(basename: &str, category: &str) -> TestId {
        let salt = if category.is_empty() {
            DEFAULT_SALT
        } else {
            category
        };
        let mut data = Vec::with_capacity(salt.len() + basename.len());
        data.extend_from_slice(salt.as_bytes());
        data.extend_from_slice(basename.as_bytes());
        TestId(URL_SAFE_NO_PAD.encode(fnv64(&data).to_le_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for TestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for TestId {
    type Err = MantraError;

    /// Accepts any id that could name a destination directory.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(TestId(s.to_string()))
        } else {
            Err(MantraError::NotFound(format!("not a test id: {s:?}")))
        }
    }
}
