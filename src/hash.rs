use crate::error::PtGenericError;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

pub const HASH_SIZE: usize = 20;

/// Stable digest over an agent-encoded value. Computed over the encoded
/// bytes so the same logical value hashes identically across processes.
#[derive(PartialEq, Eq, Hash, Clone, Copy, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ContentHash([u8; HASH_SIZE]);

impl ContentHash {
    /// the all-zero digest stands in for "not yet computed"
    pub const UNKNOWN: Self = Self([0; HASH_SIZE]);

    #[inline]
    pub fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Self(bytes)
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    #[inline]
    pub fn is_known(self) -> bool {
        self != Self::UNKNOWN
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

pub fn hash_bytes(bytes: impl AsRef<[u8]>) -> ContentHash {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    ContentHash::new(hasher.finalize().into())
}

impl FromStr for ContentHash {
    type Err = PtGenericError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end();
        ensure!(s.len() == 2 * HASH_SIZE, "invalid content hash `{}` (incorrect length)", s);
        let mut bytes = [0; HASH_SIZE];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Debug for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let hex = self.to_hex();
        if f.alternate() { write!(f, "{}", &hex[..7]) } else { write!(f, "{}", hex) }
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HexVisitor;

        impl Visitor<'_> for HexVisitor {
            type Value = ContentHash;

            fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
                write!(f, "a {}-character hex string", 2 * HASH_SIZE)
            }

            fn visit_str<E: de::Error>(self, s: &str) -> Result<Self::Value, E> {
                s.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(HexVisitor)
    }
}
