// ZRTP identifier (ZID): the 96-bit per-endpoint identity carried in Hello and Commit.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZrtpError};

/// Length of a ZID on the wire.
pub const ZID_LEN: usize = 12;

/// A 12-byte endpoint identifier.
///
/// ZIDs are supplied by the caller and are expected to be stable across
/// sessions; the engine never generates one on its own.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Zid([u8; ZID_LEN]);

impl Zid {
    pub const fn new(bytes: [u8; ZID_LEN]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh random ZID, e.g. on first install before it is persisted.
    pub fn random() -> Self {
        let mut bytes = [0u8; ZID_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; ZID_LEN] = bytes.try_into().map_err(|_| {
            ZrtpError::Config(format!("ZID must be {ZID_LEN} bytes, got {}", bytes.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; ZID_LEN] {
        &self.0
    }
}

impl fmt::Display for Zid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Zid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Zid({self})")
    }
}

impl FromStr for Zid {
    type Err = ZrtpError;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| ZrtpError::Config(format!("ZID hex: {e}")))?;
        Self::from_slice(&bytes)
    }
}

impl TryFrom<String> for Zid {
    type Error = ZrtpError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Zid> for String {
    fn from(zid: Zid) -> String {
        zid.to_string()
    }
}
