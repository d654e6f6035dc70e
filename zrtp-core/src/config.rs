// Per-endpoint handshake configuration.

use serde::{Deserialize, Serialize};

use crate::crypto::agreement::KeyAgreementType;
use crate::error::{Result, ZrtpError};
use crate::handshake::messages::CLIENT_ID_LEN;
use crate::zid::Zid;

/// Client identifier advertised in Hello when none is configured.
pub const DEFAULT_CLIENT_ID: &str = "zrtp-core";

/// Settings for one endpoint, shared by every handshake it runs.
///
/// ```json
/// { "zid": "a1a1a1a1a1a1a1a1a1a1a1a1", "key_agreements": ["DH3k", "X255"] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    /// Long-lived endpoint identifier, hex encoded in JSON.
    pub zid: Zid,

    /// Free-form identifier (at most 16 ASCII bytes) placed in Hello.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Supported key agreements in preference order. The initiator picks the
    /// first of these the peer also advertises.
    #[serde(default = "default_key_agreements")]
    pub key_agreements: Vec<KeyAgreementType>,
}

fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.to_string()
}

fn default_key_agreements() -> Vec<KeyAgreementType> {
    vec![KeyAgreementType::X255, KeyAgreementType::Dh3k]
}

impl HandshakeConfig {
    /// Default settings for the given ZID.
    pub fn new(zid: Zid) -> Self {
        Self {
            zid,
            client_id: default_client_id(),
            key_agreements: default_key_agreements(),
        }
    }

    /// Restrict or reorder the supported key agreements.
    pub fn with_key_agreements(mut self, key_agreements: Vec<KeyAgreementType>) -> Self {
        self.key_agreements = key_agreements;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ZrtpError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ZrtpError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.key_agreements.is_empty() {
            return Err(ZrtpError::Config("no key agreement types configured".into()));
        }
        for (i, kind) in self.key_agreements.iter().enumerate() {
            if self.key_agreements[..i].contains(kind) {
                return Err(ZrtpError::Config(format!(
                    "key agreement {kind} listed more than once"
                )));
            }
        }
        if !self.client_id.is_ascii() {
            return Err(ZrtpError::Config("client id must be ASCII".into()));
        }
        if self.client_id.len() > CLIENT_ID_LEN {
            return Err(ZrtpError::Config(format!(
                "client id is {} bytes, limit is {CLIENT_ID_LEN}",
                self.client_id.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_defaults() {
        let config = HandshakeConfig::from_json(r#"{ "zid": "0102030405060708090a0b0c" }"#).unwrap();
        assert_eq!(config.zid.as_bytes()[0], 0x01);
        assert_eq!(config.client_id, DEFAULT_CLIENT_ID);
        assert_eq!(
            config.key_agreements,
            vec![KeyAgreementType::X255, KeyAgreementType::Dh3k]
        );
    }

    #[test]
    fn json_roundtrip() {
        let config = HandshakeConfig::new(Zid::new([7; 12]))
            .with_client_id("softphone")
            .with_key_agreements(vec![KeyAgreementType::Dh3k]);
        let parsed = HandshakeConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn rejects_bad_zid() {
        let err = HandshakeConfig::from_json(r#"{ "zid": "abcd" }"#).unwrap_err();
        assert!(matches!(err, ZrtpError::Config(_)));
    }

    #[test]
    fn rejects_unknown_key_agreement() {
        let json = r#"{ "zid": "0102030405060708090a0b0c", "key_agreements": ["EC25"] }"#;
        assert!(HandshakeConfig::from_json(json).is_err());
    }

    #[test]
    fn validation() {
        let base = HandshakeConfig::new(Zid::new([1; 12]));
        assert!(base.validate().is_ok());
        assert!(base.clone().with_key_agreements(vec![]).validate().is_err());
        assert!(base
            .clone()
            .with_key_agreements(vec![KeyAgreementType::X255, KeyAgreementType::X255])
            .validate()
            .is_err());
        assert!(base.clone().with_client_id("x".repeat(17)).validate().is_err());
        assert!(base.with_client_id("téléphone").validate().is_err());
    }
}
