//! Version 1 of the key store file.

use std::collections::BTreeMap;

use domain::base::Name;
use domain::utils::base64;
use serde::{Deserialize, Serialize};

use crate::keystore::{KeyHandle, KeyKind, KeyRecord, KeySource, KeyState};
use crate::sig0::{Algorithm, PublicKey, SecretKey};

//----------- Spec -------------------------------------------------------------

/// A key store file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Spec {
    /// The keys, ordered by owner and key tag.
    pub keys: Vec<KeySpec>,
}

//--- Conversion

impl Spec {
    /// Parse from this specification.
    pub fn parse(self) -> Result<BTreeMap<KeyHandle, KeyRecord>, String> {
        let mut keys = BTreeMap::new();
        for spec in self.keys {
            let record = spec.parse()?;
            let handle = record.handle();
            if keys.insert(handle.clone(), record).is_some() {
                return Err(format!("{handle} is listed twice"));
            }
        }
        Ok(keys)
    }

    /// Build into this specification.
    pub fn build(keys: &BTreeMap<KeyHandle, KeyRecord>) -> Self {
        Self {
            keys: keys.values().map(KeySpec::build).collect(),
        }
    }
}

//----------- KeySpec ----------------------------------------------------------

/// A key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct KeySpec {
    /// The owner name.
    pub owner: String,

    /// The key tag.
    pub keyid: u16,

    pub kind: KeyKind,

    pub source: KeySource,

    /// The flags of the public record.
    pub flags: u16,

    pub algorithm: Algorithm,

    /// The public key, in Base64.
    pub public_key: String,

    /// The raw private key, in Base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,

    pub state: KeyState,

    pub validated: bool,

    pub trusted: bool,
}

//--- Conversion

impl KeySpec {
    /// Parse from this specification.
    pub fn parse(self) -> Result<KeyRecord, String> {
        let owner: Name<Vec<u8>> = self
            .owner
            .parse()
            .map_err(|_| format!("invalid owner name '{}'", self.owner))?;
        let public = base64::decode::<Vec<u8>>(&self.public_key)
            .map_err(|_| format!("invalid public key for '{}'", self.owner))?;
        let public = PublicKey {
            flags: self.flags,
            algorithm: self.algorithm,
            key: public.into(),
        };
        if public.key_tag() != self.keyid {
            return Err(format!(
                "key {} of '{}' does not match its public key",
                self.keyid, self.owner
            ));
        }

        let private = match self.private_key {
            Some(private) => {
                let private = base64::decode::<Vec<u8>>(&private)
                    .map_err(|_| format!("invalid private key for '{}'", self.owner))?;
                let secret = SecretKey::from_parts(self.algorithm, &private, &public.key)
                    .map_err(|error| format!("key {} of '{}': {error}", self.keyid, self.owner))?;
                Some(secret)
            }
            None => None,
        };

        let mut record = KeyRecord::new(&owner, self.kind, self.source, public, private);
        record.state = self.state;
        // A trusted key must have been validated.
        record.validated = self.validated;
        record.trusted = self.trusted && self.validated;
        Ok(record)
    }

    /// Build into this specification.
    pub fn build(record: &KeyRecord) -> Self {
        Self {
            owner: record.owner.fmt_with_dot().to_string(),
            keyid: record.keyid,
            kind: record.kind,
            source: record.source,
            flags: record.public.flags,
            algorithm: record.public.algorithm,
            public_key: base64::encode_string(&record.public.key),
            private_key: record
                .private
                .as_ref()
                .map(|key| base64::encode_string(key.private_bytes())),
            state: record.state,
            validated: record.validated,
            trusted: record.trusted,
        }
    }
}

//============ Tests ===========================================================
