//! SIG(0) keys and message signatures.
//!
//! A SIG(0) signature (RFC 2931) authenticates a whole DNS message with a
//! public key published in a KEY record.  This module holds the key types
//! and the algorithms we support; [`message`] signs and verifies messages.

use std::{fmt, str::FromStr};

use ring::{
    rand::{SecureRandom, SystemRandom},
    signature::{
        EcdsaKeyPair, Ed25519KeyPair, KeyPair, UnparsedPublicKey, ECDSA_P256_SHA256_FIXED,
        ECDSA_P256_SHA256_FIXED_SIGNING, ED25519,
    },
};
use serde::{Deserialize, Serialize};

pub mod bind;
pub mod message;

pub use self::message::{
    sign_message, verify_message, SigValidity, SignError, VerifiedSignature, VerifyError,
};

/// The protocol field of KEY and DNSKEY records.
pub const KEY_PROTOCOL: u8 = 3;

/// KEY/DNSKEY flags marking a zone key.
pub const ZONE_KEY_FLAG: u16 = 0x0100;

/// DNSKEY flags marking a secure entry point.
pub const SEP_FLAG: u16 = 0x0001;

//----------- Algorithm --------------------------------------------------------

/// A supported signature algorithm.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    /// ECDSA over P-256 with SHA-256 (13).
    #[serde(rename = "ECDSAP256SHA256")]
    EcdsaP256Sha256,

    /// Ed25519 (15).
    #[serde(rename = "ED25519")]
    Ed25519,
}

impl Algorithm {
    /// The IANA algorithm number.
    pub const fn to_int(self) -> u8 {
        match self {
            Self::EcdsaP256Sha256 => 13,
            Self::Ed25519 => 15,
        }
    }

    /// The algorithm for an IANA algorithm number, if supported.
    pub const fn from_int(value: u8) -> Option<Self> {
        match value {
            13 => Some(Self::EcdsaP256Sha256),
            15 => Some(Self::Ed25519),
            _ => None,
        }
    }

    /// The mnemonic of the algorithm.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EcdsaP256Sha256 => "ECDSAP256SHA256",
            Self::Ed25519 => "ED25519",
        }
    }

    /// The length of a public key in DNS wire format.
    const fn public_key_len(self) -> usize {
        match self {
            Self::EcdsaP256Sha256 => 64,
            Self::Ed25519 => 32,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(number) = s.parse::<u8>() {
            return Self::from_int(number).ok_or(KeyError::UnsupportedAlgorithm(number));
        }
        match s.to_ascii_uppercase().as_str() {
            "ECDSAP256SHA256" => Ok(Self::EcdsaP256Sha256),
            "ED25519" => Ok(Self::Ed25519),
            _ => Err(KeyError::UnknownAlgorithm(s.into())),
        }
    }
}

//----------- PublicKey --------------------------------------------------------

/// The public key of a KEY or DNSKEY record.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PublicKey {
    /// The record flags.
    pub flags: u16,

    /// The signature algorithm.
    pub algorithm: Algorithm,

    /// The key material in DNS wire format.
    pub key: Box<[u8]>,
}

impl PublicKey {
    /// Parse the public key from record data.
    pub fn from_rdata(rdata: &[u8]) -> Result<Self, KeyError> {
        if rdata.len() < 4 {
            return Err(KeyError::Malformed("record data too short"));
        }
        let flags = u16::from_be_bytes([rdata[0], rdata[1]]);
        if rdata[2] != KEY_PROTOCOL {
            return Err(KeyError::Malformed("protocol is not 3"));
        }
        let algorithm =
            Algorithm::from_int(rdata[3]).ok_or(KeyError::UnsupportedAlgorithm(rdata[3]))?;
        let key: Box<[u8]> = rdata[4..].into();
        if key.len() != algorithm.public_key_len() {
            return Err(KeyError::Malformed("public key has the wrong length"));
        }
        Ok(Self {
            flags,
            algorithm,
            key,
        })
    }

    /// The record data of the key.
    pub fn to_rdata(&self) -> Vec<u8> {
        let mut rdata = Vec::with_capacity(4 + self.key.len());
        rdata.extend_from_slice(&self.flags.to_be_bytes());
        rdata.push(KEY_PROTOCOL);
        rdata.push(self.algorithm.to_int());
        rdata.extend_from_slice(&self.key);
        rdata
    }

    /// The key tag of the key, as per RFC 4034 Appendix B.
    pub fn key_tag(&self) -> u16 {
        key_tag(&self.to_rdata())
    }

    /// Check a signature made with the private half of this key.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), KeyError> {
        let result = match self.algorithm {
            Algorithm::Ed25519 => UnparsedPublicKey::new(&ED25519, &self.key).verify(data, signature),
            Algorithm::EcdsaP256Sha256 => {
                let mut point = Vec::with_capacity(65);
                point.push(0x04);
                point.extend_from_slice(&self.key);
                UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, &point).verify(data, signature)
            }
        };
        result.map_err(|_| KeyError::BadSignature)
    }
}

/// Compute the key tag of KEY or DNSKEY record data.
pub fn key_tag(rdata: &[u8]) -> u16 {
    let mut acc: u32 = 0;
    for (i, &byte) in rdata.iter().enumerate() {
        if i % 2 == 0 {
            acc += u32::from(byte) << 8;
        } else {
            acc += u32::from(byte);
        }
    }
    acc += (acc >> 16) & 0xFFFF;
    (acc & 0xFFFF) as u16
}

//----------- SecretKey --------------------------------------------------------

/// The private half of a key.
///
/// This holds the raw private key (the Ed25519 seed or the P-256 scalar)
/// together with its public key, which is what BIND's private key files
/// store as well.
#[derive(Clone)]
#[cfg_attr(test, derive(PartialEq))]
pub struct SecretKey {
    /// The signature algorithm.
    algorithm: Algorithm,

    /// The raw private key.
    private: Box<[u8]>,

    /// The public key in DNS wire format.
    public: Box<[u8]>,
}

impl SecretKey {
    /// Generate a new key pair.
    pub fn generate(algorithm: Algorithm) -> Result<Self, KeyError> {
        let rng = SystemRandom::new();
        match algorithm {
            Algorithm::Ed25519 => {
                let mut seed = [0u8; 32];
                rng.fill(&mut seed).map_err(|_| KeyError::Crypto)?;
                let pair = Ed25519KeyPair::from_seed_unchecked(&seed)
                    .map_err(|_| KeyError::Crypto)?;
                Ok(Self {
                    algorithm,
                    private: seed.into(),
                    public: pair.public_key().as_ref().into(),
                })
            }
            Algorithm::EcdsaP256Sha256 => {
                let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
                    .map_err(|_| KeyError::Crypto)?;
                let pair =
                    EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, pkcs8.as_ref(), &rng)
                        .map_err(|_| KeyError::Crypto)?;
                let scalar = ec_private_scalar(pkcs8.as_ref()).ok_or(KeyError::Crypto)?;
                let public = pair
                    .public_key()
                    .as_ref()
                    .get(1..)
                    .ok_or(KeyError::Crypto)?;
                let key = Self::from_parts(algorithm, scalar, public)?;
                Ok(key)
            }
        }
    }

    /// Assemble a key pair from its raw parts, checking that they match.
    pub fn from_parts(algorithm: Algorithm, private: &[u8], public: &[u8]) -> Result<Self, KeyError> {
        let key = Self {
            algorithm,
            private: private.into(),
            public: public.into(),
        };
        // Loading the key pair checks the private key against the public one.
        key.load()?;
        Ok(key)
    }

    /// The signature algorithm.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The raw private key.
    pub fn private_bytes(&self) -> &[u8] {
        &self.private
    }

    /// The public key in DNS wire format.
    pub fn public_bytes(&self) -> &[u8] {
        &self.public
    }

    /// The public key as it appears in a record with the given flags.
    pub fn public_key(&self, flags: u16) -> PublicKey {
        PublicKey {
            flags,
            algorithm: self.algorithm,
            key: self.public.clone(),
        }
    }

    /// Sign data.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, KeyError> {
        match self.load()? {
            LoadedKey::Ed25519(pair) => Ok(pair.sign(data).as_ref().to_vec()),
            LoadedKey::Ecdsa(pair) => pair
                .sign(&SystemRandom::new(), data)
                .map(|sig| sig.as_ref().to_vec())
                .map_err(|_| KeyError::Crypto),
        }
    }

    /// Turn the raw parts into a usable key pair.
    fn load(&self) -> Result<LoadedKey, KeyError> {
        match self.algorithm {
            Algorithm::Ed25519 => Ed25519KeyPair::from_seed_and_public_key(&self.private, &self.public)
                .map(LoadedKey::Ed25519)
                .map_err(|_| KeyError::Mismatch),
            Algorithm::EcdsaP256Sha256 => {
                let mut point = Vec::with_capacity(65);
                point.push(0x04);
                point.extend_from_slice(&self.public);
                EcdsaKeyPair::from_private_key_and_public_key(
                    &ECDSA_P256_SHA256_FIXED_SIGNING,
                    &self.private,
                    &point,
                    &SystemRandom::new(),
                )
                .map(LoadedKey::Ecdsa)
                .map_err(|_| KeyError::Mismatch)
            }
        }
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// A key pair ready for signing.
enum LoadedKey {
    Ed25519(Ed25519KeyPair),
    Ecdsa(EcdsaKeyPair),
}

/// Find the private scalar in a PKCS#8 document holding a P-256 key.
///
/// The document wraps an RFC 5915 `ECPrivateKey`, in which the scalar follows
/// the version number as a 32 byte octet string.
fn ec_private_scalar(pkcs8: &[u8]) -> Option<&[u8]> {
    const MARKER: [u8; 5] = [0x02, 0x01, 0x01, 0x04, 0x20];
    let start = pkcs8
        .windows(MARKER.len())
        .position(|window| window == MARKER)?
        + MARKER.len();
    pkcs8.get(start..start + 32)
}

//----------- KeyError ---------------------------------------------------------

/// An error in handling key material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyError {
    /// The algorithm number is not supported.
    UnsupportedAlgorithm(u8),

    /// The algorithm name is not known.
    UnknownAlgorithm(Box<str>),

    /// Key data could not be parsed.
    Malformed(&'static str),

    /// The private and public key do not belong together.
    Mismatch,

    /// A signature did not verify.
    BadSignature,

    /// The cryptographic backend failed.
    Crypto,
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedAlgorithm(number) => {
                write!(f, "unsupported algorithm {number}")
            }
            Self::UnknownAlgorithm(name) => write!(f, "unknown algorithm {name:?}"),
            Self::Malformed(reason) => write!(f, "malformed key: {reason}"),
            Self::Mismatch => f.write_str("private key does not match public key"),
            Self::BadSignature => f.write_str("signature verification failed"),
            Self::Crypto => f.write_str("cryptographic operation failed"),
        }
    }
}

impl std::error::Error for KeyError {}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_tag_rfc4034_example() {
        // The DNSKEY of example.com from RFC 4034, section 5.4.
        let key = domain::utils::base64::decode::<Vec<u8>>(
            "AQOeiiR0GOMYkDshWoSKz9XzfwJr1AYtsmx3TGkJaNXVbfi/2pHm822aJ5iI9BMzNXxeYCmZDRD99WYwYqUSdjMmmAphXdvxegXd/M5+X7OrzKBaMbCVdFLUUh6DhweJBjEVv5f2wwjM9XzcnOf+EPbtG9DMBmADjFDc2w/rljwvFw=="
        )
        .unwrap();
        let mut rdata = vec![0x01, 0x00, 3, 5];
        rdata.extend_from_slice(&key);
        assert_eq!(key_tag(&rdata), 60485);
    }

    #[test]
    fn generated_keys_sign_and_verify() {
        for algorithm in [Algorithm::Ed25519, Algorithm::EcdsaP256Sha256] {
            let secret = SecretKey::generate(algorithm).unwrap();
            assert_eq!(secret.public_bytes().len(), algorithm.public_key_len());

            let public = secret.public_key(ZONE_KEY_FLAG);
            let signature = secret.sign(b"delegation").unwrap();
            public.verify(b"delegation", &signature).unwrap();
            assert_eq!(
                public.verify(b"delegatioN", &signature),
                Err(KeyError::BadSignature)
            );

            let restored =
                SecretKey::from_parts(algorithm, secret.private_bytes(), secret.public_bytes())
                    .unwrap();
            public
                .verify(b"again", &restored.sign(b"again").unwrap())
                .unwrap();
        }
    }

    #[test]
    fn mismatched_parts_are_rejected() {
        let one = SecretKey::generate(Algorithm::Ed25519).unwrap();
        let two = SecretKey::generate(Algorithm::Ed25519).unwrap();
        assert_eq!(
            SecretKey::from_parts(Algorithm::Ed25519, one.private_bytes(), two.public_bytes())
                .unwrap_err(),
            KeyError::Mismatch
        );
    }

    #[test]
    fn public_key_rdata() {
        let secret = SecretKey::generate(Algorithm::EcdsaP256Sha256).unwrap();
        let public = secret.public_key(ZONE_KEY_FLAG);
        let rdata = public.to_rdata();
        assert_eq!(&rdata[..4], &[0x01, 0x00, 3, 13]);
        assert_eq!(PublicKey::from_rdata(&rdata).unwrap(), public);
        assert_eq!(
            PublicKey::from_rdata(&[0x01, 0x00, 3, 8, 1, 2]),
            Err(KeyError::UnsupportedAlgorithm(8))
        );
    }

    #[test]
    fn algorithm_names() {
        assert_eq!("ed25519".parse::<Algorithm>(), Ok(Algorithm::Ed25519));
        assert_eq!("13".parse::<Algorithm>(), Ok(Algorithm::EcdsaP256Sha256));
        assert_eq!(
            "8".parse::<Algorithm>(),
            Err(KeyError::UnsupportedAlgorithm(8))
        );
    }
}
