//! Key files in the format used by BIND's `dnssec-keygen`.
//!
//! A key pair lives in two files named `K<owner>+<algorithm>+<tag>`: the
//! `.key` file holds the public record in zone file format, the `.private`
//! file holds the private key in `Private-key-format: v1.3`.

use std::fmt;

use domain::base::{Name, Rtype};
use domain::utils::base64;

use super::{Algorithm, KeyError, PublicKey, SecretKey, KEY_PROTOCOL};

//----------- PublicRecord -----------------------------------------------------

/// A KEY or DNSKEY record read from presentation format.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicRecord {
    /// The owner of the record.
    pub owner: Name<Vec<u8>>,

    /// Either [`Rtype::KEY`] or [`Rtype::DNSKEY`].
    pub rtype: Rtype,

    /// The public key.
    pub key: PublicKey,
}

impl PublicRecord {
    /// Parse the first KEY or DNSKEY record in zone file text.
    ///
    /// Comment lines and blank lines are skipped.  The record may carry a TTL
    /// and the class `IN`, and the key may be split over several lines inside
    /// parentheses.
    pub fn parse(text: &str) -> Result<Self, BindError> {
        let text = strip_comments(text);
        let mut tokens = text
            .split_whitespace()
            .filter(|token| *token != "(" && *token != ")")
            .map(|token| token.trim_matches(|c| c == '(' || c == ')'));

        let owner = tokens.next().ok_or(BindError::Syntax("missing owner"))?;
        let owner: Name<Vec<u8>> = owner
            .parse()
            .map_err(|_| BindError::Syntax("invalid owner name"))?;

        let mut rtype = tokens.next().ok_or(BindError::Syntax("missing type"))?;
        if rtype.bytes().all(|b| b.is_ascii_digit()) {
            rtype = tokens.next().ok_or(BindError::Syntax("missing type"))?;
        }
        if rtype.eq_ignore_ascii_case("IN") {
            rtype = tokens.next().ok_or(BindError::Syntax("missing type"))?;
        }
        let rtype = if rtype.eq_ignore_ascii_case("KEY") {
            Rtype::KEY
        } else if rtype.eq_ignore_ascii_case("DNSKEY") {
            Rtype::DNSKEY
        } else {
            return Err(BindError::Syntax("not a KEY or DNSKEY record"));
        };

        let flags: u16 = tokens
            .next()
            .and_then(|token| token.parse().ok())
            .ok_or(BindError::Syntax("invalid flags"))?;
        let protocol: u8 = tokens
            .next()
            .and_then(|token| token.parse().ok())
            .ok_or(BindError::Syntax("invalid protocol"))?;
        if protocol != KEY_PROTOCOL {
            return Err(BindError::Key(KeyError::Malformed("protocol is not 3")));
        }
        let algorithm: Algorithm = tokens
            .next()
            .ok_or(BindError::Syntax("missing algorithm"))?
            .parse()?;
        let encoded: String = tokens.collect();
        let key = base64::decode::<Vec<u8>>(&encoded)
            .map_err(|_| BindError::Syntax("invalid base64 in public key"))?;

        let mut rdata = Vec::with_capacity(4 + key.len());
        rdata.extend_from_slice(&flags.to_be_bytes());
        rdata.push(protocol);
        rdata.push(algorithm.to_int());
        rdata.extend_from_slice(&key);

        Ok(Self {
            owner,
            rtype,
            key: PublicKey::from_rdata(&rdata)?,
        })
    }
}

impl fmt::Display for PublicRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} IN {} {} {} {} {}",
            self.owner.fmt_with_dot(),
            self.rtype,
            self.key.flags,
            KEY_PROTOCOL,
            self.key.algorithm.to_int(),
            base64::encode_string(&self.key.key),
        )
    }
}

//----------- File names -------------------------------------------------------

/// The base name of the files for a key, without extension.
pub fn file_stem(owner: &Name<Vec<u8>>, algorithm: Algorithm, key_tag: u16) -> String {
    format!(
        "K{}+{:03}+{:05}",
        owner.fmt_with_dot(),
        algorithm.to_int(),
        key_tag
    )
}

//----------- Private key files ------------------------------------------------

/// Render the contents of a `.private` file.
pub fn format_private(key: &SecretKey) -> String {
    format!(
        "Private-key-format: v1.3\nAlgorithm: {} ({})\nPrivateKey: {}\n",
        key.algorithm().to_int(),
        key.algorithm(),
        base64::encode_string(key.private_bytes()),
    )
}

/// Parse the contents of a `.private` file belonging to `public`.
///
/// Fields other than the format, algorithm and private key are ignored.
pub fn parse_private(text: &str, public: &PublicKey) -> Result<SecretKey, BindError> {
    let mut format = None;
    let mut algorithm = None;
    let mut private = None;

    for line in text.lines() {
        let Some((field, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match field.trim() {
            "Private-key-format" => format = Some(value),
            "Algorithm" => {
                let number = value.split_whitespace().next().unwrap_or_default();
                algorithm = Some(number.parse::<Algorithm>()?);
            }
            "PrivateKey" => {
                private = Some(
                    base64::decode::<Vec<u8>>(value)
                        .map_err(|_| BindError::Syntax("invalid base64 in private key"))?,
                );
            }
            _ => {}
        }
    }

    match format {
        Some(format) if format.starts_with("v1.") => {}
        Some(_) => return Err(BindError::Syntax("unsupported private key format")),
        None => return Err(BindError::Syntax("missing Private-key-format")),
    }
    let algorithm = algorithm.ok_or(BindError::Syntax("missing Algorithm"))?;
    if algorithm != public.algorithm {
        return Err(BindError::Key(KeyError::Mismatch));
    }
    let private = private.ok_or(BindError::Syntax("missing PrivateKey"))?;
    Ok(SecretKey::from_parts(algorithm, &private, &public.key)?)
}

/// Remove `;` comments from zone file text.
fn strip_comments(text: &str) -> String {
    text.lines()
        .map(|line| line.split_once(';').map_or(line, |(data, _)| data))
        .collect::<Vec<_>>()
        .join("\n")
}

//----------- BindError --------------------------------------------------------

/// An error in reading a key file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindError {
    /// The file does not follow the expected syntax.
    Syntax(&'static str),

    /// The key material is unusable.
    Key(KeyError),
}

impl From<KeyError> for BindError {
    fn from(value: KeyError) -> Self {
        Self::Key(value)
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(reason) => write!(f, "invalid key file: {reason}"),
            Self::Key(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for BindError {}

//============ Tests ===========================================================
