//! Signing and verifying whole messages with SIG(0).

use std::fmt;

use domain::base::{Message, Name, Rtype, ToName, UnknownRecordData};

use super::{KeyError, PublicKey, SecretKey};

/// The offset of ARCOUNT in the message header.
const ARCOUNT: usize = 10;

/// The length of the fixed part of SIG record data.
const SIG_FIXED_LEN: usize = 18;

//----------- SigValidity ------------------------------------------------------

/// The validity interval of a signature, in seconds since the epoch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SigValidity {
    /// The signature is not valid before this time.
    pub inception: u32,

    /// The signature is not valid after this time.
    pub expiration: u32,
}

impl SigValidity {
    /// An interval of `slack` seconds around `now`.
    pub fn around(now: i64, slack: u32) -> Self {
        let now = now.clamp(0, i64::from(u32::MAX)) as u32;
        Self {
            inception: now.saturating_sub(slack),
            expiration: now.saturating_add(slack),
        }
    }

    /// Whether `now` lies inside the interval.
    pub fn contains(&self, now: i64) -> bool {
        i64::from(self.inception) <= now && now <= i64::from(self.expiration)
    }
}

//----------- sign_message -----------------------------------------------------

/// Append a SIG(0) record to a finished message.
///
/// The SIG record is added as the last record of the additional section.  It
/// covers its own record data, without the signature, followed by the message
/// as it was before the record was added.
pub fn sign_message(
    mut message: Vec<u8>,
    key: &SecretKey,
    key_tag: u16,
    signer: &Name<Vec<u8>>,
    validity: SigValidity,
) -> Result<Vec<u8>, SignError> {
    if message.len() < 12 {
        return Err(SignError::ShortMessage);
    }
    let arcount = u16::from_be_bytes([message[ARCOUNT], message[ARCOUNT + 1]])
        .checked_add(1)
        .ok_or(SignError::TooManyRecords)?;

    let mut signer = signer.clone();
    signer.make_canonical();

    let mut rdata = Vec::with_capacity(SIG_FIXED_LEN + signer.as_slice().len() + 64);
    rdata.extend_from_slice(&0u16.to_be_bytes()); // type covered
    rdata.push(key.algorithm().to_int());
    rdata.push(0); // labels
    rdata.extend_from_slice(&0u32.to_be_bytes()); // original TTL
    rdata.extend_from_slice(&validity.expiration.to_be_bytes());
    rdata.extend_from_slice(&validity.inception.to_be_bytes());
    rdata.extend_from_slice(&key_tag.to_be_bytes());
    rdata.extend_from_slice(signer.as_slice());

    let mut signed_data = Vec::with_capacity(rdata.len() + message.len());
    signed_data.extend_from_slice(&rdata);
    signed_data.extend_from_slice(&message);
    let signature = key.sign(&signed_data).map_err(SignError::Key)?;
    rdata.extend_from_slice(&signature);

    let rdlen = u16::try_from(rdata.len()).map_err(|_| SignError::TooLong)?;
    message.push(0); // root owner
    message.extend_from_slice(&Rtype::SIG.to_int().to_be_bytes());
    message.extend_from_slice(&255u16.to_be_bytes()); // class ANY
    message.extend_from_slice(&0u32.to_be_bytes());
    message.extend_from_slice(&rdlen.to_be_bytes());
    message.extend_from_slice(&rdata);
    message[ARCOUNT..ARCOUNT + 2].copy_from_slice(&arcount.to_be_bytes());

    if message.len() > usize::from(u16::MAX) {
        return Err(SignError::TooLong);
    }
    Ok(message)
}

//----------- verify_message ---------------------------------------------------

/// A successfully checked SIG(0) signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifiedSignature {
    /// The name of the signing key.
    pub signer: Name<Vec<u8>>,

    /// The key tag of the signing key.
    pub key_tag: u16,

    /// The validity interval of the signature.
    pub validity: SigValidity,
}

/// Check the SIG(0) record at the end of a message.
///
/// The signature must have been made by `key`, and `now` must lie within its
/// validity interval.
pub fn verify_message(
    message: &[u8],
    key: &PublicKey,
    now: i64,
) -> Result<VerifiedSignature, VerifyError> {
    let parsed = Message::from_octets(message).map_err(|_| VerifyError::Malformed)?;
    let mut last = None;
    for record in parsed.additional().map_err(|_| VerifyError::Malformed)? {
        last = Some(record.map_err(|_| VerifyError::Malformed)?);
    }
    let record = last.ok_or(VerifyError::Unsigned)?;
    if record.rtype() != Rtype::SIG {
        return Err(VerifyError::Unsigned);
    }
    let record = record
        .to_record::<UnknownRecordData<&[u8]>>()
        .map_err(|_| VerifyError::Malformed)?
        .ok_or(VerifyError::Malformed)?;
    if !record.owner().to_name::<Vec<u8>>().is_root() {
        return Err(VerifyError::Malformed);
    }
    let rdata: &[u8] = record.data().data();

    // The SIG record uses an uncompressed root owner, so it takes up eleven
    // octets plus its record data at the very end of the message.
    let sig_len = 11 + rdata.len();
    let stripped_len = message
        .len()
        .checked_sub(sig_len)
        .filter(|&len| len >= 12 && message[len] == 0)
        .ok_or(VerifyError::Malformed)?;

    if rdata.len() < SIG_FIXED_LEN + 1 || rdata[..2] != [0, 0] || rdata[3] != 0 {
        return Err(VerifyError::Malformed);
    }
    if rdata[2] != key.algorithm.to_int() {
        return Err(VerifyError::WrongKey);
    }
    let expiration = u32::from_be_bytes([rdata[8], rdata[9], rdata[10], rdata[11]]);
    let inception = u32::from_be_bytes([rdata[12], rdata[13], rdata[14], rdata[15]]);
    let key_tag = u16::from_be_bytes([rdata[16], rdata[17]]);
    if key_tag != key.key_tag() {
        return Err(VerifyError::WrongKey);
    }

    let name_end = uncompressed_name_end(rdata, SIG_FIXED_LEN).ok_or(VerifyError::Malformed)?;
    let signer = Name::from_octets(rdata[SIG_FIXED_LEN..name_end].to_vec())
        .map_err(|_| VerifyError::Malformed)?;

    let validity = SigValidity {
        inception,
        expiration,
    };
    if !validity.contains(now) {
        return Err(VerifyError::Expired(validity));
    }

    let mut stripped = message[..stripped_len].to_vec();
    let arcount = u16::from_be_bytes([stripped[ARCOUNT], stripped[ARCOUNT + 1]]);
    let arcount = arcount.checked_sub(1).ok_or(VerifyError::Malformed)?;
    stripped[ARCOUNT..ARCOUNT + 2].copy_from_slice(&arcount.to_be_bytes());

    let mut signed_data = Vec::with_capacity(name_end + stripped.len());
    signed_data.extend_from_slice(&rdata[..name_end]);
    signed_data.extend_from_slice(&stripped);
    key.verify(&signed_data, &rdata[name_end..])
        .map_err(|_| VerifyError::BadSignature)?;

    Ok(VerifiedSignature {
        signer,
        key_tag,
        validity,
    })
}

/// Find the end of an uncompressed domain name starting at `start`.
fn uncompressed_name_end(data: &[u8], mut pos: usize) -> Option<usize> {
    loop {
        let len = usize::from(*data.get(pos)?);
        if len == 0 {
            return Some(pos + 1);
        }
        if len > 63 {
            return None;
        }
        pos += 1 + len;
    }
}

//----------- SignError --------------------------------------------------------

/// An error in signing a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignError {
    /// The message has no complete header.
    ShortMessage,

    /// The additional section is full.
    TooManyRecords,

    /// The signed message would be too long.
    TooLong,

    /// The key could not produce a signature.
    Key(KeyError),
}

impl fmt::Display for SignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortMessage => f.write_str("message is too short to sign"),
            Self::TooManyRecords => f.write_str("no room for another additional record"),
            Self::TooLong => f.write_str("signed message exceeds 65535 octets"),
            Self::Key(error) => write!(f, "signing failed: {error}"),
        }
    }
}

impl std::error::Error for SignError {}

//----------- VerifyError ------------------------------------------------------

/// An error in verifying a signed message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyError {
    /// The message or its SIG record could not be parsed.
    Malformed,

    /// The message does not end in a SIG record.
    Unsigned,

    /// The signature was made with a different key.
    WrongKey,

    /// The signature is outside its validity interval.
    Expired(SigValidity),

    /// The signature does not match the message.
    BadSignature,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => f.write_str("malformed message or SIG record"),
            Self::Unsigned => f.write_str("message carries no SIG(0) record"),
            Self::WrongKey => f.write_str("message was signed with a different key"),
            Self::Expired(validity) => write!(
                f,
                "signature is only valid from {} to {}",
                validity.inception, validity.expiration
            ),
            Self::BadSignature => f.write_str("signature does not match the message"),
        }
    }
}

impl std::error::Error for VerifyError {}

//============ Tests ===========================================================
