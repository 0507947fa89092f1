//! Managing SIG(0) and DNSSEC keys.
//!
//! The store keeps one [`KeyRecord`] per owner name and key tag.  Each record
//! carries a lifecycle state and two independent flags: `validated`, which
//! only [`KeyStore::validate()`] sets after checking the key cryptographically,
//! and `trusted`, which an operator decides on.  A key is never trusted
//! without having been validated.
//!
//! Every change is made under an exclusive lock on a lock file next to the
//! store file.  The store is reloaded from disk, changed and written back
//! before the lock is released, so concurrent processes never lose each
//! other's changes.  If writing fails, the change is undone.

use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File, OpenOptions},
    io,
    str::FromStr,
    sync::{Arc, PoisonError, RwLock},
};

use camino::{Utf8Path, Utf8PathBuf};
use domain::base::{Name, Rtype};
use fs2::FileExt;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::delegation::normalize;
use crate::sig0::{
    self,
    bind::{self, BindError, PublicRecord},
    message::VerifyError,
    Algorithm, KeyError, PublicKey, SecretKey, SEP_FLAG, ZONE_KEY_FLAG,
};

pub mod file;

//----------- KeyHandle --------------------------------------------------------

/// Identifies a key: its owner and key tag.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KeyHandle {
    /// The owner of the key, in lower case.
    pub owner: Name<Vec<u8>>,

    /// The key tag.
    pub keyid: u16,
}

impl KeyHandle {
    pub fn new(owner: &Name<Vec<u8>>, keyid: u16) -> Self {
        Self {
            owner: normalize(owner),
            keyid,
        }
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} key {}", self.owner.fmt_with_dot(), self.keyid)
    }
}

//----------- KeyState ---------------------------------------------------------

/// The lifecycle stage of a key.
///
/// Any state may follow any other.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyState {
    #[default]
    Created,
    Active,
    Retired,
}

impl KeyState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Retired => "retired",
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "active" => Ok(Self::Active),
            "retired" => Ok(Self::Retired),
            _ => Err(format!(
                "unknown key state {s:?}, expected created, active or retired"
            )),
        }
    }
}

//----------- KeyKind ----------------------------------------------------------

/// What a key is used for.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// A SIG(0) key, published in a KEY record.
    Sig0,

    /// A DNSSEC key, published in a DNSKEY record.
    Dnssec,
}

impl KeyKind {
    /// The record type publishing keys of this kind.
    pub fn rtype(self) -> Rtype {
        match self {
            Self::Sig0 => Rtype::KEY,
            Self::Dnssec => Rtype::DNSKEY,
        }
    }

    /// The kind of key published in records of the given type.
    pub fn from_rtype(rtype: Rtype) -> Option<Self> {
        match rtype {
            Rtype::KEY => Some(Self::Sig0),
            Rtype::DNSKEY => Some(Self::Dnssec),
            _ => None,
        }
    }

    /// The record flags of newly generated keys.
    fn default_flags(self) -> u16 {
        match self {
            Self::Sig0 => ZONE_KEY_FLAG,
            Self::Dnssec => ZONE_KEY_FLAG | SEP_FLAG,
        }
    }
}

//----------- KeySource --------------------------------------------------------

/// Where a key came from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    /// Generated by us.
    Generated,

    /// A key pair imported from key files.
    Imported,

    /// Someone else's public key.
    Foreign,
}

//----------- KeyRecord --------------------------------------------------------

/// A key and what we know about it.
#[derive(Clone, Debug)]
pub struct KeyRecord {
    /// The owner of the key, in lower case.
    pub owner: Name<Vec<u8>>,

    /// The key tag of the public key.
    pub keyid: u16,

    pub kind: KeyKind,

    pub source: KeySource,

    /// The public key.
    pub public: PublicKey,

    /// The private key, for keys we own.
    pub private: Option<SecretKey>,

    pub state: KeyState,

    /// Whether the key has been checked cryptographically.
    pub validated: bool,

    /// Whether an operator has decided to accept this key.
    pub trusted: bool,
}

impl KeyRecord {
    /// A fresh record for a key.
    ///
    /// The key tag is derived from the public key.
    pub fn new(
        owner: &Name<Vec<u8>>,
        kind: KeyKind,
        source: KeySource,
        public: PublicKey,
        private: Option<SecretKey>,
    ) -> Self {
        Self {
            owner: normalize(owner),
            keyid: public.key_tag(),
            kind,
            source,
            public,
            private,
            state: KeyState::Created,
            validated: false,
            trusted: false,
        }
    }

    /// The handle of this key.
    pub fn handle(&self) -> KeyHandle {
        KeyHandle {
            owner: self.owner.clone(),
            keyid: self.keyid,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.public.algorithm
    }

    /// The record publishing the public key.
    pub fn public_record(&self) -> PublicRecord {
        PublicRecord {
            owner: self.owner.clone(),
            rtype: self.kind.rtype(),
            key: self.public.clone(),
        }
    }

    /// A summary of the key without its private material.
    pub fn info(&self) -> KeyInfo {
        KeyInfo {
            owner: self.owner.fmt_with_dot().to_string(),
            keyid: self.keyid,
            algorithm: self.algorithm(),
            kind: self.kind,
            source: self.source,
            state: self.state,
            validated: self.validated,
            trusted: self.trusted,
            private: self.private.is_some(),
            record: self.public_record().to_string(),
        }
    }
}

//----------- KeyInfo ----------------------------------------------------------

/// A summary of a key for reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub owner: String,
    pub keyid: u16,
    pub algorithm: Algorithm,
    pub kind: KeyKind,
    pub source: KeySource,
    pub state: KeyState,
    pub validated: bool,
    pub trusted: bool,

    /// Whether we hold the private key.
    pub private: bool,

    /// The public record in presentation format.
    pub record: String,
}

//----------- Evidence ---------------------------------------------------------

/// What a key is validated against.
#[derive(Copy, Clone, Debug)]
pub enum Evidence<'a> {
    /// Sign a probe with the private key and check it with the public key.
    SelfTest,

    /// A message signed with SIG(0) by the key's owner.
    SignedMessage {
        message: &'a [u8],

        /// The current time in seconds since the epoch.
        now: i64,
    },
}

/// The data signed during a self test.
const SELF_TEST_PROBE: &[u8] = b"delsync key self test";

//----------- KeyStore ---------------------------------------------------------

/// A store of keys.
#[derive(Debug)]
pub struct KeyStore {
    /// The file the store is kept in.
    ///
    /// If this is `None`, the store only lives in memory.
    path: Option<Box<Utf8Path>>,

    /// The keys.
    keys: RwLock<BTreeMap<KeyHandle, KeyRecord>>,
}

impl KeyStore {
    /// A store living only in memory.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            keys: RwLock::default(),
        }
    }

    /// Open the store kept in the given file.
    ///
    /// A missing file is an empty store; it is created on the first change.
    pub fn open(path: &Utf8Path) -> Result<Self, KeyStoreError> {
        let keys = load(path)?;
        Ok(Self {
            path: Some(path.into()),
            keys: RwLock::new(keys),
        })
    }

    //--- Reading

    /// All keys, ordered by owner and key tag.
    pub fn list(&self) -> Vec<KeyRecord> {
        self.read().values().cloned().collect()
    }

    /// A single key.
    pub fn get(&self, handle: &KeyHandle) -> Result<KeyRecord, KeyStoreError> {
        self.read()
            .get(handle)
            .cloned()
            .ok_or_else(|| KeyStoreError::UnknownKey(handle.clone()))
    }

    /// The key to sign messages for `owner` with.
    ///
    /// This is the active SIG(0) key with a private key and the lowest key
    /// tag.
    pub fn signing_key(&self, owner: &Name<Vec<u8>>) -> Result<KeyRecord, KeyStoreError> {
        let owner = normalize(owner);
        self.read()
            .values()
            .find(|key| {
                key.owner == owner
                    && key.kind == KeyKind::Sig0
                    && key.state == KeyState::Active
                    && key.private.is_some()
            })
            .cloned()
            .ok_or(KeyStoreError::NoSigningKey(owner))
    }

    /// The public record of a key.
    pub fn export(&self, handle: &KeyHandle) -> Result<PublicRecord, KeyStoreError> {
        Ok(self.get(handle)?.public_record())
    }

    //--- Changing

    /// Add a key.
    ///
    /// The key starts out created, neither validated nor trusted.
    pub fn add(&self, mut record: KeyRecord) -> Result<KeyHandle, KeyStoreError> {
        record.owner = normalize(&record.owner);
        record.state = KeyState::Created;
        record.validated = false;
        record.trusted = false;
        let handle = record.handle();

        self.modify(|keys| {
            if keys.contains_key(&handle) {
                return Err(KeyStoreError::DuplicateKey(handle.clone()));
            }
            keys.insert(handle.clone(), record);
            Ok(())
        })?;
        info!("Added {handle}");
        Ok(handle)
    }

    /// Generate a new key pair and add it.
    pub fn generate(
        &self,
        owner: &Name<Vec<u8>>,
        algorithm: Algorithm,
        kind: KeyKind,
    ) -> Result<KeyHandle, KeyStoreError> {
        let secret = SecretKey::generate(algorithm).map_err(KeyStoreError::Key)?;
        let public = secret.public_key(kind.default_flags());
        self.add(KeyRecord::new(
            owner,
            kind,
            KeySource::Generated,
            public,
            Some(secret),
        ))
    }

    /// Import a key from BIND style key files.
    ///
    /// Without the contents of a `.private` file, the key is added as a
    /// foreign key.
    pub fn import(
        &self,
        public_text: &str,
        private_text: Option<&str>,
    ) -> Result<KeyHandle, KeyStoreError> {
        let record = PublicRecord::parse(public_text)?;
        let kind = KeyKind::from_rtype(record.rtype)
            .ok_or(KeyStoreError::Bind(BindError::Syntax("not a key record")))?;
        let (source, private) = match private_text {
            Some(text) => (
                KeySource::Imported,
                Some(bind::parse_private(text, &record.key)?),
            ),
            None => (KeySource::Foreign, None),
        };
        self.add(KeyRecord::new(
            &record.owner,
            kind,
            source,
            record.key,
            private,
        ))
    }

    /// Change the state of a key.
    pub fn set_state(&self, handle: &KeyHandle, state: KeyState) -> Result<(), KeyStoreError> {
        self.modify(|keys| {
            let key = keys
                .get_mut(handle)
                .ok_or_else(|| KeyStoreError::UnknownKey(handle.clone()))?;
            key.state = state;
            Ok(())
        })?;
        info!("Set state of {handle} to {state}");
        Ok(())
    }

    /// Change whether a key is trusted.
    ///
    /// Only validated keys can be trusted.
    pub fn set_trust(&self, handle: &KeyHandle, trusted: bool) -> Result<(), KeyStoreError> {
        self.modify(|keys| {
            let key = keys
                .get_mut(handle)
                .ok_or_else(|| KeyStoreError::UnknownKey(handle.clone()))?;
            if trusted && !key.validated {
                return Err(KeyStoreError::NotValidated(handle.clone()));
            }
            key.trusted = trusted;
            Ok(())
        })?;
        info!(
            "{} {handle}",
            if trusted { "Trusted" } else { "Untrusted" }
        );
        Ok(())
    }

    /// Remove a key for good.
    pub fn delete(&self, handle: &KeyHandle) -> Result<KeyRecord, KeyStoreError> {
        let removed = self.modify(|keys| {
            keys.remove(handle)
                .ok_or_else(|| KeyStoreError::UnknownKey(handle.clone()))
        })?;
        info!("Deleted {handle}");
        Ok(removed)
    }

    /// Check a key cryptographically and mark it as validated.
    ///
    /// Keys with a private key are checked by a signing self test, foreign
    /// keys by a message they signed.  A failed check leaves the flag alone.
    pub fn validate(&self, handle: &KeyHandle, evidence: Evidence<'_>) -> Result<(), KeyStoreError> {
        self.modify(|keys| {
            let key = keys
                .get_mut(handle)
                .ok_or_else(|| KeyStoreError::UnknownKey(handle.clone()))?;
            check(key, evidence).map_err(|reason| KeyStoreError::Validation {
                handle: handle.clone(),
                reason,
            })?;
            key.validated = true;
            Ok(())
        })?;
        info!("Validated {handle}");
        Ok(())
    }

    //--- Internals

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<KeyHandle, KeyRecord>> {
        self.keys.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a change and persist it, undoing it if it cannot be saved.
    ///
    /// For a store kept in a file, the change is applied to the file's
    /// current contents while holding the store lock.
    fn modify<T>(
        &self,
        op: impl FnOnce(&mut BTreeMap<KeyHandle, KeyRecord>) -> Result<T, KeyStoreError>,
    ) -> Result<T, KeyStoreError> {
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let _lock = match &self.path {
            Some(path) => {
                let lock = lock(path)?;
                *keys = load(path)?;
                Some(lock)
            }
            None => None,
        };

        let backup = keys.clone();
        let result = op(&mut keys)?;

        if let Some(path) = &self.path {
            if let Err(error) = file::Spec::build(&keys).save(path) {
                *keys = backup;
                return Err(KeyStoreError::Save {
                    path: path.clone(),
                    error: Arc::new(error),
                });
            }
        }
        Ok(result)
    }
}

/// Load the keys kept in a file.
fn load(path: &Utf8Path) -> Result<BTreeMap<KeyHandle, KeyRecord>, KeyStoreError> {
    match file::Spec::load(path) {
        Ok(spec) => {
            let keys = spec.parse().map_err(|reason| KeyStoreError::Corrupt {
                path: path.into(),
                reason,
            })?;
            debug!("Loaded {} keys from '{path}'", keys.len());
            Ok(keys)
        }
        Err(file::FileError::Load(error)) if error.kind() == io::ErrorKind::NotFound => {
            debug!("Key store '{path}' does not exist yet, starting empty");
            Ok(BTreeMap::new())
        }
        Err(error) => Err(KeyStoreError::Corrupt {
            path: path.into(),
            reason: error.to_string(),
        }),
    }
}

/// Take the exclusive lock of the store kept in a file.
///
/// The store file itself is replaced on every save, so the lock is held on
/// a separate `.lock` file that stays put.  It is released when the
/// returned file is closed.
fn lock(path: &Utf8Path) -> Result<File, KeyStoreError> {
    let lock_path = Utf8PathBuf::from(format!("{path}.lock"));
    let lock_err = |error| KeyStoreError::Lock {
        path: lock_path.as_path().into(),
        error: Arc::new(error),
    };
    if let Some(dir) = lock_path.parent().filter(|dir| !dir.as_str().is_empty()) {
        fs::create_dir_all(dir).map_err(lock_err)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(lock_err)?;
    file.lock_exclusive().map_err(lock_err)?;
    Ok(file)
}

/// Perform the cryptographic check of a key.
fn check(key: &KeyRecord, evidence: Evidence<'_>) -> Result<(), ValidationFailure> {
    match (evidence, &key.private) {
        (Evidence::SelfTest, Some(private)) => {
            if private.public_bytes() != &*key.public.key {
                return Err(ValidationFailure::Key(KeyError::Mismatch));
            }
            let signature = private
                .sign(SELF_TEST_PROBE)
                .map_err(ValidationFailure::Key)?;
            key.public
                .verify(SELF_TEST_PROBE, &signature)
                .map_err(ValidationFailure::Key)
        }
        (Evidence::SelfTest, None) => Err(ValidationFailure::NoEvidence),
        (Evidence::SignedMessage { message, now }, _) => {
            let verified =
                sig0::verify_message(message, &key.public, now).map_err(ValidationFailure::Message)?;
            if normalize(&verified.signer) != key.owner {
                return Err(ValidationFailure::WrongSigner(verified.signer));
            }
            Ok(())
        }
    }
}

//----------- ValidationFailure ------------------------------------------------

/// Why a key did not validate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ValidationFailure {
    /// A foreign key can only be validated by a message it signed.
    NoEvidence,

    /// The key material is broken.
    Key(KeyError),

    /// The signed message did not verify.
    Message(VerifyError),

    /// The message was signed under a different name.
    WrongSigner(Name<Vec<u8>>),
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoEvidence => f.write_str("a signed message is needed to validate a foreign key"),
            Self::Key(error) => error.fmt(f),
            Self::Message(error) => error.fmt(f),
            Self::WrongSigner(name) => {
                write!(f, "message was signed by '{}'", name.fmt_with_dot())
            }
        }
    }
}

//----------- KeyStoreError ----------------------------------------------------

/// An error in using the key store.
#[derive(Clone, Debug)]
pub enum KeyStoreError {
    /// A key with the same owner and key tag exists.
    DuplicateKey(KeyHandle),

    /// No such key.
    UnknownKey(KeyHandle),

    /// The key would be trusted without having been validated.
    NotValidated(KeyHandle),

    /// There is no active SIG(0) key with a private key for the owner.
    NoSigningKey(Name<Vec<u8>>),

    /// The key could not be validated.
    Validation {
        handle: KeyHandle,
        reason: ValidationFailure,
    },

    /// A key could not be generated.
    Key(KeyError),

    /// Key files could not be read.
    Bind(BindError),

    /// The store file could not be read.
    Corrupt { path: Box<Utf8Path>, reason: String },

    /// The store file could not be written.
    Save {
        path: Box<Utf8Path>,
        error: Arc<io::Error>,
    },

    /// The store lock could not be taken.
    Lock {
        path: Box<Utf8Path>,
        error: Arc<io::Error>,
    },
}

impl From<BindError> for KeyStoreError {
    fn from(value: BindError) -> Self {
        Self::Bind(value)
    }
}

impl fmt::Display for KeyStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateKey(handle) => write!(f, "{handle} already exists"),
            Self::UnknownKey(handle) => write!(f, "{handle} does not exist"),
            Self::NotValidated(handle) => {
                write!(f, "{handle} has not been validated and cannot be trusted")
            }
            Self::NoSigningKey(owner) => write!(
                f,
                "no active SIG(0) key with a private key for '{}'",
                owner.fmt_with_dot()
            ),
            Self::Validation { handle, reason } => {
                write!(f, "{handle} failed validation: {reason}")
            }
            Self::Key(error) => error.fmt(f),
            Self::Bind(error) => error.fmt(f),
            Self::Corrupt { path, reason } => {
                write!(f, "could not load key store '{path}': {reason}")
            }
            Self::Save { path, error } => {
                write!(f, "could not save key store '{path}': {error}")
            }
            Self::Lock { path, error } => {
                write!(f, "could not lock key store '{path}': {error}")
            }
        }
    }
}

impl std::error::Error for KeyStoreError {}

//============ Tests ===========================================================

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;
    use domain::base::{iana::Opcode, Message};

    use crate::sig0::{sign_message, SigValidity};
    use crate::tests::util::MockExchange;

    use super::*;

    fn name(s: &str) -> Name<Vec<u8>> {
        s.parse().unwrap()
    }

    fn foreign(owner: &str) -> (SecretKey, KeyRecord) {
        let secret = SecretKey::generate(Algorithm::Ed25519).unwrap();
        let record = KeyRecord::new(
            &name(owner),
            KeyKind::Sig0,
            KeySource::Foreign,
            secret.public_key(ZONE_KEY_FLAG),
            None,
        );
        (secret, record)
    }

    #[test]
    fn unknown_key_leaves_store_unchanged() {
        let store = KeyStore::in_memory();
        store
            .generate(&name("other.example."), Algorithm::Ed25519, KeyKind::Sig0)
            .unwrap();
        let before: Vec<_> = store.list().iter().map(KeyRecord::info).collect();

        let handle = KeyHandle::new(&name("child.example."), 5);
        assert!(matches!(
            store.set_state(&handle, KeyState::Active),
            Err(KeyStoreError::UnknownKey(h)) if h == handle
        ));

        let after: Vec<_> = store.list().iter().map(KeyRecord::info).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn duplicates_are_rejected() {
        let store = KeyStore::in_memory();
        let (_, record) = foreign("Child.Example.");
        let handle = store.add(record.clone()).unwrap();
        assert_eq!(handle.owner, name("child.example."));
        assert!(matches!(
            store.add(record),
            Err(KeyStoreError::DuplicateKey(_))
        ));
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn trust_requires_validation() {
        let store = KeyStore::in_memory();
        let (secret, record) = foreign("child.example.");
        let handle = store.add(record).unwrap();

        assert!(matches!(
            store.set_trust(&handle, true),
            Err(KeyStoreError::NotValidated(_))
        ));
        assert!(!store.get(&handle).unwrap().trusted);

        // A self test needs a private key.
        assert!(matches!(
            store.validate(&handle, Evidence::SelfTest),
            Err(KeyStoreError::Validation {
                reason: ValidationFailure::NoEvidence,
                ..
            })
        ));

        let now = 1_760_000_000;
        let message = sign_message(
            MockExchange::update(),
            &secret,
            handle.keyid,
            &name("child.example."),
            SigValidity::around(now, 300),
        )
        .unwrap();
        store
            .validate(&handle, Evidence::SignedMessage { message: &message, now })
            .unwrap();
        store.set_trust(&handle, true).unwrap();

        let key = store.get(&handle).unwrap();
        assert!(key.validated && key.trusted);

        // Untrusting is always allowed.
        store.set_trust(&handle, false).unwrap();
        assert!(!store.get(&handle).unwrap().trusted);
    }

    #[test]
    fn wrong_signer_does_not_validate() {
        let store = KeyStore::in_memory();
        let (secret, record) = foreign("child.example.");
        let handle = store.add(record).unwrap();

        let now = 1_760_000_000;
        let message = sign_message(
            MockExchange::update(),
            &secret,
            handle.keyid,
            &name("other.example."),
            SigValidity::around(now, 300),
        )
        .unwrap();
        assert!(store
            .validate(&handle, Evidence::SignedMessage { message: &message, now })
            .is_err());
        assert!(!store.get(&handle).unwrap().validated);
    }

    #[test]
    fn signing_key_selection() {
        let store = KeyStore::in_memory();
        let owner = name("child.example.");
        assert!(matches!(
            store.signing_key(&owner),
            Err(KeyStoreError::NoSigningKey(_))
        ));

        let first = store
            .generate(&owner, Algorithm::Ed25519, KeyKind::Sig0)
            .unwrap();
        let second = store
            .generate(&owner, Algorithm::EcdsaP256Sha256, KeyKind::Sig0)
            .unwrap();
        let dnssec = store
            .generate(&owner, Algorithm::Ed25519, KeyKind::Dnssec)
            .unwrap();
        store.set_state(&dnssec, KeyState::Active).unwrap();

        // Created keys do not sign.
        assert!(store.signing_key(&owner).is_err());

        store.set_state(&first, KeyState::Active).unwrap();
        store.set_state(&second, KeyState::Active).unwrap();
        let lowest = first.keyid.min(second.keyid);
        assert_eq!(store.signing_key(&owner).unwrap().keyid, lowest);

        store.set_state(&first, KeyState::Retired).unwrap();
        assert_eq!(store.signing_key(&owner).unwrap().keyid, second.keyid);
    }

    #[test]
    fn owned_keys_validate_by_self_test() {
        let store = KeyStore::in_memory();
        let handle = store
            .generate(&name("child.example."), Algorithm::EcdsaP256Sha256, KeyKind::Sig0)
            .unwrap();
        store.validate(&handle, Evidence::SelfTest).unwrap();
        assert!(store.get(&handle).unwrap().validated);
    }

    #[test]
    fn import_and_export() {
        let store = KeyStore::in_memory();
        let secret = SecretKey::generate(Algorithm::Ed25519).unwrap();
        let record = PublicRecord {
            owner: name("child.example."),
            rtype: Rtype::KEY,
            key: secret.public_key(ZONE_KEY_FLAG),
        };

        let handle = store
            .import(&record.to_string(), Some(&bind::format_private(&secret)))
            .unwrap();
        let key = store.get(&handle).unwrap();
        assert_eq!(key.source, KeySource::Imported);
        assert!(key.private.is_some());
        assert_eq!(store.export(&handle).unwrap(), record);

        store.delete(&handle).unwrap();
        assert!(matches!(
            store.delete(&handle),
            Err(KeyStoreError::UnknownKey(_))
        ));

        let handle = store.import(&record.to_string(), None).unwrap();
        assert_eq!(store.get(&handle).unwrap().source, KeySource::Foreign);
    }

    #[test]
    fn persists_across_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("keys.db")).unwrap();

        let store = KeyStore::open(&path).unwrap();
        let handle = store
            .generate(&name("child.example."), Algorithm::Ed25519, KeyKind::Sig0)
            .unwrap();
        store.set_state(&handle, KeyState::Active).unwrap();
        store.validate(&handle, Evidence::SelfTest).unwrap();
        store.set_trust(&handle, true).unwrap();
        drop(store);

        let store = KeyStore::open(&path).unwrap();
        let key = store.get(&handle).unwrap();
        assert_eq!(key.state, KeyState::Active);
        assert!(key.validated && key.trusted);
        assert_eq!(key.source, KeySource::Generated);

        // The reloaded private key still signs for the public key.
        let message = sign_message(
            MockExchange::update(),
            key.private.as_ref().unwrap(),
            key.keyid,
            &key.owner,
            SigValidity::around(1_760_000_000, 300),
        )
        .unwrap();
        assert_eq!(
            Message::from_octets(&message[..]).unwrap().header().opcode(),
            Opcode::UPDATE
        );
        sig0::verify_message(&message, &key.public, 1_760_000_000).unwrap();
    }

    #[test]
    fn failed_save_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("keys.db")).unwrap();
        let store = KeyStore::open(&path).unwrap();
        let (_, record) = foreign("child.example.");
        let kept = store.add(record).unwrap();

        // A directory taking the place of the store file makes saving fail.
        let (_, record) = foreign("other.example.");
        let result = store.modify(|keys| {
            fs::remove_file(&path).unwrap();
            fs::create_dir(&path).unwrap();
            fs::write(path.join("occupied"), b"").unwrap();
            keys.insert(record.handle(), record);
            Ok(())
        });
        assert!(matches!(result, Err(KeyStoreError::Save { .. })));

        let handles: Vec<_> = store.list().iter().map(KeyRecord::handle).collect();
        assert_eq!(handles, vec![kept]);
    }

    #[test]
    fn concurrent_handles_keep_each_others_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("keys.db")).unwrap();

        let first = KeyStore::open(&path).unwrap();
        let second = KeyStore::open(&path).unwrap();
        let one = first
            .generate(&name("child.example."), Algorithm::Ed25519, KeyKind::Sig0)
            .unwrap();
        let two = second
            .generate(&name("child.example."), Algorithm::Ed25519, KeyKind::Sig0)
            .unwrap();

        // The second handle picked up the first one's key before saving.
        assert_eq!(second.list().len(), 2);
        first.set_state(&two, KeyState::Active).unwrap();
        assert_eq!(first.get(&one).unwrap().state, KeyState::Created);

        let store = KeyStore::open(&path).unwrap();
        assert_eq!(store.list().len(), 2);
        assert_eq!(store.get(&two).unwrap().state, KeyState::Active);
        assert!(store.get(&one).unwrap().private.is_some());
    }

    #[test]
    fn parallel_writers_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::try_from(dir.path().join("nested/keys.db")).unwrap();

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = KeyStore::open(&path).unwrap();
                    let owner = name(&format!("child{i}.example."));
                    for _ in 0..3 {
                        store
                            .generate(&owner, Algorithm::Ed25519, KeyKind::Sig0)
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        assert_eq!(KeyStore::open(&path).unwrap().list().len(), 12);
    }
}
