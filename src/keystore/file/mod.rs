//! The key store file.

use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{self, BufReader},
    sync::Arc,
};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use super::{KeyHandle, KeyRecord};
use crate::util;

pub mod v1;

//----------- Spec -------------------------------------------------------------

/// A key store file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "version")]
pub enum Spec {
    /// The version 1 format.
    V1(v1::Spec),
}

//--- Conversion

impl Spec {
    /// Parse from this specification.
    pub fn parse(self) -> Result<BTreeMap<KeyHandle, KeyRecord>, String> {
        match self {
            Self::V1(spec) => spec.parse(),
        }
    }

    /// Build into this specification.
    pub fn build(keys: &BTreeMap<KeyHandle, KeyRecord>) -> Self {
        Self::V1(v1::Spec::build(keys))
    }
}

//--- Loading / saving

impl Spec {
    /// Load this specification from a file.
    pub fn load(path: &Utf8Path) -> Result<Self, FileError> {
        let file = BufReader::new(File::open(path).map_err(|e| FileError::Load(Arc::new(e)))?);
        serde_json::from_reader(file).map_err(|e| FileError::Parse(Arc::new(e)))
    }

    /// Save this specification to a file, replacing it atomically.
    pub fn save(&self, path: &Utf8Path) -> io::Result<()> {
        let contents = serde_json::to_vec_pretty(self)?;
        util::write_file(path, &contents)
    }
}

//----------- FileError --------------------------------------------------------

/// An error in loading a key store file.
#[derive(Clone, Debug)]
pub enum FileError {
    /// The file could not be read.
    Load(Arc<io::Error>),

    /// The file could not be parsed.
    Parse(Arc<serde_json::Error>),
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(error) => error.fmt(f),
            Self::Parse(error) => error.fmt(f),
        }
    }
}

impl std::error::Error for FileError {}
