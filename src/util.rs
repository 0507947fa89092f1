//! Miscellaneous utilities for delsync.

use std::{
    fs,
    io::{self, Write},
};

use camino::Utf8Path;

/// Atomically write a file.
///
/// The contents are written to a temporary file in the same directory, which
/// then replaces `path`.  Readers never observe a partially written file.
pub fn write_file(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    // Ensure such a path _can_ exist.
    let dir = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    fs::create_dir_all(dir)?;

    // Obtain a temporary file in the same directory.
    let mut tmp_file = tempfile::Builder::new().tempfile_in(dir)?;

    // Fill up the temporary file.
    tmp_file.as_file_mut().write_all(contents)?;
    tmp_file.as_file_mut().sync_all()?;

    // Replace the target path with the temporary file.
    let _ = tmp_file.persist(path)?;

    Ok(())
}
