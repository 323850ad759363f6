//! Crash-safe snapshot writes: serialize to a temp file in the target
//! directory, then rename over the destination.

use serde::Serialize;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Write `value` as pretty JSON to `path` atomically. The rename keeps
/// a reader (or a crash) from ever seeing a half-written snapshot.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp)?;
        serde_json::to_writer_pretty(&mut file, value)?;
        file.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}
