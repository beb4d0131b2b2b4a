//! JSON file helpers shared by everything the driver persists.

use crate::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Serialize `value` into a new file at `path`, replacing any existing one.
///
/// # Errors
/// Returns `Error::Io` if the file cannot be written and
/// `Error::Serialization` if the value cannot be encoded.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

/// Deserialize a value from the JSON file at `path`.
///
/// # Errors
/// Returns `Error::Io` if the file cannot be opened and
/// `Error::Serialization` if its content does not parse.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
