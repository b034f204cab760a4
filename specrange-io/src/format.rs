//! JSON cube file format.
//!
//! A file holds named datasets, each with one or more signals. Signal counts
//! are stored row-major next to their `[rows, cols, channels]` shape.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use specrange_core::CalibrationParameters;

use crate::{Error, Result};

/// Current file format version.
pub const FORMAT_VERSION: u32 = 1;

/// Top-level file contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CubeFile {
    pub version: u32,
    pub datasets: Vec<DatasetRecord>,
}

/// A named dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetRecord {
    pub name: String,
    pub signals: Vec<SignalRecord>,
}

/// One spectrum image signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub title: String,
    pub calibration: CalibrationParameters,
    pub shape: [usize; 3],
    pub data: Vec<f64>,
}

/// Reads and version-checks a cube file.
///
/// # Errors
/// I/O, JSON, or [`Error::InvalidFormat`] for an unsupported version.
pub fn read_cube_file<P: AsRef<Path>>(path: P) -> Result<CubeFile> {
    let reader = BufReader::new(File::open(path)?);
    let file: CubeFile = serde_json::from_reader(reader)?;
    if file.version != FORMAT_VERSION {
        return Err(Error::InvalidFormat(format!(
            "unsupported cube file version {} (expected {FORMAT_VERSION})",
            file.version
        )));
    }
    Ok(file)
}

/// Writes a cube file.
///
/// # Errors
/// I/O or JSON errors.
pub fn write_cube_file<P: AsRef<Path>>(path: P, file: &CubeFile) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, file)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    #[test]
    fn test_rejects_unknown_version() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"version": 7, "datasets": []}}"#).unwrap();
        let err = read_cube_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_rejects_malformed_json() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            read_cube_file(file.path()).unwrap_err(),
            Error::Json(_)
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = read_cube_file("/nonexistent/cube.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
