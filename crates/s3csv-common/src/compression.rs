//! Gzip helpers for staged files
//!
//! Buffer files are compressed into a sibling `<file>.gz` before they are
//! shipped. Both directions stream through `flate2`, so memory use does not
//! grow with the file size.

use crate::error::{CommonError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Path of the gzip sibling for `path` (`orders.csv` -> `orders.csv.gz`)
pub fn gzip_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

/// Compress `path` into its `.gz` sibling and return the sibling's path
///
/// An existing sibling is truncated.
pub fn gzip_file(path: &Path) -> Result<PathBuf> {
    let target = gzip_sibling(path);
    let wrap = |source: std::io::Error| CommonError::Compression {
        path: path.display().to_string(),
        source,
    };

    let mut input = BufReader::new(File::open(path).map_err(wrap)?);
    let output = BufWriter::new(File::create(&target).map_err(wrap)?);
    let mut encoder = GzEncoder::new(output, Compression::default());

    let copied = std::io::copy(&mut input, &mut encoder).map_err(wrap)?;
    let mut output = encoder.finish().map_err(wrap)?;
    output.flush().map_err(wrap)?;

    debug!(
        source = %path.display(),
        target = %target.display(),
        bytes = copied,
        "Compressed buffer file"
    );
    Ok(target)
}

/// Decompress gzip-compressed data
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|source| CommonError::Compression {
            path: "<memory>".to_string(),
            source,
        })?;
    debug!("Decompressed {} -> {} bytes", data.len(), decompressed.len());
    Ok(decompressed)
}
