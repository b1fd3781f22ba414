//! In-process zip alignment.
//!
//! Re-packs an archive so that stored entry data starts on the requested
//! boundary, the way `zipalign` does, and forces the resource table to be
//! stored uncompressed. Output is written to a temp file next to the
//! destination and renamed into place, so a failure never leaves a partial
//! archive behind.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::Path;

use bytes::Buf;
use serde::Serialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ApksignError, Result};
use crate::models::AlignOptions;
use crate::pipeline::paths::parent_dir;

const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x04034b50;
const LOCAL_FILE_HEADER_SIZE: usize = 30;
const LOCAL_FILE_HEADER_NAME_LEN_OFFSET: usize = 26;

/// A stored entry whose data does not start on its required boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MisalignedEntry {
    pub name: String,
    pub data_offset: u64,
    pub required: u16,
}

/// Result of inspecting an archive's alignment.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlignmentCheck {
    /// Number of entries inspected.
    pub entries: usize,
    /// Stored entries that are not aligned.
    pub misaligned: Vec<MisalignedEntry>,
    /// Entries that must be stored uncompressed but are compressed.
    pub compressed_required_stored: Vec<String>,
}

impl AlignmentCheck {
    pub fn is_aligned(&self) -> bool {
        self.misaligned.is_empty() && self.compressed_required_stored.is_empty()
    }
}

/// Counts from one alignment pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlignSummary {
    pub entries: usize,
    pub stored: usize,
}

/// Pure-Rust replacement for the `zipalign` tool.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeAligner;

impl NativeAligner {
    pub fn new() -> Self {
        Self
    }

    /// Aligns `input` into `output` on a blocking worker thread.
    pub async fn align(
        &self,
        input: &Path,
        output: &Path,
        options: &AlignOptions,
    ) -> Result<AlignSummary> {
        let input = input.to_path_buf();
        let output = output.to_path_buf();
        let options = options.clone();
        tokio::task::spawn_blocking(move || align_file(&input, &output, &options))
            .await
            .map_err(|e| ApksignError::Alignment(format!("Alignment task failed: {}", e)))?
    }

    /// Inspects the alignment of `apk` on a blocking worker thread.
    pub async fn check(&self, apk: &Path, options: &AlignOptions) -> Result<AlignmentCheck> {
        let apk = apk.to_path_buf();
        let options = options.clone();
        tokio::task::spawn_blocking(move || check_alignment(&apk, &options))
            .await
            .map_err(|e| ApksignError::Alignment(format!("Alignment check failed: {}", e)))?
    }
}

/// Aligns `input` into `output`.
pub fn align_file(input: &Path, output: &Path, options: &AlignOptions) -> Result<AlignSummary> {
    if options.boundary == 0 {
        return Err(ApksignError::Configuration(
            "Alignment boundary must be at least 1".to_string(),
        ));
    }

    let mut archive = open_archive(input)?;

    let tmp = tempfile::Builder::new()
        .prefix(".apksign-align-")
        .suffix(".tmp")
        .tempfile_in(parent_dir(output))?;
    let mut writer = ZipWriter::new(BufWriter::new(tmp.reopen()?));
    let mut summary = AlignSummary::default();

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| malformed(input, &e.to_string()))?;
        let name = entry.name().to_string();

        let mut entry_options = SimpleFileOptions::default()
            .last_modified_time(entry.last_modified().unwrap_or_default());
        if let Some(mode) = entry.unix_mode() {
            entry_options = entry_options.unix_permissions(mode);
        }

        if entry.is_dir() {
            writer.add_directory(name.as_str(), entry_options)?;
            summary.entries += 1;
            continue;
        }

        let stored = options.forces_stored(&name) || entry.compression() == CompressionMethod::Stored;
        let (method, alignment) = if stored {
            (CompressionMethod::Stored, options.alignment_for(&name))
        } else {
            (CompressionMethod::Deflated, options.boundary)
        };

        let entry_options = entry_options
            .compression_method(method)
            .with_alignment(alignment)
            .large_file(entry.size() >= u32::MAX as u64);

        writer.start_file(name.as_str(), entry_options)?;
        std::io::copy(&mut entry, &mut writer)
            .map_err(|e| malformed(input, &format!("entry '{}': {}", name, e)))?;

        summary.entries += 1;
        if stored {
            summary.stored += 1;
        }
    }

    let file = writer
        .finish()?
        .into_inner()
        .map_err(|e| ApksignError::Io(e.into_error()))?;
    file.sync_all()?;

    tmp.persist(output).map_err(|e| ApksignError::Io(e.error))?;

    tracing::debug!(
        "Aligned {} entries ({} stored) into {}",
        summary.entries,
        summary.stored,
        output.display()
    );

    Ok(summary)
}

/// Reports stored entries that are not aligned and entries that should be stored.
pub fn check_alignment(apk: &Path, options: &AlignOptions) -> Result<AlignmentCheck> {
    let mut archive = open_archive(apk)?;
    let mut headers = BufReader::new(File::open(apk)?);
    let mut check = AlignmentCheck::default();

    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| malformed(apk, &e.to_string()))?;
        let name = entry.name().to_string();
        check.entries += 1;

        if entry.is_dir() {
            continue;
        }

        if entry.compression() != CompressionMethod::Stored {
            if options.forces_stored(&name) {
                check.compressed_required_stored.push(name);
            }
            continue;
        }

        let data_offset = local_data_offset(&mut headers, entry.header_start())
            .map_err(|e| malformed(apk, &format!("entry '{}': {}", name, e)))?;
        let required = options.alignment_for(&name);
        if data_offset % u64::from(required) != 0 {
            check.misaligned.push(MisalignedEntry {
                name,
                data_offset,
                required,
            });
        }
    }

    Ok(check)
}

fn open_archive(path: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(|e| malformed(path, &e.to_string()))
}

/// Computes where an entry's data begins from its local file header.
fn local_data_offset<R: Read + Seek>(reader: &mut R, header_start: u64) -> std::io::Result<u64> {
    let mut header = [0u8; LOCAL_FILE_HEADER_SIZE];
    reader.seek(SeekFrom::Start(header_start))?;
    reader.read_exact(&mut header)?;

    let mut buf = &header[..];
    if buf.get_u32_le() != LOCAL_FILE_HEADER_SIGNATURE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "bad local file header signature",
        ));
    }

    let mut lengths = &header[LOCAL_FILE_HEADER_NAME_LEN_OFFSET..];
    let name_len = u64::from(lengths.get_u16_le());
    let extra_len = u64::from(lengths.get_u16_le());

    Ok(header_start + LOCAL_FILE_HEADER_SIZE as u64 + name_len + extra_len)
}

fn malformed(path: &Path, detail: &str) -> ApksignError {
    ApksignError::Alignment(format!("{} is not a valid zip archive: {}", path.display(), detail))
}

/// Returns the entries of `apk` whose required storage the `zipalign` tool
/// cannot fix (it keeps compression as-is).
pub fn needs_recompression(apk: &Path, options: &AlignOptions) -> Result<Vec<String>> {
    let mut archive = open_archive(apk)?;
    let mut names = Vec::new();
    for required in &options.uncompressed_entries {
        let compressed = match archive.by_name(required) {
            Ok(entry) => entry.compression() != CompressionMethod::Stored,
            Err(zip::result::ZipError::FileNotFound) => false,
            Err(e) => return Err(malformed(apk, &e.to_string())),
        };
        if compressed {
            names.push(required.clone());
        }
    }
    Ok(names)
}
