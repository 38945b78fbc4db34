//! Durable storage for the semantic store.
//!
//! Two artifacts per store directory, always written together:
//!
//! `vectors.bin`
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Body: `entry_count * dimensions` f32 values (little-endian), in ordinal order.
//!
//! `metadata.json`
//!
//! JSON array of records, index-aligned with the vectors.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::VectorIndex;
use crate::semantic::metadata::{MetadataStore, Record};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

pub const VECTORS_FILE: &str = "vectors.bin";
pub const METADATA_FILE: &str = "metadata.json";

/// Errors that can occur during storage operations.
///
/// Every variant except `Io` on save means the stored artifacts are unusable.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metadata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    Corrupt(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Artifacts disagree: {vectors} vectors, {records} records")]
    CountMismatch { vectors: usize, records: usize },
}

/// How the store's state was obtained at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No artifacts on disk
    Fresh,
    /// Both artifacts loaded
    Loaded { entries: usize },
    /// Artifacts were present but unusable; starting empty
    Recovered { reason: String },
}

/// Reads and writes a store directory.
pub struct PersistenceLayer {
    dir: PathBuf,
}

impl PersistenceLayer {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn vectors_path(&self) -> PathBuf {
        self.dir.join(VECTORS_FILE)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    /// Load both artifacts.
    ///
    /// Fails if either is missing, unreadable, written for another model or
    /// dimension, or if there are fewer vectors than records.
    ///
    /// Vectors are renamed into place before metadata, so extra trailing
    /// vectors mean a save was interrupted between the two renames. Those
    /// vectors are dropped and the last complete snapshot is returned.
    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<(VectorIndex, MetadataStore), PersistenceError> {
        let mut index = self.load_vectors(expected_model_id, expected_dimensions)?;

        let reader = BufReader::new(File::open(self.metadata_path())?);
        let records: Vec<Record> = serde_json::from_reader(reader)?;

        if index.len() > records.len() {
            log::warn!(
                "Dropping {} vectors from an interrupted save in {}",
                index.len() - records.len(),
                self.dir.display()
            );
            index.truncate(records.len());
        }

        if records.len() != index.len() {
            return Err(PersistenceError::CountMismatch {
                vectors: index.len(),
                records: records.len(),
            });
        }

        Ok((index, MetadataStore::from_records(records)))
    }

    /// Load both artifacts, starting empty when they are absent or unusable.
    ///
    /// Never fails: a corrupt store downgrades to an empty one with a warning.
    pub fn load_or_empty(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> (VectorIndex, MetadataStore, LoadOutcome) {
        let empty = || (VectorIndex::new(expected_dimensions), MetadataStore::new());

        if !self.vectors_path().exists() && !self.metadata_path().exists() {
            log::info!("No existing store at {}, starting fresh", self.dir.display());
            let (index, metadata) = empty();
            return (index, metadata, LoadOutcome::Fresh);
        }

        match self.load(expected_model_id, expected_dimensions) {
            Ok((index, metadata)) => {
                log::info!("Loaded {} entries from {}", index.len(), self.dir.display());
                let entries = index.len();
                (index, metadata, LoadOutcome::Loaded { entries })
            }
            Err(e) => {
                log::warn!(
                    "Failed to load store at {}: {}, creating fresh index",
                    self.dir.display(),
                    e
                );
                let (index, metadata) = empty();
                (
                    index,
                    metadata,
                    LoadOutcome::Recovered {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    /// Write a full snapshot of both artifacts.
    ///
    /// Each artifact is written to a temp file, fsynced and renamed over the
    /// previous one. Vectors are renamed before metadata.
    pub fn save(
        &self,
        index: &VectorIndex,
        metadata: &MetadataStore,
        model_id: &[u8; 32],
    ) -> Result<(), PersistenceError> {
        if index.len() != metadata.len() {
            return Err(PersistenceError::CountMismatch {
                vectors: index.len(),
                records: metadata.len(),
            });
        }

        let vectors_path = self.vectors_path();
        let metadata_path = self.metadata_path();
        let vectors_tmp = vectors_path.with_extension("tmp");
        let metadata_tmp = metadata_path.with_extension("tmp");

        let result = write_synced(&vectors_tmp, |w| write_vectors(w, index, model_id))
            .and_then(|_| {
                write_synced(&metadata_tmp, |w| {
                    serde_json::to_writer_pretty(&mut *w, metadata.records())?;
                    Ok(())
                })
            });

        if result.is_err() {
            let _ = std::fs::remove_file(&vectors_tmp);
            let _ = std::fs::remove_file(&metadata_tmp);
            return result;
        }

        std::fs::rename(&vectors_tmp, &vectors_path)?;
        std::fs::rename(&metadata_tmp, &metadata_path)?;

        log::debug!("Saved {} entries to {}", index.len(), self.dir.display());
        Ok(())
    }

    fn load_vectors(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorIndex, PersistenceError> {
        let file = File::open(self.vectors_path())?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;

        if header.model_id != *expected_model_id {
            return Err(PersistenceError::ModelMismatch);
        }

        if header.dimensions as usize != expected_dimensions {
            return Err(PersistenceError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;

        let expected_len = (header.entry_count as usize)
            .checked_mul(expected_dimensions * 4)
            .ok_or_else(|| PersistenceError::Corrupt("entry count overflows".to_string()))?;
        if body.len() != expected_len {
            return Err(PersistenceError::Corrupt(format!(
                "expected {} bytes of vector data, found {}",
                expected_len,
                body.len()
            )));
        }

        let data: Vec<f32> = body
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        VectorIndex::from_flat(expected_dimensions, data)
            .map_err(|e| PersistenceError::Corrupt(e.to_string()))
    }
}

/// Write a file through `f`, then flush and fsync it.
fn write_synced<F>(path: &Path, f: F) -> Result<(), PersistenceError>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), PersistenceError>,
{
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    f(&mut writer)?;

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    Ok(())
}

fn write_vectors(
    writer: &mut BufWriter<File>,
    index: &VectorIndex,
    model_id: &[u8; 32],
) -> Result<(), PersistenceError> {
    let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
        PersistenceError::Corrupt(format!(
            "{} dimensions do not fit the file header",
            index.dimensions()
        ))
    })?;

    let header = Header {
        version: FORMAT_VERSION,
        model_id: *model_id,
        dimensions,
        entry_count: index.len() as u64,
    };
    writer.write_all(&header.to_bytes())?;

    for &value in index.as_flat() {
        writer.write_all(&value.to_le_bytes())?;
    }

    Ok(())
}

fn read_header(reader: &mut impl Read) -> Result<Header, PersistenceError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];
    if version != FORMAT_VERSION {
        return Err(PersistenceError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes([
        header_bytes[43],
        header_bytes[44],
        header_bytes[45],
        header_bytes[46],
    ]);
    if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
        return Err(PersistenceError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);

    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header_bytes[35..43]);
    let entry_count = u64::from_le_bytes(count_bytes);

    Ok(Header {
        version,
        model_id,
        dimensions,
        entry_count,
    })
}

/// File header structure.
#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

impl Header {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = self.version;
        header_bytes[1..33].copy_from_slice(&self.model_id);
        header_bytes[33..35].copy_from_slice(&self.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&self.entry_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        header_bytes
    }
}
