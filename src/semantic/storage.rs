//! Binary storage for the flat vector index.
//!
//! File format: embeddings.idx
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of model name)
//! - dimensions: u16 (little-endian)
//! - row_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Rows (repeated row_count times):
//! - vector: [f32; dimensions] (little-endian)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::semantic::index::FlatL2Index;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + row_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: index was built with a different embedding model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,
}

/// Storage manager for the index file.
pub struct IndexStorage {
    path: PathBuf,
}

impl IndexStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the index, refusing files written for another model.
    pub fn load(&self, expected_model_id: &[u8; 32]) -> Result<FlatL2Index, IndexStorageError> {
        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        log::debug!(
            "index v{}: {} rows of {} dims",
            header.version,
            header.row_count,
            header.dimensions
        );
        if header.model_id != *expected_model_id {
            return Err(IndexStorageError::ModelMismatch);
        }

        if header.dimensions == 0 && header.row_count > 0 {
            return Err(IndexStorageError::InvalidFormat(
                "rows stored with zero dimensions".to_string(),
            ));
        }

        // the header is not trusted for allocation until the file is long enough
        let expected_len = header
            .row_count
            .checked_mul(header.dimensions as u64 * 4)
            .and_then(|body| body.checked_add(HEADER_SIZE as u64));
        if expected_len.map_or(true, |len| len > file_len) {
            return Err(IndexStorageError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "header claims {} rows of {} dims but the file is {file_len} bytes",
                    header.row_count, header.dimensions
                ),
            )));
        }

        let dimensions = header.dimensions as usize;
        let rows = usize::try_from(header.row_count).map_err(|_| {
            IndexStorageError::InvalidFormat(format!("row count {} too large", header.row_count))
        })?;

        let mut index = FlatL2Index::with_capacity(dimensions, rows);
        let mut row_bytes = vec![0u8; dimensions * 4];
        let mut vector = vec![0f32; dimensions];

        for _ in 0..rows {
            reader.read_exact(&mut row_bytes)?;
            for (value, bytes) in vector.iter_mut().zip(row_bytes.chunks_exact(4)) {
                *value = f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            index
                .add(&vector)
                .map_err(|e| IndexStorageError::InvalidFormat(e.to_string()))?;
        }

        Ok(index)
    }

    /// Save the index.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, index: &FlatL2Index, model_id: &[u8; 32]) -> Result<(), IndexStorageError> {
        let dimensions = u16::try_from(index.dimensions()).map_err(|_| {
            IndexStorageError::InvalidFormat(format!(
                "{} dimensions do not fit the header",
                index.dimensions()
            ))
        })?;

        let temp_path = self.path.with_extension("tmp");

        let result = write_to_file(&temp_path, index, dimensions, model_id);

        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;

        Ok(())
    }
}

fn write_to_file(
    path: &Path,
    index: &FlatL2Index,
    dimensions: u16,
    model_id: &[u8; 32],
) -> Result<(), IndexStorageError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let header = Header {
        version: FORMAT_VERSION,
        model_id: *model_id,
        dimensions,
        row_count: index.len() as u64,
    };
    writer.write_all(&header.to_bytes())?;

    for vector in index.rows() {
        for &value in vector {
            writer.write_all(&value.to_le_bytes())?;
        }
    }

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;

    Ok(())
}

fn read_header(reader: &mut impl Read) -> Result<Header, IndexStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];

    // Version check first
    if version != FORMAT_VERSION {
        return Err(IndexStorageError::VersionMismatch(version, FORMAT_VERSION));
    }

    // Verify checksum (computed over header without checksum field)
    let stored_checksum = u32::from_le_bytes([
        header_bytes[43],
        header_bytes[44],
        header_bytes[45],
        header_bytes[46],
    ]);
    if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
        return Err(IndexStorageError::ChecksumMismatch);
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);

    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header_bytes[35..43]);
    let row_count = u64::from_le_bytes(count_bytes);

    Ok(Header {
        version,
        model_id,
        dimensions,
        row_count,
    })
}

#[derive(Debug)]
struct Header {
    version: u8,
    model_id: [u8; 32],
    dimensions: u16,
    row_count: u64,
}

impl Header {
    fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut header_bytes = [0u8; HEADER_SIZE];

        header_bytes[0] = self.version;
        header_bytes[1..33].copy_from_slice(&self.model_id);
        header_bytes[33..35].copy_from_slice(&self.dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&self.row_count.to_le_bytes());

        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

        header_bytes
    }
}
