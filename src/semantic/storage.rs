//! Binary persistence for vector collections.
//!
//! File format, one file per collection:
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of embedding model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated):
//! - record_len: u32 (little-endian)
//! - record: JSON document including its vector

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::semantic::docs::VectorRecord;
use crate::semantic::index::Collection;

const FORMAT_VERSION: u8 = 1;

/// version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Per-record sanity bound; a length prefix beyond this means corruption.
const MAX_RECORD_LEN: u32 = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CollectionStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file uses different embedding model")]
    ModelMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Malformed record: {0}")]
    Record(#[from] serde_json::Error),
}

pub struct CollectionStorage {
    path: PathBuf,
}

impl CollectionStorage {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load<R>(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<Collection<R>, CollectionStorageError>
    where
        R: VectorRecord + DeserializeOwned,
    {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(CollectionStorageError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(CollectionStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let mut collection =
            Collection::with_capacity(header.dimensions as usize, header.entry_count as usize);

        for _ in 0..header.entry_count {
            let mut len_bytes = [0u8; 4];
            reader.read_exact(&mut len_bytes)?;
            let len = u32::from_le_bytes(len_bytes);
            if len > MAX_RECORD_LEN {
                return Err(CollectionStorageError::InvalidFormat(format!(
                    "record length {len} exceeds limit"
                )));
            }

            let mut buf = vec![0u8; len as usize];
            reader.read_exact(&mut buf)?;
            let record: R = serde_json::from_slice(&buf)?;

            // skip records that fail to insert (e.g., zero norm)
            let _ = collection.insert(record);
        }

        Ok(collection)
    }

    /// Atomic save: temp file -> fsync -> rename.
    pub fn save<R>(
        &self,
        collection: &Collection<R>,
        model_id: &[u8; 32],
    ) -> Result<(), CollectionStorageError>
    where
        R: VectorRecord + Serialize,
    {
        let temp_path = self.path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, collection, model_id);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;
        Ok(())
    }

    pub fn delete(&self) -> Result<(), CollectionStorageError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn write_to_file<R>(
        &self,
        path: &Path,
        collection: &Collection<R>,
        model_id: &[u8; 32],
    ) -> Result<(), CollectionStorageError>
    where
        R: VectorRecord + Serialize,
    {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        write_header(
            &mut writer,
            &Header {
                model_id: *model_id,
                dimensions: collection.dimensions() as u16,
                entry_count: collection.len() as u64,
            },
        )?;

        for record in collection.iter() {
            let buf = serde_json::to_vec(record)?;
            writer.write_all(&(buf.len() as u32).to_le_bytes())?;
            writer.write_all(&buf)?;
        }

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }
}

struct Header {
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn read_header(reader: &mut BufReader<File>) -> Result<Header, CollectionStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;

    let version = header_bytes[0];
    if version > FORMAT_VERSION {
        return Err(CollectionStorageError::VersionMismatch(
            version,
            FORMAT_VERSION,
        ));
    }

    let mut model_id = [0u8; 32];
    model_id.copy_from_slice(&header_bytes[1..33]);

    let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
    let entry_count = u64::from_le_bytes(
        header_bytes[35..43]
            .try_into()
            .expect("slice is eight bytes"),
    );
    let stored_checksum = u32::from_le_bytes(
        header_bytes[43..47]
            .try_into()
            .expect("slice is four bytes"),
    );

    if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
        return Err(CollectionStorageError::ChecksumMismatch);
    }

    Ok(Header {
        model_id,
        dimensions,
        entry_count,
    })
}

fn write_header(
    writer: &mut BufWriter<File>,
    header: &Header,
) -> Result<(), CollectionStorageError> {
    let mut header_bytes = [0u8; HEADER_SIZE];

    header_bytes[0] = FORMAT_VERSION;
    header_bytes[1..33].copy_from_slice(&header.model_id);
    header_bytes[33..35].copy_from_slice(&header.dimensions.to_le_bytes());
    header_bytes[35..43].copy_from_slice(&header.entry_count.to_le_bytes());

    let checksum = crc32fast::hash(&header_bytes[0..43]);
    header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());

    writer.write_all(&header_bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::semantic::docs::{ContentField, IndexedDocument};
    use chrono::Utc;

    fn test_model_id() -> [u8; 32] {
        let mut id = [0u8; 32];
        id[0] = 0xAB;
        id[31] = 0xCD;
        id
    }

    fn doc(id: &str, vector: Vec<f32>) -> IndexedDocument {
        IndexedDocument {
            id: id.to_string(),
            analysis_id: id.split(':').next().unwrap().to_string(),
            user_id: "alice".to_string(),
            url: "https://example.com".to_string(),
            content_type: ContentField::PageDescription,
            content: "some page".to_string(),
            timestamp: Utc::now(),
            vector,
        }
    }

    fn storage(dir: &tempfile::TempDir) -> CollectionStorage {
        CollectionStorage::new(dir.path().join("content-vectors.bin"))
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let model_id = test_model_id();

        let mut collection = Collection::new(3);
        collection.insert(doc("a:page_description", vec![1.0, 0.0, 0.0])).unwrap();
        collection.insert(doc("b:page_description", vec![0.0, 1.0, 0.0])).unwrap();

        storage.save(&collection, &model_id).unwrap();
        assert!(storage.exists());

        let loaded: Collection<IndexedDocument> = storage.load(&model_id, 3).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded.get("a:page_description").unwrap().vector,
            vec![1.0, 0.0, 0.0]
        );
    }

    #[test]
    fn test_model_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);

        let collection: Collection<IndexedDocument> = Collection::new(3);
        storage.save(&collection, &test_model_id()).unwrap();

        let mut wrong = [0u8; 32];
        wrong[0] = 0xFF;
        let result: Result<Collection<IndexedDocument>, _> = storage.load(&wrong, 3);
        assert!(matches!(result, Err(CollectionStorageError::ModelMismatch)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);

        let collection: Collection<IndexedDocument> = Collection::new(3);
        storage.save(&collection, &test_model_id()).unwrap();

        let result: Result<Collection<IndexedDocument>, _> = storage.load(&test_model_id(), 384);
        assert!(matches!(
            result,
            Err(CollectionStorageError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir);
        let model_id = test_model_id();

        let mut collection = Collection::new(3);
        collection.insert(doc("a:page_description", vec![1.0, 0.0, 0.0])).unwrap();
        storage.save(&collection, &model_id).unwrap();

        // flip a byte inside the header
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(storage.path())
            .unwrap();
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(10)).unwrap();
        file.write_all(&[0xFF]).unwrap();

        let result: Result<Collection<IndexedDocument>, _> = storage.load(&model_id, 3);
        assert!(matches!(
            result,
            Err(CollectionStorageError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_atomic_save_cleans_up_temp_on_error() {
        // parent path is a file, so directory creation must fail
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();

        let path = blocker.join("vectors.bin");
        let storage = CollectionStorage::new(path.clone());

        let collection: Collection<IndexedDocument> = Collection::new(3);
        assert!(storage.save(&collection, &test_model_id()).is_err());
        assert!(!path.with_extension("tmp").exists());
    }
}
