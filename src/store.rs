//! Issue cache persistence.
//!
//! The sync engine talks to an [`IssueStore`] trait with three batch
//! operations. [`FileIssueStore`] keeps one binary file per repository
//! key under a base directory; [`MemoryIssueStore`] backs tests and
//! ephemeral runs.
//!
//! File format, version 1:
//!
//! Header:
//! - version: u8 (1)
//! - embedding_id: [u8; 32] (SHA256 of the embedding model name)
//! - repository: u16 length + UTF-8 bytes
//! - record_count: u32 (little-endian)
//! - checksum: u32 (CRC32 of all preceding header bytes)
//!
//! Records (repeated, little-endian, strings u32-length-prefixed):
//! - number: u64
//! - updated_at, title, url, state: strings
//! - comment_count: u32, then that many strings
//! - shape: string
//! - fingerprint: u32 length + raw bytes

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::issues::{CachedIssue, IssueKey};

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Upper bound for any length prefix, rejects nonsense from corrupt files
const MAX_FIELD_BYTES: u32 = 1 << 26;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid cache file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {found}, supported version {supported}")]
    VersionMismatch { found: u8, supported: u8 },

    #[error("Embedding model mismatch: cache written by a different model")]
    ModelMismatch,

    #[error("Checksum mismatch: cache file may be corrupted")]
    ChecksumMismatch,
}

/// Batch-oriented cache of [`CachedIssue`] records keyed by
/// (repository, issue number).
///
/// `bulk_insert` replaces any record that already holds a composite key,
/// so the uniqueness invariant survives callers that skip the delete.
pub trait IssueStore: Send + Sync {
    fn select_by_repository(&self, repository: &str) -> Result<Vec<CachedIssue>, StoreError>;

    fn bulk_insert(&self, records: &[CachedIssue]) -> Result<(), StoreError>;

    fn bulk_delete(&self, keys: &[IssueKey]) -> Result<(), StoreError>;
}

/// One binary file per repository key under `base_dir`.
///
/// Cache files written by a different format version or a different
/// embedding model read back as empty: the next reconcile refreshes
/// every issue and rewrites the file. Damage (bad checksum, truncated
/// records) is an error instead, so it never masquerades as an empty
/// repository.
pub struct FileIssueStore {
    base_dir: PathBuf,
    embedding_id: [u8; 32],
    io_lock: Mutex<()>,
}

impl FileIssueStore {
    pub fn new(base_dir: PathBuf, embedding_id: [u8; 32]) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            embedding_id,
            io_lock: Mutex::new(()),
        })
    }

    /// `owner/repo` to file name. GitHub owner names cannot contain
    /// underscores, so the double underscore never collides.
    fn file_path(&self, repository: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.issues", repository.replace('/', "__")))
    }

    fn load_file(&self, repository: &str) -> Result<Vec<CachedIssue>, StoreError> {
        let path = self.file_path(repository);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut reader = BufReader::new(file);

        let record_count = match self.read_header(&mut reader, repository) {
            Ok(count) => count,
            Err(err @ (StoreError::VersionMismatch { .. } | StoreError::ModelMismatch)) => {
                log::warn!("cache file for {} is unusable ({}), treating as empty", repository, err);
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        };

        let mut records = Vec::new();
        for _ in 0..record_count {
            records.push(read_record(&mut reader, repository)?);
        }
        Ok(records)
    }

    fn save_file(&self, repository: &str, records: &[CachedIssue]) -> Result<(), StoreError> {
        let path = self.file_path(repository);
        let temp_path = path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, repository, records);
        if let Err(err) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(err);
        }

        // Atomic rename
        std::fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn write_to_file(
        &self,
        path: &Path,
        repository: &str,
        records: &[CachedIssue],
    ) -> Result<(), StoreError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        self.write_header(&mut writer, repository, records.len() as u32)?;
        for record in records {
            write_record(&mut writer, record)?;
        }

        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    fn write_header(
        &self,
        writer: &mut BufWriter<File>,
        repository: &str,
        record_count: u32,
    ) -> Result<(), StoreError> {
        let repo_bytes = repository.as_bytes();
        let mut header = Vec::with_capacity(43 + repo_bytes.len());
        header.push(FORMAT_VERSION);
        header.extend_from_slice(&self.embedding_id);
        header.extend_from_slice(&(repo_bytes.len() as u16).to_le_bytes());
        header.extend_from_slice(repo_bytes);
        header.extend_from_slice(&record_count.to_le_bytes());

        let checksum = crc32fast::hash(&header);
        writer.write_all(&header)?;
        writer.write_all(&checksum.to_le_bytes())?;
        Ok(())
    }

    /// Read and validate the header, returning the record count.
    fn read_header(
        &self,
        reader: &mut BufReader<File>,
        repository: &str,
    ) -> Result<u32, StoreError> {
        let mut fixed = [0u8; 35];
        reader.read_exact(&mut fixed)?;

        let version = fixed[0];
        if version != FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                found: version,
                supported: FORMAT_VERSION,
            });
        }

        let mut embedding_id = [0u8; 32];
        embedding_id.copy_from_slice(&fixed[1..33]);

        let repo_len = u16::from_le_bytes([fixed[33], fixed[34]]) as usize;
        let mut repo_bytes = vec![0u8; repo_len];
        reader.read_exact(&mut repo_bytes)?;

        let mut count_bytes = [0u8; 4];
        reader.read_exact(&mut count_bytes)?;
        let record_count = u32::from_le_bytes(count_bytes);

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        // Checksum covers everything before it
        let mut header = Vec::with_capacity(35 + repo_len + 4);
        header.extend_from_slice(&fixed);
        header.extend_from_slice(&repo_bytes);
        header.extend_from_slice(&count_bytes);
        if crc32fast::hash(&header) != stored_checksum {
            return Err(StoreError::ChecksumMismatch);
        }

        if embedding_id != self.embedding_id {
            return Err(StoreError::ModelMismatch);
        }

        let file_repository = String::from_utf8(repo_bytes)
            .map_err(|_| StoreError::InvalidFormat("repository key is not UTF-8".to_string()))?;
        if file_repository != repository {
            return Err(StoreError::InvalidFormat(format!(
                "file belongs to repository {:?}, expected {:?}",
                file_repository, repository
            )));
        }

        Ok(record_count)
    }
}

impl IssueStore for FileIssueStore {
    fn select_by_repository(&self, repository: &str) -> Result<Vec<CachedIssue>, StoreError> {
        let _guard = lock_or_recover(&self.io_lock);
        self.load_file(repository)
    }

    fn bulk_insert(&self, records: &[CachedIssue]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        let _guard = lock_or_recover(&self.io_lock);

        let mut by_repository: BTreeMap<&str, Vec<&CachedIssue>> = BTreeMap::new();
        for record in records {
            by_repository
                .entry(record.repository.as_str())
                .or_default()
                .push(record);
        }

        for (repository, incoming) in by_repository {
            let mut existing = self.load_file(repository)?;
            for record in incoming {
                match existing.iter_mut().find(|r| r.number == record.number) {
                    Some(slot) => *slot = record.clone(),
                    None => existing.push(record.clone()),
                }
            }
            self.save_file(repository, &existing)?;
        }
        Ok(())
    }

    fn bulk_delete(&self, keys: &[IssueKey]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let _guard = lock_or_recover(&self.io_lock);

        let mut by_repository: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
        for key in keys {
            by_repository
                .entry(key.repository.as_str())
                .or_default()
                .push(key.number);
        }

        for (repository, numbers) in by_repository {
            if !self.file_path(repository).exists() {
                continue;
            }
            let mut records = self.load_file(repository)?;
            records.retain(|record| !numbers.contains(&record.number));
            self.save_file(repository, &records)?;
        }
        Ok(())
    }
}

/// The guard only serializes read-modify-write cycles; a poisoning
/// panic cannot leave a file inconsistent thanks to the atomic rename.
fn lock_or_recover(lock: &Mutex<()>) -> std::sync::MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_string(writer: &mut BufWriter<File>, value: &str) -> Result<(), StoreError> {
    write_bytes(writer, value.as_bytes())
}

fn write_bytes(writer: &mut BufWriter<File>, value: &[u8]) -> Result<(), StoreError> {
    writer.write_all(&(value.len() as u32).to_le_bytes())?;
    writer.write_all(value)?;
    Ok(())
}

fn write_record(writer: &mut BufWriter<File>, record: &CachedIssue) -> Result<(), StoreError> {
    writer.write_all(&record.number.to_le_bytes())?;
    write_string(writer, &record.updated_at)?;
    write_string(writer, &record.title)?;
    write_string(writer, &record.url)?;
    write_string(writer, &record.state)?;
    writer.write_all(&(record.comments.len() as u32).to_le_bytes())?;
    for comment in &record.comments {
        write_string(writer, comment)?;
    }
    write_string(writer, &record.shape)?;
    write_bytes(writer, &record.fingerprint)?;
    Ok(())
}

fn read_u32(reader: &mut BufReader<File>) -> Result<u32, StoreError> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

fn read_bytes(reader: &mut BufReader<File>) -> Result<Vec<u8>, StoreError> {
    let len = read_u32(reader)?;
    if len > MAX_FIELD_BYTES {
        return Err(StoreError::InvalidFormat(format!(
            "field length {} exceeds maximum",
            len
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn read_string(reader: &mut BufReader<File>) -> Result<String, StoreError> {
    String::from_utf8(read_bytes(reader)?)
        .map_err(|_| StoreError::InvalidFormat("string field is not UTF-8".to_string()))
}

fn read_record(reader: &mut BufReader<File>, repository: &str) -> Result<CachedIssue, StoreError> {
    let mut number_bytes = [0u8; 8];
    reader.read_exact(&mut number_bytes)?;
    let number = u64::from_le_bytes(number_bytes);

    let updated_at = read_string(reader)?;
    let title = read_string(reader)?;
    let url = read_string(reader)?;
    let state = read_string(reader)?;

    let comment_count = read_u32(reader)?;
    let mut comments = Vec::new();
    for _ in 0..comment_count {
        comments.push(read_string(reader)?);
    }

    let shape = read_string(reader)?;
    let fingerprint = read_bytes(reader)?;

    Ok(CachedIssue {
        repository: repository.to_string(),
        number,
        title,
        url,
        state,
        comments,
        fingerprint,
        shape,
        updated_at,
    })
}

/// HashMap-backed store with the same batch semantics.
#[derive(Default)]
pub struct MemoryIssueStore {
    records: Mutex<HashMap<(String, u64), CachedIssue>>,
}

impl MemoryIssueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IssueStore for MemoryIssueStore {
    fn select_by_repository(&self, repository: &str) -> Result<Vec<CachedIssue>, StoreError> {
        let records = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let mut found: Vec<CachedIssue> = records
            .values()
            .filter(|record| record.repository == repository)
            .cloned()
            .collect();
        // Map iteration order is arbitrary; keep the result deterministic
        found.sort_by_key(|record| record.number);
        Ok(found)
    }

    fn bulk_insert(&self, records: &[CachedIssue]) -> Result<(), StoreError> {
        let mut map = self.records.lock().unwrap_or_else(|p| p.into_inner());
        for record in records {
            map.insert((record.repository.clone(), record.number), record.clone());
        }
        Ok(())
    }

    fn bulk_delete(&self, keys: &[IssueKey]) -> Result<(), StoreError> {
        let mut map = self.records.lock().unwrap_or_else(|p| p.into_inner());
        for key in keys {
            map.remove(&(key.repository.clone(), key.number));
        }
        Ok(())
    }
}
