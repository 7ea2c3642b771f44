//! Susurrus Store -- embedded ordered archive of envelope bytes.
//!
//! Keys are 36 raw bytes: `[birth:be-u32 | hash:32]`. Big-endian birth
//! means lexicographic order equals time order, so a request window is one
//! contiguous range scan. The hash suffix disambiguates simultaneous
//! envelopes.
//!
//! Backed by sled; readers iterate lazily and never block writers.

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("malformed archive key: {0} bytes (expected {ARCHIVE_KEY_SIZE})")]
    MalformedKey(usize),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Archive key width: 4-byte big-endian birth + 32-byte envelope hash.
pub const ARCHIVE_KEY_SIZE: usize = 36;

/// A 36-byte archive key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArchiveKey {
    raw: [u8; ARCHIVE_KEY_SIZE],
}

impl ArchiveKey {
    /// Key for a specific envelope.
    pub fn new(birth: u32, hash: &[u8; 32]) -> Self {
        let mut raw = [0u8; ARCHIVE_KEY_SIZE];
        raw[..4].copy_from_slice(&birth.to_be_bytes());
        raw[4..].copy_from_slice(hash);
        Self { raw }
    }

    /// Smallest key with the given birth second (zero hash).
    pub fn range_start(birth: u32) -> Self {
        Self::new(birth, &[0x00; 32])
    }

    /// Largest key with the given birth second (all-ones hash).
    pub fn range_end(birth: u32) -> Self {
        Self::new(birth, &[0xFF; 32])
    }

    /// Parse a key read back from the store.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ARCHIVE_KEY_SIZE {
            return Err(StoreError::MalformedKey(bytes.len()));
        }
        let mut raw = [0u8; ARCHIVE_KEY_SIZE];
        raw.copy_from_slice(bytes);
        Ok(Self { raw })
    }

    pub fn as_bytes(&self) -> &[u8; ARCHIVE_KEY_SIZE] {
        &self.raw
    }

    /// Birth second encoded in the key.
    pub fn birth(&self) -> u32 {
        u32::from_be_bytes([self.raw[0], self.raw[1], self.raw[2], self.raw[3]])
    }

    /// Envelope hash suffix.
    pub fn hash(&self) -> &[u8] {
        &self.raw[4..]
    }
}

/// Lazy ascending iterator over `(key, value)` pairs.
pub type ArchiveIter = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + Send>;

/// Storage contract for the archive. Any embedded ordered store works;
/// implementations must be safe for concurrent readers and writers.
pub trait ArchiveStore: Send + Sync {
    /// Insert or overwrite. Envelopes are content-addressed, so an
    /// overwrite rewrites identical bytes.
    fn put(&self, key: &ArchiveKey, value: &[u8]) -> Result<()>;

    /// Point lookup.
    fn get(&self, key: &ArchiveKey) -> Result<Option<Vec<u8>>>;

    /// Inclusive range scan in ascending key order. The iterator must not
    /// hold a write lock.
    fn range(&self, lo: &ArchiveKey, hi: &ArchiveKey) -> ArchiveIter;

    /// Flush pending writes to disk.
    fn flush(&self) -> Result<()>;
}

/// Sled-backed archive.
pub struct SledArchive {
    db: sled::Db,
}

impl SledArchive {
    /// Open (or create) the archive at `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        let db = sled::open(dir)?;
        Ok(Self { db })
    }
}

impl ArchiveStore for SledArchive {
    fn put(&self, key: &ArchiveKey, value: &[u8]) -> Result<()> {
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    fn get(&self, key: &ArchiveKey) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_bytes())?.map(|v| v.to_vec()))
    }

    fn range(&self, lo: &ArchiveKey, hi: &ArchiveKey) -> ArchiveIter {
        let iter = self
            .db
            .range(lo.as_bytes().to_vec()..=hi.as_bytes().to_vec())
            .map(|entry| {
                let (k, v) = entry?;
                Ok((k.to_vec(), v.to_vec()))
            });
        Box::new(iter)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}
