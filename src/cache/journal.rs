//! Disk Cache Journal
//!
//! A single memory-mapped file recording which fingerprints have a cached
//! blob, their size and their access order.
//!
//! # Layout
//!
//! ```text
//! 0       4         8                                     len (multiple of 4096)
//! ┌───────┬─────────┬────────────┬────────────┬─────┬──────────────────────┐
//! │ magic │ version │ record 0   │ record 1   │ ... │ zero padding         │
//! │ disk  │ u32 BE  │ 24 bytes   │ 24 bytes   │     │                      │
//! └───────┴─────────┴────────────┴────────────┴─────┴──────────────────────┘
//!
//! record: h1 u64 BE | h2 u64 BE | access_order u32 BE | size_and_flag u32 BE
//! ```
//!
//! A record with `access_order == 0` is a tombstone. The first record with an
//! all-zero fingerprint ends the live region during a linear scan.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use tracing::warn;

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// File name of the journal inside a cache directory
pub const JOURNAL_NAME: &str = "journal";

/// Leading magic bytes
pub const MAGIC: [u8; 4] = *b"disk";

/// On-disk format version
pub const VERSION: u32 = 1;

/// Offset of the first record
pub const DATA_START: usize = 8;

/// Fixed record length
pub const RECORD_SIZE: usize = 24;

/// Journal length is always a multiple of this
pub const PAGE_SIZE: usize = 4096;

/// Flag bit packed with the size
pub const FLAG_MASK: u32 = 0x8000_0000;

/// Largest representable file size
pub const SIZE_MASK: u32 = 0x7fff_ffff;

// =============================================================================
// Record
// =============================================================================

/// One journal slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub fingerprint: Fingerprint,
    pub access_order: u32,
    pub size_and_flag: u32,
}

impl Record {
    pub fn new(fingerprint: Fingerprint, access_order: u32, size: u32, flag: bool) -> Self {
        Self {
            fingerprint,
            access_order,
            size_and_flag: pack(size, flag),
        }
    }

    #[inline]
    pub fn size(&self) -> u32 {
        self.size_and_flag & SIZE_MASK
    }

    #[inline]
    pub fn flag(&self) -> bool {
        self.size_and_flag & FLAG_MASK != 0
    }

    #[inline]
    pub fn is_tombstone(&self) -> bool {
        self.access_order == 0
    }

    fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..16].copy_from_slice(&self.fingerprint.to_be_bytes());
        out[16..20].copy_from_slice(&self.access_order.to_be_bytes());
        out[20..24].copy_from_slice(&self.size_and_flag.to_be_bytes());
        out
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut fp = [0u8; 16];
        fp.copy_from_slice(&bytes[..16]);
        Self {
            fingerprint: Fingerprint::from_be_bytes(fp),
            access_order: read_u32(&bytes[16..20]),
            size_and_flag: read_u32(&bytes[20..24]),
        }
    }
}

/// Pack a size and flag into one word; the size is masked to 31 bits
#[inline]
pub fn pack(size: u32, flag: bool) -> u32 {
    (size & SIZE_MASK) | if flag { FLAG_MASK } else { 0 }
}

#[inline]
fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

#[inline]
fn slot_offset(slot: usize) -> usize {
    DATA_START + slot * RECORD_SIZE
}

// =============================================================================
// Journal
// =============================================================================

/// Memory-mapped journal file
pub struct Journal {
    path: PathBuf,
    file: File,
    map: MmapMut,
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("len", &self.map.len())
            .finish()
    }
}

impl Journal {
    /// Map the journal at `path`, creating or re-initialising it when it is
    /// missing, mis-sized or carries the wrong magic/version.
    ///
    /// Returns the journal and whether it was (re)initialised.
    pub fn open(path: &Path) -> Result<(Self, bool)> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        let mut fresh = false;
        if len == 0 || len % PAGE_SIZE as u64 != 0 {
            file.set_len(0)?;
            file.set_len(PAGE_SIZE as u64)?;
            fresh = true;
        }

        // Safety: the journal is only mapped by the cache instance that owns
        // its directory, and every access goes through that instance's lock.
        let map = unsafe { MmapOptions::new().map_mut(&file)? };

        let mut journal = Self {
            path: path.to_path_buf(),
            file,
            map,
        };
        if !fresh {
            if let Err(e) = journal.check_header() {
                warn!(path = %path.display(), error = %e, "Reinitializing journal");
                fresh = true;
            }
        }
        if fresh {
            journal.reset()?;
        }
        Ok((journal, fresh))
    }

    fn check_header(&self) -> Result<()> {
        if self.map.len() < DATA_START {
            return Err(Error::JournalCorrupted("shorter than header".into()));
        }
        if self.map[..4] != MAGIC {
            return Err(Error::JournalCorrupted("bad magic".into()));
        }
        let version = read_u32(&self.map[4..8]);
        if version != VERSION {
            return Err(Error::JournalCorrupted(format!("unsupported version {}", version)));
        }
        Ok(())
    }

    /// Zero the whole map and write a fresh header
    pub fn reset(&mut self) -> Result<()> {
        self.map.fill(0);
        self.map[..4].copy_from_slice(&MAGIC);
        self.map[4..8].copy_from_slice(&VERSION.to_be_bytes());
        self.map.flush()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mapped length in bytes
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of record slots that fit in the current map
    pub fn slot_capacity(&self) -> usize {
        self.map.len().saturating_sub(DATA_START) / RECORD_SIZE
    }

    /// Linear scan of the live region.
    ///
    /// Stops at the first all-zero fingerprint or the end of the map. The
    /// returned vector's length is the next free slot.
    pub fn scan(&self) -> Vec<Record> {
        let mut records = Vec::new();
        for slot in 0..self.slot_capacity() {
            let record = self.read(slot);
            if record.fingerprint.is_empty() {
                break;
            }
            records.push(record);
        }
        records
    }

    pub fn read(&self, slot: usize) -> Record {
        let offset = slot_offset(slot);
        Record::decode(&self.map[offset..offset + RECORD_SIZE])
    }

    /// Write a record, growing the map if the slot lies past its end
    pub fn write(&mut self, slot: usize, record: &Record) -> Result<()> {
        self.ensure_slot(slot)?;
        let offset = slot_offset(slot);
        self.map[offset..offset + RECORD_SIZE].copy_from_slice(&record.encode());
        Ok(())
    }

    /// Overwrite only the access order of an existing slot
    pub fn write_order(&mut self, slot: usize, access_order: u32) {
        let offset = slot_offset(slot) + 16;
        if offset + 4 <= self.map.len() {
            self.map[offset..offset + 4].copy_from_slice(&access_order.to_be_bytes());
        }
    }

    /// Mark a slot as deleted
    pub fn tombstone(&mut self, slot: usize) {
        self.write_order(slot, 0);
    }

    fn ensure_slot(&mut self, slot: usize) -> Result<()> {
        let needed = slot_offset(slot) + RECORD_SIZE;
        if needed <= self.map.len() {
            return Ok(());
        }
        let mut new_len = self.map.len().max(PAGE_SIZE);
        while new_len < needed {
            new_len = (new_len * 2).max(new_len + PAGE_SIZE);
        }
        self.remap(new_len)
    }

    fn remap(&mut self, new_len: usize) -> Result<()> {
        self.map.flush()?;
        // Extending with set_len zero-fills the new region.
        self.file.set_len(new_len as u64)?;
        // Safety: see `open`.
        self.map = unsafe { MmapOptions::new().map_mut(&self.file)? };
        Ok(())
    }

    /// Replace the live region with `records`, in the given order, starting
    /// at slot 0. Everything after the last record is zeroed.
    pub fn rewrite(&mut self, records: &[Record]) -> Result<()> {
        if let Some(last) = records.len().checked_sub(1) {
            self.ensure_slot(last)?;
        }
        for (slot, record) in records.iter().enumerate() {
            let offset = slot_offset(slot);
            self.map[offset..offset + RECORD_SIZE].copy_from_slice(&record.encode());
        }
        let tail = slot_offset(records.len());
        if tail < self.map.len() {
            self.map[tail..].fill(0);
        }
        self.map.flush()?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
