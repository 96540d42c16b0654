use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
};

use log::debug;
use memmap2::MmapMut;

/// Size in bytes of one `(offset, position, length)` row on disk.
const ENTRY_SIZE: usize = 4 + 8 + 4;

const OFFSET_INDEX_FILE_EXT: &str = ".ofs.idx";

pub fn offset_index_file_path(root: &Path, segment_id: u64) -> PathBuf {
    root.join(format!("{segment_id:0>20}{OFFSET_INDEX_FILE_EXT}"))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Row {
    offset: u32,
    position: u64,
    length: u32,
}

impl Row {
    fn encode(self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.offset.to_be_bytes());
        buf[4..12].copy_from_slice(&self.position.to_be_bytes());
        buf[12..16].copy_from_slice(&self.length.to_be_bytes());
    }

    fn decode(buf: &[u8]) -> Self {
        Row {
            offset: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            position: u64::from_be_bytes(buf[4..12].try_into().unwrap()),
            length: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
        }
    }
}

enum Backing {
    /// Pure in-memory index (used by the memory-backed [`crate::repo::Repo`]
    /// and by unit tests); nothing to flush.
    Memory,
    /// Memory-mapped sidecar file; `rows` mirrors the mapped bytes so lookups
    /// stay allocation-free, while `flush()` guarantees durability (spec §6).
    Mapped { mmap: MmapMut, capacity: usize },
}

/// Dense, offset-sorted map from a segment-local offset to the `(position,
/// length)` of the serialized record within the segment file (spec §4.1).
///
/// Rows are appended in strictly increasing offset order. `truncate` drops
/// the tail; after compaction the set of present offsets may be a sparse
/// subset of `[0, last_offset]`, but this crate does not itself compact, so
/// in practice it stays dense.
pub struct OffsetIndex {
    rows: Vec<Row>,
    backing: Backing,
}

impl OffsetIndex {
    pub fn in_memory() -> Self {
        Self {
            rows: Vec::new(),
            backing: Backing::Memory,
        }
    }

    /// Creates a fresh mmap-backed index file able to hold `capacity` rows.
    pub fn create(path: &Path, segment_id: u64, capacity: usize) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(offset_index_file_path(path, segment_id))?;
        file.set_len((capacity * ENTRY_SIZE) as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            rows: Vec::new(),
            backing: Backing::Mapped { mmap, capacity },
        })
    }

    /// Opens an existing index file and replays its rows into memory.
    pub fn open(path: &Path, segment_id: u64, capacity: usize) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(offset_index_file_path(path, segment_id))?;
        file.set_len((capacity * ENTRY_SIZE) as u64)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut rows = Vec::new();
        for slot in 0..capacity {
            let start = slot * ENTRY_SIZE;
            let row = Row::decode(&mmap[start..start + ENTRY_SIZE]);
            if row.offset == 0 && row.position == 0 && row.length == 0 && slot != 0 {
                break;
            }
            // A zero-offset row at slot 0 is ambiguous with "offset 0 indexed";
            // disambiguate by requiring position/length to be non-zero too,
            // since a real record is never zero bytes long.
            if slot == 0 && row.length == 0 {
                break;
            }
            rows.push(row);
        }
        debug!("opened offset index for segment {segment_id}: {} rows", rows.len());

        Ok(Self {
            rows,
            backing: Backing::Mapped { mmap, capacity },
        })
    }

    pub fn delete(path: &Path, segment_id: u64) -> io::Result<()> {
        std::fs::remove_file(offset_index_file_path(path, segment_id))
    }

    fn find(&self, offset: u32) -> std::result::Result<usize, usize> {
        self.rows.binary_search_by_key(&offset, |r| r.offset)
    }

    /// Byte position of the record at `offset`, or `None` if absent.
    pub fn position(&self, offset: u32) -> Option<u64> {
        self.find(offset).ok().map(|i| self.rows[i].position)
    }

    /// Byte length of the record at `offset`. Only meaningful when
    /// [`Self::position`] returns `Some` for the same offset.
    pub fn length(&self, offset: u32) -> Option<u32> {
        self.find(offset).ok().map(|i| self.rows[i].length)
    }

    pub fn contains(&self, offset: u32) -> bool {
        self.find(offset).is_ok()
    }

    pub fn last_offset(&self) -> Option<u32> {
        self.rows.last().map(|r| r.offset)
    }

    pub fn size(&self) -> usize {
        self.rows.len()
    }

    /// Appends `(offset, position, length)`. `offset` must be strictly
    /// greater than the current [`Self::last_offset`].
    pub fn index(&mut self, offset: u32, position: u64, length: u32) -> io::Result<()> {
        if let Some(last) = self.last_offset() {
            if offset <= last {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "offset index append must be strictly increasing",
                ));
            }
        }
        let row = Row { offset, position, length };
        if let Backing::Mapped { mmap, capacity } = &mut self.backing {
            let slot = self.rows.len();
            if slot >= *capacity {
                return Err(io::Error::new(io::ErrorKind::Other, "offset index is full"));
            }
            let start = slot * ENTRY_SIZE;
            row.encode(&mut mmap[start..start + ENTRY_SIZE]);
        }
        self.rows.push(row);
        Ok(())
    }

    /// Drops all rows with `offset > offset`; idempotent.
    pub fn truncate(&mut self, offset: u32) -> io::Result<()> {
        let cut = self.rows.partition_point(|r| r.offset <= offset);
        self.rows.truncate(cut);
        if let Backing::Mapped { mmap, .. } = &mut self.backing {
            let start = cut * ENTRY_SIZE;
            mmap[start..].fill(0);
        }
        self.flush()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        if let Backing::Mapped { mmap, .. } = &mut self.backing {
            mmap.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn in_memory_append_and_lookup() {
        let mut idx = OffsetIndex::in_memory();
        idx.index(0, 10, 20).unwrap();
        idx.index(1, 30, 15).unwrap();
        idx.index(2, 45, 8).unwrap();

        assert_eq!(idx.position(1), Some(30));
        assert_eq!(idx.length(1), Some(15));
        assert_eq!(idx.position(5), None);
        assert!(idx.contains(2));
        assert!(!idx.contains(3));
        assert_eq!(idx.last_offset(), Some(2));
        assert_eq!(idx.size(), 3);
    }

    #[test]
    fn append_must_be_strictly_increasing() {
        let mut idx = OffsetIndex::in_memory();
        idx.index(5, 0, 1).unwrap();
        assert!(idx.index(5, 1, 1).is_err());
        assert!(idx.index(4, 1, 1).is_err());
    }

    #[test]
    fn truncate_drops_tail_and_is_idempotent() {
        let mut idx = OffsetIndex::in_memory();
        for i in 0..5u32 {
            idx.index(i, (i as u64) * 10, 10).unwrap();
        }
        idx.truncate(2).unwrap();
        assert_eq!(idx.last_offset(), Some(2));
        assert_eq!(idx.size(), 3);
        idx.truncate(2).unwrap();
        assert_eq!(idx.size(), 3);
    }

    #[test]
    fn mapped_index_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut idx = OffsetIndex::create(dir.path(), 0, 10).unwrap();
            for i in 0..4u32 {
                idx.index(i, (i as u64) * 20, 20).unwrap();
            }
            idx.flush().unwrap();
        }
        let reopened = OffsetIndex::open(dir.path(), 0, 10).unwrap();
        assert_eq!(reopened.size(), 4);
        assert_eq!(reopened.position(3), Some(60));
    }

    proptest! {
        /// For any strictly-increasing run of appended offsets and any
        /// truncation point among them, the index retains exactly the
        /// offsets at or below the cut and nothing above it.
        #[test]
        fn append_then_truncate_retains_prefix(
            gaps in prop::collection::vec(1u32..6, 1..40),
            cut_frac in 0.0f64..1.0,
        ) {
            let mut idx = OffsetIndex::in_memory();
            let mut offsets = Vec::new();
            let mut offset = 0u32;
            for gap in &gaps {
                offset += gap;
                offsets.push(offset);
                idx.index(offset, offset as u64 * 7, 7).unwrap();
            }

            let cut_slot = ((offsets.len() as f64 - 1.0) * cut_frac).round() as usize;
            let cut_offset = offsets[cut_slot];
            idx.truncate(cut_offset).unwrap();

            let expected: Vec<u32> = offsets.iter().copied().filter(|&o| o <= cut_offset).collect();
            prop_assert_eq!(idx.size(), expected.len());
            prop_assert_eq!(idx.last_offset(), expected.last().copied());
            for &o in &offsets {
                if o <= cut_offset {
                    prop_assert!(idx.contains(o));
                    prop_assert_eq!(idx.position(o), Some(o as u64 * 7));
                } else {
                    prop_assert!(!idx.contains(o));
                }
            }

            // Truncating again at the same point is a no-op.
            idx.truncate(cut_offset).unwrap();
            prop_assert_eq!(idx.size(), expected.len());
        }
    }
}
