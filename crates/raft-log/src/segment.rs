use std::io::{self, Read, Seek, SeekFrom, Write};

use log::{debug, warn};

use crate::{
    descriptor::SegmentDescriptor,
    entry::{Entry, EntryType},
    error::{Error, Result},
    offset_index::OffsetIndex,
};

/// `[type:u8][mode:u8][term:u64 BE]`, followed by the payload (spec §4.2).
///
/// `EntryType` only occupies its low 2 bits on the wire; the high bit of the
/// type byte is stolen as a "mode present" flag so `mode = Some(0)` round-trips
/// distinctly from `mode = None` without growing the header.
const RECORD_HEADER_LEN: u64 = 1 + 1 + 8;
const MODE_PRESENT_FLAG: u8 = 0x80;

/// One append-only segment file, covering a contiguous range of the global
/// log index space (spec §3 `Segment`).
///
/// Owns a writable file handle (the append cursor), a [`SegmentDescriptor`],
/// and the [`OffsetIndex`] mapping local offsets to byte ranges within the
/// file. A sealed segment (`descriptor.locked`) rejects further writes.
pub struct Segment<F> {
    file: F,
    descriptor: SegmentDescriptor,
    offset_index: OffsetIndex,
    /// Logical entries reserved at the tail with no stored body (spec §3 `skip`).
    skip: u64,
    /// Current end-of-file byte position; the next record is written here.
    write_pos: u64,
    closed: bool,
}

impl<F: Read + Write + Seek> Segment<F> {
    /// Creates a brand-new, writable segment starting at `descriptor.index`.
    pub fn create(mut file: F, descriptor: SegmentDescriptor, offset_index: OffsetIndex) -> Result<Self> {
        file.seek(SeekFrom::Start(0))?;
        Ok(Self {
            file,
            descriptor,
            offset_index,
            skip: 0,
            write_pos: 0,
            closed: false,
        })
    }

    /// Resumes an existing segment, given its already-loaded descriptor and
    /// offset index. `write_pos` is derived from the index's last recorded
    /// byte range, matching `commitlog::repo::resume_segment_writer`'s role.
    pub fn resume(mut file: F, descriptor: SegmentDescriptor, offset_index: OffsetIndex, skip: u64) -> Result<Self> {
        let write_pos = file.seek(SeekFrom::End(0))?;
        Ok(Self {
            file,
            descriptor,
            offset_index,
            skip,
            write_pos,
            closed: false,
        })
    }

    pub fn descriptor(&self) -> &SegmentDescriptor {
        &self.descriptor
    }

    fn require_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::NotOpen);
        }
        Ok(())
    }

    /// Index of the last entry with a stored body, if any.
    fn last_index(&self) -> Option<u64> {
        self.offset_index
            .last_offset()
            .map(|off| self.descriptor.index + off as u64)
    }

    /// `firstIndex = descriptor.index` once the segment holds any logical
    /// entry (data or skipped), else `0` (spec §3 invariant).
    pub fn first_index(&self) -> u64 {
        if self.length() == 0 {
            0
        } else {
            self.descriptor.index
        }
    }

    /// `nextIndex = lastIndex + skip + 1` when non-empty, else
    /// `descriptor.index + skip` (spec §3 invariant).
    pub fn next_index(&self) -> u64 {
        match self.last_index() {
            Some(last) => last + self.skip + 1,
            None => self.descriptor.index + self.skip,
        }
    }

    /// `true` if `index` falls within this segment's reserved range,
    /// including any trailing skip region.
    pub fn contains_index(&self, index: u64) -> bool {
        if self.length() == 0 {
            return false;
        }
        index >= self.descriptor.index && index < self.next_index()
    }

    /// `containsIndex(index) && offsetIndex.contains(offset(index))` (spec §4.2).
    pub fn contains_entry(&self, index: u64) -> bool {
        self.contains_index(index) && self.offset_index.contains(self.local_offset(index))
    }

    fn local_offset(&self, index: u64) -> u32 {
        (index - self.descriptor.index) as u32
    }

    /// Number of bytes written so far, including the header region already
    /// on disk. Used by [`crate::Log`] to decide when to roll segments.
    pub fn size(&self) -> u64 {
        self.write_pos
    }

    /// Logical entry count, including reserved-but-bodiless (skipped) tail entries.
    pub fn length(&self) -> u64 {
        self.offset_index.size() as u64 + self.skip
    }

    pub fn is_full(&self) -> bool {
        self.size() >= self.descriptor.max_segment_size
    }

    pub fn is_sealed(&self) -> bool {
        self.descriptor.locked
    }

    /// Appends `entry`, returning its index on success.
    pub fn append(&mut self, entry: &Entry) -> Result<u64> {
        self.require_open()?;
        if self.is_sealed() {
            return Err(Error::Sealed);
        }
        let next = self.next_index();
        if entry.index < next {
            return Err(Error::CommittedEntryModified {
                index: entry.index,
                next_index: next,
            });
        }
        if entry.index > next {
            return Err(Error::NonMonotonicIndex {
                index: entry.index,
                next_index: next,
            });
        }

        let start = self.write_pos;
        self.file.seek(SeekFrom::Start(start))?;
        let type_byte = entry.entry_type.as_byte() | if entry.mode.is_some() { MODE_PRESENT_FLAG } else { 0 };
        self.file.write_all(&[type_byte, entry.mode.unwrap_or(0)])?;
        self.file.write_all(&entry.term.to_be_bytes())?;
        self.file.write_all(&entry.payload)?;

        let record_len = RECORD_HEADER_LEN + entry.payload.len() as u64;
        self.write_pos = start + record_len;

        let offset = self.local_offset(entry.index);
        self.offset_index.index(offset, start, record_len as u32)?;
        self.skip = 0;

        debug!(
            "segment {}: appended index={} at offset={} pos={} len={}",
            self.descriptor.id, entry.index, offset, start, record_len
        );

        Ok(entry.index)
    }

    /// Reserves `n` indices at the tail with no stored body.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.require_open()?;
        if self.is_sealed() {
            return Err(Error::Sealed);
        }
        self.skip += n;
        Ok(())
    }

    /// Reads the entry at `index`, or `Ok(None)` if its body was skipped/compacted away.
    pub fn get(&mut self, index: u64) -> Result<Option<Entry>> {
        self.require_open()?;
        let last = self.last_index();
        let in_data_range = matches!(last, Some(last) if index >= self.descriptor.index && index <= last);
        if !in_data_range {
            return Err(Error::OutOfRange {
                index,
                first_index: self.descriptor.index,
                last_index: last.unwrap_or(self.descriptor.index.saturating_sub(1)),
            });
        }

        let offset = self.local_offset(index);
        let Some(position) = self.offset_index.position(offset) else {
            return Ok(None);
        };
        let length = self
            .offset_index
            .length(offset)
            .expect("length present whenever position is");

        self.file.seek(SeekFrom::Start(position))?;
        let mut header = [0u8; RECORD_HEADER_LEN as usize];
        self.file.read_exact(&mut header)?;
        let mode_present = header[0] & MODE_PRESENT_FLAG != 0;
        let Some(entry_type) = EntryType::from_byte(header[0] & !MODE_PRESENT_FLAG) else {
            return Err(Error::Corruption {
                offset: position,
                reason: "unknown record type byte",
            });
        };
        let mode = header[1];
        let term = u64::from_be_bytes(header[2..10].try_into().unwrap());

        let payload_len = (length as u64)
            .checked_sub(RECORD_HEADER_LEN)
            .ok_or(Error::Corruption {
                offset: position,
                reason: "record length shorter than header",
            })?;
        let mut payload = vec![0u8; payload_len as usize];
        self.file.read_exact(&mut payload).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                Error::Corruption {
                    offset: position,
                    reason: "record length exceeds bytes available in segment",
                }
            } else {
                Error::Io(e)
            }
        })?;

        Ok(Some(Entry {
            index,
            term,
            entry_type,
            mode: if mode_present { Some(mode) } else { None },
            payload,
        }))
    }

    /// Drops all entries with index > `index` (spec §4.2).
    pub fn truncate(&mut self, index: u64) -> Result<()> {
        self.require_open()?;
        match self.last_index() {
            None => {
                // Nothing with a body; only the skip region (if any) can shrink.
                if self.length() == 0 {
                    return Ok(());
                }
                let base = self.descriptor.index;
                if index + 1 == base {
                    // Nothing of this segment survives the truncation point.
                    self.skip = 0;
                } else if index < base {
                    return Err(Error::OutOfRange {
                        index,
                        first_index: base,
                        last_index: base + self.skip - 1,
                    });
                } else {
                    // The skip region starts at `base` itself, so keeping
                    // entries `base..=index` means `index - base + 1` of them.
                    self.skip = (index - base + 1).min(self.skip);
                }
            }
            Some(last) => {
                if index >= last {
                    let extra = index - last;
                    self.skip = extra.min(self.skip);
                } else if index + 1 == self.descriptor.index {
                    // Nothing of this segment survives the truncation point.
                    self.offset_index = OffsetIndex::in_memory();
                    self.skip = 0;
                } else if index < self.descriptor.index {
                    return Err(Error::OutOfRange {
                        index,
                        first_index: self.descriptor.index,
                        last_index: last,
                    });
                } else {
                    self.offset_index.truncate(self.local_offset(index))?;
                    self.skip = 0;
                }
            }
        }
        self.offset_index.flush()?;
        Ok(())
    }

    pub fn seal(&mut self) {
        self.descriptor.locked = true;
    }

    /// Clears the sealed flag; used by [`crate::Log::truncate`] when a
    /// truncation point lands inside a previously-sealed segment, which then
    /// becomes the writable tail again.
    pub(crate) fn unseal(&mut self) {
        self.descriptor.locked = false;
    }

    pub fn flush(&mut self) -> Result<()> {
        self.require_open()?;
        self.file.flush()?;
        self.offset_index.flush()?;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;
        Ok(())
    }
}
