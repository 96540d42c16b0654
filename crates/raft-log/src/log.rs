use std::path::PathBuf;

use log::{debug, info};
use scopeguard::{guard, ScopeGuard};

use crate::{
    descriptor::SegmentDescriptor,
    entry::Entry,
    error::{Error, Result},
    offset_index::OffsetIndex,
    repo::Repo,
    segment::Segment,
};

/// Minimum on-disk record size (header only, empty payload); used to size
/// the offset-index sidecar file for a fresh segment.
const MIN_RECORD_LEN: u64 = 10;

#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Maximum size in bytes a segment may grow to before the log rolls to
    /// a new one (spec §4.2 "full policy").
    pub max_segment_size: u64,
    /// Global index the log starts at if created fresh.
    pub starting_index: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_segment_size: 64 * 1024 * 1024,
            starting_index: 1,
        }
    }
}

/// An ordered collection of [`Segment`]s covering disjoint, contiguous index
/// ranges (spec §3 `Log`). Exactly one tail segment accepts writes; older
/// segments are sealed.
pub struct Log<R: Repo> {
    repo: R,
    options: Options,
    segments: Vec<Segment<R::Segment>>,
    next_segment_id: u64,
    closed: bool,
}

impl<R: Repo> Log<R> {
    /// Creates a brand-new log with a single writable segment.
    pub fn create(repo: R, options: Options) -> Result<Self> {
        let mut log = Self {
            repo,
            options,
            segments: Vec::new(),
            next_segment_id: 0,
            closed: false,
        };
        let starting_index = options.starting_index;
        let seg = log.create_segment(starting_index)?;
        log.segments.push(seg);
        Ok(log)
    }

    /// Reopens a log from existing segment files, resuming the highest-id
    /// segment as the writable tail (analogous to
    /// `commitlog::repo::resume_segment_writer`).
    pub fn open(repo: R, options: Options) -> Result<Self> {
        let mut ids = repo.existing_segment_ids()?;
        ids.sort_unstable();
        if ids.is_empty() {
            return Self::create(repo, options);
        }

        let mut segments = Vec::with_capacity(ids.len());
        let mut next_segment_id = 0;
        for (i, &id) in ids.iter().enumerate() {
            next_segment_id = next_segment_id.max(id + 1);
            let descriptor = read_descriptor(&repo, id)?;
            let cap = capacity_for(descriptor.max_segment_size);
            let offset_index = match repo.index_dir() {
                Some(dir) => OffsetIndex::open(dir, id, cap)?,
                None => OffsetIndex::in_memory(),
            };
            let file = repo.open_segment(id)?;
            let mut segment = Segment::resume(file, descriptor, offset_index, 0)?;
            if i + 1 < ids.len() {
                // Not the tail: must already be sealed, but enforce it.
                segment.seal();
            }
            segments.push(segment);
        }

        info!("opened log with {} segment(s)", segments.len());
        Ok(Self {
            repo,
            options,
            segments,
            next_segment_id,
            closed: false,
        })
    }

    /// Creates the on-disk state for a new segment. If any step past the
    /// descriptor/offset-index files fails, the partial state is removed
    /// rather than left behind for the next `open()` to trip over.
    fn create_segment(&mut self, index: u64) -> Result<Segment<R::Segment>> {
        let id = self.next_segment_id;
        self.next_segment_id += 1;
        let descriptor = SegmentDescriptor::new(id, index, self.options.max_segment_size);
        let cap = capacity_for(descriptor.max_segment_size);
        let dir: Option<PathBuf> = self.repo.index_dir().map(|p| p.to_path_buf());

        let cleanup = guard(id, |id| {
            if let Some(dir) = &dir {
                let _ = OffsetIndex::delete(dir, id);
                let _ = std::fs::remove_file(crate::descriptor::descriptor_file_path(dir, id));
            }
        });

        let offset_index = match &dir {
            Some(dir) => {
                write_descriptor_to(dir, &descriptor)?;
                OffsetIndex::create(dir, id, cap)?
            }
            None => OffsetIndex::in_memory(),
        };
        let file = self.repo.create_segment(id)?;
        debug!("log: created segment id={id} starting at index={index}");
        let segment = Segment::create(file, descriptor, offset_index)?;

        ScopeGuard::into_inner(cleanup);
        Ok(segment)
    }

    fn require_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::NotOpen);
        }
        Ok(())
    }

    fn active(&self) -> &Segment<R::Segment> {
        self.segments.last().expect("log always has a tail segment")
    }

    fn active_mut(&mut self) -> &mut Segment<R::Segment> {
        self.segments.last_mut().expect("log always has a tail segment")
    }

    pub fn last_index(&self) -> u64 {
        self.active().next_index().saturating_sub(1)
    }

    pub fn first_index(&self) -> u64 {
        self.segments
            .iter()
            .find(|s| s.length() > 0)
            .map(|s| s.first_index())
            .unwrap_or(0)
    }

    /// Binary search over segment `descriptor.index` values, O(log S) with
    /// S segments (spec §4.3).
    fn find_segment_idx(&self, index: u64) -> Option<usize> {
        let pos = self.segments.partition_point(|s| s.descriptor().index <= index);
        if pos == 0 {
            return None;
        }
        let candidate = pos - 1;
        self.segments[candidate].contains_index(index).then_some(candidate)
    }

    pub fn contains_entry(&self, index: u64) -> bool {
        self.find_segment_idx(index)
            .map(|i| self.segments[i].contains_entry(index))
            .unwrap_or(false)
    }

    /// Appends `entry`, rolling to a new segment first if the active one is full.
    pub fn append(&mut self, entry: &Entry) -> Result<u64> {
        self.require_open()?;
        if self.active().is_full() {
            let next_index = self.active().next_index();
            self.active_mut().seal();
            let new_segment = self.create_segment(next_index)?;
            self.segments.push(new_segment);
        }
        self.active_mut().append(entry)
    }

    pub fn get(&mut self, index: u64) -> Result<Option<Entry>> {
        self.require_open()?;
        let Some(idx) = self.find_segment_idx(index) else {
            return Err(Error::OutOfRange {
                index,
                first_index: self.first_index(),
                last_index: self.last_index(),
            });
        };
        self.segments[idx].get(index)
    }

    /// Truncates the active segment, or seals-and-drops segments strictly
    /// after the one containing `index`, then truncates within it (spec §4.3).
    pub fn truncate(&mut self, index: u64) -> Result<()> {
        self.require_open()?;
        if index >= self.last_index() {
            return Ok(());
        }
        let Some(idx) = self.find_segment_idx(index) else {
            return Err(Error::OutOfRange {
                index,
                first_index: self.first_index(),
                last_index: self.last_index(),
            });
        };

        for seg in self.segments.drain(idx + 1..).collect::<Vec<_>>() {
            let id = seg.descriptor().id;
            drop(seg);
            self.repo.remove_segment(id).ok();
            if let Some(dir) = self.repo.index_dir() {
                OffsetIndex::delete(dir, id).ok();
            }
        }

        self.segments[idx].truncate(index)?;
        self.segments[idx].unseal();
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.require_open()?;
        self.active_mut().flush()
    }

    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        for seg in &mut self.segments {
            seg.close()?;
        }
        self.closed = true;
        Ok(())
    }
}

fn capacity_for(max_segment_size: u64) -> usize {
    ((max_segment_size / MIN_RECORD_LEN).max(1)) as usize
}

fn read_descriptor<R: Repo>(repo: &R, id: u64) -> Result<SegmentDescriptor> {
    let dir = repo
        .index_dir()
        .ok_or_else(|| Error::Io(std::io::Error::new(std::io::ErrorKind::Unsupported, "repo has no descriptor storage")))?;
    let file = std::fs::File::open(crate::descriptor::descriptor_file_path(dir, id))?;
    Ok(SegmentDescriptor::read(file)?)
}

fn write_descriptor_to(dir: &std::path::Path, descriptor: &SegmentDescriptor) -> Result<()> {
    let file = std::fs::File::create(crate::descriptor::descriptor_file_path(dir, descriptor.id))?;
    descriptor.write(file)?;
    Ok(())
}
