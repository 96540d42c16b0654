use std::{
    collections::BTreeMap,
    io,
    sync::{Arc, RwLock},
};

use super::Repo;

type SharedBytes = Arc<RwLock<Vec<u8>>>;

/// An in-memory segment, behaving like a file opened for read/write with an
/// independent seek position. Used for tests only (see `commitlog::repo::mem`
/// for the equivalent in the teacher crate).
#[derive(Clone, Debug, Default)]
pub struct Segment {
    pos: u64,
    buf: SharedBytes,
}

impl io::Read for Segment {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = self.buf.read().unwrap();
        let pos = self.pos as usize;
        if pos > inner.len() {
            return Ok(0);
        }
        let n = io::Read::read(&mut &inner[pos..], buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl io::Write for Segment {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut inner = self.buf.write().unwrap();
        let pos = self.pos as usize;
        if pos > inner.len() {
            inner.resize(pos, 0);
        }
        let end = pos + data.len();
        if inner.len() < end {
            inner.resize(end, 0);
        }
        inner[pos..end].copy_from_slice(data);
        self.pos = end as u64;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for Segment {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let len = self.buf.read().unwrap().len() as u64;
        let (base, offset) = match pos {
            io::SeekFrom::Start(n) => {
                self.pos = n;
                return Ok(n);
            }
            io::SeekFrom::End(n) => (len, n),
            io::SeekFrom::Current(n) => (self.pos, n),
        };
        match base.checked_add_signed(offset) {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(io::ErrorKind::InvalidInput, "invalid seek")),
        }
    }
}

#[derive(Clone, Default)]
pub struct Memory {
    segments: Arc<RwLock<BTreeMap<u64, SharedBytes>>>,
}

impl Repo for Memory {
    type Segment = Segment;

    fn create_segment(&self, segment_id: u64) -> io::Result<Segment> {
        let mut segments = self.segments.write().unwrap();
        if segments.contains_key(&segment_id) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "segment exists"));
        }
        let buf: SharedBytes = Arc::default();
        segments.insert(segment_id, buf.clone());
        Ok(Segment { pos: 0, buf })
    }

    fn open_segment(&self, segment_id: u64) -> io::Result<Segment> {
        let segments = self.segments.read().unwrap();
        let buf = segments
            .get(&segment_id)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "segment not found"))?;
        Ok(Segment { pos: 0, buf })
    }

    fn remove_segment(&self, segment_id: u64) -> io::Result<()> {
        self.segments
            .write()
            .unwrap()
            .remove(&segment_id)
            .map(|_| ())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "segment not found"))
    }

    fn existing_segment_ids(&self) -> io::Result<Vec<u64>> {
        Ok(self.segments.read().unwrap().keys().copied().collect())
    }

    fn index_dir(&self) -> Option<&std::path::Path> {
        None
    }
}
