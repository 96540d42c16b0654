use std::{
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

/// Identifies one on-disk [`crate::Segment`] (spec §3 `SegmentDescriptor`).
///
/// `index <= every entry index in the segment` is an invariant enforced by
/// [`crate::Log`]: a segment's descriptor is only minted once the index of
/// its first entry is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentDescriptor {
    /// Monotonically increasing segment id, assigned by the owning [`crate::Log`].
    pub id: u64,
    /// Bumped whenever the segment is rewritten in place (not used by this
    /// crate's truncate/skip-only compaction, but carried for forward compat).
    pub version: u64,
    /// Index of the first entry this segment covers, or the index the
    /// segment will start at if currently empty.
    pub index: u64,
    /// Maximum size in bytes this segment is allowed to grow to.
    pub max_segment_size: u64,
    /// `true` once the segment has been sealed and rejects further writes.
    pub locked: bool,
}

const MAGIC: [u8; 4] = *b"rlsd";
const DESCRIPTOR_FILE_EXT: &str = ".desc";

pub fn descriptor_file_path(root: &Path, segment_id: u64) -> PathBuf {
    root.join(format!("{segment_id:0>20}{DESCRIPTOR_FILE_EXT}"))
}

impl SegmentDescriptor {
    pub fn new(id: u64, index: u64, max_segment_size: u64) -> Self {
        Self {
            id,
            version: 0,
            index,
            max_segment_size,
            locked: false,
        }
    }

    /// Serializes the descriptor sidecar file (spec §6: "Backward/forward
    /// compatibility is maintained by appending new fields only"). A
    /// trailing CRC32C over the preceding bytes lets `read` detect a torn
    /// write without needing the segment file itself.
    pub fn write<W: Write>(&self, mut out: W) -> io::Result<()> {
        let mut body = Vec::with_capacity(37);
        body.extend_from_slice(&MAGIC);
        body.extend_from_slice(&self.id.to_be_bytes());
        body.extend_from_slice(&self.version.to_be_bytes());
        body.extend_from_slice(&self.index.to_be_bytes());
        body.extend_from_slice(&self.max_segment_size.to_be_bytes());
        body.push(self.locked as u8);
        let checksum = crc32c::crc32c(&body);

        out.write_all(&body)?;
        out.write_all(&checksum.to_be_bytes())?;
        Ok(())
    }

    pub fn read<R: Read>(mut input: R) -> io::Result<Self> {
        let mut body = [0u8; 37];
        input.read_exact(&mut body)?;
        let mut checksum_bytes = [0u8; 4];
        input.read_exact(&mut checksum_bytes)?;

        if body[0..4] != MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "segment descriptor does not start with magic",
            ));
        }
        if crc32c::crc32c(&body) != u32::from_be_bytes(checksum_bytes) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "segment descriptor failed checksum verification",
            ));
        }

        let id = u64::from_be_bytes(body[4..12].try_into().unwrap());
        let version = u64::from_be_bytes(body[12..20].try_into().unwrap());
        let index = u64::from_be_bytes(body[20..28].try_into().unwrap());
        let max_segment_size = u64::from_be_bytes(body[28..36].try_into().unwrap());
        let locked = body[36];
        Ok(Self {
            id,
            version,
            index,
            max_segment_size,
            locked: locked != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let d = SegmentDescriptor {
            id: 7,
            version: 2,
            index: 100,
            max_segment_size: 4096,
            locked: true,
        };
        let mut buf = Vec::new();
        d.write(&mut buf).unwrap();
        let d2 = SegmentDescriptor::read(&buf[..]).unwrap();
        assert_eq!(d, d2);
    }
}
