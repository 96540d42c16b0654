use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use super::Repo;

const SEGMENT_FILE_EXT: &str = ".rlog";

fn segment_file_path(root: &Path, segment_id: u64) -> PathBuf {
    root.join(format!("{segment_id:0>20}{SEGMENT_FILE_EXT}"))
}

/// Filesystem-backed [`Repo`]: one `.rlog` file per segment, plus sidecar
/// `.ofs.idx` and descriptor files living in the same directory.
#[derive(Clone, Debug)]
pub struct Fs {
    root: PathBuf,
}

impl Fs {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Repo for Fs {
    type Segment = File;

    fn create_segment(&self, segment_id: u64) -> io::Result<File> {
        File::options()
            .read(true)
            .write(true)
            .create_new(true)
            .open(segment_file_path(&self.root, segment_id))
    }

    fn open_segment(&self, segment_id: u64) -> io::Result<File> {
        File::options()
            .read(true)
            .write(true)
            .open(segment_file_path(&self.root, segment_id))
    }

    fn remove_segment(&self, segment_id: u64) -> io::Result<()> {
        fs::remove_file(segment_file_path(&self.root, segment_id))
    }

    fn existing_segment_ids(&self) -> io::Result<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(SEGMENT_FILE_EXT) {
                if let Ok(id) = stem.parse::<u64>() {
                    ids.push(id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    fn index_dir(&self) -> Option<&Path> {
        Some(&self.root)
    }
}
