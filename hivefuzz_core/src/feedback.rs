use std::fs;
use std::os::fd::{IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fixed size of the shared coverage map. Instrumented targets and workers
/// agree on this value at compile time; the backing file is truncated to
/// exactly this many bytes.
pub const FEEDBACK_MAP_SIZE: usize = 0x0100_0000;

/// Well-known name of the backing file under the work directory.
pub const FEEDBACK_FILE_NAME: &str = "hfuzz-feedback";

#[derive(Error, Debug)]
pub enum FeedbackError {
    /// Creating or mapping the shared region failed. Fatal at startup.
    #[error("Failed to map feedback region at {path:?}: {msg}")]
    MapFailed { path: PathBuf, msg: String },

    #[error("Blacklist parse error at {path:?}:{line}: {msg}")]
    BlacklistParse {
        path: PathBuf,
        line: usize,
        msg: String,
    },

    #[error("Blacklist I/O error for {path:?}: {msg}")]
    BlacklistIo { path: PathBuf, msg: String },
}

/// A file-backed, `MAP_SHARED` memory region in which target instrumentation
/// records coverage.
///
/// Created once by the supervisor before workers spawn; workers reach it
/// through the `Session` and child target processes inherit the descriptor.
/// The mapping lives until the region is dropped during orderly shutdown.
/// The core never interprets the contents.
pub struct FeedbackRegion {
    ptr: *mut u8,
    fd: RawFd,
    backing_path: PathBuf,
}

// SAFETY: the region is plain shared memory; all cross-thread access goes
// through the volatile byte accessors below and carries no Rust aliasing
// assumptions. The fd is only closed once, in Drop.
unsafe impl Send for FeedbackRegion {}
unsafe impl Sync for FeedbackRegion {}

impl FeedbackRegion {
    /// Creates `<work_dir>/hfuzz-feedback`, sizes it to [`FEEDBACK_MAP_SIZE`]
    /// and maps it shared.
    ///
    /// On any failure the partially created backing file is removed, so a
    /// failed startup leaves no stale `hfuzz-feedback` behind.
    pub fn create(work_dir: &Path) -> Result<Self, FeedbackError> {
        let backing_path = work_dir.join(FEEDBACK_FILE_NAME);

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&backing_path)
            .map_err(|e| FeedbackError::MapFailed {
                path: backing_path.clone(),
                msg: e.to_string(),
            })?;
        let fd = file.into_raw_fd();

        // SAFETY: fd is a valid descriptor we own; ftruncate with a fixed
        // positive length has no other preconditions.
        let rc = unsafe { libc::ftruncate(fd, FEEDBACK_MAP_SIZE as libc::off_t) };
        if rc != 0 {
            let msg = std::io::Error::last_os_error().to_string();
            // SAFETY: fd is valid and owned here; closed exactly once on this path.
            unsafe { libc::close(fd) };
            let _ = fs::remove_file(&backing_path);
            return Err(FeedbackError::MapFailed {
                path: backing_path,
                msg,
            });
        }

        // SAFETY: length is non-zero, fd is valid, offset 0. A MAP_FAILED
        // return is checked before the pointer is used.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                FEEDBACK_MAP_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let msg = std::io::Error::last_os_error().to_string();
            // SAFETY: fd is valid and owned here; closed exactly once on this path.
            unsafe { libc::close(fd) };
            let _ = fs::remove_file(&backing_path);
            return Err(FeedbackError::MapFailed {
                path: backing_path,
                msg,
            });
        }

        Ok(Self {
            ptr: ptr.cast::<u8>(),
            fd,
            backing_path,
        })
    }

    pub fn len(&self) -> usize {
        FEEDBACK_MAP_SIZE
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Descriptor of the backing file, for inheritance by target processes.
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    pub fn backing_path(&self) -> &Path {
        &self.backing_path
    }

    /// Bounds-checked volatile read of one map byte.
    pub fn load_byte(&self, offset: usize) -> u8 {
        assert!(offset < FEEDBACK_MAP_SIZE);
        // SAFETY: offset is bounds-checked against the mapped length and the
        // mapping is valid for the lifetime of self.
        unsafe { self.ptr.add(offset).read_volatile() }
    }

    /// Bounds-checked volatile write of one map byte.
    pub fn store_byte(&self, offset: usize, value: u8) {
        assert!(offset < FEEDBACK_MAP_SIZE);
        // SAFETY: offset is bounds-checked against the mapped length and the
        // mapping is valid for the lifetime of self.
        unsafe { self.ptr.add(offset).write_volatile(value) }
    }
}

impl Drop for FeedbackRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/fd come from a successful mmap/open pair and are
        // released exactly once here. The backing file itself persists.
        unsafe {
            libc::munmap(self.ptr.cast(), FEEDBACK_MAP_SIZE);
            libc::close(self.fd);
        }
    }
}

impl std::fmt::Debug for FeedbackRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackRegion")
            .field("backing_path", &self.backing_path)
            .field("len", &FEEDBACK_MAP_SIZE)
            .finish()
    }
}

/// Sorted list of 64-bit stack hashes whose crashes are ignored.
///
/// File format is one hash per line, `0x`-prefixed hex or decimal.
#[derive(Debug, Default, Clone)]
pub struct StackHashBlacklist {
    hashes: Vec<u64>,
}

impl StackHashBlacklist {
    pub fn load(path: &Path) -> Result<Self, FeedbackError> {
        let content = fs::read_to_string(path).map_err(|e| FeedbackError::BlacklistIo {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })?;

        let mut hashes = Vec::new();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parsed = if let Some(hex) = line.strip_prefix("0x").or_else(|| line.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16)
            } else {
                line.parse::<u64>()
            };
            let hash = parsed.map_err(|_| FeedbackError::BlacklistParse {
                path: path.to_path_buf(),
                line: line_no + 1,
                msg: format!("not a 64-bit hash: '{line}'"),
            })?;
            hashes.push(hash);
        }
        hashes.sort_unstable();
        hashes.dedup();
        Ok(Self { hashes })
    }

    pub fn contains(&self, hash: u64) -> bool {
        self.hashes.binary_search(&hash).is_ok()
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn region_creates_backing_file_of_fixed_size() {
        let dir = tempdir().unwrap();
        let region = FeedbackRegion::create(dir.path()).unwrap();

        let backing = dir.path().join(FEEDBACK_FILE_NAME);
        assert!(backing.exists());
        assert_eq!(
            fs::metadata(&backing).unwrap().len(),
            FEEDBACK_MAP_SIZE as u64
        );
        assert_eq!(region.len(), FEEDBACK_MAP_SIZE);
    }

    #[test]
    fn region_writes_reach_the_backing_file() {
        let dir = tempdir().unwrap();
        let region = FeedbackRegion::create(dir.path()).unwrap();

        region.store_byte(0, 0xAA);
        region.store_byte(FEEDBACK_MAP_SIZE - 1, 0x55);
        assert_eq!(region.load_byte(0), 0xAA);
        assert_eq!(region.load_byte(FEEDBACK_MAP_SIZE - 1), 0x55);

        let backing = region.backing_path().to_path_buf();
        drop(region);
        // The mapping is gone but the file persists with the written data.
        let data = fs::read(&backing).unwrap();
        assert_eq!(data[0], 0xAA);
        assert_eq!(data[FEEDBACK_MAP_SIZE - 1], 0x55);
    }

    #[test]
    fn region_create_in_unwritable_dir_leaves_no_file() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("no_such_subdir");
        let result = FeedbackRegion::create(&missing);
        assert!(matches!(result, Err(FeedbackError::MapFailed { .. })));
        assert!(!missing.join(FEEDBACK_FILE_NAME).exists());
    }

    #[test]
    fn blacklist_parses_hex_and_decimal_sorted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bl.txt");
        fs::write(&path, "# known flaky stacks\n0xdeadbeef\n42\n0xDEADBEEF\n").unwrap();

        let blacklist = StackHashBlacklist::load(&path).unwrap();
        assert_eq!(blacklist.len(), 2, "duplicates collapse");
        assert!(blacklist.contains(0xdead_beef));
        assert!(blacklist.contains(42));
        assert!(!blacklist.contains(43));
    }

    #[test]
    fn blacklist_rejects_garbage_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bl.txt");
        fs::write(&path, "0x10\nnot-a-hash\n").unwrap();
        match StackHashBlacklist::load(&path) {
            Err(FeedbackError::BlacklistParse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected BlacklistParse, got {other:?}"),
        }
    }
}
