use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{Result, ShmError};
use crate::region::SharedRegion;

/// Region backed by a `MAP_SHARED` mapping of a file or device node.
///
/// Two processes mapping the same file see each other's writes, which makes
/// a file under `/dev/shm` a workable stand-in for the modem window.
pub struct MappedRegion {
    ptr: *mut u8,
    len: usize,
    path: PathBuf,
}

// SAFETY: the mapping is owned by this value and lives until drop. All access
// goes through volatile-free byte copies with bounds checks; ordering across
// processors is provided by the hardware semaphore, not by Rust.
unsafe impl Send for MappedRegion {}
// SAFETY: see above; `&MappedRegion` only exposes copy-in/copy-out methods.
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Map `len` bytes of `path`, creating and growing the file if needed.
    pub fn open(path: impl AsRef<Path>, len: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let map_err = |source: std::io::Error| ShmError::Map {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(map_err)?;
        let current = file.metadata().map_err(map_err)?.len();
        if current < len as u64 {
            file.set_len(len as u64).map_err(map_err)?;
        }

        // SAFETY: the fd is open for read/write and at least `len` bytes long.
        // A null hint lets the kernel choose the address.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(map_err(std::io::Error::last_os_error()));
        }

        tracing::debug!(path = %path.display(), len, "mapped shared region");
        Ok(Self {
            ptr: ptr.cast::<u8>(),
            len,
            path,
        })
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check(&self, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.len),
            "region access {offset}+{len} beyond {}",
            self.len
        );
    }
}

impl SharedRegion for MappedRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn read_at(&self, offset: usize, dst: &mut [u8]) {
        self.check(offset, dst.len());
        // SAFETY: bounds checked above; `dst` cannot alias the mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.add(offset), dst.as_mut_ptr(), dst.len());
        }
    }

    fn write_at(&self, offset: usize, src: &[u8]) {
        self.check(offset, src.len());
        // SAFETY: bounds checked above; `src` cannot alias the mapping.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.add(offset), src.len());
        }
    }
}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        // SAFETY: `ptr`/`len` are exactly what mmap returned and nothing else
        // unmaps them.
        let rc = unsafe { libc::munmap(self.ptr.cast::<libc::c_void>(), self.len) };
        if rc != 0 {
            tracing::warn!(
                path = %self.path.display(),
                error = %std::io::Error::last_os_error(),
                "munmap failed"
            );
        }
    }
}

impl std::fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegion")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("modemlink-{}-{name}", std::process::id()))
    }

    #[test]
    fn two_mappings_share_bytes() {
        let path = scratch_path("share");
        let a = MappedRegion::open(&path, 4096).unwrap();
        let b = MappedRegion::open(&path, 4096).unwrap();

        a.write_u32(128, 0xCAFE_F00D);
        assert_eq!(b.read_u32(128), 0xCAFE_F00D);

        drop(a);
        drop(b);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    #[should_panic(expected = "beyond")]
    fn out_of_range_access_panics() {
        let path = scratch_path("range");
        let region = MappedRegion::open(&path, 64).unwrap();
        let _ = std::fs::remove_file(&path);
        region.write_at(60, &[0u8; 8]);
    }
}
