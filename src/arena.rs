//! The mmap-backed buffer a benchmark run copies through.
//!
//! One anonymous private mapping, logically split by the stressor into three
//! equal sub-buffers. Mapping failure is a resource condition, not a defect:
//! the caller turns it into a `NoResource` run status and the process keeps
//! going.

use core::fmt;

/// `mmap` refused the buffer (errno).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapError(pub i32);

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mmap failed (errno={})", self.0)
    }
}

impl std::error::Error for MapError {}

/// An anonymous read/write mapping, unmapped on drop.
#[derive(Debug)]
pub struct CopyArena {
    ptr: *mut u8,
    size: usize,
}

impl CopyArena {
    #[cfg(unix)]
    pub fn map(size: usize) -> Result<Self, MapError> {
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            return Err(MapError(errno));
        }
        Ok(Self {
            ptr: ptr.cast(),
            size,
        })
    }

    #[cfg(not(unix))]
    pub fn map(_size: usize) -> Result<Self, MapError> {
        Err(MapError(0))
    }

    #[inline(always)]
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

#[cfg(unix)]
impl Drop for CopyArena {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.cast(), self.size);
        }
    }
}

// Safety: the arena is only touched from the single worker thread that owns
// the run.
unsafe impl Send for CopyArena {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_and_zero_fills() {
        let arena = CopyArena::map(3 * 2048).expect("small mapping");
        assert_eq!(arena.len(), 3 * 2048);
        let bytes = unsafe { core::slice::from_raw_parts(arena.as_mut_ptr(), arena.len()) };
        assert!(bytes.iter().all(|b| *b == 0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn rejects_an_absurd_mapping() {
        // Larger than any plausible address space slice.
        let err = CopyArena::map(usize::MAX & !4095).unwrap_err();
        assert!(err.0 != 0);
    }
}
