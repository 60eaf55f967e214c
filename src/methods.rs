//! Memory copy/move engines and their registry.
//!
//! Every engine is a pair of functions with the libc calling contract:
//! `fn(dest, src, len) -> dest`, one for non-overlapping copies and one for
//! overlapping moves. The `all` method is a composite that round-robins
//! across a fixed subset of the concrete engines, one engine per sequence.
//!
//! Rust has no per-function optimization-level attribute, so the four
//! `naive_oN` variants are genuinely distinct loop shapes instead: from a
//! black-boxed byte-at-a-time loop the optimizer cannot touch, up to a
//! word-at-a-time loop it can vectorize freely.

use core::fmt;
use core::ptr;

/// Calling contract shared by all engines, copy and move alike. For copies
/// the regions must not overlap; moves must behave as read-then-write.
pub type CopyFn = unsafe fn(*mut u8, *const u8, usize) -> *mut u8;

/// A concrete engine: a diagnostic name plus its copy/move entry points.
pub struct MethodFuncs {
    pub name: &'static str,
    pub memcpy: CopyFn,
    pub memmove: CopyFn,
}

// ─── libc engine ──────────────────────────────────────────────────────────────

unsafe fn libc_memcpy(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    libc::memcpy(dest.cast(), src.cast(), n).cast()
}

unsafe fn libc_memmove(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    libc::memmove(dest.cast(), src.cast(), n).cast()
}

// ─── builtin engine ───────────────────────────────────────────────────────────

// `ptr::copy_nonoverlapping` / `ptr::copy` lower directly to the compiler's
// memcpy/memmove intrinsics, the Rust equivalent of `__builtin_memcpy`.

unsafe fn builtin_memcpy(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    ptr::copy_nonoverlapping(src, dest, n);
    dest
}

unsafe fn builtin_memmove(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    ptr::copy(src, dest, n);
    dest
}

// ─── naive engines ────────────────────────────────────────────────────────────

#[inline(never)]
unsafe fn naive_memcpy(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    let mut d = dest;
    let mut s = src;
    for _ in 0..n {
        *d = *s;
        d = d.add(1);
        s = s.add(1);
    }
    dest
}

#[inline(never)]
unsafe fn naive_memmove(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    if (dest as usize) < (src as usize) {
        let mut d = dest;
        let mut s = src;
        for _ in 0..n {
            *d = *s;
            d = d.add(1);
            s = s.add(1);
        }
    } else {
        let mut d = dest.add(n);
        let mut s = src.add(n);
        for _ in 0..n {
            d = d.sub(1);
            s = s.sub(1);
            *d = *s;
        }
    }
    dest
}

// o0: black_box pins every byte, so the loop stays a literal byte loop.

#[inline(never)]
unsafe fn naive_memcpy_o0(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    for i in 0..n {
        let byte = core::hint::black_box(*src.add(i));
        *dest.add(i) = byte;
    }
    dest
}

#[inline(never)]
unsafe fn naive_memmove_o0(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    if (dest as usize) < (src as usize) {
        for i in 0..n {
            let byte = core::hint::black_box(*src.add(i));
            *dest.add(i) = byte;
        }
    } else {
        for i in (0..n).rev() {
            let byte = core::hint::black_box(*src.add(i));
            *dest.add(i) = byte;
        }
    }
    dest
}

// o1: plain indexed byte loop, left to the optimizer as-is.

#[inline(never)]
unsafe fn naive_memcpy_o1(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    for i in 0..n {
        *dest.add(i) = *src.add(i);
    }
    dest
}

#[inline(never)]
unsafe fn naive_memmove_o1(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    if (dest as usize) < (src as usize) {
        for i in 0..n {
            *dest.add(i) = *src.add(i);
        }
    } else {
        for i in (0..n).rev() {
            *dest.add(i) = *src.add(i);
        }
    }
    dest
}

// o2: four-way unrolled byte loop with a scalar tail.

#[inline(never)]
unsafe fn naive_memcpy_o2(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    let mut i = 0;
    while i + 4 <= n {
        *dest.add(i) = *src.add(i);
        *dest.add(i + 1) = *src.add(i + 1);
        *dest.add(i + 2) = *src.add(i + 2);
        *dest.add(i + 3) = *src.add(i + 3);
        i += 4;
    }
    while i < n {
        *dest.add(i) = *src.add(i);
        i += 1;
    }
    dest
}

#[inline(never)]
unsafe fn naive_memmove_o2(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    if (dest as usize) < (src as usize) {
        naive_memcpy_o2(dest, src, n);
    } else {
        let mut i = n;
        while i >= 4 {
            i -= 4;
            *dest.add(i + 3) = *src.add(i + 3);
            *dest.add(i + 2) = *src.add(i + 2);
            *dest.add(i + 1) = *src.add(i + 1);
            *dest.add(i) = *src.add(i);
        }
        while i > 0 {
            i -= 1;
            *dest.add(i) = *src.add(i);
        }
    }
    dest
}

// o3: word-at-a-time with unaligned loads/stores. Each word is read in full
// before it is written, so overlapping moves stay correct per direction.

#[inline(never)]
unsafe fn naive_memcpy_o3(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    let mut i = 0;
    while i + 8 <= n {
        let word = (src.add(i) as *const u64).read_unaligned();
        (dest.add(i) as *mut u64).write_unaligned(word);
        i += 8;
    }
    while i < n {
        *dest.add(i) = *src.add(i);
        i += 1;
    }
    dest
}

#[inline(never)]
unsafe fn naive_memmove_o3(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    if (dest as usize) < (src as usize) {
        naive_memcpy_o3(dest, src, n);
    } else {
        let mut i = n;
        while i >= 8 {
            i -= 8;
            let word = (src.add(i) as *const u64).read_unaligned();
            (dest.add(i) as *mut u64).write_unaligned(word);
        }
        while i > 0 {
            i -= 1;
            *dest.add(i) = *src.add(i);
        }
    }
    dest
}

// ─── registry ─────────────────────────────────────────────────────────────────

static LIBC: MethodFuncs = MethodFuncs {
    name: "libc",
    memcpy: libc_memcpy,
    memmove: libc_memmove,
};

static BUILTIN: MethodFuncs = MethodFuncs {
    name: "builtin",
    memcpy: builtin_memcpy,
    memmove: builtin_memmove,
};

static NAIVE: MethodFuncs = MethodFuncs {
    name: "naive",
    memcpy: naive_memcpy,
    memmove: naive_memmove,
};

static NAIVE_O0: MethodFuncs = MethodFuncs {
    name: "naive_o0",
    memcpy: naive_memcpy_o0,
    memmove: naive_memmove_o0,
};

static NAIVE_O1: MethodFuncs = MethodFuncs {
    name: "naive_o1",
    memcpy: naive_memcpy_o1,
    memmove: naive_memmove_o1,
};

static NAIVE_O2: MethodFuncs = MethodFuncs {
    name: "naive_o2",
    memcpy: naive_memcpy_o2,
    memmove: naive_memmove_o2,
};

static NAIVE_O3: MethodFuncs = MethodFuncs {
    name: "naive_o3",
    memcpy: naive_memcpy_o3,
    memmove: naive_memmove_o3,
};

/// The selectable memcpy methods, in registry order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemcpyMethod {
    All,
    Libc,
    Builtin,
    Naive,
    NaiveO0,
    NaiveO1,
    NaiveO2,
    NaiveO3,
}

impl MemcpyMethod {
    pub const ALL_METHODS: [MemcpyMethod; 8] = [
        Self::All,
        Self::Libc,
        Self::Builtin,
        Self::Naive,
        Self::NaiveO0,
        Self::NaiveO1,
        Self::NaiveO2,
        Self::NaiveO3,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Libc => "libc",
            Self::Builtin => "builtin",
            Self::Naive => "naive",
            Self::NaiveO0 => "naive_o0",
            Self::NaiveO1 => "naive_o1",
            Self::NaiveO2 => "naive_o2",
            Self::NaiveO3 => "naive_o3",
        }
    }

    /// Look up a method by its configuration name.
    pub fn parse(name: &str) -> Result<Self, UnknownMethod> {
        Self::ALL_METHODS
            .into_iter()
            .find(|m| m.name() == name)
            .ok_or_else(|| UnknownMethod(name.to_string()))
    }

    /// Entry points for a concrete method; `None` for the composite, which
    /// has no functions of its own and is resolved through [`MethodRotation`].
    pub fn funcs(self) -> Option<&'static MethodFuncs> {
        match self {
            Self::All => None,
            Self::Libc => Some(&LIBC),
            Self::Builtin => Some(&BUILTIN),
            Self::Naive => Some(&NAIVE),
            Self::NaiveO0 => Some(&NAIVE_O0),
            Self::NaiveO1 => Some(&NAIVE_O1),
            Self::NaiveO2 => Some(&NAIVE_O2),
            Self::NaiveO3 => Some(&NAIVE_O3),
        }
    }
}

impl Default for MemcpyMethod {
    fn default() -> Self {
        Self::All
    }
}

/// A selector name that matched no registered method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl fmt::Display for UnknownMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown memcpy method '{}', must be one of:", self.0)?;
        for method in MemcpyMethod::ALL_METHODS {
            write!(f, " {}", method.name())?;
        }
        Ok(())
    }
}

impl std::error::Error for UnknownMethod {}

/// Concrete engines the composite cycles through, in dispatch order.
const ROTATION: [&MethodFuncs; 5] = [&LIBC, &BUILTIN, &NAIVE, &NAIVE_O0, &NAIVE_O3];

/// Cursor state for the composite `all` method. One instance per worker;
/// each call hands out the next engine and wraps after the last.
pub struct MethodRotation {
    whence: usize,
}

impl MethodRotation {
    pub fn new() -> Self {
        Self { whence: 0 }
    }

    pub fn next(&mut self) -> &'static MethodFuncs {
        let funcs = ROTATION[self.whence];
        self.whence = (self.whence + 1) % ROTATION.len();
        funcs
    }
}

impl Default for MethodRotation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const N: usize = 1000; // odd-ish size exercises every tail path

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    fn concrete_methods() -> Vec<&'static MethodFuncs> {
        MemcpyMethod::ALL_METHODS
            .into_iter()
            .filter_map(|m| m.funcs())
            .collect()
    }

    #[test]
    fn every_copy_engine_copies_exactly() {
        for funcs in concrete_methods() {
            let src = pattern(N);
            let mut dest = vec![0u8; N];
            let ret = unsafe { (funcs.memcpy)(dest.as_mut_ptr(), src.as_ptr(), N) };
            assert_eq!(dest, src, "{} copied wrong content", funcs.name);
            assert_eq!(ret, dest.as_mut_ptr(), "{} returned wrong pointer", funcs.name);
        }
    }

    #[test]
    fn every_move_engine_handles_forward_overlap() {
        for funcs in concrete_methods() {
            let mut buf = pattern(N);
            let expect = buf[64..].to_vec();
            let ret = unsafe {
                let base = buf.as_mut_ptr();
                (funcs.memmove)(base, base.add(64), N - 64)
            };
            assert_eq!(&buf[..N - 64], &expect[..], "{} forward move", funcs.name);
            assert_eq!(ret, buf.as_mut_ptr(), "{} returned wrong pointer", funcs.name);
        }
    }

    #[test]
    fn every_move_engine_handles_backward_overlap() {
        for funcs in concrete_methods() {
            let mut buf = pattern(N);
            let expect = buf[..N - 64].to_vec();
            unsafe {
                let base = buf.as_mut_ptr();
                (funcs.memmove)(base.add(64), base, N - 64);
            }
            assert_eq!(&buf[64..], &expect[..], "{} backward move", funcs.name);
        }
    }

    #[test]
    fn every_move_engine_handles_single_byte_shift() {
        for funcs in concrete_methods() {
            let mut buf = pattern(N);
            let expect = buf[..N - 1].to_vec();
            unsafe {
                let base = buf.as_mut_ptr();
                (funcs.memmove)(base.add(1), base, N - 1);
            }
            assert_eq!(&buf[1..], &expect[..], "{} 0->1 shift", funcs.name);

            let mut buf = pattern(N);
            let expect = buf[1..].to_vec();
            unsafe {
                let base = buf.as_mut_ptr();
                (funcs.memmove)(base, base.add(1), N - 1);
            }
            assert_eq!(&buf[..N - 1], &expect[..], "{} 1->0 shift", funcs.name);
        }
    }

    #[test]
    fn rotation_cycles_the_five_engines_in_fixed_order() {
        let mut rotation = MethodRotation::new();
        let names: Vec<&str> = (0..6).map(|_| rotation.next().name).collect();
        assert_eq!(
            names,
            ["libc", "builtin", "naive", "naive_o0", "naive_o3", "libc"]
        );
    }

    #[test]
    fn parses_every_registered_name() {
        for method in MemcpyMethod::ALL_METHODS {
            assert_eq!(MemcpyMethod::parse(method.name()), Ok(method));
        }
    }

    #[test]
    fn unknown_name_lists_the_valid_set() {
        let err = MemcpyMethod::parse("fancy").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'fancy'"));
        for method in MemcpyMethod::ALL_METHODS {
            assert!(msg.contains(method.name()), "missing {}", method.name());
        }
    }
}
