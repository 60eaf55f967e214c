//! The memcpy benchmark run: drive one engine through a fixed
//! eight-operation copy/move sequence until the harness says stop.
//!
//! The sequence (over three adjacent 2048-byte sub-buffers `str1`, `str2`,
//! `str3`) is always, in order:
//! full copy `str2→str3`, half copy `str3→str2`, overlapping move down by 64,
//! full copy `str2→str1`, overlapping move up by 64, full copy `str1→str3`,
//! and two single-byte-shift overlapping moves. One completed pass is one
//! bogo operation.

use core::slice;

use crate::arena::{CopyArena, MapError};
use crate::methods::{CopyFn, MemcpyMethod, MethodFuncs, MethodRotation};
use crate::runtime::{CycleTimer, WorkerStats};

/// Size of each of the three sub-buffers.
pub const MEMCPY_MEMSIZE: usize = 2048;

/// Length of the pseudorandom seed prefix written into `str3`.
const SEED_SIZE: usize = 64;

/// What the orchestrating harness provides to a run: identity, the bogo-op
/// callback, and the stop condition. The stop condition is consulted once
/// per completed sequence, never mid-sequence.
pub trait StressContext {
    fn name(&self) -> &str;
    fn instance(&self) -> u32;
    /// One full sequence finished.
    fn inc_counter(&self);
    /// Keep looping while this returns true.
    fn keep_stressing(&self) -> bool;
}

/// How a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// The buffer mapping was refused; the run never started.
    NoResource,
}

/// Per-run configuration resolved by the harness before the run starts.
#[derive(Clone, Copy, Debug)]
pub struct MemcpyConfig {
    pub method: MemcpyMethod,
    pub verify: bool,
}

impl Default for MemcpyConfig {
    fn default() -> Self {
        Self {
            method: MemcpyMethod::All,
            verify: false,
        }
    }
}

/// Diagnostic state the check wrappers report against.
struct SeqState<'a> {
    worker: &'a str,
    method: &'static str,
    stats: &'a WorkerStats,
}

/// A call wrapper around one engine entry point. Selected once per run:
/// either the checking pair or the pass-through pair.
type CheckFn = fn(&SeqState, CopyFn, *mut u8, *const u8, usize) -> *mut u8;

fn memcpy_check(st: &SeqState, func: CopyFn, dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    let ret = unsafe { func(dest, src, n) };
    let (d, s) = unsafe { (slice::from_raw_parts(dest, n), slice::from_raw_parts(src, n)) };
    if d != s {
        log::error!(
            "{}: {}: memcpy content is different than expected",
            st.worker,
            st.method
        );
        st.stats.verify_failures.inc();
    }
    if ret != dest {
        log::error!(
            "{}: {}: memcpy return was {:p} and not {:p} as expected",
            st.worker,
            st.method,
            ret,
            dest
        );
        st.stats.verify_failures.inc();
    }
    ret
}

fn memcpy_no_check(
    _st: &SeqState,
    func: CopyFn,
    dest: *mut u8,
    src: *const u8,
    n: usize,
) -> *mut u8 {
    unsafe { func(dest, src, n) }
}

fn memmove_check(st: &SeqState, func: CopyFn, dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
    let ret = unsafe { func(dest, src, n) };
    let (d, s) = unsafe { (slice::from_raw_parts(dest, n), slice::from_raw_parts(src, n)) };
    if d != s {
        log::error!(
            "{}: {}: memmove content is different than expected",
            st.worker,
            st.method
        );
        st.stats.verify_failures.inc();
    }
    if ret != dest {
        log::error!(
            "{}: {}: memmove return was {:p} and not {:p} as expected",
            st.worker,
            st.method,
            ret,
            dest
        );
        st.stats.verify_failures.inc();
    }
    ret
}

fn memmove_no_check(
    _st: &SeqState,
    func: CopyFn,
    dest: *mut u8,
    src: *const u8,
    n: usize,
) -> *mut u8 {
    unsafe { func(dest, src, n) }
}

/// Fill `buf` with xorshift pseudorandom bytes seeded from the wall clock.
fn rnd_fill(buf: &mut [u8]) {
    let mut state = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9e37_79b9_7f4a_7c15)
        | 1;
    for byte in buf {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        *byte = state as u8;
    }
}

/// One pass of the fixed micro-operation sequence.
///
/// Safety: `str1`, `str2`, `str3` must each point at `MEMCPY_MEMSIZE`
/// writable bytes.
unsafe fn run_sequence(
    st: &SeqState,
    copy: CheckFn,
    mv: CheckFn,
    funcs: &MethodFuncs,
    str1: *mut u8,
    str2: *mut u8,
    str3: *mut u8,
) {
    const N: usize = MEMCPY_MEMSIZE;

    copy(st, funcs.memcpy, str3, str2, N);
    copy(st, funcs.memcpy, str2, str3, N / 2);
    mv(st, funcs.memmove, str3, str3.add(64), N - 64);
    copy(st, funcs.memcpy, str1, str2, N);
    mv(st, funcs.memmove, str3.add(64), str3, N - 64);
    copy(st, funcs.memcpy, str3, str1, N);
    mv(st, funcs.memmove, str3.add(1), str3, N - 1);
    mv(st, funcs.memmove, str3, str3.add(1), N - 1);
}

/// Run the memcpy stressor until `ctx` signals stop.
///
/// Maps one buffer for three sub-buffers, seeds it, then loops the sequence,
/// reporting one bogo op per pass. A refused mapping ends the run with
/// [`RunStatus::NoResource`] without touching the rest of the process.
pub fn stress_memcpy(
    ctx: &dyn StressContext,
    cfg: &MemcpyConfig,
    stats: &WorkerStats,
) -> RunStatus {
    run_with_mapping(ctx, cfg, stats, CopyArena::map(3 * MEMCPY_MEMSIZE))
}

pub(crate) fn run_with_mapping(
    ctx: &dyn StressContext,
    cfg: &MemcpyConfig,
    stats: &WorkerStats,
    mapping: Result<CopyArena, MapError>,
) -> RunStatus {
    let arena = match mapping {
        Ok(arena) => arena,
        Err(err) => {
            log::info!(
                "{}: cannot allocate {} sized buffer: {}",
                ctx.name(),
                3 * MEMCPY_MEMSIZE,
                err
            );
            return RunStatus::NoResource;
        }
    };

    let str1 = arena.as_mut_ptr();
    let (str2, str3) = unsafe { (str1.add(MEMCPY_MEMSIZE), str1.add(2 * MEMCPY_MEMSIZE)) };

    rnd_fill(unsafe { slice::from_raw_parts_mut(str3, SEED_SIZE) });

    let (copy, mv): (CheckFn, CheckFn) = if cfg.verify {
        (memcpy_check, memmove_check)
    } else {
        (memcpy_no_check, memmove_no_check)
    };

    log::info!(
        "{} (instance {}): using memcpy method '{}'{}",
        ctx.name(),
        ctx.instance(),
        cfg.method.name(),
        if cfg.verify { " with verification" } else { "" }
    );

    let mut rotation = MethodRotation::new();
    loop {
        let funcs = cfg
            .method
            .funcs()
            .unwrap_or_else(|| rotation.next());
        let st = SeqState {
            worker: ctx.name(),
            method: funcs.name,
            stats,
        };

        let timer = CycleTimer::start();
        unsafe {
            run_sequence(&st, copy, mv, funcs, str1, str2, str3);
        }
        let sample = timer.stop();
        log::trace!(
            "{}: {}: sequence took {} cycles / {} us",
            st.worker,
            st.method,
            sample.cycles,
            sample.micros
        );

        ctx.inc_counter();
        if !ctx.keep_stressing() {
            break;
        }
    }

    drop(arena);
    RunStatus::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::CacheAlignedAtomicU64;

    struct TestCtx {
        units: CacheAlignedAtomicU64,
        budget: u64,
    }

    impl TestCtx {
        fn stop_after(budget: u64) -> Self {
            Self {
                units: CacheAlignedAtomicU64::new(0),
                budget,
            }
        }
    }

    impl StressContext for TestCtx {
        fn name(&self) -> &str {
            "memcpy"
        }
        fn instance(&self) -> u32 {
            0
        }
        fn inc_counter(&self) {
            self.units.inc();
        }
        fn keep_stressing(&self) -> bool {
            self.units.load() < self.budget
        }
    }

    #[cfg(unix)]
    #[test]
    fn run_reports_exactly_the_budgeted_units() {
        let ctx = TestCtx::stop_after(3);
        let stats = WorkerStats::new();
        let cfg = MemcpyConfig::default();

        let status = stress_memcpy(&ctx, &cfg, &stats);
        assert_eq!(status, RunStatus::Success);
        assert_eq!(ctx.units.load(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn reference_engines_pass_verification() {
        for method in MemcpyMethod::ALL_METHODS {
            let ctx = TestCtx::stop_after(6);
            let stats = WorkerStats::new();
            let cfg = MemcpyConfig {
                method,
                verify: true,
            };

            let status = stress_memcpy(&ctx, &cfg, &stats);
            assert_eq!(status, RunStatus::Success);
            assert_eq!(
                stats.verify_failures.load(),
                0,
                "{} failed verification",
                method.name()
            );
        }
    }

    #[test]
    fn refused_mapping_ends_with_no_resource_and_no_units() {
        let ctx = TestCtx::stop_after(3);
        let stats = WorkerStats::new();
        let cfg = MemcpyConfig::default();

        let status = run_with_mapping(&ctx, &cfg, &stats, Err(MapError(libc::ENOMEM)));
        assert_eq!(status, RunStatus::NoResource);
        assert_eq!(ctx.units.load(), 0);
    }

    // Copies one byte short of the requested length.
    unsafe fn short_memcpy(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
        if n > 1 {
            core::ptr::copy_nonoverlapping(src, dest, n - 1);
        }
        dest
    }

    // Copies correctly but returns the wrong pointer.
    unsafe fn wrong_ret_memcpy(dest: *mut u8, src: *const u8, n: usize) -> *mut u8 {
        core::ptr::copy_nonoverlapping(src, dest, n);
        src as *mut u8
    }

    #[test]
    fn broken_engine_is_flagged_without_halting() {
        let stats = WorkerStats::new();
        let st = SeqState {
            worker: "memcpy",
            method: "broken",
            stats: &stats,
        };

        let src: Vec<u8> = (0..128).map(|i| i as u8).collect();
        let mut dest = vec![0xFFu8; 128];

        let ret = memcpy_check(&st, short_memcpy, dest.as_mut_ptr(), src.as_ptr(), 128);
        assert_eq!(ret, dest.as_mut_ptr());
        assert_eq!(stats.verify_failures.load(), 1);

        // The wrapper keeps working after a failure; a second defect is
        // counted, not escalated.
        let ret = memcpy_check(&st, wrong_ret_memcpy, dest.as_mut_ptr(), src.as_ptr(), 128);
        assert!(ret != dest.as_mut_ptr());
        assert_eq!(stats.verify_failures.load(), 2);
    }

    #[test]
    fn disabled_verification_passes_calls_through() {
        let stats = WorkerStats::new();
        let st = SeqState {
            worker: "memcpy",
            method: "broken",
            stats: &stats,
        };

        let src: Vec<u8> = (0..64).map(|i| i as u8).collect();
        let mut dest = vec![0u8; 64];

        memcpy_no_check(&st, short_memcpy, dest.as_mut_ptr(), src.as_ptr(), 64);
        memmove_no_check(&st, short_memcpy, dest.as_mut_ptr(), src.as_ptr(), 64);
        assert_eq!(stats.verify_failures.load(), 0);
    }
}
