use core::sync::atomic::{AtomicU64, Ordering};
use minstant::Instant;

#[repr(align(64))]
pub struct CacheAlignedAtomicU64(pub AtomicU64);

impl CacheAlignedAtomicU64 {
    pub const fn new(v: u64) -> Self {
        Self(AtomicU64::new(v))
    }

    #[inline(always)]
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters for one worker: completed sequences and verification failures.
pub struct WorkerStats {
    pub bogo_ops: CacheAlignedAtomicU64,
    pub verify_failures: CacheAlignedAtomicU64,
}

impl WorkerStats {
    pub const fn new() -> Self {
        Self {
            bogo_ops: CacheAlignedAtomicU64::new(0),
            verify_failures: CacheAlignedAtomicU64::new(0),
        }
    }
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct CycleSample {
    pub cycles: u64,
    pub micros: u64,
}

/// Times one pass of the copy sequence in TSC cycles and wall-clock micros.
pub struct CycleTimer {
    start_cycles: u64,
    start_time: Instant,
}

impl CycleTimer {
    #[inline(always)]
    pub fn start() -> Self {
        Self {
            start_cycles: rdtsc(),
            start_time: Instant::now(),
        }
    }

    #[inline(always)]
    pub fn stop(self) -> CycleSample {
        let cycles = rdtsc().saturating_sub(self.start_cycles);
        let micros = self.start_time.elapsed().as_micros() as u64;
        CycleSample { cycles, micros }
    }
}

#[inline(always)]
fn rdtsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_rdtsc()
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        0
    }
}
