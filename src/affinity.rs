//! CPU affinity control for the current process.
//!
//! Two operations, with deliberately different failure policies:
//! - [`AffinityController::parse_and_apply`] — parse a `taskset`-style CPU
//!   list (`0,2-4,7`), validate it against the configured CPU count, and
//!   install it as the process affinity mask. Any defect here is a
//!   configuration error: it is returned as a fatal error value and the
//!   caller is expected to terminate the worker.
//! - [`AffinityController::change_cpu`] — opportunistically move the process
//!   off a given CPU. This runs inside long stress loops, so every failure
//!   path degrades silently to "no move".

use core::fmt;

/// Upper bound of the mask representation, matching the kernel's
/// `cpu_set_t` capacity.
pub const MAX_CPUS: usize = 1024;

const WORDS: usize = MAX_CPUS / 64;

/// An unordered set of CPU indices in `[0, MAX_CPUS)`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CpuSet {
    bits: [u64; WORDS],
}

impl CpuSet {
    pub const fn empty() -> Self {
        Self { bits: [0; WORDS] }
    }

    pub fn set(&mut self, cpu: usize) {
        if cpu < MAX_CPUS {
            self.bits[cpu / 64] |= 1 << (cpu % 64);
        }
    }

    pub fn clear(&mut self, cpu: usize) {
        if cpu < MAX_CPUS {
            self.bits[cpu / 64] &= !(1 << (cpu % 64));
        }
    }

    pub fn contains(&self, cpu: usize) -> bool {
        cpu < MAX_CPUS && self.bits[cpu / 64] & (1 << (cpu % 64)) != 0
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..MAX_CPUS).filter(move |cpu| self.contains(*cpu))
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Errors from affinity configuration. All of these are fatal for the
/// worker being configured; none leave a partially applied mask behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AffinityError {
    /// A token was not a decimal CPU number.
    InvalidNumber(String),
    /// A range token ended in `-` with no following number.
    DanglingRange(String),
    /// A range token had `hi < lo`.
    ReversedRange(String),
    /// A CPU index fell outside the allowed range `0..limit`.
    CpuOutOfRange { cpu: usize, limit: usize },
    /// The kernel rejected the assembled mask (errno).
    SetAffinity(i32),
    /// The platform has no affinity syscall at all.
    Unsupported,
}

impl fmt::Display for AffinityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidNumber(tok) => write!(f, "invalid number '{}'", tok),
            Self::DanglingRange(tok) => {
                write!(f, "expecting number following '-' in '{}'", tok)
            }
            Self::ReversedRange(tok) => write!(
                f,
                "invalid range in '{}' (end value must not be smaller than start value)",
                tok
            ),
            Self::CpuOutOfRange { cpu, limit } => write!(
                f,
                "invalid range, {} is not allowed, allowed range: 0 to {}",
                cpu,
                limit.saturating_sub(1)
            ),
            Self::SetAffinity(errno) => {
                write!(f, "cannot set CPU affinity, errno={}", errno)
            }
            Self::Unsupported => {
                write!(f, "setting CPU affinity not supported on this platform")
            }
        }
    }
}

impl std::error::Error for AffinityError {}

fn parse_cpu(token: &str, digits: &str) -> Result<usize, AffinityError> {
    digits
        .trim()
        .parse()
        .map_err(|_| AffinityError::InvalidNumber(token.to_string()))
}

fn check_cpu_range(max_cpus: Option<usize>, cpu: usize) -> Result<(), AffinityError> {
    // Unknown CPU count disables the configured-CPU bound, leaving only the
    // mask capacity itself.
    let limit = max_cpus.map_or(MAX_CPUS, |m| m.min(MAX_CPUS));
    if cpu >= limit {
        return Err(AffinityError::CpuOutOfRange { cpu, limit });
    }
    Ok(())
}

/// Parse a comma-separated CPU list (`0,2-4,7`) into a [`CpuSet`].
///
/// Each token is a single CPU index or an inclusive `lo-hi` range. The
/// result is the union of all tokens. Empty tokens are skipped.
pub fn parse_cpu_list(spec: &str, max_cpus: Option<usize>) -> Result<CpuSet, AffinityError> {
    let mut set = CpuSet::empty();

    for token in spec.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let (lo, hi) = match token.split_once('-') {
            None => {
                let cpu = parse_cpu(token, token)?;
                (cpu, cpu)
            }
            Some((lo_s, hi_s)) => {
                if hi_s.is_empty() {
                    return Err(AffinityError::DanglingRange(token.to_string()));
                }
                let lo = parse_cpu(token, lo_s)?;
                let hi = parse_cpu(token, hi_s)?;
                if hi < lo {
                    return Err(AffinityError::ReversedRange(token.to_string()));
                }
                (lo, hi)
            }
        };
        check_cpu_range(max_cpus, lo)?;
        check_cpu_range(max_cpus, hi)?;
        for cpu in lo..=hi {
            set.set(cpu);
        }
    }

    Ok(set)
}

/// The CPU a rotation starts from: either an explicit index to avoid, or
/// "whatever CPU the process is on right now".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuHint {
    Current,
    Cpu(usize),
}

/// Syscall seam used by [`AffinityController`], so rotation behavior can be
/// exercised without touching the real scheduler.
pub(crate) trait AffinityOps {
    /// Number of configured CPUs, if known.
    fn configured_cpus(&self) -> Option<usize>;
    /// Install `set` as the process affinity mask. Err carries errno.
    fn apply(&self, set: &CpuSet) -> Result<(), i32>;
    /// Read the current process affinity mask. Err carries errno.
    fn query(&self) -> Result<CpuSet, i32>;
    /// CPU the process is executing on right now.
    fn current_cpu(&self) -> usize;
}

#[cfg(target_os = "linux")]
pub(crate) struct SysAffinity;

#[cfg(target_os = "linux")]
impl AffinityOps for SysAffinity {
    fn configured_cpus(&self) -> Option<usize> {
        core_affinity::get_core_ids().map(|ids| ids.len())
    }

    fn apply(&self, set: &CpuSet) -> Result<(), i32> {
        unsafe {
            let mut mask: libc::cpu_set_t = core::mem::zeroed();
            libc::CPU_ZERO(&mut mask);
            for cpu in set.iter() {
                libc::CPU_SET(cpu, &mut mask);
            }
            if libc::sched_setaffinity(0, core::mem::size_of::<libc::cpu_set_t>(), &mask) < 0 {
                return Err(*libc::__errno_location());
            }
        }
        Ok(())
    }

    fn query(&self) -> Result<CpuSet, i32> {
        let mut set = CpuSet::empty();
        unsafe {
            let mut mask: libc::cpu_set_t = core::mem::zeroed();
            if libc::sched_getaffinity(0, core::mem::size_of::<libc::cpu_set_t>(), &mut mask) < 0 {
                return Err(*libc::__errno_location());
            }
            for cpu in 0..MAX_CPUS {
                if libc::CPU_ISSET(cpu, &mask) {
                    set.set(cpu);
                }
            }
        }
        Ok(set)
    }

    fn current_cpu(&self) -> usize {
        let cpu = unsafe { libc::sched_getcpu() };
        if cpu < 0 {
            0
        } else {
            cpu as usize
        }
    }
}

/// Owns the affinity state for one worker process.
///
/// The applied mask and the rotation toggle are explicit fields rather than
/// globals, so multiple workers (or test runs) in one process cannot trample
/// each other's state.
pub struct AffinityController {
    applied: Option<CpuSet>,
    change_cpu_enabled: bool,
}

impl AffinityController {
    pub fn new(change_cpu_enabled: bool) -> Self {
        Self {
            applied: None,
            change_cpu_enabled,
        }
    }

    /// The mask last applied through [`parse_and_apply`](Self::parse_and_apply),
    /// if any.
    pub fn applied(&self) -> Option<&CpuSet> {
        self.applied.as_ref()
    }

    /// Parse `spec` and install it as the process affinity mask.
    ///
    /// Any error is a configuration defect; the caller should report it and
    /// terminate the worker. On error nothing has been applied.
    #[cfg(target_os = "linux")]
    pub fn parse_and_apply(&mut self, spec: &str) -> Result<(), AffinityError> {
        self.parse_and_apply_with(spec, &SysAffinity)
    }

    /// Affinity was requested but this platform cannot honor it: a hard
    /// configuration error, same as a malformed list.
    #[cfg(not(target_os = "linux"))]
    pub fn parse_and_apply(&mut self, _spec: &str) -> Result<(), AffinityError> {
        Err(AffinityError::Unsupported)
    }

    pub(crate) fn parse_and_apply_with(
        &mut self,
        spec: &str,
        ops: &impl AffinityOps,
    ) -> Result<(), AffinityError> {
        let set = parse_cpu_list(spec, ops.configured_cpus())?;
        ops.apply(&set).map_err(AffinityError::SetAffinity)?;
        self.applied = Some(set);
        Ok(())
    }

    /// Try to move the process off `old_cpu` (or off the CPU it is currently
    /// on, for [`CpuHint::Current`]).
    ///
    /// Best effort: when rotation is disabled this is a pure no-op returning
    /// the hint unchanged, and no failure on this path ever escalates — the
    /// worst case is staying where we were.
    #[cfg(target_os = "linux")]
    pub fn change_cpu(&self, old_cpu: CpuHint) -> CpuHint {
        self.change_cpu_with(old_cpu, &SysAffinity)
    }

    /// Without an affinity syscall there is nothing to rotate away from.
    #[cfg(not(target_os = "linux"))]
    pub fn change_cpu(&self, old_cpu: CpuHint) -> CpuHint {
        old_cpu
    }

    pub(crate) fn change_cpu_with(&self, old_cpu: CpuHint, ops: &impl AffinityOps) -> CpuHint {
        if !self.change_cpu_enabled {
            return old_cpu;
        }

        let mut mask = match self.applied {
            Some(set) => set,
            None => match ops.query() {
                Ok(mask) => mask,
                Err(_) => return old_cpu, // no dice
            },
        };

        let from_cpu = match old_cpu {
            CpuHint::Current => ops.current_cpu(),
            CpuHint::Cpu(cpu) => cpu,
        };

        // Try hard not to land on the CPU we came from, but never empty the
        // mask: a single-CPU mask stays as it is.
        if mask.count() > 1 {
            mask.clear(from_cpu);
        }

        if ops.apply(&mask).is_ok() {
            let moved_cpu = ops.current_cpu();
            log::debug!("process moved from CPU {} to CPU {}", from_cpu, moved_cpu);
            CpuHint::Cpu(moved_cpu)
        } else {
            CpuHint::Cpu(from_cpu)
        }
    }
}
