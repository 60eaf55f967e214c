//! Worker-level primitives for a memory copy/move stress harness.
//!
//! Two independent pieces:
//! - [`affinity`] — validate and apply a CPU affinity restriction for the
//!   current process, with an opportunistic "move off this CPU" rotation.
//! - [`stressor`] (with [`methods`] and [`arena`]) — drive a fixed
//!   eight-operation copy/move sequence over an mmap-backed buffer using a
//!   selectable engine, optionally checking every call for correctness.
//!
//! The orchestrating harness is out of scope: it supplies a [`stressor::StressContext`]
//! (name, instance id, bogo-op callback, stop condition) and consumes the
//! returned [`stressor::RunStatus`].

pub mod affinity;
pub mod arena;
pub mod methods;
pub mod runtime;
pub mod stressor;
