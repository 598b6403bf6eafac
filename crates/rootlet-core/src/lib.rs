//! # rootlet-core
//!
//! Mount and teardown primitives for guest sessions: symlink resolution
//! confined to the guest root, idempotent bind/tmpfs mount orchestration
//! over a swappable mounter backend, and the reverse-order cleanup registry
//! that guarantees teardown on every exit path.

pub mod cleanup;
pub mod mount;
pub mod resolver;

pub use cleanup::{CleanupRegistry, SharedRegistry};
pub use mount::{FakeMounter, MountOrchestrator, MountOpts, Mounter, SysMounter};
pub use resolver::PathResolver;
