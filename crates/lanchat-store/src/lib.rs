//! # lanchat-store
//!
//! In-memory session state shared by every network service: the
//! [`SessionRegistry`] of shared files (backed by a per-session directory
//! on disk) and the append-only [`Transcript`].
//!
//! Both types synchronize internally, so callers hold them behind an `Arc`
//! and never take locks of their own.

pub mod registry;
pub mod transcript;

mod error;

pub use error::{Result, StoreError};
pub use registry::SessionRegistry;
pub use transcript::Transcript;
