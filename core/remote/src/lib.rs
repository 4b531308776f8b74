//! Remote authority abstraction for revsync.
//!
//! The authority holds the authoritative history of every document and
//! decides whether a commit is accepted. This crate provides the trait the
//! sync engine talks to, an in-memory authority, a file-backed authority,
//! and a registry for resolving authorities by name.
//!
//! # Design Principles
//! - Transport isolation: no wire format or authentication handshake here
//! - Async operations: every request may block on I/O
//! - Unified error semantics: conflicts, permission and transport failures
//!   are reported with the common error type

pub mod authority;
pub mod local;
pub mod memory;
pub mod registry;

pub use authority::{Access, CommitRequest, RemoteAuthority, UpdateRequest};
pub use local::LocalAuthority;
pub use memory::MemoryAuthority;
pub use registry::{create_default_registry, AuthorityFactory, AuthorityRegistry};
