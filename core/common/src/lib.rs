//! Common utilities and types shared across the revsync crates.
//!
//! This module provides the error taxonomy and the identity value types
//! (documents, remote locations, users, revisions) that every other crate
//! keys its state by.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{DocumentId, RemoteLocation, Revision, UserId};
