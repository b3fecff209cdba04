//! `classroom-core` — identifiers and error types shared by the authorization crates.
//!
//! No IO, no policy: just the vocabulary the other crates agree on.

pub mod error;
pub mod id;

pub use error::DomainError;
pub use id::{ClassId, SubjectId};
