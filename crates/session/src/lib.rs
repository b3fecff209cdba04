//! Classroom session layer.
//!
//! - [`SessionContext`]: true vs. effective identity, as an immutable value
//! - [`Session`]: shared read handle used by route guards and views
//! - [`ImpersonationManager`]: the remote exchanges that start and stop impersonation
//! - [`AuthService`]: seam to the authentication service, with an in-memory implementation

pub mod context;
pub mod error;
pub mod in_memory;
pub mod manager;
pub mod service;
pub mod session;

pub use context::{IdentitySummary, Impersonation, ImpersonationStatus, SessionContext};
pub use error::SessionError;
pub use in_memory::{Fault, InMemoryAuthService};
pub use manager::ImpersonationManager;
pub use service::{AuthService, Credential, CredentialGrant, DirectoryEntry, Introspection, RemoteError};
pub use session::{Session, SessionStatus};
