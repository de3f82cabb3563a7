//! Core abstractions for the navigation pipeline
//!
//! Errors, the in-flight status, the collaborator traits, and the runtime
//! context handed to renderable units.

pub mod context;
pub mod error;
pub mod status;
pub mod traits;

// Re-export commonly used types
pub use context::{RuntimeContext, RuntimeServices};
pub use error::{ErrorCode, ErrorContext, RouterError, RouterResult};
pub use status::{NavigationGuard, NavigationPhase, NavigationStatus};
pub use traits::*;
