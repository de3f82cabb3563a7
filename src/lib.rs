//! Client-side route resolution and page lifecycle management.
//!
//! The crate turns address changes into page transitions for single-page
//! applications: URL parsing, route gating, renderable unit assembly with
//! caching, and container transitions. Browser facilities are reached through
//! the collaborator traits in [`core`]; [`platform`] provides in-memory
//! implementations of them.

pub mod auth;
pub mod cache;
pub mod config;
pub mod core;
pub mod loader;
pub mod logging;
pub mod platform;
pub mod query;
pub mod router;
pub mod utils;

pub use crate::config::Config;
pub use crate::core::{RouterError, RouterResult};
pub use crate::router::{NavigationOutcome, Router, RouterBuilder};
