//! wb-core: path confinement and filesystem operations for the wb file browser.
//!
//! Every path a client hands us goes through [`resolver::resolve`] (or one of
//! its siblings) before anything touches the filesystem. The types in
//! [`resolver`] carry that proof: a [`ResolvedPath`] can only be built by the
//! resolver.

pub mod auth;
pub mod browse;
pub mod error;
pub mod resolver;
pub mod root;

pub use auth::{AccessToken, Authenticator, Identity};
pub use error::{ErrorKind, Result, WbError};
pub use resolver::{ResolvedPath, resolve, resolve_entry};
pub use root::Root;
