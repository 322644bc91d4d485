//! passage-core - Types and traits for the passage API gateway.
//!
//! This crate holds the pieces of the gateway that carry no network
//! dependency: opaque token types, the validated API base URL, the
//! persistence and session-notification capability traits, and the closed
//! error taxonomy every gateway outcome maps into.

pub mod credentials;
pub mod error;
pub mod tokens;
pub mod traits;
pub mod types;

pub use credentials::Credentials;
pub use error::{ApiError, AuthError, Error, ServerError, StoreError, TransportError};
pub use tokens::{AccessToken, RefreshToken, TokenPair};
pub use traits::{SessionListener, TokenStore};
pub use types::ApiUrl;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;
