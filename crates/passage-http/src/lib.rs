//! passage-http - reqwest-backed implementation of the passage gateway.
//!
//! Every request to the remote API flows through one [`Gateway`]: it
//! attaches the bearer token, detects authentication failure, and
//! transparently recovers via a single-flight refresh, so N concurrent
//! 401s cost exactly one refresh call. Persistence and session-expiry
//! navigation are injected capabilities
//! ([`TokenStore`](passage_core::TokenStore),
//! [`SessionListener`](passage_core::SessionListener)), which keeps the
//! gateway testable without real storage or UI.

mod client;
mod refresh;

pub mod gateway;
pub mod store;

pub use gateway::{ApiRequest, Gateway, GatewayBuilder};
pub use store::{FileTokenStore, MemoryTokenStore};

// Re-export the core surface so embedders need only one dependency
pub use passage_core::{
    AccessToken, ApiError, ApiUrl, AuthError, Credentials, Error, RefreshToken, Result,
    ServerError, SessionListener, StoreError, TokenPair, TokenStore, TransportError,
};
