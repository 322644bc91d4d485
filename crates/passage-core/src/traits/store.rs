//! Token persistence trait.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::tokens::TokenPair;

/// Durable holder of the access/refresh token pair.
///
/// The store is a pure synchronized key-value boundary: no network calls,
/// no refresh logic. Implementations must swap the pair atomically so a
/// concurrent reader never observes an access token paired with a stale
/// refresh token.
///
/// The gateway owns all mutation: the pair is written on successful login
/// or refresh and cleared on logout or irrecoverable refresh failure.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Read the persisted pair.
    ///
    /// Fails open: corrupt storage, or storage holding only half a pair,
    /// reads as `None`.
    async fn load(&self) -> Option<TokenPair>;

    /// Replace both tokens as a unit.
    ///
    /// A partial write must never be observable to readers.
    async fn save(&self, pair: &TokenPair) -> Result<(), StoreError>;

    /// Remove both tokens. Idempotent.
    async fn clear(&self) -> Result<(), StoreError>;
}
