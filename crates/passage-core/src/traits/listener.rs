//! Session lifecycle notification trait.

/// Receives session lifecycle signals from the gateway.
///
/// The hosting application injects an implementation to be told when the
/// session is irrecoverably over, typically to navigate back to its
/// unauthenticated entry point. The signal is a side effect, not a return
/// value: the gateway fires it exactly once per expiry event, no matter
/// how many concurrent requests observed the expiry.
pub trait SessionListener: Send + Sync {
    /// The refresh protocol failed and the credential store was cleared.
    fn session_expired(&self);
}
