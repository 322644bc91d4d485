//! Capability traits implemented by embedders.

mod listener;
mod store;

pub use listener::SessionListener;
pub use store::TokenStore;
