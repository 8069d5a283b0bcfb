//! Blitz relay - cross-context relay of the Blitz trading extension
//!
//! This crate relays scraped coins from the trading page to launchblitz tabs
//! and broadcasts mint signals to the dedicated listener page.

pub mod types;
pub mod relay;

// Re-export main types for convenience
pub use types::{CoinPayload, MintSignal, TokenDetails};
