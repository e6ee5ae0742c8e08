//! Pairsig relay server library.
//!
//! Exposes the signaling relay for use in tests and embedding. The server
//! accepts WebSocket connections, pairs clients two-by-two into numeric
//! rooms, and forwards opaque negotiation payloads between room peers.

pub mod config;
pub mod registry;
pub mod relay;
