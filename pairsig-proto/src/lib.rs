//! Shared protocol definitions for the Pairsig wire format.

pub mod event;
pub mod id;
pub mod room;

pub use event::{ClientEvent, CodecError, ServerEvent};
pub use id::ConnectionId;
pub use room::{RoomCode, RoomCodeError};
