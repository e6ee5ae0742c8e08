//! Signaling event types for the Pairsig wire format.
//!
//! Events travel as WebSocket text frames carrying JSON of the shape
//! `{"event": "<name>", "data": <payload>}`. Event names are kebab-case on
//! the wire (`join-room`, `forward-signal`, `offer-received`, ...).
//!
//! Negotiation payloads (`signal` fields) are opaque to the relay: it
//! forwards them verbatim as [`serde_json::Value`] and never inspects or
//! validates their contents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::ConnectionId;

/// Events sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Request to join a room by code.
    ///
    /// Carried as a raw string so the relay can report malformed codes
    /// back to the sender instead of failing to decode the frame.
    JoinRoom(String),

    /// A negotiation payload to forward to the room peer.
    ForwardSignal {
        /// Opaque negotiation blob (SDP offer/answer, ICE candidate, ...).
        signal: Value,
    },
}

/// Events sent by the relay to a specific client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// The join request carried a malformed room code.
    Error {
        /// Human-readable description.
        message: String,
    },

    /// The join request targeted a room that already has two members.
    RoomFull {
        /// Human-readable description.
        message: String,
    },

    /// Sent to the existing member when a peer joins its room.
    UserJoined {
        /// Connection id of the new arrival.
        #[serde(rename = "userId")]
        user_id: ConnectionId,
    },

    /// The first payload relayed in a pairing.
    OfferReceived {
        /// Connection id of the sender.
        from: ConnectionId,
        /// The forwarded negotiation blob.
        signal: Value,
    },

    /// Any payload relayed after the offer (answers, ICE candidates).
    Signal {
        /// Connection id of the sender.
        from: ConnectionId,
        /// The forwarded negotiation blob.
        signal: Value,
    },

    /// Sent to the remaining member when its peer leaves the room.
    UserLeft,
}

/// Errors from encoding or decoding signaling events.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame was not valid JSON for the expected event shape.
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encodes a server event as a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if serialization fails (only possible
/// for pathological `signal` values such as non-string map keys).
pub fn encode(event: &ServerEvent) -> Result<String, CodecError> {
    Ok(serde_json::to_string(event)?)
}

/// Decodes a client event from a JSON text frame.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if the frame is not a recognized
/// client event.
pub fn decode(frame: &str) -> Result<ClientEvent, CodecError> {
    Ok(serde_json::from_str(frame)?)
}
