//! Room registry for the signaling relay.
//!
//! The registry is the relay's entire in-memory state: a map of room code
//! to room (member set plus offer flag) and a map of connection to room
//! (the explicit association used for routing — membership is never
//! re-derived from transport-level groups). Rooms are created lazily on
//! first join and deleted the instant they empty; nothing survives a
//! process restart.
//!
//! Every operation validates fully before mutating, under a single lock
//! acquisition, so concurrent joins, relays, and disconnects for the same
//! room never observe a half-applied transition.

use std::collections::{HashMap, HashSet};

use pairsig_proto::{ConnectionId, RoomCode};
use tokio::sync::RwLock;

/// Maximum members per room. The relay pairs exactly two clients.
const ROOM_CAPACITY: usize = 2;

/// Errors a join request can fail with.
///
/// Both are reported to the requesting connection and leave the registry
/// untouched; neither is fatal to the server.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// The room code was not exactly four digits.
    #[error("Invalid room ID format.")]
    InvalidRoomCode,
    /// The room already has two members.
    #[error("This room is full.")]
    RoomFull,
}

/// Which role a forwarded payload plays in the pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// First payload relayed since the pairing formed.
    Offer,
    /// Any later payload (answer, ICE candidate, renegotiation).
    Signal,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The validated room that was joined.
    pub room: RoomCode,
    /// Pre-existing member to notify of the arrival, if any.
    pub peer: Option<ConnectionId>,
    /// Cleanup of the connection's previous room, when the join moved it
    /// between rooms.
    pub departed: Option<LeaveOutcome>,
}

/// Routing decision for one relayed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forward {
    /// The other member of the sender's room.
    pub to: ConnectionId,
    /// Offer or follow-up, decided purely by the room's offer flag.
    pub kind: SignalKind,
}

/// Result of removing a member from its room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// The room the connection left.
    pub room: RoomCode,
    /// Remaining member to notify, if one is still present.
    pub peer: Option<ConnectionId>,
    /// Whether the room emptied and was deleted from the registry.
    pub room_deleted: bool,
}

/// Read-only view of one room's state, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSnapshot {
    /// Current member count (1 or 2; empty rooms are deleted).
    pub member_count: usize,
    /// Whether the offer for the current pairing has been relayed.
    pub offer_sent: bool,
}

#[derive(Debug, Default)]
struct Room {
    members: HashSet<ConnectionId>,
    offer_sent: bool,
}

#[derive(Debug, Default)]
struct Inner {
    rooms: HashMap<RoomCode, Room>,
    /// Explicit connection → room association, committed only after a join
    /// passes every check.
    memberships: HashMap<ConnectionId, RoomCode>,
}

impl Inner {
    /// Removes a connection from its room, resetting the offer flag and
    /// deleting the room if it empties.
    ///
    /// Returns `None` when the connection has no association or its room no
    /// longer lists it — duplicate or out-of-order disconnect events are
    /// expected and must be no-ops.
    fn remove_member(&mut self, conn: ConnectionId) -> Option<LeaveOutcome> {
        let code = self.memberships.remove(&conn)?;
        let room = self.rooms.get_mut(&code)?;
        if !room.members.remove(&conn) {
            return None;
        }

        // Unconditional reset: the next joiner must receive a fresh offer,
        // never be skipped because of a stale flag from the old pairing.
        room.offer_sent = false;

        let peer = room.members.iter().next().copied();
        let room_deleted = room.members.is_empty();
        if room_deleted {
            self.rooms.remove(&code);
        }

        Some(LeaveOutcome {
            room: code,
            peer,
            room_deleted,
        })
    }
}

/// In-memory registry of active rooms and member associations.
///
/// Thread-safe via [`RwLock`]; owned by the relay state rather than being
/// process-global, so tests can run independent registries side by side.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    inner: RwLock<Inner>,
}

impl RoomRegistry {
    /// Creates a new, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins a connection into the room named by `raw_code`.
    ///
    /// The room is created lazily if absent. On success the outcome names
    /// the pre-existing member (the one to notify), never the joiner. If
    /// the connection was already in another room it is detached from the
    /// old room first, with the same cleanup a disconnect performs.
    ///
    /// # Errors
    ///
    /// [`JoinError::InvalidRoomCode`] if the code is not four digits,
    /// [`JoinError::RoomFull`] if the room already has two members. Both
    /// leave the registry exactly as it was — in particular, a rejected
    /// joiner acquires no association and will not be treated as a member
    /// when it later disconnects.
    pub async fn join(
        &self,
        conn: ConnectionId,
        raw_code: &str,
    ) -> Result<JoinOutcome, JoinError> {
        let code = RoomCode::parse(raw_code).map_err(|_| JoinError::InvalidRoomCode)?;

        let mut inner = self.inner.write().await;

        if inner
            .rooms
            .get(&code)
            .is_some_and(|room| room.members.len() >= ROOM_CAPACITY)
        {
            return Err(JoinError::RoomFull);
        }

        // All checks passed; mutate in one indivisible step from here on.
        let departed = inner.remove_member(conn);

        let room = inner.rooms.entry(code.clone()).or_default();
        let peer = room.members.iter().next().copied();
        room.members.insert(conn);
        inner.memberships.insert(conn, code.clone());

        Ok(JoinOutcome {
            room: code,
            peer,
            departed,
        })
    }

    /// Decides where one payload from `conn` should be forwarded.
    ///
    /// Returns `None` — a silent drop, not an error — when the connection
    /// has no room, the room is gone, or no peer is present yet. The first
    /// forward in a pairing is an [`SignalKind::Offer`] and flips the
    /// room's offer flag; everything after is a generic signal. Payload
    /// contents play no part in the decision.
    pub async fn relay(&self, conn: ConnectionId) -> Option<Forward> {
        let mut inner = self.inner.write().await;
        let code = inner.memberships.get(&conn)?.clone();
        let room = inner.rooms.get_mut(&code)?;
        let to = room.members.iter().find(|&&m| m != conn).copied()?;

        let kind = if room.offer_sent {
            SignalKind::Signal
        } else {
            room.offer_sent = true;
            SignalKind::Offer
        };

        Some(Forward { to, kind })
    }

    /// Removes a connection from its room on disconnect.
    ///
    /// Idempotent: duplicate disconnect events, or a leave from a
    /// connection that never joined, return `None` and change nothing.
    pub async fn leave(&self, conn: ConnectionId) -> Option<LeaveOutcome> {
        let mut inner = self.inner.write().await;
        inner.remove_member(conn)
    }

    /// Returns a snapshot of a room's state, or `None` if it doesn't exist.
    pub async fn room(&self, code: &RoomCode) -> Option<RoomSnapshot> {
        let inner = self.inner.read().await;
        inner.rooms.get(code).map(|room| RoomSnapshot {
            member_count: room.members.len(),
            offer_sent: room.offer_sent,
        })
    }

    /// Returns the room a connection is associated with, if any.
    pub async fn room_of(&self, conn: ConnectionId) -> Option<RoomCode> {
        let inner = self.inner.read().await;
        inner.memberships.get(&conn).cloned()
    }
}
