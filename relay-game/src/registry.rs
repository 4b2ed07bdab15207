//! Role slots and the set of connected peers.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::debug;

use crate::message::GameMessage;

pub type PeerId = u64;

pub type Outbox = mpsc::UnboundedSender<GameMessage>;

/// One role slot. A slot whose `name` is `None` is vacant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Participant {
    pub name: Option<String>,
    pub last_response: Option<String>,
}

impl Participant {
    pub fn is(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }

    pub fn is_vacant(&self) -> bool {
        self.name.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Overflow,
}

impl RejectReason {
    pub fn message(self) -> &'static str {
        match self {
            RejectReason::Overflow => "server at capacity",
        }
    }
}

/// Outcome of a role claim made by a game message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleClaim {
    Leader,
    Gamer,
    /// Both slots are taken; the message belongs to the round.
    AlreadyAssigned,
}

/// How the role slots were reconciled after a participant left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
    /// The leaver was alone in the slots; both are vacant now.
    Vacated,
    /// The leader left and the gamer was promoted.
    LeaderLeft,
    GamerLeft,
    /// The leaver never held a role.
    Unassigned,
}

impl Departure {
    pub fn announcement(self, name: &str) -> String {
        match self {
            Departure::LeaderLeft => "Leader has left the game".to_string(),
            Departure::GamerLeft => "Gamer has left the game".to_string(),
            Departure::Vacated | Departure::Unassigned => format!("{name} has left the game"),
        }
    }
}

struct PeerRecord {
    outbox: Outbox,
    names: Vec<String>,
}

pub struct Registry {
    capacity: usize,
    peers: HashMap<PeerId, PeerRecord>,
    pub leader: Participant,
    pub gamer: Participant,
}

impl Registry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            peers: HashMap::new(),
            leader: Participant::default(),
            gamer: Participant::default(),
        }
    }

    /// Adds a peer if there is room. Rejection leaves every slot untouched.
    pub fn admit(&mut self, peer: PeerId, outbox: Outbox) -> Admission {
        if self.peers.len() >= self.capacity {
            return Admission::Rejected(RejectReason::Overflow);
        }
        self.peers.insert(
            peer,
            PeerRecord {
                outbox,
                names: Vec::new(),
            },
        );
        Admission::Accepted
    }

    /// Removes a peer and returns every name it sent messages under, oldest first.
    ///
    /// Dropping the outbox closes the peer's connection.
    pub fn disconnect(&mut self, peer: PeerId) -> Option<Vec<String>> {
        self.peers.remove(&peer).map(|record| record.names)
    }

    pub fn is_connected(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    pub fn note_name(&mut self, peer: PeerId, name: &str) {
        if let Some(record) = self.peers.get_mut(&peer) {
            if !record.names.iter().any(|known| known == name) {
                record.names.push(name.to_string());
            }
        }
    }

    /// Whether any connected peer has sent messages under `name`.
    pub fn is_claimed(&self, name: &str) -> bool {
        self.peers
            .values()
            .any(|record| record.names.iter().any(|known| known == name))
    }

    pub fn holds_slot(&self, name: &str) -> bool {
        self.leader.is(name) || self.gamer.is(name)
    }

    /// First claimant leads, second plays. The sole occupant claiming again keeps its
    /// slot, so a name never holds both.
    pub fn assign_role(&mut self, name: &str) -> RoleClaim {
        if self.leader.is_vacant() && !self.gamer.is(name) {
            self.leader.name = Some(name.to_string());
            return RoleClaim::Leader;
        }
        if self.gamer.is_vacant() {
            if self.leader.is(name) {
                return RoleClaim::Leader;
            }
            self.gamer.name = Some(name.to_string());
            return RoleClaim::Gamer;
        }
        if self.leader.is_vacant() {
            // Only reachable when the gamer slot holds `name` alone.
            return RoleClaim::Gamer;
        }
        RoleClaim::AlreadyAssigned
    }

    /// Clears `name` from its slot. "Both now vacant" is checked before promotion.
    pub fn release(&mut self, name: &str) -> Departure {
        let alone = (self.leader.is(name) && self.gamer.is_vacant())
            || (self.gamer.is(name) && self.leader.is_vacant());
        if alone {
            self.leader = Participant::default();
            self.gamer = Participant::default();
            Departure::Vacated
        } else if self.leader.is(name) {
            self.leader = std::mem::take(&mut self.gamer);
            Departure::LeaderLeft
        } else if self.gamer.is(name) {
            self.gamer = Participant::default();
            Departure::GamerLeft
        } else {
            Departure::Unassigned
        }
    }

    /// Empties whichever slot `name` holds without promoting anyone.
    pub fn clear_slot(&mut self, name: &str) {
        if self.leader.is(name) {
            self.leader = Participant::default();
        } else if self.gamer.is(name) {
            self.gamer = Participant::default();
        }
    }

    pub fn swap_roles(&mut self) {
        std::mem::swap(&mut self.leader, &mut self.gamer);
    }

    pub fn reset_responses(&mut self) {
        self.leader.last_response = None;
        self.gamer.last_response = None;
    }

    pub fn both_assigned(&self) -> bool {
        !self.leader.is_vacant() && !self.gamer.is_vacant()
    }

    pub fn remaining_count(&self) -> usize {
        self.peers.len()
    }

    /// Delivers `message` to every connected peer, in the order calls are made.
    pub fn broadcast(&self, message: &GameMessage) {
        for (peer, record) in &self.peers {
            if record.outbox.send(message.clone()).is_err() {
                debug!(peer, "peer outbox already closed");
            }
        }
    }

    /// Drops every outbox, closing all connections.
    pub fn close_all(&mut self) {
        self.peers.clear();
    }
}
