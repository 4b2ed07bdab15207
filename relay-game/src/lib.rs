//! Two-player relay game server.
//!
//! Two connected peers alternate between leading and playing. The leader sends a
//! prompt, a seven tick countdown starts, and the gamer wins the round by echoing the
//! prompt exactly before it runs out. Roles swap after every round.
//!
//! - [`cli`] parses the listening port and tuning flags.
//! - [`config`] holds the timing and rule constants.
//! - [`message`] is the JSON record exchanged with peers and its newline framing.
//! - [`registry`] tracks connected peers and the leader and gamer slots.
//! - [`round`] is the round state machine: countdown, winner, role swap.
//! - [`coordinator`] owns the registry and round and applies events one at a time.
//! - [`server`] accepts TCP connections and shuttles frames to and from the
//!   coordinator.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod message;
pub mod registry;
pub mod round;
pub mod server;
