//! Round state machine: prompt, countdown, resolution and role swap.
//!
//! The controller never touches sockets. It reads and writes the role slots in a
//! [`Registry`] and describes what should be broadcast; the coordinator owns the clock
//! and decides when ticks fire.

use std::time::Duration;

use tokio::time::Instant;

use crate::{config::GameConfig, registry::Registry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    AwaitingLeader,
    AwaitingGamer,
    LeaderTurn,
    CountdownRunning,
    Resolving,
    RoleSwap,
    Shutdown,
}

/// Who won a round, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub winner: String,
    pub is_time_over: bool,
}

impl Outcome {
    pub fn announcement(&self) -> String {
        format!("{} is a winner!", self.winner)
    }
}

/// What a game message did to the round, for the coordinator to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The message claimed a role; announce the new round state, do not relay.
    RoleClaimed,
    /// The leader's prompt was accepted and the countdown started.
    PromptAccepted,
    /// The gamer answered; the round resolves without waiting for the clock.
    Answered,
    /// Relayed without affecting the round.
    Relayed,
}

/// Countdown started by a prompt. Holds the deadline of the next tick while active.
#[derive(Debug, Clone)]
pub struct Countdown {
    count: u8,
    total: u8,
    first_delay: Duration,
    delay: Duration,
    deadline: Option<Instant>,
}

impl Countdown {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            count: 0,
            total: config.countdown_ticks,
            first_delay: config.first_tick_delay(),
            delay: config.tick_delay(),
            deadline: None,
        }
    }

    pub fn start(&mut self, now: Instant) {
        self.count = 0;
        self.deadline = Some(now + self.first_delay);
    }

    pub fn is_active(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn count(&self) -> u8 {
        self.count
    }

    /// Records one tick and returns the remaining count to announce. The countdown
    /// deactivates itself after the last tick.
    pub fn tick(&mut self, now: Instant) -> Option<u8> {
        self.deadline?;
        self.count += 1;
        let remaining = self.total.saturating_sub(self.count);
        self.deadline = if self.count < self.total {
            Some(now + self.delay)
        } else {
            None
        };
        Some(remaining)
    }

    pub fn is_exhausted(&self) -> bool {
        self.count >= self.total
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.deadline = None;
    }
}

pub struct RoundController {
    phase: RoundPhase,
    countdown: Countdown,
}

impl RoundController {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            phase: RoundPhase::AwaitingLeader,
            countdown: Countdown::new(config),
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn countdown(&self) -> &Countdown {
        &self.countdown
    }

    /// Applies a game message from `sender` with body `body`.
    pub fn on_message(
        &mut self,
        registry: &mut Registry,
        sender: &str,
        body: &str,
        now: Instant,
    ) -> Transition {
        if matches!(
            self.phase,
            RoundPhase::AwaitingLeader | RoundPhase::AwaitingGamer
        ) || !registry.both_assigned()
        {
            registry.assign_role(sender);
            self.restart(registry);
            return Transition::RoleClaimed;
        }

        match self.phase {
            RoundPhase::LeaderTurn if registry.leader.is(sender) => {
                registry.leader.last_response = Some(body.to_string());
                self.countdown.start(now);
                self.phase = RoundPhase::CountdownRunning;
                Transition::PromptAccepted
            }
            RoundPhase::LeaderTurn | RoundPhase::CountdownRunning
                if registry.gamer.is(sender) =>
            {
                registry.gamer.last_response = Some(body.to_string());
                self.countdown.cancel();
                self.phase = RoundPhase::Resolving;
                Transition::Answered
            }
            _ => Transition::Relayed,
        }
    }

    /// Advances a running countdown. Returns the remaining count to broadcast; once it
    /// is exhausted the phase moves to `Resolving`.
    pub fn on_tick(&mut self, now: Instant) -> Option<u8> {
        if self.phase != RoundPhase::CountdownRunning {
            return None;
        }
        let remaining = self.countdown.tick(now)?;
        if self.countdown.is_exhausted() {
            self.phase = RoundPhase::Resolving;
        }
        Some(remaining)
    }

    /// Decides the round. Only meaningful in `Resolving`.
    pub fn resolve(&mut self, registry: &Registry) -> Option<Outcome> {
        if self.phase != RoundPhase::Resolving {
            return None;
        }
        let is_time_over = self.countdown.is_exhausted();
        let winner = decide_winner(registry, is_time_over)?;
        self.phase = RoundPhase::RoleSwap;
        Some(Outcome {
            winner,
            is_time_over,
        })
    }

    /// Swaps leader and gamer and starts the next round.
    pub fn swap_roles(&mut self, registry: &mut Registry) {
        registry.swap_roles();
        self.restart(registry);
    }

    /// Clears per-round state and derives the waiting phase from the role slots.
    pub fn restart(&mut self, registry: &mut Registry) {
        registry.reset_responses();
        self.countdown.reset();
        self.phase = if registry.leader.is_vacant() {
            RoundPhase::AwaitingLeader
        } else if registry.gamer.is_vacant() {
            RoundPhase::AwaitingGamer
        } else {
            RoundPhase::LeaderTurn
        };
    }

    pub fn shut_down(&mut self) {
        self.countdown.cancel();
        self.phase = RoundPhase::Shutdown;
    }
}

/// Time over means the gamer failed to answer, so the leader wins. Otherwise the
/// gamer wins only with an exact, case-sensitive echo of the prompt.
pub fn decide_winner(registry: &Registry, is_time_over: bool) -> Option<String> {
    let leader = registry.leader.name.clone()?;
    if is_time_over {
        return Some(leader);
    }
    let echoed = registry.gamer.last_response.is_some()
        && registry.leader.last_response == registry.gamer.last_response;
    if echoed {
        registry.gamer.name.clone()
    } else {
        Some(leader)
    }
}

/// Announcement that opens a round, or `None` when nobody is connected.
pub fn round_announcement(registry: &Registry) -> Option<String> {
    match registry.remaining_count() {
        0 => None,
        _ if registry.both_assigned() => Some(format!(
            "Now {} lead, {} play",
            registry.leader.name.as_deref().unwrap_or_default(),
            registry.gamer.name.as_deref().unwrap_or_default()
        )),
        _ => Some(WAITING_USER.to_string()),
    }
}

pub const WAITING_USER: &str = "waiting for second user";
