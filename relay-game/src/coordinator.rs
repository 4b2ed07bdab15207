//! Single owner of all round state.
//!
//! Connection tasks never touch the registry or the round controller. They forward
//! [`SessionEvent`]s over one queue and the coordinator applies them one at a time, so
//! the countdown, the gamer's answer and every broadcast are strictly ordered.

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use tokio::{
    select,
    sync::{mpsc, oneshot},
    time::{self, Instant},
};
use tracing::{debug, info, warn};

use crate::{
    config::GameConfig,
    message::GameMessage,
    registry::{Admission, Departure, Outbox, PeerId, Registry},
    round::{RoundController, RoundPhase, Transition, round_announcement},
};

const SHUTTING_DOWN: &str = "server shutting down";

#[derive(Debug)]
pub enum SessionEvent {
    Connected {
        peer: PeerId,
        addr: Option<SocketAddr>,
        outbox: Outbox,
        respond_to: oneshot::Sender<Admission>,
    },
    Message {
        peer: PeerId,
        message: GameMessage,
    },
    Disconnected {
        peer: PeerId,
    },
    Shutdown,
}

/// Cloneable entry point used by connection tasks to reach the coordinator.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
    next_id: Arc<AtomicU64>,
}

impl SessionHandle {
    pub fn next_peer_id(&self) -> PeerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn connect(
        &self,
        peer: PeerId,
        addr: Option<SocketAddr>,
        outbox: Outbox,
    ) -> Result<Admission> {
        let (respond_to, admission) = oneshot::channel();
        self.send(SessionEvent::Connected {
            peer,
            addr,
            outbox,
            respond_to,
        })?;
        admission.await.context("session closed before admission")
    }

    pub fn message(&self, peer: PeerId, message: GameMessage) -> Result<()> {
        self.send(SessionEvent::Message { peer, message })
    }

    pub fn disconnect(&self, peer: PeerId) {
        let _ = self.send(SessionEvent::Disconnected { peer });
    }

    pub fn shutdown(&self) {
        let _ = self.send(SessionEvent::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    fn send(&self, event: SessionEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| anyhow::anyhow!("session coordinator has stopped"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct Coordinator {
    events: mpsc::UnboundedReceiver<SessionEvent>,
    session: Session,
}

impl Coordinator {
    pub fn new(config: GameConfig) -> (Self, SessionHandle) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            events: events_tx,
            next_id: Arc::new(AtomicU64::new(1)),
        };
        let coordinator = Self {
            events,
            session: Session::new(config),
        };
        (coordinator, handle)
    }

    /// Processes events until shutdown, then closes every connection.
    pub async fn run(self) {
        let Coordinator {
            mut events,
            mut session,
        } = self;

        loop {
            let deadline = session.round.countdown().deadline();
            let tick = time::sleep_until(deadline.unwrap_or_else(Instant::now));

            select! {
                biased;
                event = events.recv() => {
                    let Some(event) = event else {
                        break;
                    };
                    if session.handle_event(event).await == Flow::Stop {
                        break;
                    }
                }
                () = tick, if deadline.is_some() => {
                    session.handle_tick().await;
                }
            }
        }

        session.registry.close_all();
        info!("session coordinator stopped");
    }
}

struct Session {
    config: GameConfig,
    registry: Registry,
    round: RoundController,
}

impl Session {
    fn new(config: GameConfig) -> Self {
        Self {
            registry: Registry::new(config.capacity),
            round: RoundController::new(&config),
            config,
        }
    }

    async fn handle_event(&mut self, event: SessionEvent) -> Flow {
        match event {
            SessionEvent::Connected {
                peer,
                addr,
                outbox,
                respond_to,
            } => {
                self.handle_connected(peer, addr, outbox, respond_to);
                Flow::Continue
            }
            SessionEvent::Message { peer, message } => self.handle_message(peer, message).await,
            SessionEvent::Disconnected { peer } => {
                self.handle_disconnected(peer);
                Flow::Continue
            }
            SessionEvent::Shutdown => {
                self.shut_down();
                Flow::Stop
            }
        }
    }

    fn handle_connected(
        &mut self,
        peer: PeerId,
        addr: Option<SocketAddr>,
        outbox: Outbox,
        respond_to: oneshot::Sender<Admission>,
    ) {
        let admission = self.registry.admit(peer, outbox);
        match admission {
            Admission::Accepted => info!(peer, ?addr, "client admitted"),
            Admission::Rejected(reason) => {
                warn!(peer, ?addr, reason = reason.message(), "connection rejected")
            }
        }
        if respond_to.send(admission).is_err() && admission == Admission::Accepted {
            self.registry.disconnect(peer);
        }
    }

    async fn handle_message(&mut self, peer: PeerId, message: GameMessage) -> Flow {
        if !self.registry.is_connected(peer) {
            debug!(peer, "dropping message from unadmitted peer");
            return Flow::Continue;
        }
        let sender = message.sender().to_string();

        if message.quit {
            self.registry.note_name(peer, &sender);
            let names = self.registry.disconnect(peer).unwrap_or_default();
            info!(peer, %sender, "client quit");
            self.depart(&names);
            return Flow::Continue;
        }

        debug!(%sender, body = %message.message, "message received");
        if self.config.is_shutdown(&message.message) {
            self.registry.clear_slot(&sender);
            self.shut_down();
            return Flow::Stop;
        }

        self.registry.note_name(peer, &sender);
        let transition = self.round.on_message(
            &mut self.registry,
            &sender,
            &message.message,
            Instant::now(),
        );
        match transition {
            Transition::RoleClaimed => self.announce_round(),
            Transition::PromptAccepted | Transition::Relayed => self.registry.broadcast(&message),
            Transition::Answered => {
                self.registry.broadcast(&message);
                self.finish_round().await;
            }
        }
        Flow::Continue
    }

    fn handle_disconnected(&mut self, peer: PeerId) {
        match self.registry.disconnect(peer) {
            Some(names) if names.is_empty() => info!(peer, "client disconnected before playing"),
            Some(names) => {
                info!(peer, ?names, "client disconnected");
                self.depart(&names);
            }
            None => {}
        }
    }

    async fn handle_tick(&mut self) {
        let Some(remaining) = self.round.on_tick(Instant::now()) else {
            return;
        };
        self.registry
            .broadcast(&GameMessage::server(remaining.to_string()));
        if self.round.phase() == RoundPhase::Resolving {
            self.finish_round().await;
        }
    }

    async fn finish_round(&mut self) {
        let Some(outcome) = self.round.resolve(&self.registry) else {
            self.round.restart(&mut self.registry);
            return;
        };
        let announcement = outcome.announcement();
        info!(
            winner = %outcome.winner,
            is_time_over = outcome.is_time_over,
            "{announcement}"
        );
        self.registry.broadcast(&GameMessage::server(announcement));

        time::sleep(self.config.cooldown()).await;

        self.round.swap_roles(&mut self.registry);
        self.announce_round();
    }

    /// Releases every slot held under one of `names` by a peer that just left, then
    /// restarts the round if any slot changed. A name some connected peer still sends
    /// under keeps its slot.
    fn depart(&mut self, names: &[String]) {
        let mut reseated = false;
        for name in names {
            if !self.registry.holds_slot(name) {
                continue;
            }
            if self.registry.is_claimed(name) {
                debug!(%name, "slot kept for another connected peer");
                continue;
            }
            let departure = self.registry.release(name);
            info!(%name, ?departure, "participant left");
            self.registry
                .broadcast(&GameMessage::server(departure.announcement(name)));
            reseated = true;
        }

        if reseated {
            self.round.restart(&mut self.registry);
            self.announce_round();
        } else if let Some(name) = names.last() {
            if !self.registry.is_claimed(name) {
                let departure = Departure::Unassigned;
                info!(%name, ?departure, "participant left");
                self.registry
                    .broadcast(&GameMessage::server(departure.announcement(name)));
            }
        }
    }

    fn announce_round(&self) {
        if let Some(text) = round_announcement(&self.registry) {
            info!(
                leader = ?self.registry.leader.name,
                gamer = ?self.registry.gamer.name,
                "{text}"
            );
            self.registry.broadcast(&GameMessage::server(text));
        }
    }

    fn shut_down(&mut self) {
        info!("application closing");
        self.round.shut_down();
        self.registry.broadcast(&GameMessage::server(SHUTTING_DOWN));
        self.registry.close_all();
    }
}
