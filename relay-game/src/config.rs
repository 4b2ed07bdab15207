use std::time::Duration;

/// Number of participants a session holds at once.
pub const CAPACITY: usize = 2;

/// Ticks broadcast after a prompt before the round is awarded to the leader.
pub const COUNTDOWN_TICKS: u8 = 7;

/// Message body that stops the whole server, compared case-insensitively.
pub const SHUTDOWN_KEYWORD: &str = "shutdown";

/// Timing and rule constants for a session.
///
/// All delays derive from a single `time_unit` so tests can compress a round into a
/// few milliseconds without changing its shape.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub time_unit: Duration,
    pub countdown_ticks: u8,
    pub capacity: usize,
    pub shutdown_keyword: String,
}

impl GameConfig {
    pub fn with_time_unit(time_unit: Duration) -> Self {
        Self {
            time_unit,
            ..Self::default()
        }
    }

    /// The first tick comes early to absorb the prompt's round trip.
    pub fn first_tick_delay(&self) -> Duration {
        self.time_unit / 10
    }

    pub fn tick_delay(&self) -> Duration {
        self.time_unit * 9 / 10
    }

    /// Pause after a winner is announced, before the next round starts.
    pub fn cooldown(&self) -> Duration {
        self.time_unit
    }

    pub fn is_shutdown(&self, body: &str) -> bool {
        body.eq_ignore_ascii_case(&self.shutdown_keyword)
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            time_unit: Duration::from_secs(1),
            countdown_ticks: COUNTDOWN_TICKS,
            capacity: CAPACITY,
            shutdown_keyword: SHUTDOWN_KEYWORD.to_string(),
        }
    }
}
