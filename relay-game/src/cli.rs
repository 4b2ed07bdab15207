use std::{net::IpAddr, time::Duration};

use clap::{CommandFactory, Parser, error::ErrorKind};

use crate::config::GameConfig;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Two-player relay game server", long_about = None)]
pub struct Cli {
    /// TCP port to listen on. Use 0 for an ephemeral port.
    pub port: u16,

    /// Address to bind the listening socket to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Length of one game time unit in milliseconds.
    #[arg(long, default_value_t = 1000, hide = true)]
    pub time_unit_ms: u64,
}

impl Cli {
    pub fn game_config(&self) -> GameConfig {
        GameConfig::with_time_unit(Duration::from_millis(self.time_unit_ms))
    }
}

/// Renders a parse failure for stdout. Argument errors always end with the usage line,
/// which clap only includes on its own for some error kinds.
pub fn render_parse_error(err: &clap::Error) -> String {
    let rendered = err.render().to_string();
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => rendered,
        _ if rendered.contains("Usage:") => rendered,
        _ => format!("{}\n{}", rendered.trim_end(), Cli::command().render_usage()),
    }
}
