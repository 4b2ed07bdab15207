use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use relay_game::{
    cli::{Cli, render_parse_error},
    server::Server,
};

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // Usage errors go to stdout, before any socket is opened.
            println!("{}", render_parse_error(&err));
            std::process::exit(err.exit_code());
        }
    };
    init_tracing();

    let listener = TcpListener::bind((cli.bind, cli.port)).await?;
    let server = Server::new(listener, cli.game_config());
    let addr = server.local_addr()?;
    info!("relay server listening on {}", addr);
    if let Err(err) = server.run_until_ctrl_c().await {
        warn!("server exited with error: {err:?}");
        return Err(err);
    }
    info!("server stopped");

    Ok(())
}
