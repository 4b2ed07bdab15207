use std::{future::Future, io, net::SocketAddr, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
    task::{JoinError, JoinHandle, JoinSet},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::GameConfig,
    coordinator::{Coordinator, SessionHandle},
    message::{GameMessage, read_message, write_message},
    registry::{Admission, PeerId},
};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

pub struct Server {
    listener: TcpListener,
    config: GameConfig,
}

impl Server {
    pub fn new(listener: TcpListener, config: GameConfig) -> Self {
        Self { listener, config }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts peers until `shutdown` resolves or a participant shuts the session down.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, config } = self;
        let (coordinator, session) = Coordinator::new(config);
        let mut coordinator = tokio::spawn(coordinator.run());
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    session.shutdown();
                    wait_for_coordinator(&mut coordinator).await;
                    break;
                }
                _ = &mut coordinator => {
                    info!("session ended, no longer accepting connections");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &session, &mut connections);
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        // Every outbox is gone by now, so each connection flushes and finishes.
        drop(listener);
        if timeout(DRAIN_TIMEOUT, drain(&mut connections)).await.is_err() {
            warn!("connections still open after shutdown, aborting them");
            connections.abort_all();
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

async fn wait_for_coordinator(coordinator: &mut JoinHandle<()>) {
    if let Err(err) = coordinator.await {
        warn!(error = ?err, "session coordinator failed");
    }
}

async fn drain(connections: &mut JoinSet<()>) {
    while connections.join_next().await.is_some() {}
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    session: &SessionHandle,
    connections: &mut JoinSet<()>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection(stream, peer, session, connections),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection(
    stream: TcpStream,
    addr: SocketAddr,
    session: &SessionHandle,
    connections: &mut JoinSet<()>,
) {
    let session = session.clone();
    connections.spawn(async move {
        if let Err(err) = handle_connection(stream, addr, session).await {
            warn!(peer = %addr, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    session: SessionHandle,
) -> Result<()> {
    info!(peer = %addr, "client connected");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let peer = session.next_peer_id();
    let (outbox, inbox) = mpsc::unbounded_channel();
    if let Admission::Rejected(reason) = session.connect(peer, Some(addr), outbox).await? {
        write_message(&mut writer, &GameMessage::server(reason.message())).await?;
        writer.shutdown().await?;
        return Ok(());
    }

    let mut outgoing = tokio::spawn(forward_outgoing(writer, inbox));
    let (result, writer_done) = select! {
        result = read_incoming(&session, peer, &mut reader) => (result, false),
        joined = &mut outgoing => {
            log_writer_exit(addr, joined);
            (Ok(()), true)
        }
    };

    session.disconnect(peer);
    if !writer_done {
        log_writer_exit(addr, outgoing.await);
    }

    result
}

/// Forwards frames from the peer to the coordinator until the peer quits or the
/// stream ends. A malformed frame ends the connection.
pub async fn read_incoming<R>(session: &SessionHandle, peer: PeerId, reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(message) = read_message(reader).await? {
        if message.username.is_none() {
            anyhow::bail!(io::Error::new(
                io::ErrorKind::InvalidData,
                "message without a username"
            ));
        }
        let quit = message.quit;
        session.message(peer, message)?;
        if quit {
            break;
        }
    }
    Ok(())
}

/// Writes everything the coordinator sends to this peer, then closes the write half
/// once the coordinator drops the outbox.
pub async fn forward_outgoing<W>(
    mut writer: W,
    mut inbox: mpsc::UnboundedReceiver<GameMessage>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = inbox.recv().await {
        write_message(&mut writer, &message).await?;
    }
    writer.shutdown().await
}

fn log_writer_exit(addr: SocketAddr, joined: Result<io::Result<()>, JoinError>) {
    match joined {
        Ok(Ok(())) => debug!(peer = %addr, "connection closed by server"),
        Ok(Err(err)) => debug!(peer = %addr, error = ?err, "failed to deliver message to client"),
        Err(err) => warn!(peer = %addr, error = ?err, "writer task failed"),
    }
}
