use std::{net::SocketAddr, time::Duration};

use anyhow::{Context, Result, bail};
use relay_game::{
    config::GameConfig,
    message::{GameMessage, SERVER, read_message, write_message},
    server::Server,
};
use tokio::{
    io::{AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};

const READ_TIMEOUT: Duration = Duration::from_secs(3);
const WAITING: &str = "waiting for second user";

struct Peer {
    name: &'static str,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Peer {
    async fn connect(addr: SocketAddr, name: &'static str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            name,
            reader: BufReader::new(reader),
            writer,
        })
    }

    async fn say(&mut self, body: &str) -> Result<()> {
        write_message(&mut self.writer, &GameMessage::new(self.name, body)).await?;
        Ok(())
    }

    async fn quit(&mut self) -> Result<()> {
        write_message(&mut self.writer, &GameMessage::quit(self.name)).await?;
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<GameMessage>> {
        Ok(timeout(READ_TIMEOUT, read_message(&mut self.reader)).await??)
    }

    async fn expect(&mut self, sender: &str, body: &str) -> Result<()> {
        let message = self.next().await?.expect("connection closed early");
        assert_eq!((message.sender(), message.message.as_str()), (sender, body));
        Ok(())
    }

    async fn expect_server(&mut self, body: &str) -> Result<()> {
        self.expect(SERVER, body).await
    }

    /// Reads past earlier announcements this peer may or may not have been admitted
    /// in time to receive.
    async fn skip_until_server(&mut self, body: &str) -> Result<()> {
        loop {
            let message = self.next().await?.expect("connection closed early");
            if message.sender() == SERVER && message.message == body {
                return Ok(());
            }
        }
    }

    /// Hands reading to a background task so frames can be polled with a timeout
    /// without losing half-read lines. The peer never writes again.
    fn observe(self) -> Observer {
        let (frames_tx, frames) = mpsc::unbounded_channel();
        let mut reader = self.reader;
        tokio::spawn(async move {
            while let Ok(Some(message)) = read_message(&mut reader).await {
                if frames_tx.send(message).is_err() {
                    break;
                }
            }
        });
        Observer {
            _writer: self.writer,
            frames,
        }
    }
}

struct Observer {
    _writer: OwnedWriteHalf,
    frames: mpsc::UnboundedReceiver<GameMessage>,
}

impl Observer {
    async fn next(&mut self) -> Result<GameMessage> {
        timeout(READ_TIMEOUT, self.frames.recv())
            .await?
            .context("connection closed early")
    }
}

struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl TestServer {
    async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let server = Server::new(
            listener,
            GameConfig::with_time_unit(Duration::from_millis(100)),
        );
        let addr = server.local_addr()?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.await;
            };
            server.run_until(shutdown).await
        });

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    fn signal_shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }

    async fn stop(mut self) -> Result<()> {
        self.signal_shutdown();
        timeout(READ_TIMEOUT, self.task).await???;
        Ok(())
    }
}

/// Connects both peers and claims leader for `first`, gamer for `second`.
async fn seat(
    server: &TestServer,
    first: &'static str,
    second: &'static str,
) -> Result<(Peer, Peer)> {
    let mut leader = Peer::connect(server.addr, first).await?;
    leader.say("hi").await?;
    leader.expect_server(WAITING).await?;

    // Admission happens before a peer's first message is read, so both see the roles.
    let mut gamer = Peer::connect(server.addr, second).await?;
    gamer.say("hi").await?;
    let roles = format!("Now {first} lead, {second} play");
    leader.expect_server(&roles).await?;
    gamer.expect_server(&roles).await?;

    Ok((leader, gamer))
}

#[tokio::test]
async fn first_speaker_leads_regardless_of_connect_order() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = Peer::connect(server.addr, "alice").await?;
    let mut bob = Peer::connect(server.addr, "bob").await?;

    bob.say("me first").await?;
    bob.expect_server(WAITING).await?;

    alice.say("fine").await?;
    alice.skip_until_server("Now bob lead, alice play").await?;
    bob.expect_server("Now bob lead, alice play").await?;

    server.stop().await
}

#[tokio::test]
async fn echo_round_then_timeout_round() -> Result<()> {
    let server = TestServer::start().await?;
    let (mut alice, mut bob) = seat(&server, "alice", "bob").await?;

    alice.say("ping").await?;
    bob.expect("alice", "ping").await?;
    bob.say("ping").await?;
    alice.expect("alice", "ping").await?;

    for peer in [&mut alice, &mut bob] {
        loop {
            let message = peer.next().await?.expect("connection closed early");
            if message.sender() == "bob" {
                assert_eq!(message.message, "ping");
                break;
            }
            assert_eq!(message.sender(), SERVER, "only ticks precede the answer");
        }
        peer.expect_server("bob is a winner!").await?;
        peer.expect_server("Now bob lead, alice play").await?;
    }

    // Roles swapped: bob prompts now and alice stays silent.
    bob.say("pong").await?;
    for peer in [&mut alice, &mut bob] {
        peer.expect("bob", "pong").await?;
        for remaining in (0..=6).rev() {
            peer.expect_server(&remaining.to_string()).await?;
        }
        peer.expect_server("bob is a winner!").await?;
        peer.expect_server("Now alice lead, bob play").await?;
    }

    server.stop().await
}

#[tokio::test]
async fn third_connection_is_told_and_closed() -> Result<()> {
    let server = TestServer::start().await?;
    let (mut alice, mut bob) = seat(&server, "alice", "bob").await?;

    let mut carol = Peer::connect(server.addr, "carol").await?;
    carol.expect_server("server at capacity").await?;
    assert_eq!(carol.next().await?, None);

    // The session is untouched: alice still leads.
    alice.say("ping").await?;
    alice.expect("alice", "ping").await?;
    bob.expect("alice", "ping").await?;

    server.stop().await
}

#[tokio::test]
async fn quitting_leader_hands_over_and_frees_a_seat() -> Result<()> {
    let server = TestServer::start().await?;
    let (mut alice, mut bob) = seat(&server, "alice", "bob").await?;

    alice.quit().await?;
    assert_eq!(alice.next().await?, None);
    bob.expect_server("Leader has left the game").await?;
    bob.expect_server(WAITING).await?;

    let mut carol = Peer::connect(server.addr, "carol").await?;
    carol.say("hello").await?;
    let roles = "Now bob lead, carol play";
    bob.expect_server(roles).await?;
    carol.expect_server(roles).await?;

    server.stop().await
}

#[tokio::test]
async fn abrupt_disconnect_is_reconciled() -> Result<()> {
    let server = TestServer::start().await?;
    let (mut alice, bob) = seat(&server, "alice", "bob").await?;

    drop(bob);
    alice.expect_server("Gamer has left the game").await?;
    alice.expect_server(WAITING).await?;

    server.stop().await
}

#[tokio::test]
async fn malformed_frame_drops_only_that_peer() -> Result<()> {
    let server = TestServer::start().await?;
    let (mut alice, mut bob) = seat(&server, "alice", "bob").await?;

    bob.writer.write_all(b"{not json}\n").await?;
    alice.expect_server("Gamer has left the game").await?;
    alice.expect_server(WAITING).await?;
    assert_eq!(bob.next().await?, None);

    server.stop().await
}

#[tokio::test]
async fn shutdown_keyword_ends_the_server() -> Result<()> {
    let server = TestServer::start().await?;
    let (mut alice, mut bob) = seat(&server, "alice", "bob").await?;

    alice.say("SHUTDOWN").await?;
    for peer in [&mut alice, &mut bob] {
        peer.expect_server("server shutting down").await?;
        assert_eq!(peer.next().await?, None);
    }

    timeout(READ_TIMEOUT, server.task).await???;
    assert!(TcpStream::connect(server.addr).await.is_err());
    Ok(())
}

#[tokio::test]
async fn stopping_the_server_tells_every_peer() -> Result<()> {
    let mut server = TestServer::start().await?;
    let addr = server.addr;
    let (mut alice, mut bob) = seat(&server, "alice", "bob").await?;

    server.signal_shutdown();
    for peer in [&mut alice, &mut bob] {
        peer.expect_server("server shutting down").await?;
        assert_eq!(peer.next().await?, None);
    }

    server.stop().await?;
    assert!(TcpStream::connect(addr).await.is_err());
    Ok(())
}

#[tokio::test]
async fn lone_leader_leaving_is_announced_to_silent_peer() -> Result<()> {
    let server = TestServer::start().await?;
    let mut alice = Peer::connect(server.addr, "alice").await?;
    alice.say("hi").await?;
    alice.expect_server(WAITING).await?;

    // carol never speaks, so only alice's announcements show that carol was admitted.
    let mut carol = Peer::connect(server.addr, "carol").await?.observe();
    loop {
        alice.say("hi").await?;
        alice.expect_server(WAITING).await?;
        match timeout(Duration::from_millis(50), carol.frames.recv()).await {
            Ok(Some(_)) => break,
            Ok(None) => bail!("carol was disconnected"),
            Err(_) => continue,
        }
    }

    alice.quit().await?;
    assert_eq!(alice.next().await?, None);
    loop {
        let message = carol.next().await?;
        if message.message == "alice has left the game" {
            break;
        }
        assert_eq!(message, GameMessage::server(WAITING));
    }
    assert_eq!(carol.next().await?, GameMessage::server(WAITING));

    server.stop().await
}
