use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Sender name reserved for records authored by the server itself.
pub const SERVER: &str = "SERVER";

/// Terminates every record on the wire. Compact JSON never contains a raw newline.
pub const FRAME_DELIMITER: u8 = b'\n';

/// The unit exchanged with peers, in both directions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameMessage {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub quit: bool,
}

impl GameMessage {
    pub fn new(username: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            message: message.into(),
            quit: false,
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(SERVER, message)
    }

    pub fn quit(username: impl Into<String>) -> Self {
        Self {
            quit: true,
            ..Self::new(username, "")
        }
    }

    pub fn sender(&self) -> &str {
        self.username.as_deref().unwrap_or(SERVER)
    }
}

/// Reads the next framed record. Returns `Ok(None)` once the peer closed the stream.
///
/// Bytes are accumulated until [`FRAME_DELIMITER`]; a trailing partial frame at EOF is
/// discarded. Decode failures surface as [`io::ErrorKind::InvalidData`].
pub async fn read_message<R>(reader: &mut R) -> io::Result<Option<GameMessage>>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::new();
    loop {
        frame.clear();
        let bytes = reader.read_until(FRAME_DELIMITER, &mut frame).await?;
        if bytes == 0 || frame.last() != Some(&FRAME_DELIMITER) {
            return Ok(None);
        }

        let payload = trim_frame(&frame);
        if payload.is_empty() {
            continue;
        }

        let parsed = serde_json::from_slice(payload).map_err(to_io_error)?;
        return Ok(Some(parsed));
    }
}

pub async fn write_message<W>(writer: &mut W, message: &GameMessage) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(FRAME_DELIMITER);
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn trim_frame(frame: &[u8]) -> &[u8] {
    let mut end = frame.len();
    while end > 0 && matches!(frame[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &frame[..end]
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
