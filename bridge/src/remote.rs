//! The "KPA500-Remote" compatible TCP protocol.
//!
//! Line-oriented `key::value` frames over TCP. The client logs in with
//! `server::login::<user>::<pass>`; after a valid login its control lines
//! are translated into device commands. State deltas stream to every
//! client, one key per loop iteration, seeded with a full snapshot on
//! connect. A bare newline is a keepalive in either direction.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use futures::StreamExt as _;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt as _};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, LinesCodec};

use crate::device::{ClientId, Device};
use crate::variant::Variant as _;

/// How long one loop iteration waits for a client line.
const LINE_POLL: Duration = Duration::from_millis(50);

/// Idle time after which the server emits a bare-newline keepalive.
const KEEPALIVE_AFTER: Duration = Duration::from_secs(15);

/// Clients that send nothing for this long are disconnected.
const RECEIVE_IDLE_LIMIT: Duration = Duration::from_secs(300);

const MAX_LINE_LENGTH: usize = 512;

const LOGIN_PREFIX: &str = "server::login::";

pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Accepts remote-protocol clients forever, one task per client.
pub async fn listen(
    listener: TcpListener,
    device: Arc<Device>,
    credentials: Arc<Credentials>,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        let peer = peer.to_string();
        tracing::info!(device = device.name(), %peer, "client connected");

        let device = device.clone();
        let credentials = credentials.clone();
        tokio::spawn(async move {
            if let Err(error) = serve_client(stream, &peer, &device, &credentials).await {
                tracing::warn!(device = device.name(), %peer, "client error: {error:#}");
            }
            tracing::info!(device = device.name(), %peer, "client disconnected");
        });
    }
}

/// Runs one client session until it disconnects or goes idle for too long.
pub async fn serve_client<S>(
    stream: S,
    peer: &str,
    device: &Device,
    credentials: &Credentials,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite,
{
    let (read_half, writer) = tokio::io::split(stream);
    let mut lines = FramedRead::new(read_half, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

    let client = device.subscribe(device.variant().snapshot_order());
    let result = client_loop(&mut lines, writer, peer, device, credentials, client).await;
    device.unsubscribe(client);

    result
}

async fn client_loop<R, W>(
    lines: &mut FramedRead<R, LinesCodec>,
    mut writer: W,
    peer: &str,
    device: &Device,
    credentials: &Credentials,
    client: ClientId,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut authorized = false;
    let mut last_activity = Instant::now();
    let mut last_receive = Instant::now();

    loop {
        match tokio::time::timeout(LINE_POLL, lines.next()).await {
            Err(_) => {} // poll deadline, nothing received
            Ok(None) => return Ok(()),
            Ok(Some(Err(error))) => return Err(error).context("client line framing"),
            Ok(Some(Ok(line))) => {
                last_activity = Instant::now();
                last_receive = last_activity;

                let message = line.trim();
                if message.is_empty() {
                    tracing::trace!(%peer, "keepalive from client");
                } else if let Some(rest) = message.strip_prefix(LOGIN_PREFIX) {
                    let response = login_response(rest, credentials, &mut authorized);
                    writer.write_all(response).await?;
                    writer.flush().await?;
                    last_activity = Instant::now();
                } else if authorized {
                    match device.variant().client_command(message) {
                        Some(commands) => device.enqueue(commands),
                        None => {
                            tracing::info!(%peer, %message, "unhandled message from client");
                        }
                    }
                } else {
                    tracing::debug!(%peer, %message, "ignoring message from unauthorized client");
                }
            }
        }

        // Send one outstanding update back.
        if let Some((key, value)) = device.pop_update(client) {
            writer.write_all(format!("{key}::{value}\n").as_bytes()).await?;
            writer.flush().await?;
            last_activity = Instant::now();
        }

        if last_activity.elapsed() > KEEPALIVE_AFTER {
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            last_activity = Instant::now();
            tracing::trace!(%peer, "keepalive to client");
        }

        if last_receive.elapsed() > RECEIVE_IDLE_LIMIT {
            tracing::info!(%peer, "closing client after receive idle limit");
            return Ok(());
        }
    }
}

fn login_response(
    rest: &str,
    credentials: &Credentials,
    authorized: &mut bool,
) -> &'static [u8] {
    let mut parts = rest.splitn(2, "::");
    let username = parts.next().unwrap_or_default();
    let password = parts.next().unwrap_or_default();

    if username != credentials.username {
        b"server::login::invalid::Invalid username provided. Remote control will not be allowed.\n"
    } else if password != credentials.password {
        b"server::login::invalid::Invalid password provided. Remote control will not be allowed.\n"
    } else {
        *authorized = true;
        b"server::login::valid\n"
    }
}
