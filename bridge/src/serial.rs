//! Byte-level access to a device's serial port.
//!
//! The link is generic over the underlying stream so tests can substitute
//! an in-memory pipe for the real port.

use std::io;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::time::timeout;
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt as _, SerialStream, StopBits};

/// Both devices talk 38400 8N1 without flow control.
pub const BAUD_RATE: u32 = 38_400;

/// Any single reply fits in this buffer.
const REPLY_BUFFER_SIZE: usize = 16;

/// Poll granularity when draining stale bytes.
const DRAIN_POLL: Duration = Duration::from_millis(1);

/// How long to keep gathering once the first reply bytes arrived.
const SETTLE_POLL: Duration = Duration::from_millis(10);

pub fn open(path: &str) -> Result<SerialStream> {
    tokio_serial::new(path, BAUD_RATE)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .with_context(|| format!("failed to open serial port {path}"))
}

pub struct SerialLink<S> {
    stream: S,
}

impl<S> SerialLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Writes `command` and waits up to `wait` for a reply.
    ///
    /// Stale receive bytes are drained (and logged) before the write. The
    /// reply is gathered until its `;` terminator or until the line goes
    /// quiet; an empty reply after the full wait is not an error. With
    /// `attempts > 1` the whole exchange is repeated on an empty reply.
    pub async fn send_receive(
        &mut self,
        command: &[u8],
        wait: Duration,
        attempts: u32,
    ) -> io::Result<Vec<u8>> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            self.drain_stale(command).await?;

            self.stream.write_all(command).await?;
            self.stream.flush().await?;

            let reply = self.collect_reply(wait).await?;
            if !reply.is_empty() {
                return Ok(reply);
            }
            if attempt < attempts {
                tracing::debug!(command = %String::from_utf8_lossy(command), "empty reply, retrying");
            }
        }

        Ok(Vec::new())
    }

    async fn drain_stale(&mut self, command: &[u8]) -> io::Result<()> {
        let mut stale = Vec::new();
        let mut buffer = [0u8; REPLY_BUFFER_SIZE];

        loop {
            match timeout(DRAIN_POLL, self.stream.read(&mut buffer)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(read)) => stale.extend_from_slice(&buffer[..read]),
                Ok(Err(error)) => return Err(error),
            }
        }

        if !stale.is_empty() {
            tracing::warn!(
                command = %String::from_utf8_lossy(command),
                stale = %String::from_utf8_lossy(&stale),
                "rx buffer was not empty before send"
            );
        }

        Ok(())
    }

    async fn collect_reply(&mut self, wait: Duration) -> io::Result<Vec<u8>> {
        let mut reply = Vec::new();
        let mut buffer = [0u8; REPLY_BUFFER_SIZE];

        // Wait for the first bytes, returning as soon as any arrive.
        match timeout(wait, self.stream.read(&mut buffer)).await {
            Ok(Ok(0)) | Err(_) => return Ok(reply),
            Ok(Ok(read)) => reply.extend_from_slice(&buffer[..read]),
            Ok(Err(error)) => return Err(error),
        }

        // Gather the rest until the terminator, a quiet line, or the
        // buffer limit.
        while !reply.ends_with(b";") && reply.len() < REPLY_BUFFER_SIZE {
            match timeout(SETTLE_POLL, self.stream.read(&mut buffer)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(read)) => reply.extend_from_slice(&buffer[..read]),
                Ok(Err(error)) => return Err(error),
            }
        }

        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};

    const WAIT: Duration = Duration::from_millis(500);

    #[tokio::test(start_paused = true)]
    async fn send_receive_returns_the_reply() {
        let (ours, mut theirs) = tokio::io::duplex(64);
        let mut link = SerialLink::new(ours);

        let peer = tokio::spawn(async move {
            let mut buffer = [0u8; 16];
            let read = theirs.read(&mut buffer).await.expect("read command");
            assert_eq!(&buffer[..read], b"^ON;");
            theirs.write_all(b"^ON1;").await.expect("write reply");
            theirs
        });

        let reply = link.send_receive(b"^ON;", WAIT, 1).await.expect("exchange");
        assert_eq!(reply, b"^ON1;");
        peer.await.expect("peer");
    }

    #[tokio::test(start_paused = true)]
    async fn silence_yields_an_empty_reply() {
        let (ours, _theirs) = tokio::io::duplex(64);
        let mut link = SerialLink::new(ours);

        let reply = link.send_receive(b";", WAIT, 1).await.expect("exchange");
        assert!(reply.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_reply_triggers_one_retry() {
        let (ours, mut theirs) = tokio::io::duplex(64);
        let mut link = SerialLink::new(ours);

        let peer = tokio::spawn(async move {
            let mut buffer = [0u8; 16];
            // Ignore the first attempt, answer the second.
            let read = theirs.read(&mut buffer).await.expect("first attempt");
            assert_eq!(&buffer[..read], b"^TM;");
            let read = theirs.read(&mut buffer).await.expect("second attempt");
            assert_eq!(&buffer[..read], b"^TM;");
            theirs.write_all(b"^TM028;").await.expect("write reply");
            theirs
        });

        let reply = link.send_receive(b"^TM;", WAIT, 2).await.expect("exchange");
        assert_eq!(reply, b"^TM028;");
        peer.await.expect("peer");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_bytes_are_drained_before_the_send() {
        let (ours, mut theirs) = tokio::io::duplex(64);
        let mut link = SerialLink::new(ours);

        theirs.write_all(b"^WS000 000;").await.expect("stale bytes");
        tokio::task::yield_now().await;

        let peer = tokio::spawn(async move {
            let mut buffer = [0u8; 16];
            let read = theirs.read(&mut buffer).await.expect("read command");
            assert_eq!(&buffer[..read], b"^VI;");
            theirs.write_all(b"^VI58 012;").await.expect("write reply");
            theirs
        });

        let reply = link.send_receive(b"^VI;", WAIT, 1).await.expect("exchange");
        assert_eq!(reply, b"^VI58 012;");
        peer.await.expect("peer");
    }
}
