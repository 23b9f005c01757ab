//! Greeting sink — swaps one line of text with every peer met.

use std::io;
use std::time::Duration;

use encounter_engine::{ByteStream, EncounterSink, PeerAddress, Role};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GreetingSink {
    greeting: String,
}

impl GreetingSink {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }
}

impl EncounterSink for GreetingSink {
    fn on_connected(&self, channel: ByteStream, address: PeerAddress, role: Role) {
        let greeting = self.greeting.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(EXCHANGE_TIMEOUT, exchange(channel, &greeting)).await {
                Ok(Ok(reply)) => info!("{address} ({role}) says: {reply}"),
                Ok(Err(e)) => warn!("Greeting exchange with {address} failed: {e}"),
                Err(_) => warn!("Greeting exchange with {address} timed out"),
            }
        });
    }
}

/// Send `greeting` as one line and read the peer's line back. The stream is
/// dropped on return, which ends the encounter.
pub async fn exchange(mut channel: ByteStream, greeting: &str) -> io::Result<String> {
    let mut frame = Vec::with_capacity(greeting.len() + 1);
    frame.extend_from_slice(greeting.as_bytes());
    frame.push(b'\n');
    channel.write_all(&frame).await?;
    channel.flush().await?;

    let mut reader = BufReader::new(channel);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "peer closed before greeting",
        ));
    }
    Ok(line.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use encounter_engine::ChannelHandle;

    fn pair() -> (ByteStream, ByteStream) {
        let (a, b) = tokio::io::duplex(256);
        (
            ByteStream::new(ChannelHandle::new(), a),
            ByteStream::new(ChannelHandle::new(), b),
        )
    }

    #[tokio::test]
    async fn test_exchange_swaps_lines() {
        let (a, b) = pair();
        let (from_b, from_a) = tokio::join!(exchange(a, "hello from AA"), exchange(b, "hi from BB"));
        assert_eq!(from_b.unwrap(), "hi from BB");
        assert_eq!(from_a.unwrap(), "hello from AA");
    }

    #[tokio::test]
    async fn test_exchange_with_silent_peer_fails() {
        let (a, b) = pair();
        let handle = b.handle().clone();
        drop(b);
        assert!(handle.is_ended());

        let err = exchange(a, "anyone there?").await.unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe
        ));
    }

    #[tokio::test]
    async fn test_exchange_ends_the_stream() {
        let (a, b) = pair();
        let handle = a.handle().clone();
        let _ = tokio::join!(exchange(a, "x"), exchange(b, "y"));
        assert!(handle.is_ended());
    }
}
