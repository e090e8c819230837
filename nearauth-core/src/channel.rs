//! Proxy channel: framed request/response over an async byte stream, bounded by a timeout.
//!
//! Every `request` gets its own result slot: the response is read by a task spawned
//! for that call and delivered through a oneshot. If the caller times out, the read
//! task still consumes the late frame and drops it into a slot nobody listens to,
//! so the next call reads its own response. Dropping the channel stops any such
//! task, which releases the connection and closes it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, watch, Mutex};
use tokio::time::Instant;

use crate::pairing::Pairing;
use crate::wire::{self, FrameDecodeError, MAX_FRAME_LEN};

/// Default bound on a single request/response round trip.
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_millis(20_000);

/// A bidirectional byte stream a channel can run on.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Connection for T {}

pub type BoxedConnection = Box<dyn Connection>;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Frame(#[from] FrameDecodeError),
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot open channel: {0}")]
    Open(String),
}

/// Opens connections to a paired service. Implementations (direct, rendezvous relay, ...) are chosen at configuration time.
#[async_trait]
pub trait ChannelFactory: Send + Sync {
    async fn open(&self, pairing: &Pairing) -> Result<BoxedConnection, ChannelError>;

    /// Short label for logs.
    fn kind(&self) -> &'static str;
}

pub struct ProxyChannel {
    reader: Arc<Mutex<ReadHalf<BoxedConnection>>>,
    writer: Mutex<WriteHalf<BoxedConnection>>,
    timeout: Duration,
    max_frame_len: usize,
    /// Dropped with the channel; read tasks watch it and give up their half of the connection.
    shutdown: watch::Sender<()>,
}

impl ProxyChannel {
    pub fn new(connection: BoxedConnection, timeout: Duration) -> Self {
        let (reader, writer) = tokio::io::split(connection);
        Self {
            reader: Arc::new(Mutex::new(reader)),
            writer: Mutex::new(writer),
            timeout,
            max_frame_len: MAX_FRAME_LEN,
            shutdown: watch::channel(()).0,
        }
    }

    /// Open a channel to `pairing` through `factory`.
    pub async fn open(
        factory: &dyn ChannelFactory,
        pairing: &Pairing,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let connection = tokio::time::timeout(timeout, factory.open(pairing))
            .await
            .map_err(|_| ChannelError::Timeout(timeout))??;
        Ok(Self::new(connection, timeout))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Write one length-prefixed frame and flush.
    pub async fn send(&self, message: &[u8]) -> Result<(), ChannelError> {
        self.send_until(message, Instant::now() + self.timeout).await
    }

    /// Send `message`, then wait for one complete response frame. The whole round trip shares one timeout.
    pub async fn request(&self, message: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let deadline = Instant::now() + self.timeout;
        self.send_until(message, deadline).await?;
        self.receive_until(deadline).await
    }

    /// Wait for the next frame from the peer (e.g. a challenge the peer speaks first).
    pub async fn receive(&self) -> Result<Vec<u8>, ChannelError> {
        self.receive_until(Instant::now() + self.timeout).await
    }

    async fn send_until(&self, message: &[u8], deadline: Instant) -> Result<(), ChannelError> {
        let write = async {
            let mut writer = self.writer.lock().await;
            wire::write_frame(&mut *writer, message).await
        };
        tokio::time::timeout_at(deadline, write)
            .await
            .map_err(|_| ChannelError::Timeout(self.timeout))??;
        Ok(())
    }

    async fn receive_until(&self, deadline: Instant) -> Result<Vec<u8>, ChannelError> {
        let (slot, result) = oneshot::channel();
        let reader = self.reader.clone();
        let max_len = self.max_frame_len;
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            let read = async {
                let mut reader = reader.lock().await;
                wire::read_frame(&mut *reader, max_len).await
            };
            tokio::select! {
                frame = read => {
                    // The caller may have timed out already; the frame is then discarded here.
                    let _ = slot.send(frame);
                }
                // Only errors once the channel is gone.
                _ = shutdown.changed() => {}
            }
        });
        match tokio::time::timeout_at(deadline, result).await {
            Ok(Ok(Ok(frame))) => Ok(frame),
            Ok(Ok(Err(e))) => Err(e.into()),
            Ok(Err(_)) => Err(ChannelError::Frame(FrameDecodeError::Closed)),
            Err(_) => Err(ChannelError::Timeout(self.timeout)),
        }
    }
}

impl std::fmt::Debug for ProxyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyChannel")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
