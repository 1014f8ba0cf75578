//! Subscriber Delivery Loop
//!
//! One task per connection. Waits on the subscriber's inbox and an idle
//! keep-alive timer, writes the matching frame to the connection's sink and
//! flushes it. A failed write or flush is treated as a dead connection.
//! Every exit path unregisters the subscriber.

use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::coord::Coordinate;
use crate::feed::registry::{SubscriberId, SubscriberRegistry};
use crate::network::frame::{format_event, keepalive_frame, CURRENT_VALUE_EVENT};
use crate::DEFAULT_KEEPALIVE_INTERVAL_MS;

/// Sink errors. Any of these ends the subscriber's stream.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The remote end is gone.
    #[error("Stream closed")]
    Closed,

    /// Underlying writer failed.
    #[error("Write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte-stream sink a delivery loop writes frames to.
#[async_trait]
pub trait FrameSink: Send {
    /// Queue a frame for sending.
    async fn write(&mut self, frame: Bytes) -> Result<(), SinkError>;

    /// Push queued frames to the remote end.
    async fn flush(&mut self) -> Result<(), SinkError>;
}

/// Sink feeding a streaming HTTP response body through a bounded channel.
///
/// Writes accumulate locally; `flush` hands them to the body as one chunk.
/// Once the body is dropped (client disconnected) every call fails.
pub struct ChannelSink {
    tx: mpsc::Sender<Bytes>,
    pending: BytesMut,
}

impl ChannelSink {
    /// Create a sink and the receiver the response body drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self { tx, pending: BytesMut::new() }, rx)
    }
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn write(&mut self, frame: Bytes) -> Result<(), SinkError> {
        if self.tx.is_closed() {
            return Err(SinkError::Closed);
        }
        self.pending.extend_from_slice(&frame);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = self.pending.split().freeze();
        self.tx.send(chunk).await.map_err(|_| SinkError::Closed)
    }
}

/// Sink over any async writer (raw socket, pipe, file).
pub struct IoSink<W> {
    writer: W,
}

impl<W> IoSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> FrameSink for IoSink<W> {
    async fn write(&mut self, frame: Bytes) -> Result<(), SinkError> {
        self.writer.write_all(&frame).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Delivery configuration.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Idle time after which a keep-alive is written.
    pub keepalive_interval: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_millis(DEFAULT_KEEPALIVE_INTERVAL_MS),
        }
    }
}

/// Why a delivery loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryExit {
    /// Write or flush failed.
    WriteFailed,
    /// The connection was cancelled from outside.
    Cancelled,
    /// The registry dropped the subscriber's inbox.
    InboxClosed,
}

/// Per-connection delivery task. `T` is the update payload, a
/// [`Coordinate`] for position streams.
pub struct DeliveryLoop<S, T = Coordinate> {
    /// Subscriber this loop serves.
    id: SubscriberId,
    /// Updates from the scheduler.
    inbox: mpsc::Receiver<T>,
    /// Connection output.
    sink: S,
    /// Registry to leave on exit.
    registry: Arc<SubscriberRegistry>,
    /// Delivery configuration.
    config: DeliveryConfig,
    /// Fires when the transport sees the client go away.
    cancel: CancellationToken,
    /// Frames written and flushed.
    frames_sent: u64,
}

impl<S: FrameSink, T: Serialize + Send> DeliveryLoop<S, T> {
    /// Create a loop for subscriber `id`.
    pub fn new(
        id: SubscriberId,
        inbox: mpsc::Receiver<T>,
        sink: S,
        registry: Arc<SubscriberRegistry>,
        config: DeliveryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            inbox,
            sink,
            registry,
            config,
            cancel,
            frames_sent: 0,
        }
    }

    /// Stream frames until the connection dies, is cancelled, or the inbox closes.
    #[instrument(skip_all, fields(subscriber = %self.id))]
    pub async fn run(mut self) -> DeliveryExit {
        let period = self.config.keepalive_interval;
        let mut keepalive = interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    break DeliveryExit::Cancelled;
                }
                update = self.inbox.recv() => {
                    let Some(update) = update else {
                        break DeliveryExit::InboxClosed;
                    };
                    let frame = match format_event(CURRENT_VALUE_EVENT, &update) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "Error formatting frame, skipped");
                            continue;
                        }
                    };
                    if let Some(exit) = self.deliver(frame).await {
                        break exit;
                    }
                    keepalive.reset();
                }
                _ = keepalive.tick() => {
                    if let Some(exit) = self.deliver(keepalive_frame()).await {
                        break exit;
                    }
                }
            }
        };

        drop(keepalive);
        self.registry.remove(self.id).await;
        info!(reason = ?exit, frames = self.frames_sent, "Exiting stream");

        exit
    }

    /// Write and flush one frame. Returns the exit reason if the loop must stop.
    async fn deliver(&mut self, frame: Bytes) -> Option<DeliveryExit> {
        let cancel = self.cancel.clone();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Some(DeliveryExit::Cancelled),
            result = self.write_and_flush(frame) => match result {
                Ok(()) => None,
                Err(e) => {
                    warn!(error = %e, "Error writing to stream");
                    Some(DeliveryExit::WriteFailed)
                }
            },
        }
    }

    async fn write_and_flush(&mut self, frame: Bytes) -> Result<(), SinkError> {
        self.sink.write(frame).await?;
        self.sink.flush().await?;
        self.frames_sent += 1;
        Ok(())
    }
}
