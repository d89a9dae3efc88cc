//! Raw byte transport over one established connection
//!
//! A [`SocketChannel`] owns the two halves of a peer stream. Outbound
//! chunks from the capture fan-out go through a bounded queue drained by a
//! writer task, so `send` never blocks the capture thread. A reader task
//! forwards every chunk it reads to a [`ReceiveSink`] and periodically cuts
//! lag by discarding whatever backlog is already waiting on the socket.

use bytes::Bytes;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::audio::capture::FanoutTarget;
use crate::audio::playback::PlaybackPipeline;
use crate::config::SessionConfig;
use crate::error::AudioError;
use crate::network::transport::PeerStream;

/// Consumer of bytes read from the socket
pub trait ReceiveSink: Send + Sync {
    /// An error stops the reader without signalling a channel failure
    fn on_bytes_received(&self, data: &[u8]) -> Result<(), AudioError>;
}

impl ReceiveSink for PlaybackPipeline {
    fn on_bytes_received(&self, data: &[u8]) -> Result<(), AudioError> {
        PlaybackPipeline::on_bytes_received(self, data)
    }
}

/// Told when the channel fails on its own (read/write error or EOF)
pub trait ChannelObserver: Send + Sync {
    fn on_channel_error(&self);
}

/// Tuning shared by every channel of a session
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub read_chunk_size: usize,
    /// Reads between two lag-cuts
    pub lag_cut_period: u32,
    pub lag_cut_skip_limit: usize,
    pub outbound_queue_depth: usize,
}

impl From<&SessionConfig> for ChannelSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            read_chunk_size: config.read_chunk_size,
            lag_cut_period: config.lag_cut_period,
            lag_cut_skip_limit: config.lag_cut_skip_limit,
            outbound_queue_depth: config.outbound_queue_depth,
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// Channel counters
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub chunks_dropped: u64,
    pub bytes_skipped: u64,
}

struct ChannelShared {
    peer: String,
    cancel: CancellationToken,
    failed: AtomicBool,
    observer: Arc<dyn ChannelObserver>,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    chunks_dropped: AtomicU64,
    bytes_skipped: AtomicU64,
}

impl ChannelShared {
    /// Close the channel and report the failure, at most once and never
    /// after an explicit cancel
    fn fail(&self, reason: &str) {
        if self.cancel.is_cancelled() || self.failed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(peer = %self.peer, "Channel failed: {}", reason);
        self.cancel.cancel();
        self.observer.on_channel_error();
    }
}

/// One live socket to a remote peer
pub struct SocketChannel {
    shared: Arc<ChannelShared>,
    outbound: mpsc::Sender<Bytes>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SocketChannel {
    /// Split `stream` and spawn the reader and writer tasks
    pub fn start(
        peer: &str,
        stream: PeerStream,
        sink: Arc<dyn ReceiveSink>,
        observer: Arc<dyn ChannelObserver>,
        settings: &ChannelSettings,
    ) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(stream);
        let (outbound, queue) = mpsc::channel(settings.outbound_queue_depth.max(1));

        let shared = Arc::new(ChannelShared {
            peer: peer.to_string(),
            cancel: CancellationToken::new(),
            failed: AtomicBool::new(false),
            observer,
            bytes_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            bytes_skipped: AtomicU64::new(0),
        });

        let read_task = tokio::spawn(read_loop(reader, sink, shared.clone(), settings.clone()));
        let write_task = tokio::spawn(write_loop(writer, queue, shared.clone()));
        debug!(peer = %peer, "Channel started");

        Arc::new(Self {
            shared,
            outbound,
            tasks: Mutex::new(vec![read_task, write_task]),
        })
    }

    /// Stop both loops and close the socket. Idempotent, never reports
    /// a failure.
    pub fn cancel(&self) {
        if !self.shared.cancel.is_cancelled() {
            debug!(peer = %self.shared.peer, "Channel cancelled");
        }
        self.shared.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Wait for the reader and writer tasks to finish
    pub async fn join(&self) {
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            bytes_sent: self.shared.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.shared.bytes_received.load(Ordering::Relaxed),
            chunks_dropped: self.shared.chunks_dropped.load(Ordering::Relaxed),
            bytes_skipped: self.shared.bytes_skipped.load(Ordering::Relaxed),
        }
    }
}

impl FanoutTarget for SocketChannel {
    fn send(&self, data: Bytes) {
        if self.is_closed() {
            return;
        }
        match self.outbound.try_send(data) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                trace!(peer = %self.shared.peer, "Outbound queue full, chunk dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

/// Discard what is already readable, up to `limit` bytes, without waiting
fn skip_backlog(reader: &mut ReadHalf<PeerStream>, buf: &mut [u8], limit: usize) -> usize {
    let mut skipped = 0;
    while skipped < limit {
        let want = buf.len().min(limit - skipped);
        match reader.read(&mut buf[..want]).now_or_never() {
            Some(Ok(n)) if n > 0 => skipped += n,
            _ => break,
        }
    }
    skipped
}

async fn read_loop(
    mut reader: ReadHalf<PeerStream>,
    sink: Arc<dyn ReceiveSink>,
    shared: Arc<ChannelShared>,
    settings: ChannelSettings,
) {
    let mut buf = vec![0u8; settings.read_chunk_size.max(1)];
    let mut reads_until_cut = settings.lag_cut_period;

    loop {
        if reads_until_cut == 0 {
            let skipped = skip_backlog(&mut reader, &mut buf, settings.lag_cut_skip_limit);
            if skipped > 0 {
                shared.bytes_skipped.fetch_add(skipped as u64, Ordering::Relaxed);
                debug!(peer = %shared.peer, skipped, "Lag cut");
            }
            reads_until_cut = settings.lag_cut_period;
        }
        reads_until_cut = reads_until_cut.saturating_sub(1);

        let result = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            result = reader.read(&mut buf) => result,
        };

        match result {
            Ok(0) => {
                shared.fail("end of stream");
                break;
            }
            Ok(n) => {
                shared.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
                if let Err(e) = sink.on_bytes_received(&buf[..n]) {
                    debug!(peer = %shared.peer, "Receiver gone: {}", e);
                    break;
                }
            }
            Err(e) => {
                shared.fail(&e.to_string());
                break;
            }
        }
    }
}

async fn write_loop(
    mut writer: WriteHalf<PeerStream>,
    mut queue: mpsc::Receiver<Bytes>,
    shared: Arc<ChannelShared>,
) {
    loop {
        let chunk = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            chunk = queue.recv() => match chunk {
                Some(chunk) => chunk,
                None => break,
            },
        };

        let result = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            result = writer.write_all(&chunk) => result,
        };

        match result {
            Ok(()) => {
                shared.bytes_sent.fetch_add(chunk.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                shared.fail(&e.to_string());
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}

/// Adapter turning a closure into a [`ChannelObserver`]
pub struct ObserverFn<F>(pub F);

impl<F> ChannelObserver for ObserverFn<F>
where
    F: Fn() + Send + Sync,
{
    fn on_channel_error(&self) {
        (self.0)()
    }
}
