use anyhow::{bail, Context, Result};
use crossbeam_channel::Sender;
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::buffers::SampleSink;
use crate::core::ChannelId;
use crate::observability::StreamMetrics;
use crate::protocol::WireParser;

pub const DEFAULT_TCP_PORT: u16 = 8888;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Connection lifecycle and data notifications from the socket reader
#[derive(Debug, Clone, PartialEq)]
pub enum TcpEvent {
    Listening(SocketAddr),
    Connected(SocketAddr),
    /// A second peer tried to connect while one was active
    Rejected(SocketAddr),
    DataReceived { channel: ChannelId, points: usize },
    Disconnected(SocketAddr),
    Error(String),
}

/// Everything a connection task needs, cloned per connection
#[derive(Clone)]
struct ReaderContext {
    sink: Arc<dyn SampleSink>,
    events: Sender<TcpEvent>,
    metrics: Arc<StreamMetrics>,
    active: Arc<AtomicBool>,
}

/// Receives sample packets from a single remote producer.
///
/// Works either as a server that accepts one peer at a time or as a client
/// that dials out. Each connection owns its own parser; bytes left over from a
/// partial packet are dropped when the connection closes.
///
/// Shutdown is a latched flag: tasks started after `shutdown()` see it too, and
/// a receiver that has been shut down cannot listen or connect again.
pub struct TcpReceiver {
    ctx: ReaderContext,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl TcpReceiver {
    /// `events` may be bounded: `DataReceived` is dropped when it is full,
    /// lifecycle events wait for room.
    pub fn new(sink: Arc<dyn SampleSink>, events: Sender<TcpEvent>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            ctx: ReaderContext {
                sink,
                events,
                metrics: Arc::new(StreamMetrics::new("tcp")),
                active: Arc::new(AtomicBool::new(false)),
            },
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        self.ctx.metrics.clone()
    }

    /// Whether a peer is currently connected
    pub fn is_connected(&self) -> bool {
        self.ctx.active.load(Ordering::SeqCst)
    }

    /// Start accepting peers on all interfaces; port 0 picks an ephemeral port
    pub async fn listen(&mut self, port: u16) -> Result<SocketAddr> {
        self.ensure_open()?;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("Failed to listen on port {}", port))?;
        let addr = listener.local_addr()?;

        info!("TCP receiver listening on {}", addr);
        let _ = self.ctx.events.send(TcpEvent::Listening(addr));

        let ctx = self.ctx.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.tasks
            .push(tokio::spawn(accept_loop(listener, ctx, shutdown_rx)));

        Ok(addr)
    }

    /// Dial a remote producer and read from it until it disconnects
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<()> {
        self.ensure_open()?;
        let stream = TcpStream::connect((host, port))
            .await
            .with_context(|| format!("Failed to connect to {}:{}", host, port))?;
        let peer = stream.peer_addr()?;

        self.ctx.active.store(true, Ordering::SeqCst);
        let ctx = self.ctx.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        self.tasks
            .push(tokio::spawn(read_connection(stream, peer, ctx, shutdown_rx)));

        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if *self.shutdown_tx.borrow() {
            bail!("TCP receiver has been shut down");
        }
        Ok(())
    }

    /// Ask every reader to stop at its next read and wait for them
    pub async fn shutdown(&mut self) {
        self.shutdown_tx.send_replace(true);
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("TCP reader task failed: {}", e);
            }
        }
    }
}

impl Drop for TcpReceiver {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Resolves once shutdown has been requested, including before the call
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn accept_loop(
    listener: TcpListener,
    ctx: ReaderContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connection: Option<JoinHandle<()>> = None;

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if *shutdown_rx.borrow() {
                        drop(stream);
                        break;
                    }
                    if ctx.active.swap(true, Ordering::SeqCst) {
                        warn!("Rejected connection from {}, a peer is already connected", peer);
                        let _ = ctx.events.send(TcpEvent::Rejected(peer));
                        drop(stream);
                    } else {
                        // The previous reader has already finished
                        if let Some(previous) = connection.take() {
                            let _ = previous.await;
                        }
                        connection = Some(tokio::spawn(read_connection(
                            stream,
                            peer,
                            ctx.clone(),
                            shutdown_rx.clone(),
                        )));
                    }
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                    ctx.metrics.record_error();
                    let _ = ctx.events.send(TcpEvent::Error(e.to_string()));
                }
            }
        }
    }

    if let Some(current) = connection {
        let _ = current.await;
    }
    debug!("Accept loop finished");
}

async fn read_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    ctx: ReaderContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Peer connected: {}", peer);
    let _ = ctx.events.send(TcpEvent::Connected(peer));

    let mut parser = WireParser::new();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown_rx) => break,
            read = stream.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    let cycle = ctx.metrics.start_cycle();
                    ctx.metrics.record_bytes(n);

                    for packet in parser.feed(&buf[..n]) {
                        let channel = packet.channel;
                        let points = packet.samples.len();
                        ctx.sink.push_samples(channel, packet.samples);
                        ctx.metrics.record_batch(points);
                        // Data notifications are advisory; a full queue drops them
                        let _ = ctx.events.try_send(TcpEvent::DataReceived { channel, points });
                    }

                    ctx.metrics.finish_cycle(cycle);
                }
                Err(e) => {
                    error!("Read error from {}: {}", peer, e);
                    ctx.metrics.record_error();
                    let _ = ctx.events.send(TcpEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    }

    let stats = parser.stats();
    if parser.pending_len() > 0 {
        debug!("Discarding {} residual bytes from {}", parser.pending_len(), peer);
    }
    parser.reset();
    info!(
        "Peer disconnected: {} ({} packets, {} dropped, {} bytes skipped)",
        peer, stats.packets_decoded, stats.packets_dropped, stats.bytes_discarded
    );

    ctx.active.store(false, Ordering::SeqCst);
    let _ = ctx.events.send(TcpEvent::Disconnected(peer));
}
