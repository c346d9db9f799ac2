use acqlab::analysis::SpectralEngine;
use acqlab::buffers::SampleBuffer;
use acqlab::config::{ConfigManager, TcpMode};
use acqlab::engine::{AcquisitionEvent, AcquisitionSession, TcpEvent, TcpReceiver};
use acqlab::hal::mock::SimulatedAdc;
use acqlab::observability::{AcquisitionMonitor, MetricsCollector};
use acqlab::protocol::{encode_packet, TCP_CHANNELS};
use acqlab::storage::{persist_capture, JsonExporter, JsonFileStore, TaskInfo};
use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

const DEFAULT_CONFIG_PATH: &str = "acqlab.json";

/// Rate of the loopback sender; remote producers announce their own per packet
const TCP_SAMPLE_RATE: f64 = 100.0;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let manager = ConfigManager::new(&config_path);
    let config = manager.load().await?;
    info!("Loaded configuration from {}", manager.path().display());

    // Hardware path against the simulator
    let buffer = Arc::new(SampleBuffer::with_capacity(config.buffer.max_capacity));
    let mut session = AcquisitionSession::new(buffer.clone());
    session.configure(config.acquisition.clone())?;

    let backend = Arc::new(SimulatedAdc::new().with_sample_rate(config.acquisition.sample_rate));
    session.start(backend)?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    for event in session.poll_events() {
        match event {
            AcquisitionEvent::Status(status) => info!("{}", status),
            AcquisitionEvent::Error(message) => warn!("Acquisition error: {}", message),
            _ => {}
        }
    }
    // Joining the producer thread blocks, keep it off the runtime workers
    let session = tokio::task::spawn_blocking(move || -> Result<AcquisitionSession> {
        let mut session = session;
        session.stop()?;
        Ok(session)
    })
    .await
    .context("Acquisition stop task failed")??;
    info!("Session finished in state {}", session.state().name());

    // Socket path fed by a local sender
    let tcp_buffer = Arc::new(SampleBuffer::with_capacity(config.buffer.max_capacity));
    let (tcp_tx, tcp_rx) = crossbeam_channel::unbounded();
    let mut receiver = TcpReceiver::new(tcp_buffer.clone(), tcp_tx);
    match config.tcp.mode {
        TcpMode::Server => {
            let addr = receiver.listen(0).await?;
            send_demo_packets(addr.port()).await?;
        }
        TcpMode::Client => {
            if let Err(e) = receiver.connect(&config.tcp.host, config.tcp.port).await {
                warn!("No remote producer available: {:#}", e);
            }
        }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
    receiver.shutdown().await;
    for event in tcp_rx.try_iter() {
        if let TcpEvent::DataReceived { channel, points } = event {
            info!("TCP channel {} received {} points", channel, points);
        }
    }

    // Analyse and persist what both paths captured
    let store = JsonFileStore::open(&config.storage.data_dir).await?;

    let mut task = TaskInfo::new(
        "simulated acquisition",
        config.acquisition.sample_rate,
        config.acquisition.enabled_channels.clone(),
    );
    task.description = format!("demo run against {}", config.acquisition.device_uri);
    store_and_export(&store, &config.storage.data_dir, task, &buffer).await?;

    let tcp_channels = TCP_CHANNELS.map(|channel| channel as usize).collect();
    let mut tcp_task = TaskInfo::new("tcp capture", TCP_SAMPLE_RATE, tcp_channels);
    tcp_task.description = format!("{:?} mode receiver", config.tcp.mode);
    store_and_export(&store, &config.storage.data_dir, tcp_task, &tcp_buffer).await?;

    let mut collector = MetricsCollector::new();
    collector.register(session.metrics());
    collector.register(receiver.metrics());
    println!("{}", AcquisitionMonitor::new(collector).generate_report());

    Ok(())
}

async fn send_demo_packets(port: u16) -> Result<()> {
    let mut stream = TcpStream::connect(("127.0.0.1", port))
        .await
        .context("Failed to connect to local receiver")?;

    let sample_rate = TCP_SAMPLE_RATE;
    for block in 0..5u32 {
        for channel in 1..=2u32 {
            let start_time = f64::from(block) * 0.1;
            let amplitudes: Vec<f64> = (0..10)
                .map(|i| {
                    let t = start_time + f64::from(i) / sample_rate;
                    (2.0 * std::f64::consts::PI * 5.0 * f64::from(channel) * t).sin()
                })
                .collect();
            stream
                .write_all(&encode_packet(channel, sample_rate, start_time, &amplitudes))
                .await?;
        }
    }
    stream.shutdown().await?;
    Ok(())
}

/// Persist one capture and export its snapshot next to the store
async fn store_and_export(
    store: &JsonFileStore,
    data_dir: &Path,
    task: TaskInfo,
    buffer: &SampleBuffer,
) -> Result<()> {
    let (task, snapshot) = persist_capture(store, &SpectralEngine::new(), task, buffer).await?;

    if snapshot.values().all(|samples| samples.is_empty()) {
        warn!("{} captured no samples, skipping export", task.task_name);
        return Ok(());
    }
    let export_path = data_dir
        .join("exports")
        .join(format!("task_{}.json", task.task_id));
    JsonExporter::new()
        .export_task(&export_path, &task, &snapshot)
        .await
        .context("Failed to export snapshot")?;

    Ok(())
}
