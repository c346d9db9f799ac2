use acqlab::buffers::SampleBuffer;
use acqlab::core::Sample;
use acqlab::engine::{TcpEvent, TcpReceiver};
use acqlab::protocol::encode_packet;
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

async fn wait_for_event(events: &Receiver<TcpEvent>, matcher: impl Fn(&TcpEvent) -> bool) -> bool {
    for _ in 0..500 {
        while let Ok(event) = events.try_recv() {
            if matcher(&event) {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_server_decodes_split_packets() {
    let buffer = Arc::new(SampleBuffer::new());
    let (tx, events) = crossbeam_channel::unbounded();
    let mut receiver = TcpReceiver::new(buffer.clone(), tx);
    let addr = receiver.listen(0).await.unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
    let mut bytes = vec![0x13u8; 11];
    bytes.extend(encode_packet(1, 10.0, 0.0, &[1.0, 2.0, 3.0]));
    bytes.extend(encode_packet(2, 10.0, 5.0, &[4.0]));

    for chunk in bytes.chunks(7) {
        stream.write_all(chunk).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    assert!(wait_for(|| buffer.count(1) == 3 && buffer.count(2) == 1).await);
    assert_eq!(
        buffer.read(1, None),
        vec![Sample::new(0.0, 1.0), Sample::new(0.1, 2.0), Sample::new(0.2, 3.0)]
    );
    assert_eq!(buffer.read(2, None), vec![Sample::new(5.0, 4.0)]);
    assert!(receiver.is_connected());

    drop(stream);
    assert!(wait_for_event(&events, |e| matches!(e, TcpEvent::Disconnected(_))).await);
    assert!(!receiver.is_connected());

    let metrics = receiver.metrics();
    assert_eq!(metrics.bytes_received(), bytes.len() as u64);
    assert_eq!(metrics.samples_received(), 4);

    receiver.shutdown().await;
}

#[tokio::test]
async fn test_second_peer_is_rejected() {
    let buffer = Arc::new(SampleBuffer::new());
    let (tx, events) = crossbeam_channel::unbounded();
    let mut receiver = TcpReceiver::new(buffer.clone(), tx);
    let addr = receiver.listen(0).await.unwrap();

    let _first = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
    assert!(wait_for(|| receiver.is_connected()).await);

    let mut second = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
    assert!(wait_for_event(&events, |e| matches!(e, TcpEvent::Rejected(_))).await);

    // The rejected socket is closed by the receiver
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(5), second.read(&mut buf)).await;
    assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));

    receiver.shutdown().await;
}

#[tokio::test]
async fn test_residual_bytes_do_not_leak_into_next_connection() {
    let buffer = Arc::new(SampleBuffer::new());
    let (tx, events) = crossbeam_channel::unbounded();
    let mut receiver = TcpReceiver::new(buffer.clone(), tx);
    let addr = receiver.listen(0).await.unwrap();

    let packet = encode_packet(1, 10.0, 0.0, &[7.0, 8.0]);
    let mut first = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
    first.write_all(&packet[..packet.len() - 4]).await.unwrap();
    first.flush().await.unwrap();
    drop(first);
    assert!(wait_for_event(&events, |e| matches!(e, TcpEvent::Disconnected(_))).await);

    let mut second = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
    second.write_all(&packet[packet.len() - 4..]).await.unwrap();
    second.write_all(&encode_packet(1, 10.0, 1.0, &[9.0])).await.unwrap();
    second.flush().await.unwrap();

    assert!(wait_for(|| buffer.count(1) == 1).await);
    assert_eq!(buffer.read(1, None), vec![Sample::new(1.0, 9.0)]);

    receiver.shutdown().await;
}

#[tokio::test]
async fn test_client_mode_reads_from_remote() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let sender = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket
            .write_all(&encode_packet(2, 4.0, 0.0, &[0.5, 0.25]))
            .await
            .unwrap();
        // Hold the connection open until the receiver shuts down
        let mut buf = [0u8; 1];
        let _ = socket.read(&mut buf).await;
    });

    let buffer = Arc::new(SampleBuffer::new());
    let (tx, _events) = crossbeam_channel::unbounded();
    let mut receiver = TcpReceiver::new(buffer.clone(), tx);
    receiver.connect("127.0.0.1", port).await.unwrap();

    assert!(wait_for(|| buffer.count(2) == 2).await);
    assert_eq!(buffer.read(2, None)[1], Sample::new(0.25, 0.25));

    receiver.shutdown().await;
    assert!(!receiver.is_connected());
    sender.await.unwrap();
}

#[tokio::test]
async fn test_connect_failure_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let (tx, _events) = crossbeam_channel::unbounded();
    let mut receiver = TcpReceiver::new(Arc::new(SampleBuffer::new()), tx);
    assert!(receiver.connect("127.0.0.1", port).await.is_err());
    assert!(!receiver.is_connected());
}

#[tokio::test]
async fn test_shutdown_with_freshly_connected_peer() {
    for _ in 0..40 {
        let (tx, _events) = crossbeam_channel::unbounded();
        let mut receiver = TcpReceiver::new(Arc::new(SampleBuffer::new()), tx);
        let addr = receiver.listen(0).await.unwrap();

        // The peer stays open, so only the shutdown flag can end the reader
        let _peer = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(2), receiver.shutdown()).await;
        assert!(finished.is_ok(), "shutdown did not complete");
        assert!(!receiver.is_connected());
    }
}

#[tokio::test]
async fn test_receiver_stays_shut_down() {
    let (tx, _events) = crossbeam_channel::unbounded();
    let mut receiver = TcpReceiver::new(Arc::new(SampleBuffer::new()), tx);
    receiver.listen(0).await.unwrap();
    receiver.shutdown().await;

    assert!(receiver.listen(0).await.is_err());
    assert!(receiver.connect("127.0.0.1", 1).await.is_err());
}

#[tokio::test]
async fn test_full_event_queue_does_not_stall_reader() {
    let buffer = Arc::new(SampleBuffer::new());
    let (tx, events) = crossbeam_channel::bounded(4);
    let mut receiver = TcpReceiver::new(buffer.clone(), tx);
    let addr = receiver.listen(0).await.unwrap();

    let mut stream = TcpStream::connect(("127.0.0.1", addr.port())).await.unwrap();
    for block in 0..20u32 {
        stream
            .write_all(&encode_packet(1, 10.0, f64::from(block), &[1.0]))
            .await
            .unwrap();
    }
    stream.flush().await.unwrap();

    assert!(wait_for(|| buffer.count(1) == 20).await);
    // Listening, Connected and the first two data notifications
    assert_eq!(events.len(), 4);

    // Lifecycle events wait for room, so make space for Disconnected
    while events.try_recv().is_ok() {}

    let finished = tokio::time::timeout(Duration::from_secs(2), receiver.shutdown()).await;
    assert!(finished.is_ok());
}
