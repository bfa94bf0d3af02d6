use std::{
    io::Write,
    os::unix::net::UnixStream,
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use gracht::{
    LinkConfig, Server, ServerConfig,
    control::{ACTION_UNSUBSCRIBE, ALL_PROTOCOLS, CONTROL_PROTOCOL},
    link::{FrameHeader, ParamDescriptor, encode_frame},
};

mod common;
use common::wait_for_socket;

/// S4 / P2: a client that sends `unsubscribe(0xFF)` is removed from the
/// client table and fires `onDisconnect`; a subsequent targeted send to its
/// handle fails with `NotFound`.
#[test]
fn unsubscribe_all_destroys_the_client_and_subsequent_sends_fail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gracht.sock");

    let connected: Arc<Mutex<Option<gracht::Handle>>> = Arc::new(Mutex::new(None));
    let disconnected = Arc::new(Mutex::new(Vec::new()));
    let connected2 = connected.clone();
    let disconnected2 = disconnected.clone();

    let config = ServerConfig::new(LinkConfig::Stream { path: path.clone() })
        .with_on_connect(move |h| *connected2.lock().unwrap() = Some(h))
        .with_on_disconnect(move |h| disconnected2.lock().unwrap().push(h));
    let mut server = Server::new(config).unwrap();

    let shutdown = server.shutdown_handle();
    let broadcaster = server.broadcaster();
    let server_thread = thread::spawn(move || {
        server.run().unwrap();
        server.shutdown();
    });

    wait_for_socket(&path);
    let mut client = UnixStream::connect(&path).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let handle = loop {
        if let Some(h) = *connected.lock().unwrap() {
            break h;
        }
        assert!(std::time::Instant::now() < deadline, "onConnect never fired");
        thread::sleep(Duration::from_millis(5));
    };

    let header = FrameHeader {
        message_id: 1,
        length: 0,
        protocol: CONTROL_PROTOCOL,
        action: ACTION_UNSUBSCRIBE,
        param_in: 1,
        param_out: 0,
    };
    let mut frame = Vec::new();
    encode_frame(header, &[ParamDescriptor::Scalar(ALL_PROTOCOLS as u64)], &[], 4096, &mut frame).unwrap();
    client.write_all(&frame).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if disconnected.lock().unwrap().contains(&handle) {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "onDisconnect never fired");
        thread::sleep(Duration::from_millis(5));
    }

    // Give the server a moment to actually drop the client-table row (the
    // disconnect callback fires, but table removal and the socket teardown
    // are sequenced around it) before asserting the send fails.
    thread::sleep(Duration::from_millis(20));
    let err = broadcaster.send_event(handle, 1, 1, &[], &[]);
    assert!(matches!(err, Err(gracht::GrachtError::NotFound)), "expected NotFound, got {err:?}");

    shutdown.signal();
    server_thread.join().unwrap();
}

/// P2: a stream client that simply disconnects (no explicit unsubscribe)
/// also fires `onDisconnect` exactly once and is removed from the table.
#[test]
fn socket_close_fires_on_disconnect_and_removes_the_client() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gracht.sock");

    let disconnect_count = Arc::new(Mutex::new(0usize));
    let disconnect_count2 = disconnect_count.clone();
    let config = ServerConfig::new(LinkConfig::Stream { path: path.clone() })
        .with_on_disconnect(move |_h| *disconnect_count2.lock().unwrap() += 1);
    let mut server = Server::new(config).unwrap();
    let shutdown = server.shutdown_handle();
    let server_thread = thread::spawn(move || {
        server.run().unwrap();
        server.shutdown();
    });

    wait_for_socket(&path);
    let client = UnixStream::connect(&path).unwrap();
    thread::sleep(Duration::from_millis(50));
    drop(client);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    loop {
        if *disconnect_count.lock().unwrap() == 1 {
            break;
        }
        assert!(std::time::Instant::now() < deadline, "onDisconnect never fired on socket close");
        thread::sleep(Duration::from_millis(5));
    }

    shutdown.signal();
    server_thread.join().unwrap();
}
