use std::{
    io::{Read, Write},
    os::unix::net::UnixStream,
    thread,
};

use gracht::{
    LinkConfig, Server, ServerConfig,
    control::{ACTION_ERROR, CONTROL_PROTOCOL, ERROR_CODE_ENOENT},
    link::{FrameHeader, HEADER_SIZE, ParamDescriptor, encode_frame},
};

mod common;
use common::wait_for_socket;

fn read_response(stream: &mut UnixStream) -> (FrameHeader, Vec<u8>) {
    let mut header_bytes = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header_bytes).expect("read response header");
    let header = FrameHeader::decode(&header_bytes);
    let mut body = vec![0u8; header.length as usize - HEADER_SIZE];
    stream.read_exact(&mut body).expect("read response body");
    (header, body)
}

/// S1: client sends `{id=1, proto=7, action=3}` to a server with `(7, 3)`
/// registered; the handler echoes the request's message id back.
#[test]
fn request_to_a_registered_handler_gets_a_matching_reply() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gracht.sock");

    let mut server = Server::new(ServerConfig::new(LinkConfig::Stream { path: path.clone() })).unwrap();
    server
        .register_handler(7, 3, |env, out| out.encode(env.message_id(), 7, 3, &[], &[]))
        .unwrap();

    let shutdown = server.shutdown_handle();
    let server_thread = thread::spawn(move || {
        server.run().unwrap();
        server.shutdown();
    });

    wait_for_socket(&path);
    let mut client = UnixStream::connect(&path).unwrap();

    let header = FrameHeader { message_id: 1, length: 0, protocol: 7, action: 3, param_in: 0, param_out: 0 };
    let mut frame = Vec::new();
    encode_frame(header, &[], &[], 4096, &mut frame).unwrap();
    client.write_all(&frame).unwrap();

    let (response, _body) = read_response(&mut client);
    assert_eq!(response.message_id, 1);
    assert_eq!(response.protocol, 7);
    assert_eq!(response.action, 3);
    assert_eq!(response.length, HEADER_SIZE as u32);

    shutdown.signal();
    server_thread.join().unwrap();
}

/// S2: a request naming an unregistered `(protocol, action)` pair gets a
/// control-protocol error event back, carrying the original message id and
/// `ENOENT`.
#[test]
fn unknown_protocol_action_reports_enoent_to_the_sender() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gracht.sock");

    let mut server = Server::new(ServerConfig::new(LinkConfig::Stream { path: path.clone() })).unwrap();
    let shutdown = server.shutdown_handle();
    let server_thread = thread::spawn(move || {
        server.run().unwrap();
        server.shutdown();
    });

    wait_for_socket(&path);
    let mut client = UnixStream::connect(&path).unwrap();

    let header = FrameHeader { message_id: 42, length: 0, protocol: 9, action: 1, param_in: 0, param_out: 0 };
    let mut frame = Vec::new();
    encode_frame(header, &[], &[], 4096, &mut frame).unwrap();
    client.write_all(&frame).unwrap();

    let (response, body) = read_response(&mut client);
    assert_eq!(response.message_id, 42);
    assert_eq!(response.protocol, CONTROL_PROTOCOL);
    assert_eq!(response.action, ACTION_ERROR);
    let code = ParamDescriptor::decode(body[..12].try_into().unwrap());
    assert_eq!(code, ParamDescriptor::Scalar(ERROR_CODE_ENOENT));

    shutdown.signal();
    server_thread.join().unwrap();
}

/// A request carrying an inline `Buffer` parameter round-trips its payload
/// bytes back through a handler that echoes them (P5-ish, exercised over
/// the real transport rather than just the codec).
#[test]
fn buffer_parameter_payload_reaches_the_handler_intact() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gracht.sock");

    let mut server = Server::new(ServerConfig::new(LinkConfig::Stream { path: path.clone() })).unwrap();
    server
        .register_handler(1, 1, |env, out| {
            let payload = env.payload().to_vec();
            out.encode(env.message_id(), 1, 1, &[], &[&payload])
        })
        .unwrap();

    let shutdown = server.shutdown_handle();
    let server_thread = thread::spawn(move || {
        server.run().unwrap();
        server.shutdown();
    });

    wait_for_socket(&path);
    let mut client = UnixStream::connect(&path).unwrap();

    let header = FrameHeader { message_id: 5, length: 0, protocol: 1, action: 1, param_in: 1, param_out: 0 };
    let payload = b"round trip me".to_vec();
    let mut frame = Vec::new();
    encode_frame(header, &[ParamDescriptor::Buffer { length: payload.len() as u32, offset: 0 }], &[&payload], 4096, &mut frame).unwrap();
    client.write_all(&frame).unwrap();

    let (response, body) = read_response(&mut client);
    assert_eq!(response.message_id, 5);
    assert_eq!(&body, &payload);

    shutdown.signal();
    server_thread.join().unwrap();
}

/// S6: a targeted send whose payload would push the frame past
/// `max_message_size` fails with `FrameTooLarge` and writes nothing to the
/// socket — the client's subsequent read sees no bytes at all.
#[test]
fn oversize_send_event_fails_before_writing_anything() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gracht.sock");

    let connected: std::sync::Arc<std::sync::Mutex<Option<gracht::Handle>>> = std::sync::Arc::new(std::sync::Mutex::new(None));
    let connected2 = connected.clone();
    let config = ServerConfig::new(LinkConfig::Stream { path: path.clone() })
        .with_max_message_size(64)
        .with_on_connect(move |h| *connected2.lock().unwrap() = Some(h));
    let mut server = Server::new(config).unwrap();

    let shutdown = server.shutdown_handle();
    let broadcaster = server.broadcaster();
    let server_thread = thread::spawn(move || {
        server.run().unwrap();
        server.shutdown();
    });

    wait_for_socket(&path);
    let mut client = UnixStream::connect(&path).unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    let handle = loop {
        if let Some(h) = *connected.lock().unwrap() {
            break h;
        }
        assert!(std::time::Instant::now() < deadline, "onConnect never fired");
        thread::sleep(std::time::Duration::from_millis(5));
    };

    let oversized = vec![0u8; 256];
    let err = broadcaster.send_event(handle, 1, 1, &[], &[&oversized]);
    assert!(matches!(err, Err(gracht::GrachtError::FrameTooLarge { .. })), "expected FrameTooLarge, got {err:?}");

    client.set_nonblocking(true).unwrap();
    let mut buf = [0u8; 1];
    assert_eq!(client.read(&mut buf).unwrap_err().kind(), std::io::ErrorKind::WouldBlock, "nothing should have been written");

    shutdown.signal();
    server_thread.join().unwrap();
}
