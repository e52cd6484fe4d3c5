//! End-to-end exercises against a live server on localhost.
//!
//! Each test binds the rendezvous socket on an ephemeral port, plays the
//! client side of the protocol with a raw UDP socket and shuts the server
//! down through its handle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use tftpd::core::{ServerConfig, TransferConfig, MTU};
use tftpd::protocol::packet;
use tftpd::protocol::{ErrorCode, Opcode};
use tftpd::server::TftpServer;
use tftpd::storage::MemoryStorage;

struct TestServer {
    addr: SocketAddr,
    storage: MemoryStorage,
    handle: tftpd::server::ServerHandle,
    task: tokio::task::JoinHandle<tftpd::Result<()>>,
}

async fn start_server() -> TestServer {
    let config = ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        transfer: TransferConfig {
            retransmit_timeout: Duration::from_millis(300),
            max_retries: 1,
            idle_timeout: Duration::from_millis(200),
        },
    };

    let storage = MemoryStorage::new();
    let server = TftpServer::bind(config, Arc::new(storage.clone()))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.handle();
    let task = tokio::spawn(async move { server.run().await });

    TestServer {
        addr,
        storage,
        handle,
        task,
    }
}

fn request(op: Opcode, filename: &str, mode: &str) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&op.as_u16().to_be_bytes());
    buf.extend_from_slice(filename.as_bytes());
    buf.push(0);
    buf.extend_from_slice(mode.as_bytes());
    buf.push(0);
    buf
}

async fn recv_from(client: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = [0u8; MTU];
    let (len, from) = timeout(Duration::from_secs(1), client.recv_from(&mut buf))
        .await
        .expect("expected a datagram")
        .unwrap();
    (buf[..len].to_vec(), from)
}

async fn expect_silence(client: &UdpSocket, wait: Duration) {
    let mut buf = [0u8; MTU];
    assert!(
        timeout(wait, client.recv_from(&mut buf)).await.is_err(),
        "expected no further datagrams"
    );
}

#[tokio::test]
async fn read_request_for_small_file() {
    let server = start_server().await;
    server.storage.insert("report.txt", Bytes::from_static(b"0123456789"));

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&request(Opcode::Rrq, "report.txt", "octet"), server.addr)
        .await
        .unwrap();

    // One DATA packet, block 1, carrying the whole 10-byte file.
    let (data, session_addr) = recv_from(&client).await;
    assert_ne!(session_addr, server.addr, "transfer uses an ephemeral port");
    assert_eq!(packet::opcode(&data).unwrap(), Opcode::Data.as_u16());
    assert_eq!(packet::data_block(&data).unwrap(), 1);
    assert_eq!(packet::data_payload(&data), b"0123456789");

    client
        .send_to(&packet::encode_ack(1), session_addr)
        .await
        .unwrap();
    expect_silence(&client, Duration::from_millis(300)).await;

    server.handle.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn read_request_for_missing_file() {
    let server = start_server().await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&request(Opcode::Rrq, "ghost.txt", "octet"), server.addr)
        .await
        .unwrap();

    let (reply, _) = recv_from(&client).await;
    assert_eq!(packet::opcode(&reply).unwrap(), Opcode::Error.as_u16());
    assert_eq!(
        u16::from_be_bytes([reply[2], reply[3]]),
        ErrorCode::NotFound.as_u16()
    );
    assert_eq!(&reply[4..reply.len() - 1], b"file not found");

    server.handle.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn write_request_uploads_single_block() {
    let server = start_server().await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&request(Opcode::Wrq, "upload.bin", "octet"), server.addr)
        .await
        .unwrap();

    let (greeting, session_addr) = recv_from(&client).await;
    assert_eq!(packet::opcode(&greeting).unwrap(), Opcode::Ack.as_u16());
    assert_eq!(packet::data_block(&greeting).unwrap(), 0);

    let payload = vec![0x17u8; 500];
    client
        .send_to(&packet::encode_data(1, &payload), session_addr)
        .await
        .unwrap();

    let (ack, _) = recv_from(&client).await;
    assert_eq!(packet::data_block(&ack).unwrap(), 1);

    assert_eq!(&server.storage.get("upload.bin").unwrap()[..], &payload[..]);
    assert!(server.storage.is_closed("upload.bin"));

    server.handle.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn multi_block_round_trip() {
    let server = start_server().await;
    let original = (0..1300).map(|i| (i % 251) as u8).collect::<Vec<_>>();

    // Upload in three blocks.
    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&request(Opcode::Wrq, "big.bin", "octet"), server.addr)
        .await
        .unwrap();
    let (_greeting, session_addr) = recv_from(&client).await;

    for (i, chunk) in original.chunks(512).enumerate() {
        let block = (i + 1) as u16;
        client
            .send_to(&packet::encode_data(block, chunk), session_addr)
            .await
            .unwrap();
        let (ack, _) = recv_from(&client).await;
        assert_eq!(packet::data_block(&ack).unwrap(), block);
    }
    assert_eq!(&server.storage.get("big.bin").unwrap()[..], &original[..]);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Download it back.
    client
        .send_to(&request(Opcode::Rrq, "big.bin", "octet"), server.addr)
        .await
        .unwrap();

    let mut fetched = Vec::new();
    let mut expected_block = 1u16;
    loop {
        let (data, from) = recv_from(&client).await;
        assert_eq!(packet::data_block(&data).unwrap(), expected_block);
        let payload = packet::data_payload(&data);
        fetched.extend_from_slice(payload);
        client
            .send_to(&packet::encode_ack(expected_block), from)
            .await
            .unwrap();
        if data.len() < MTU {
            break;
        }
        expected_block += 1;
    }
    assert_eq!(fetched, original);

    server.handle.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn file_is_free_again_once_upload_completes() {
    let server = start_server().await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&request(Opcode::Wrq, "fresh.bin", "octet"), server.addr)
        .await
        .unwrap();
    let (_greeting, session_addr) = recv_from(&client).await;

    let payload = vec![0x2au8; 100];
    client
        .send_to(&packet::encode_data(1, &payload), session_addr)
        .await
        .unwrap();
    let (ack, _) = recv_from(&client).await;
    assert_eq!(packet::data_block(&ack).unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The write session still lingers for stray datagrams, but the filename
    // lock is gone the moment the upload completed: an immediate read for
    // the same file gets DATA, not a busy refusal.
    client
        .send_to(&request(Opcode::Rrq, "fresh.bin", "octet"), server.addr)
        .await
        .unwrap();
    let (data, _) = recv_from(&client).await;
    assert_eq!(packet::opcode(&data).unwrap(), Opcode::Data.as_u16());
    assert_eq!(packet::data_payload(&data), &payload[..]);

    server.handle.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn stray_packets_on_rendezvous_socket_are_dropped() {
    let server = start_server().await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    for stray in [
        packet::encode_ack(1).to_vec(),
        packet::encode_data(1, b"lost").to_vec(),
        packet::encode_error(ErrorCode::Unknown, "lost").to_vec(),
        vec![0xff],
        vec![0x00, 0x63],
    ] {
        client.send_to(&stray, server.addr).await.unwrap();
    }
    expect_silence(&client, Duration::from_millis(300)).await;

    // The listener is still accepting requests afterwards.
    server.storage.insert("alive.txt", Bytes::from_static(b"ok"));
    client
        .send_to(&request(Opcode::Rrq, "alive.txt", "octet"), server.addr)
        .await
        .unwrap();
    let (data, _) = recv_from(&client).await;
    assert_eq!(packet::opcode(&data).unwrap(), Opcode::Data.as_u16());

    server.handle.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_request_for_busy_file_is_refused() {
    let server = start_server().await;
    server.storage.insert("hot.txt", Bytes::from(vec![0u8; 2048]));

    // First client opens the transfer and sits on it without acking.
    let first = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    first
        .send_to(&request(Opcode::Rrq, "hot.txt", "octet"), server.addr)
        .await
        .unwrap();
    let (_data, _) = recv_from(&first).await;

    // Second client is refused while the first session is alive.
    let second = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    second
        .send_to(&request(Opcode::Rrq, "hot.txt", "octet"), server.addr)
        .await
        .unwrap();
    let (reply, _) = recv_from(&second).await;
    assert_eq!(packet::opcode(&reply).unwrap(), Opcode::Error.as_u16());
    assert_eq!(
        u16::from_be_bytes([reply[2], reply[3]]),
        ErrorCode::AccessViolation.as_u16()
    );

    server.handle.shutdown();
    server.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn concurrent_transfers_for_different_files() {
    let server = start_server().await;
    server.storage.insert("left.txt", Bytes::from_static(b"left"));
    server.storage.insert("right.txt", Bytes::from_static(b"right"));

    let left = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let right = UdpSocket::bind("127.0.0.1:0").await.unwrap();

    left.send_to(&request(Opcode::Rrq, "left.txt", "octet"), server.addr)
        .await
        .unwrap();
    right
        .send_to(&request(Opcode::Rrq, "right.txt", "octet"), server.addr)
        .await
        .unwrap();

    let (left_data, _) = recv_from(&left).await;
    let (right_data, _) = recv_from(&right).await;
    assert_eq!(packet::data_payload(&left_data), b"left");
    assert_eq!(packet::data_payload(&right_data), b"right");

    server.handle.shutdown();
    server.task.await.unwrap().unwrap();
}
