//! End-to-end scenarios exercising `pair()`'d endpoints over a real
//! connected socket: request/reply, OOL payloads, descriptor passing,
//! unsolicited bursts, reply isolation, and peer credentials.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::fd::OwnedFd;
use std::time::Duration;

use bytes::Bytes;
use fpc::{DescriptorRef, MessageId, pair};
use fpc_proto::DescriptorKind;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Scenario A: request/reply over a pair.
#[tokio::test]
async fn request_reply_over_a_pair() {
    let (a, b) = pair().expect("pair should succeed");
    a.start().await.expect("start should succeed");
    b.start().await.expect("start should succeed");

    let mut b_incoming = b.incoming().expect("first claim should succeed");
    let b_task = tokio::spawn(async move {
        let message = b_incoming.next().await.expect("should receive a_request");
        let token = message.reply_token();
        b.reply(token, MessageId::new(101).unwrap(), Bytes::from_static(b"b-reply"), Vec::new())
            .await
            .expect("reply should succeed");
        b
    });

    let reply = a
        .request(MessageId::new(100).unwrap(), Bytes::from_static(b"a-request"), Vec::new(), TIMEOUT)
        .await
        .expect("request should succeed");

    assert_eq!(reply.identifier(), MessageId::new(101).unwrap());
    assert_eq!(reply.payload().as_ref(), b"b-reply");
    assert_ne!(reply.correlation(), 0);

    let b = b_task.await.expect("b task should not panic");
    a.stop().await;
    b.stop().await;
}

/// Scenario B: a 100 KiB payload spills out-of-line and is received
/// byte-for-byte.
#[tokio::test]
async fn large_payload_goes_out_of_line() {
    let (client, server) = pair().expect("pair should succeed");
    client.start().await.expect("start should succeed");
    server.start().await.expect("start should succeed");

    let payload: Vec<u8> = (0..100 * 1024).map(|i| (i % 256) as u8).collect();
    let payload_len = payload.len();

    let mut server_incoming = server.incoming().expect("first claim should succeed");
    let server_task = tokio::spawn(async move {
        let message = server_incoming.next().await.expect("should receive the OOL request");
        assert_eq!(message.payload().len(), payload_len);
        let token = message.reply_token();
        let reply_payload = Bytes::from(payload_len.to_string());
        server
            .reply(token, MessageId::new(103).unwrap(), reply_payload, Vec::new())
            .await
            .expect("reply should succeed");
        (server, message)
    });

    let reply = client
        .request(MessageId::new(102).unwrap(), Bytes::from(payload.clone()), Vec::new(), TIMEOUT)
        .await
        .expect("request should succeed");

    assert_eq!(reply.payload().as_ref(), payload_len.to_string().as_bytes());

    let (server, message) = server_task.await.expect("server task should not panic");
    assert_eq!(message.payload().as_ref(), payload.as_slice());

    client.stop().await;
    server.stop().await;
}

fn file_with_contents(contents: &str) -> OwnedFd {
    let mut file = tempfile::tempfile().expect("tempfile should succeed");
    file.write_all(contents.as_bytes()).expect("write should succeed");
    file.seek(SeekFrom::Start(0)).expect("seek should succeed");
    file.into()
}

fn read_whole_file(fd: OwnedFd) -> String {
    let mut file = File::from(fd);
    file.seek(SeekFrom::Start(0)).expect("seek should succeed");
    let mut contents = String::new();
    file.read_to_string(&mut contents).expect("read should succeed");
    contents
}

/// Scenario C: multi-descriptor passing.
#[tokio::test]
async fn multi_descriptor_passing() {
    let (client, server) = pair().expect("pair should succeed");
    client.start().await.expect("start should succeed");
    server.start().await.expect("start should succeed");

    let descriptors = vec![
        DescriptorRef::new(file_with_contents("file0:u0"), DescriptorKind::File),
        DescriptorRef::new(file_with_contents("file1:u1"), DescriptorKind::File),
        DescriptorRef::new(file_with_contents("file2:u2"), DescriptorKind::File),
    ];

    let mut server_incoming = server.incoming().expect("first claim should succeed");
    let server_task = tokio::spawn(async move {
        let mut message = server_incoming.next().await.expect("should receive the request");
        assert_eq!(message.descriptor_count(), 3);

        let contents: Vec<String> = (0..3)
            .map(|i| {
                let descriptor =
                    message.take_descriptor(i, DescriptorKind::File).expect("descriptor should be present");
                read_whole_file(descriptor.into_owned_fd())
            })
            .collect();

        let token = message.reply_token();
        server.reply(token, MessageId::new(105).unwrap(), Bytes::new(), Vec::new()).await.expect("reply should succeed");
        contents
    });

    client
        .request(MessageId::new(104).unwrap(), Bytes::new(), descriptors, TIMEOUT)
        .await
        .expect("request should succeed");

    let contents = server_task.await.expect("server task should not panic");
    assert_eq!(contents, vec!["file0:u0", "file1:u1", "file2:u2"]);

    client.stop().await;
    server.stop().await;
}

/// Scenario D: unsolicited burst followed by a done marker.
#[tokio::test]
async fn unsolicited_burst_and_done_marker() {
    let (client, server) = pair().expect("pair should succeed");
    client.start().await.expect("start should succeed");
    server.start().await.expect("start should succeed");

    let mut server_incoming = server.incoming().expect("first claim should succeed");
    let server_task = tokio::spawn(async move {
        let request = server_incoming.next().await.expect("should receive the burst request");
        assert_eq!(request.payload().as_ref(), b"5");

        for index in 0..5u32 {
            server
                .send(MessageId::new(106).unwrap(), Bytes::from(index.to_string()), Vec::new())
                .await
                .expect("burst send should succeed");
        }
        server.send(MessageId::new(107).unwrap(), Bytes::new(), Vec::new()).await.expect("done marker should succeed");
        server
    });

    client.send(MessageId::new(108).unwrap(), Bytes::from_static(b"5"), Vec::new()).await.expect("send should succeed");

    let mut client_incoming = client.incoming().expect("first claim should succeed");
    let mut burst = Vec::new();
    loop {
        let message = client_incoming.next().await.expect("should receive burst/done messages");
        if message.identifier() == MessageId::new(107).unwrap() {
            break;
        }
        assert_eq!(message.identifier(), MessageId::new(106).unwrap());
        burst.push(message.payload().clone());
    }

    assert_eq!(burst.len(), 5);
    for (index, payload) in burst.iter().enumerate() {
        assert_eq!(payload.as_ref(), index.to_string().as_bytes());
    }

    let server = server_task.await.expect("server task should not panic");
    client.stop().await;
    server.stop().await;
}

/// Scenario E: reply isolation — a reply to a local request never
/// surfaces on `incoming()`.
#[tokio::test]
async fn reply_never_appears_on_incoming() {
    let (a, b) = pair().expect("pair should succeed");
    a.start().await.expect("start should succeed");
    b.start().await.expect("start should succeed");

    let mut b_incoming = b.incoming().expect("first claim should succeed");
    let b_task = tokio::spawn(async move {
        let message = b_incoming.next().await.expect("should receive a_request");
        let token = message.reply_token();
        b.reply(token, MessageId::new(101).unwrap(), Bytes::new(), Vec::new()).await.expect("reply should succeed");
        b
    });

    let mut a_incoming = a.incoming().expect("first claim should succeed");
    let sentinel = tokio::spawn(async move {
        // If a reply ever leaks onto incoming(), it will show up here
        // before the endpoint stops; the outer test drives the timing.
        a_incoming.next().await
    });

    let reply = a
        .request(MessageId::new(100).unwrap(), Bytes::new(), Vec::new(), TIMEOUT)
        .await
        .expect("request should succeed");
    assert_eq!(reply.identifier(), MessageId::new(101).unwrap());

    a.stop().await;
    let observed = sentinel.await.expect("sentinel task should not panic");
    assert!(observed.is_none(), "reply leaked onto incoming()");

    let b = b_task.await.expect("b task should not panic");
    b.stop().await;
}

/// Scenario F: peer credentials.
///
/// NetBSD, OpenBSD, and DragonFly BSD have no portable syscall for the
/// peer's pid on a Unix domain socket, so `peer_credentials()` reports
/// that honestly as an error there rather than a fabricated pid.
#[cfg(any(target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly"))]
#[tokio::test]
async fn peer_credentials_surfaces_an_error_where_pid_is_unavailable() {
    let (a, _b) = pair().expect("pair should succeed");
    assert!(matches!(a.peer_credentials(), Err(fpc::FpcError::Io(_))));
}

#[cfg(not(any(target_os = "netbsd", target_os = "openbsd", target_os = "dragonfly")))]
#[tokio::test]
async fn peer_credentials_report_the_local_process() {
    let (a, b) = pair().expect("pair should succeed");

    let creds_a = a.peer_credentials().expect("peer_credentials should succeed");
    let creds_b = b.peer_credentials().expect("peer_credentials should succeed");

    let expected_uid = nix::unistd::getuid().as_raw();
    assert_eq!(creds_a.uid, expected_uid);
    assert_eq!(creds_b.uid, expected_uid);
    assert_ne!(creds_a.pid, 0);
    assert_ne!(creds_b.pid, 0);
}

/// Invariant 12: a second `incoming()` call fails.
#[tokio::test]
async fn second_incoming_claim_fails() {
    let (a, _b) = pair().expect("pair should succeed");
    let _first = a.incoming().expect("first claim should succeed");
    assert!(matches!(a.incoming(), Err(fpc::FpcError::StreamAlreadyClaimed)));
}

/// Invariant 10: lifecycle operations are idempotent.
#[tokio::test]
async fn lifecycle_is_idempotent() {
    let (a, _b) = pair().expect("pair should succeed");
    a.start().await.expect("start should succeed");
    a.start().await.expect("starting an already-running endpoint is a no-op");
    a.stop().await;
    a.stop().await;
}

/// Invariant 11: after stop(), pending requests resolve promptly.
#[tokio::test]
async fn stop_drains_pending_requests() {
    let (a, b) = pair().expect("pair should succeed");
    a.start().await.expect("start should succeed");
    b.start().await.expect("start should succeed");

    let a_clone = a.clone();
    let request_task =
        tokio::spawn(async move { a_clone.request(MessageId::new(100).unwrap(), Bytes::new(), Vec::new(), TIMEOUT).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    a.stop().await;

    let result = request_task.await.expect("request task should not panic");
    assert!(matches!(result, Err(fpc::FpcError::Disconnected)));

    b.stop().await;
}
