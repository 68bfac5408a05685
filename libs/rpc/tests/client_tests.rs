use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tether_fabric::codec::BincodeCodec;
use tether_fabric::transport::{Transport, TcpTransportListener, UnixTransportListener};
use tether_fabric::{Channel, ChannelReader, ChannelWriter};
use tether_rpc::{completion, dial, dial_http, dial_unix, Error, Request, Response, CONNECTED};

/// Scripted server side of one connection
struct Peer {
    reader: ChannelReader<BincodeCodec>,
    writer: ChannelWriter<BincodeCodec>,
}

impl Peer {
    fn new(transport: impl Transport) -> Self {
        let (reader, writer) = Channel::from_transport(transport, BincodeCodec).split();
        Self { reader, writer }
    }

    async fn read_request<A: DeserializeOwned>(&mut self) -> (Request, A) {
        let request: Request = self.reader.receive().await.unwrap();
        let args: A = self.reader.receive().await.unwrap();
        (request, args)
    }

    async fn reply<T: Serialize + ?Sized>(&mut self, request: &Request, body: &T) {
        let header = Response {
            service_method: request.service_method.clone(),
            seq: request.seq,
            error: String::new(),
        };
        self.writer.feed(&header).await.unwrap();
        self.writer.feed(body).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn reply_error(&mut self, request: &Request, message: &str) {
        let header = Response {
            service_method: request.service_method.clone(),
            seq: request.seq,
            error: message.to_string(),
        };
        self.writer.feed(&header).await.unwrap();
        self.writer.feed(&()).await.unwrap();
        self.writer.flush().await.unwrap();
    }
}

async fn listen() -> (TcpTransportListener, SocketAddr) {
    let listener = TcpTransportListener::bind("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

async fn accept(listener: &TcpTransportListener) -> Peer {
    let (transport, _addr) = listener.accept().await.unwrap();
    Peer::new(transport)
}

/// Answer every "Arith.Double" request until the client goes away
async fn serve_double(mut peer: Peer) {
    while let Ok(request) = peer.reader.receive::<Request>().await {
        let n: u64 = peer.reader.receive().await.unwrap();
        peer.reply(&request, &(n * 2)).await;
    }
}

#[tokio::test]
async fn call_round_trip() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move { serve_double(accept(&listener).await).await });

    let client = dial(addr).await.unwrap();
    let reply: u64 = client.call("Arith.Double", 21u64).await.unwrap();
    assert_eq!(reply, 42);

    client.close().await.unwrap();
}

#[tokio::test]
async fn out_of_order_responses_reach_their_own_calls() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let mut requests = Vec::new();
        for _ in 0..2 {
            requests.push(peer.read_request::<u64>().await);
        }
        // Answer the later call first
        requests.sort_by_key(|(request, _)| std::cmp::Reverse(request.seq));
        for (request, n) in &requests {
            peer.reply(request, &(n * 10)).await;
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let client = dial(addr).await.unwrap();
    let mut a = client.go::<u64, u64>("Arith.Tenfold", 1);
    let mut b = client.go::<u64, u64>("Arith.Tenfold", 2);

    let a = a.recv().await.unwrap();
    let b = b.recv().await.unwrap();

    assert_ne!(a.seq(), b.seq());
    assert_eq!(a.into_result().unwrap(), 10);
    assert_eq!(b.into_result().unwrap(), 20);
}

#[tokio::test]
async fn remote_error_does_not_break_the_connection() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let mut peer = accept(&listener).await;

        let (request, _) = peer.read_request::<u64>().await;
        peer.reply_error(&request, "divide by zero").await;

        let (request, n) = peer.read_request::<u64>().await;
        peer.reply(&request, &(n * 2)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let client = dial(addr).await.unwrap();

    let failed = client
        .go::<u64, u64>("Arith.Divide", 0)
        .recv()
        .await
        .unwrap();
    assert!(failed.reply.is_none());
    match &failed.error {
        Some(Error::Server(message)) => assert_eq!(message, "divide by zero"),
        other => panic!("Expected server error, got {:?}", other),
    }

    let reply: u64 = client.call("Arith.Double", 4u64).await.unwrap();
    assert_eq!(reply, 8);
    assert!(!client.is_shutdown());
}

#[tokio::test]
async fn undecodable_reply_only_fails_that_call() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let mut peer = accept(&listener).await;

        let (request, _) = peer.read_request::<u64>().await;
        peer.reply(&request, "not a number").await;

        let (request, n) = peer.read_request::<u64>().await;
        peer.reply(&request, &(n * 2)).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let client = dial(addr).await.unwrap();

    let result: Result<u64, Error> = client.call("Arith.Double", 1u64).await;
    match result {
        Err(err @ Error::ReadingBody(_)) => assert!(err.is_call_local()),
        other => panic!("Expected reading body error, got {:?}", other),
    }

    let reply: u64 = client.call("Arith.Double", 5u64).await.unwrap();
    assert_eq!(reply, 10);
}

#[tokio::test]
async fn close_fails_every_outstanding_call() {
    const CALLS: usize = 5;

    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        // Read everything, answer nothing
        while peer.reader.receive::<Request>().await.is_ok() {
            let _ = peer.reader.skip().await;
        }
    });

    let client = dial(addr).await.unwrap();
    let (done, mut completions) = completion::<u32, u32>(CALLS).unwrap();
    for i in 0..CALLS as u32 {
        client.go_with("Slow.Never", i, &done);
    }
    drop(done);

    client.close().await.unwrap();

    let mut failed = 0;
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(call) = completions.recv().await {
            assert!(matches!(call.error, Some(Error::Shutdown)));
            failed += 1;
        }
    })
    .await
    .unwrap();

    assert_eq!(failed, CALLS);
    assert!(client.is_shutdown());
}

#[tokio::test]
async fn call_after_close_never_writes() {
    let (listener, addr) = listen().await;
    let server = tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        peer.reader.receive::<Request>().await
    });

    let client = dial(addr).await.unwrap();
    client.close().await.unwrap();

    let result: Result<u64, Error> = client.call("Arith.Double", 1u64).await;
    assert!(matches!(result, Err(Error::Shutdown)));
    assert!(matches!(client.close().await, Err(Error::Shutdown)));

    // The server only ever sees the end of the stream
    let seen = server.await.unwrap();
    assert!(matches!(seen, Err(tether_fabric::Error::ConnectionClosed)));
}

#[tokio::test]
async fn peer_hangup_is_an_unexpected_eof() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let _ = peer.read_request::<u64>().await;
        // Dropping the peer closes the connection
    });

    let client = dial(addr).await.unwrap();
    let result: Result<u64, Error> = client.call("Arith.Double", 1u64).await;
    assert!(matches!(result, Err(Error::UnexpectedEof)));

    assert!(client.is_shutdown());
    assert!(matches!(client.close().await, Err(Error::Shutdown)));
}

#[tokio::test]
async fn every_call_completes_exactly_once() {
    const CALLS: u32 = 10;
    const ANSWERED: u64 = 7;

    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let mut peer = accept(&listener).await;
        let mut requests = Vec::new();
        for _ in 0..CALLS {
            requests.push(peer.read_request::<u32>().await.0);
        }
        requests.sort_by_key(|request| request.seq);

        for request in requests.iter().filter(|r| r.seq < ANSWERED) {
            if request.seq % 2 == 0 {
                peer.reply(request, &request.seq).await;
            } else {
                peer.reply_error(request, "odd").await;
            }
        }
        // A second answer for a call that already finished is ignored
        peer.reply(&requests[0], &0u64).await;
        // Hang up on the rest
    });

    let client = dial(addr).await.unwrap();
    let (done, mut completions) = completion::<u32, u64>(64).unwrap();
    for i in 0..CALLS {
        client.go_with("Mixed.Outcome", i, &done);
    }
    drop(done);

    let mut seen = HashSet::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(call) = completions.recv().await {
            let seq = call.seq().unwrap();
            assert!(seen.insert(seq), "seq {} completed twice", seq);

            match (seq, call.into_result()) {
                (seq, Ok(reply)) if seq < ANSWERED && seq % 2 == 0 => assert_eq!(reply, seq),
                (seq, Err(Error::Server(message))) if seq < ANSWERED => assert_eq!(message, "odd"),
                (seq, Err(Error::UnexpectedEof)) if seq >= ANSWERED => {}
                (seq, other) => panic!("seq {} finished with {:?}", seq, other),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(seen, (0..CALLS as u64).collect::<HashSet<_>>());
}

#[tokio::test]
async fn dial_http_switches_to_rpc_after_connect() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (transport, _addr) = listener.accept().await.unwrap();
        let (mut reader, mut writer) = transport.into_framed();

        assert_eq!(reader.read_line().await.unwrap(), "CONNECT /_goRPC_ HTTP/1.0");
        assert_eq!(reader.read_line().await.unwrap(), "");
        writer
            .write_raw(format!("HTTP/1.0 {}\n\n", CONNECTED).as_bytes())
            .await
            .unwrap();

        let (reader, writer) = Channel::from_framed(reader, writer, BincodeCodec).split();
        serve_double(Peer { reader, writer }).await;
    });

    let client = dial_http(addr).await.unwrap();
    let reply: u64 = client.call("Arith.Double", 50u64).await.unwrap();
    assert_eq!(reply, 100);
}

#[tokio::test]
async fn dial_http_rejects_other_statuses() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (transport, _addr) = listener.accept().await.unwrap();
        let (mut reader, mut writer) = transport.into_framed();
        let _ = reader.read_line().await;
        let _ = reader.read_line().await;
        writer
            .write_raw(b"HTTP/1.0 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    match dial_http(addr).await {
        Err(Error::DialHttp { address, source }) => {
            assert_eq!(address, addr.to_string());
            assert!(matches!(*source, Error::UnexpectedHttpResponse(ref s) if s == "404 Not Found"));
        }
        Err(other) => panic!("Expected dial-http error, got {:?}", other),
        Ok(_) => panic!("Expected dial-http error, got a client"),
    }
}

#[tokio::test]
async fn dial_http_rejects_a_non_http_status_line() {
    let (listener, addr) = listen().await;
    let server = tokio::spawn(async move {
        let (transport, _addr) = listener.accept().await.unwrap();
        let (mut reader, mut writer) = transport.into_framed();
        let _ = reader.read_line().await;
        let _ = reader.read_line().await;
        writer.write_raw(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
        // The client hangs up instead of speaking RPC
        reader.read_line().await
    });

    match dial_http(addr).await {
        Err(Error::DialHttp { source, .. }) => assert!(matches!(
            *source,
            Error::UnexpectedHttpResponse(ref s) if s == "SSH-2.0-OpenSSH_9.6"
        )),
        Err(other) => panic!("Expected dial-http error, got {:?}", other),
        Ok(_) => panic!("Expected dial-http error, got a client"),
    }

    let seen = server.await.unwrap();
    assert!(matches!(seen, Err(tether_fabric::Error::ConnectionClosed)));
}

#[tokio::test]
async fn dial_http_fails_when_the_server_hangs_up_mid_handshake() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        let (transport, _addr) = listener.accept().await.unwrap();
        let (mut reader, _writer) = transport.into_framed();
        let _ = reader.read_line().await;
        let _ = reader.read_line().await;
        // Dropped without answering
    });

    match dial_http(addr).await {
        Err(Error::DialHttp { address, source }) => {
            assert_eq!(address, addr.to_string());
            assert!(matches!(*source, Error::Eof));
        }
        Err(other) => panic!("Expected dial-http error, got {:?}", other),
        Ok(_) => panic!("Expected dial-http error, got a client"),
    }
}

#[tokio::test]
async fn close_interrupts_a_write_the_peer_never_reads() {
    let (listener, addr) = listen().await;
    tokio::spawn(async move {
        // Keep the connection open without ever reading from it
        let (_transport, _addr) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let client = dial(addr).await.unwrap();
    let mut completions = client.go::<Vec<u8>, u8>("Bulk.Upload", vec![7; 32 * 1024 * 1024]);
    // Give the writer task time to fill the socket buffers and stall
    tokio::time::sleep(Duration::from_millis(300)).await;

    tokio::time::timeout(Duration::from_secs(5), client.close())
        .await
        .expect("close waited on the stalled write")
        .unwrap();

    let call = tokio::time::timeout(Duration::from_secs(5), completions.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(call.error, Some(Error::Shutdown)));
}

#[tokio::test]
async fn dial_unix_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("rpc.sock");

    let listener = UnixTransportListener::bind(&socket_path).await.unwrap();
    tokio::spawn(async move {
        let transport = listener.accept().await.unwrap();
        serve_double(Peer::new(transport)).await;
    });

    let client = dial_unix(&socket_path).await.unwrap();
    let reply: u64 = client.call("Arith.Double", 3u64).await.unwrap();
    assert_eq!(reply, 6);
}
