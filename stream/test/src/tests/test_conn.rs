use crate::service::*;
use crate::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use strand_rpc_stream::client::{ClientConfig, RpcClient};
use strand_rpc_stream::context::CallContext;
use strand_rpc_stream::error::{EncodedErr, RpcIntErr, StreamError};
use strand_rpc_stream::proto::{FrameKind, MAX_METHOD_LEN, MAX_MSG_LEN};
use strand_rpc_stream::server::{MethodKind, ServerConfig};
use strand_rpc_stream::stream::ClientStream;
use strand_rpc_stream::transport::{FrameTransport, mem::mem_pair, sock::socket_pair};
use strand_rpc_stream::RecvErrPolicy;

type Stream<Req, Resp> = ClientStream<TestClient, Req, Resp>;

/// Not decodable as any of the numbers messages
#[derive(Serialize, Deserialize, Debug)]
struct Garbage {
    text: String,
}

async fn wait_until<P: Fn() -> bool>(pred: P, limit: Duration) -> bool {
    let start = Instant::now();
    while !pred() {
        if start.elapsed() > limit {
            return false;
        }
        <RT as AsyncIO>::sleep(Duration::from_millis(20)).await;
    }
    true
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_unknown_method(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let (client, server) = init_pair(chan, number_registry());
        assert_eq!(server.registry().len(), 4);
        assert_eq!(server.registry().kind_of("ExchangeNumbers"), Some(MethodKind::BidiStreaming));
        assert_eq!(server.registry().kind_of("GetNothing"), None);
        let ctx = CallContext::background();
        let res = client
            .call_unary::<Request, Response>(&ctx, "GetNothing", &Request { initial_count: 1 })
            .await;
        assert_eq!(res.unwrap_err(), StreamError::Peer(EncodedErr::Rpc(RpcIntErr::Method)));

        let stream: Stream<Count, Count> =
            client.call_bidi_streaming(&ctx, "ExchangeNothing", None).expect("open");
        let err = stream.recv().await.unwrap_err();
        assert_eq!(err, StreamError::Peer(RpcIntErr::Method.into()));
        // The peer aborted, sending reports the same
        assert_eq!(stream.send(&Count { result: 1 }).unwrap_err(), err);
        assert_eq!(client.live_streams(), 0);
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_handler_error(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let registry = number_registry()
            .unary("Fail", |_ctx: CallContext, req: Request| async move {
                Err::<Response, _>(StreamError::app(format!("refuse {}", req.initial_count)))
            })
            .server_streaming("FailLater", |req: Request, stream: NumStream<Request, Count>| {
                async move {
                    stream.send(&Count { result: req.initial_count })?;
                    Err::<(), _>(StreamError::app("boom"))
                }
            });
        let (client, _server) = init_pair(chan, registry);
        let ctx = CallContext::background();
        let res =
            client.call_unary::<Request, Response>(&ctx, "Fail", &Request { initial_count: 3 }).await;
        let err = res.unwrap_err();
        assert_eq!(err, StreamError::app("refuse 3"));
        assert_eq!(err.to_string(), "peer error: refuse 3");

        let stream: Stream<Request, Count> = client
            .call_server_streaming(&ctx, "FailLater", &Request { initial_count: 8 })
            .expect("open");
        assert_eq!(stream.recv().await.expect("recv").result, 8);
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::app("boom"));
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::app("boom"));
    });
}

async fn check_connection_lost<T: FrameTransport>(local: T, remote: T) {
    let client = RpcClient::new(TestClient::new(ClientConfig::default(), new_rt()), local);
    let ctx = CallContext::background();
    let stream: Stream<Count, Count> =
        client.call_bidi_streaming(&ctx, "ExchangeNumbers", None).expect("open");
    let open = remote.read_frame().await.expect("read open");
    assert_eq!(open.kind, FrameKind::Open);
    assert_eq!(open.stream_id, stream.id());
    assert_eq!(open.method.as_deref(), Some("ExchangeNumbers"));
    drop(remote);
    assert_eq!(stream.recv().await.unwrap_err(), StreamError::ConnectionLost);
    assert_eq!(stream.recv().await.unwrap_err(), StreamError::ConnectionLost);
    assert!(client.is_lost());
    assert_eq!(client.live_streams(), 0);
    let res =
        client.call_unary::<Request, Response>(&ctx, "GetNumber", &Request { initial_count: 1 }).await;
    assert_eq!(res.unwrap_err(), StreamError::ConnectionLost);
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_connection_lost(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        match chan {
            Chan::Mem => {
                let (a, b) = mem_pair();
                check_connection_lost(a, b).await;
            }
            Chan::Sock => {
                let (a, b) = socket_pair::<RT>(0).expect("socket pair");
                check_connection_lost(a, b).await;
            }
        }
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_handler_sees_connection_lost(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let (report_tx, report_rx) = crossfire::mpmc::unbounded_async();
        let server = init_server(ServerConfig::default(), report_registry(report_tx));
        let client = connect(chan, ClientConfig::default(), &server);
        let ctx = CallContext::background();
        let stream: Stream<Count, Count> =
            client.call_bidi_streaming(&ctx, "Linger", Some(&Count { result: 1 })).expect("open");
        assert_eq!(stream.recv().await.expect("recv").result, 2);
        // The channel closes once the client and its streams are gone
        client.close();
        assert!(wait_until(|| client.is_lost(), Duration::from_secs(3)).await);
        drop(stream);
        drop(client);
        let report = next_report(&report_rx).await;
        assert_eq!(
            report,
            Report::AfterDone {
                send: Err(StreamError::ConnectionLost),
                recv: Err(StreamError::ConnectionLost)
            }
        );
        assert!(wait_until(|| server.get_alive_conn() == 0, Duration::from_secs(3)).await);
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_oversized_message(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let (client, _server) = init_pair(chan, number_registry());
        let ctx = CallContext::background();
        let big: Stream<Garbage, Count> =
            client.call_bidi_streaming(&ctx, "ExchangeNumbers", None).expect("open");
        let other: Stream<Count, Count> =
            client.call_bidi_streaming(&ctx, "ExchangeNumbers", Some(&Count { result: 1 })).expect("open");
        assert_eq!(other.recv().await.expect("recv").result, 2);

        let huge = Garbage { text: "x".repeat(MAX_MSG_LEN + 1) };
        assert_eq!(big.send(&huge).unwrap_err(), StreamError::Encode);
        assert_eq!(big.close_and_send(&huge).unwrap_err(), StreamError::Encode);
        let res = client.call_bidi_streaming::<Garbage, Count>(&ctx, "ExchangeNumbers", Some(&huge));
        assert_eq!(res.unwrap_err(), StreamError::Encode);
        let name = "N".repeat(MAX_METHOD_LEN + 1);
        let res = client.call_bidi_streaming::<Count, Count>(&ctx, &name, None);
        assert_eq!(res.unwrap_err(), StreamError::Encode);
        assert_eq!(client.live_streams(), 2);

        // Only the oversized messages failed, both calls carry on
        other.send(&Count { result: 3 }).expect("send");
        assert_eq!(other.recv().await.expect("recv").result, 4);
        big.close_send().expect("close_send");
        assert_eq!(big.recv().await.expect("sentinel").result, SENTINEL);
        assert!(!client.is_lost());
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_client_close(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let (client, server) = init_pair(chan, number_registry());
        let ctx = CallContext::background();
        let stream: Stream<Count, Count> =
            client.call_bidi_streaming(&ctx, "ExchangeNumbers", Some(&Count { result: 1 })).expect("open");
        assert_eq!(stream.recv().await.expect("recv").result, 2);
        client.close();
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::ConnectionLost);
        drop(stream);
        drop(client);
        // The server side notices and releases the connection
        assert!(wait_until(|| server.get_alive_conn() == 0, Duration::from_secs(3)).await);
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_server_close(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let (report_tx, report_rx) = crossfire::mpmc::unbounded_async();
        let config = ServerConfig { server_close_wait: Duration::from_secs(3), ..Default::default() };
        let server = init_server(config, report_registry(report_tx));
        let client = connect(chan, ClientConfig::default(), &server);
        let ctx = CallContext::background();
        let stream: Stream<Count, Count> =
            client.call_bidi_streaming(&ctx, "Watch", Some(&Count { result: 1 })).expect("open");
        assert_eq!(stream.recv().await.expect("recv").result, 2);
        assert_eq!(server.get_alive_conn(), 1);

        let start = Instant::now();
        server.close().await;
        assert!(start.elapsed() < Duration::from_secs(3));
        assert_eq!(server.get_alive_conn(), 0);
        let report = report_rx.try_recv().expect("handler stopped");
        assert_eq!(report, Report::Ended(StreamError::Cancelled));
        // The handler's terminal frame reached the caller before the channel closed
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::Cancelled);
        assert!(wait_until(|| client.is_lost(), Duration::from_secs(3)).await);

        let (_a, b) = mem_pair();
        assert_eq!(server.serve_conn(b).unwrap_err(), StreamError::StreamClosed);
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_idle_timeout(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let config = ServerConfig { idle_timeout: Duration::from_millis(200), ..Default::default() };
        let server = init_server(config, number_registry());
        let client = connect(chan, ClientConfig::default(), &server);
        let ctx = CallContext::background();

        // A live call keeps the connection, however quiet
        let stream: Stream<Count, Count> =
            client.call_bidi_streaming(&ctx, "ExchangeNumbers", Some(&Count { result: 1 })).expect("open");
        assert_eq!(stream.recv().await.expect("recv").result, 2);
        <RT as AsyncIO>::sleep(Duration::from_millis(500)).await;
        assert!(!client.is_lost());
        stream.send(&Count { result: 3 }).expect("send");
        assert_eq!(stream.recv().await.expect("recv").result, 4);
        stream.close_send().expect("close_send");
        assert_eq!(stream.recv().await.expect("sentinel").result, SENTINEL);
        drop(stream);

        assert!(wait_until(|| client.is_lost(), Duration::from_secs(3)).await);
        assert!(wait_until(|| server.get_alive_conn() == 0, Duration::from_secs(3)).await);
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_recv_err_policy(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let (client, _server) = init_pair(chan, number_registry());
        let ctx = CallContext::background();

        // The server skips what it cannot decode
        let stream: Stream<Garbage, Count> =
            client.call_bidi_streaming(&ctx, "ExchangeNumbers", None).expect("open");
        for i in 0..3 {
            stream.send(&Garbage { text: format!("junk {}", i) }).expect("send");
        }
        stream.close_send().expect("close_send");
        assert_eq!(stream.recv().await.expect("sentinel").result, SENTINEL);
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::EndOfStream);

        let stream: Stream<Request, Garbage> = client
            .call_server_streaming(&ctx, "GetNumbers", &Request { initial_count: 1 })
            .expect("open");
        stream.set_recv_policy(RecvErrPolicy::Abort);
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::Decode);
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::Decode);
        stream.set_recv_policy(RecvErrPolicy::Continue);
        // Every remaining message is skipped
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::EndOfStream);
    });
}
