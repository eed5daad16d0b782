use crate::service::*;
use crate::*;
use strand_rpc_stream::context::CallContext;
use strand_rpc_stream::error::StreamError;
use strand_rpc_stream::stream::ClientStream;

type Stream<Req, Resp> = ClientStream<TestClient, Req, Resp>;

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_unary(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let (client, _server) = init_pair(chan, number_registry());
        let ctx = CallContext::background();
        for k in [0, 5, 41, -3, 999] {
            let resp: Response = client
                .call_unary(&ctx, "GetNumber", &Request { initial_count: k })
                .await
                .expect("unary");
            assert_eq!(resp.count, k + 1);
        }
        assert_eq!(client.live_streams(), 0);
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_unary_concurrent(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let (client, _server) = init_pair(chan, number_registry());
        let ctx = CallContext::background();
        let calls = (0..64).map(|k| {
            let client = client.clone();
            let ctx = ctx.clone();
            async move {
                client
                    .call_unary::<Request, Response>(&ctx, "GetNumber", &Request { initial_count: k })
                    .await
            }
        });
        let results = futures::future::join_all(calls).await;
        for (k, res) in results.into_iter().enumerate() {
            assert_eq!(res.expect("unary").count, k as i32 + 1);
        }
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem, 5)]
#[case(Chan::Sock, 5)]
#[case(Chan::Mem, 0)]
#[case(Chan::Sock, 900)]
fn test_server_streaming(runner: TestRunner, #[case] chan: Chan, #[case] k: i32) {
    runner.block_on(async move {
        let (client, _server) = init_pair(chan, number_registry());
        let ctx = CallContext::background();
        let stream: Stream<Request, Count> = client
            .call_server_streaming(&ctx, "GetNumbers", &Request { initial_count: k })
            .expect("open");
        let mut expect = k;
        loop {
            match stream.recv().await {
                Ok(c) => {
                    assert_eq!(c.result, expect);
                    expect += 1;
                }
                Err(e) => {
                    assert_eq!(e, StreamError::EndOfStream);
                    break;
                }
            }
        }
        // k..k+98 and the final k+99
        assert_eq!(expect, k + 100);
        for _ in 0..3 {
            assert_eq!(stream.recv().await.unwrap_err(), StreamError::EndOfStream);
        }
        // The request closed the send side
        assert_eq!(stream.send(&Request { initial_count: 1 }).unwrap_err(), StreamError::StreamClosed);
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_client_streaming(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let (client, _server) = init_pair(chan, number_registry());
        let ctx = CallContext::background();
        let stream: Stream<Count, Response> = client
            .call_client_streaming(&ctx, "SendNumbers", Some(&Count { result: 0 }))
            .expect("open");
        for i in 1..100 {
            stream.send(&Count { result: i }).expect("send");
        }
        let resp = stream.close_and_recv().await.expect("aggregate");
        assert_eq!(resp.count, 100);
        assert_eq!(stream.send(&Count { result: 1 }).unwrap_err(), StreamError::StreamClosed);
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::EndOfStream);

        // Without the initial value
        let stream: Stream<Count, Response> =
            client.call_client_streaming(&ctx, "SendNumbers", None).expect("open");
        for i in 1..=9 {
            stream.send(&Count { result: i }).expect("send");
        }
        assert_eq!(stream.close_and_recv().await.expect("aggregate").count, 10);
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_bidi_increment(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let (client, _server) = init_pair(chan, number_registry());
        let ctx = CallContext::background();
        let stream: Stream<Count, Count> = client
            .call_bidi_streaming(&ctx, "ExchangeNumbers", Some(&Count { result: 0 }))
            .expect("open");
        let mut n = 0;
        loop {
            let c = stream.recv().await.expect("recv");
            n += 1;
            assert_eq!(c.result, 2 * n - 1);
            if c.result == 99 {
                stream.close_send().expect("close_send");
                // idempotent
                stream.close_send().expect("close_send");
                break;
            }
            stream.send(&Count { result: c.result + 1 }).expect("send");
        }
        assert_eq!(n, 50);
        // Once the client is done the server answers with the sentinel
        assert_eq!(stream.recv().await.expect("sentinel").result, SENTINEL);
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::EndOfStream);
        assert_eq!(stream.send(&Count { result: 1 }).unwrap_err(), StreamError::StreamClosed);
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem, 0)]
#[case(Chan::Mem, 1)]
#[case(Chan::Mem, 500)]
#[case(Chan::Sock, 500)]
fn test_bidi_ordering(runner: TestRunner, #[case] chan: Chan, #[case] count: i32) {
    runner.block_on(async move {
        let (client, _server) = init_pair(chan, number_registry());
        let ctx = CallContext::background();
        let stream: Stream<Count, Count> =
            client.call_bidi_streaming(&ctx, "ExchangeNumbers", None).expect("open");
        for i in 0..count {
            stream.send(&Count { result: i }).expect("send");
        }
        stream.close_send().expect("close_send");
        for i in 0..count {
            assert_eq!(stream.recv().await.expect("recv").result, i + 1);
        }
        assert_eq!(stream.recv().await.expect("sentinel").result, SENTINEL);
        for _ in 0..2 {
            assert_eq!(stream.recv().await.unwrap_err(), StreamError::EndOfStream);
        }
    });
}

#[logfn]
#[rstest]
#[case(Chan::Mem)]
#[case(Chan::Sock)]
fn test_early_refusal(runner: TestRunner, #[case] chan: Chan) {
    runner.block_on(async move {
        let (client, _server) = init_pair(chan, number_registry());
        let ctx = CallContext::background();

        let stream: Stream<Request, Count> = client
            .call_server_streaming(&ctx, "GetNumbers", &Request { initial_count: SENTINEL })
            .expect("open");
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::EndOfStream);

        let stream: Stream<Count, Response> = client
            .call_client_streaming(&ctx, "SendNumbers", Some(&Count { result: SENTINEL }))
            .expect("open");
        for i in 1..100 {
            // Late values are dropped by the server, not an error here
            if let Err(e) = stream.send(&Count { result: i }) {
                debug!("send after refusal: {}", e);
                break;
            }
        }
        assert_eq!(stream.close_and_recv().await.unwrap_err(), StreamError::EndOfStream);

        let stream: Stream<Count, Count> = client
            .call_bidi_streaming(&ctx, "ExchangeNumbers", Some(&Count { result: SENTINEL }))
            .expect("open");
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::EndOfStream);
        assert_eq!(stream.recv().await.unwrap_err(), StreamError::EndOfStream);
        // Our own direction is still open until we close it
        stream.send(&Count { result: 1 }).expect("send");
        stream.close_send().expect("close_send");
        drop(stream);

        // The connection serves new calls afterwards
        let resp: Response =
            client.call_unary(&ctx, "GetNumber", &Request { initial_count: 1 }).await.expect("unary");
        assert_eq!(resp.count, 2);
    });
}
