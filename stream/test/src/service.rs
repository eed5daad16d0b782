//! The numbers service used by the integration tests.
//!
//! - `GetNumber` (unary): `initial_count + 1`
//! - `GetNumbers` (server-streaming): `k..k+99`, then the final `k + 99`
//! - `SendNumbers` (client-streaming): the last value received plus one
//! - `ExchangeNumbers` (bidi): echo each value plus one, then [SENTINEL] once the client is done
//!
//! Values above [THRESHOLD] make the streaming handlers refuse further input.

use crate::{AsyncIO, RT, TestServer};
use crossfire::MTx;
use log::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strand_rpc_stream::context::CallContext;
use strand_rpc_stream::error::StreamError;
use strand_rpc_stream::server::ServiceRegistry;
use strand_rpc_stream::stream::ServerStream;

pub const THRESHOLD: i32 = 999;

pub const SENTINEL: i32 = 1000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Request {
    pub initial_count: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Response {
    pub count: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Count {
    pub result: i32,
}

pub type NumStream<Req, Resp> = ServerStream<TestServer, Req, Resp>;

pub async fn get_number(_ctx: CallContext, req: Request) -> Result<Response, StreamError> {
    Ok(Response { count: req.initial_count + 1 })
}

pub async fn get_numbers(req: Request, stream: NumStream<Request, Count>) -> Result<(), StreamError> {
    let initial = req.initial_count;
    if initial > THRESHOLD {
        return stream.close_send();
    }
    for i in initial..initial + 99 {
        stream.send(&Count { result: i })?;
    }
    stream.close_and_send(&Count { result: initial + 99 })
}

pub async fn send_numbers(stream: NumStream<Count, Response>) -> Result<(), StreamError> {
    let mut count = 0;
    loop {
        match stream.recv().await {
            Ok(c) => {
                if c.result > THRESHOLD {
                    // What the client keeps sending is dropped
                    return stream.close_send();
                }
                count = c.result;
            }
            Err(StreamError::EndOfStream) => {
                return stream.close_and_send(&Response { count: count + 1 });
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn exchange_numbers(stream: NumStream<Count, Count>) -> Result<(), StreamError> {
    let ctx = stream.context().clone();
    let mut refused = false;
    loop {
        if let Some(e) = ctx.err() {
            return Err(e);
        }
        match stream.recv().await {
            Ok(c) => {
                if refused {
                    continue;
                }
                if c.result > THRESHOLD {
                    refused = true;
                    stream.close_send()?;
                    continue;
                }
                stream.send(&Count { result: c.result + 1 })?;
            }
            Err(StreamError::EndOfStream) => {
                if let Err(e) = stream.close_and_send(&Count { result: SENTINEL }) {
                    debug!("{:?} final count not sent: {}", stream, e);
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn number_registry() -> ServiceRegistry<TestServer> {
    ServiceRegistry::new()
        .unary("GetNumber", get_number)
        .server_streaming("GetNumbers", get_numbers)
        .client_streaming("SendNumbers", send_numbers)
        .bidi_streaming("ExchangeNumbers", exchange_numbers)
}

/// What the reporting handlers observed
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    /// Remaining time of the handler's context when it started
    Deadline(Option<Duration>),
    /// The error which stopped the handler
    Ended(StreamError),
    /// What send and recv returned once the handler's context was done
    AfterDone { send: Result<(), StreamError>, recv: Result<Count, StreamError> },
}

pub async fn next_report(rx: &crossfire::MAsyncRx<Report>) -> Report {
    <RT as AsyncIO>::timeout(Duration::from_secs(3), rx.recv())
        .await
        .expect("report timeout")
        .expect("report closed")
}

/// The numbers service plus handlers reporting to `report`:
///
/// - `Watch` (bidi): echo plus one until recv fails
/// - `Wait` (unary): block until the context is done
/// - `Linger` (bidi): echo the first value, then try both directions once the context is done
/// - `Refuse` (bidi): close its side at once, wait for the caller's end, then report whether the
///   call got cancelled meanwhile
pub fn report_registry(report: MTx<Report>) -> ServiceRegistry<TestServer> {
    let watch_tx = report.clone();
    let linger_tx = report.clone();
    let refuse_tx = report.clone();
    let wait_tx = report;
    number_registry()
        .bidi_streaming("Watch", move |stream: NumStream<Count, Count>| {
            let tx = watch_tx.clone();
            async move {
                loop {
                    match stream.recv().await {
                        Ok(c) => stream.send(&Count { result: c.result + 1 })?,
                        Err(e) => {
                            let _ = tx.send(Report::Ended(e.clone()));
                            return Err::<(), _>(e);
                        }
                    }
                }
            }
        })
        .unary("Wait", move |ctx: CallContext, _req: Request| {
            let tx = wait_tx.clone();
            async move {
                let _ = tx.send(Report::Deadline(ctx.remaining()));
                ctx.done::<crate::RT>().await;
                let e = ctx.err().unwrap_or(StreamError::Cancelled);
                let _ = tx.send(Report::Ended(e.clone()));
                Err::<Response, _>(e)
            }
        })
        .bidi_streaming("Linger", move |stream: NumStream<Count, Count>| {
            let tx = linger_tx.clone();
            async move {
                let c = stream.recv().await?;
                stream.send(&Count { result: c.result + 1 })?;
                stream.context().done::<RT>().await;
                let send = stream.send(&Count { result: 0 });
                let recv = stream.recv().await;
                let _ = tx.send(Report::AfterDone { send, recv });
                Ok::<(), StreamError>(())
            }
        })
        .bidi_streaming("Refuse", move |stream: NumStream<Count, Count>| {
            let tx = refuse_tx.clone();
            async move {
                stream.close_send()?;
                loop {
                    match stream.recv().await {
                        Ok(_) => continue,
                        Err(StreamError::EndOfStream) => break,
                        Err(e) => {
                            let _ = tx.send(Report::Ended(e.clone()));
                            return Err(e);
                        }
                    }
                }
                // Anything the caller sends after its end would land in this window
                <RT as AsyncIO>::sleep(Duration::from_millis(100)).await;
                let e = stream.context().err().unwrap_or(StreamError::EndOfStream);
                let _ = tx.send(Report::Ended(e));
                Ok::<(), StreamError>(())
            }
        })
}
