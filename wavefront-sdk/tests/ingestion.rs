// Copyright 2024-Present VMware, Inc.
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests driving the public client API against real transports:
//! a plain TCP listener standing in for a Wavefront proxy, and an HTTP mock
//! standing in for the direct-ingestion API.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Read;
use std::net::TcpListener;
use std::sync::{Mutex, OnceLock};
use std::thread::JoinHandle;
use std::time::Duration;

use httpmock::prelude::*;
use uuid::Uuid;
use wavefront_common::{HistogramGranularity, SpanLog};
use wavefront_sdk::{WavefrontClientFactory, WavefrontSender};

/// Accept one connection and read everything sent until the client closes.
fn recv_all(listener: TcpListener) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let (mut socket, _) = listener.accept().unwrap();
        let mut received = String::new();
        socket.read_to_string(&mut received).unwrap();
        received
    })
}

fn proxy_factory(port: u16) -> WavefrontClientFactory {
    let mut factory = WavefrontClientFactory::new();
    factory
        .add_client_with(&format!("proxy://127.0.0.1:{port}"), |builder| {
            builder.flush_interval(Duration::from_secs(3600))
        })
        .unwrap();
    factory
}

#[test]
fn proxy_client_ships_metric_lines_in_order() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = recv_all(listener);

    let factory = proxy_factory(port);
    let client = factory.get_client().unwrap();
    for i in 0..3 {
        client
            .send_metric(
                "new-york.power.usage",
                42422.0 + f64::from(i),
                Some(1493773500),
                "localhost",
                &HashMap::from([("datacenter".to_owned(), "dc1".to_owned())]),
            )
            .unwrap();
    }
    client.flush_now();
    client.close();

    let received = server.join().unwrap();
    let lines: Vec<&str> = received.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[0],
        "\"new-york.power.usage\" 42422.0 1493773500 source=\"localhost\" \"datacenter\"=\"dc1\""
    );
    // FIFO within the family: receiver-visible order matches send order.
    assert!(lines[1].contains("42423.0"));
    assert!(lines[2].contains("42424.0"));
}

#[test]
fn proxy_client_ships_spans_and_their_logs_on_the_tracing_port() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = recv_all(listener);

    let factory = proxy_factory(port);
    let client = factory.get_client().unwrap();
    let trace_id = Uuid::parse_str("7b3bf470-9456-11e8-9eb6-529269fb1459").unwrap();
    let span_id = Uuid::parse_str("0313bafe-9457-11e8-9eb6-529269fb1459").unwrap();
    let logs = vec![SpanLog::new(
        1635123789456000,
        BTreeMap::from([("FooLogKey".to_owned(), "FooLogValue".to_owned())]),
    )];
    client
        .send_span(
            "getAllUsers",
            1493773500,
            343500,
            "localhost",
            trace_id,
            span_id,
            &[],
            &[],
            &[("application".to_owned(), "Wavefront".to_owned())],
            &logs,
        )
        .unwrap();
    client.flush_now();
    client.close();

    let received = server.join().unwrap();
    let lines: Vec<&str> = received.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("\"getAllUsers\" source=\"localhost\" traceId="));
    assert!(lines[0].contains("\"_spanLogs\"=\"true\""));
    assert!(lines[1].starts_with("{\"traceId\":\"7b3bf470-9456-11e8-9eb6-529269fb1459\""));
    assert!(lines[1].contains("\"FooLogKey\":\"FooLogValue\""));
}

#[test]
fn proxy_client_ships_events_as_event_lines() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = recv_all(listener);

    let factory = proxy_factory(port);
    let client = factory.get_client().unwrap();
    client
        .send_event(
            "event-backup",
            1590678089,
            Some(1590679089),
            "localhost",
            &["test".to_owned()],
            &HashMap::from([("severity".to_owned(), "severe".to_owned())]),
        )
        .unwrap();
    client.flush_now();
    client.close();

    let received = server.join().unwrap();
    assert_eq!(
        received,
        "@Event 1590678089 1590679089 \"event-backup\" severity=\"severe\" \
         host=\"localhost\" tag=\"test\"\n"
    );
}

static GZIP_BODIES: OnceLock<Mutex<Vec<String>>> = OnceLock::new();

fn capture_gzip_body(req: &HttpMockRequest) -> bool {
    let Some(body) = req.body.as_ref() else {
        return false;
    };
    let mut decoder = flate2::read::GzDecoder::new(body.as_slice());
    let mut decompressed = String::new();
    if decoder.read_to_string(&mut decompressed).is_err() {
        return false;
    }
    GZIP_BODIES
        .get_or_init(|| Mutex::new(Vec::new()))
        .lock()
        .unwrap()
        .push(decompressed);
    true
}

#[test]
fn direct_client_posts_gzip_batches_with_every_family_format() {
    let server = MockServer::start();
    let report = server.mock(move |when, then| {
        when.method(POST)
            .path("/report")
            .header("content-encoding", "gzip")
            .matches(capture_gzip_body);
        then.status(202);
    });

    // The mock only speaks plain HTTP, so the client is built directly;
    // leaving the proxy ports unset selects the direct-ingestion transport.
    let direct = wavefront_sdk::WavefrontClient::builder(server.base_url())
        .token("integration-token")
        .flush_interval(Duration::from_secs(3600))
        .build()
        .unwrap();

    direct
        .send_metric("cpu.load", 1.5, None, "host-1", &HashMap::new())
        .unwrap();
    let granularities: BTreeSet<_> = [HistogramGranularity::Minute].into_iter().collect();
    direct
        .send_distribution(
            "request.latency",
            &[(30.0, 20), (5.1, 10)],
            &granularities,
            Some(1493773500),
            "appServer1",
            &HashMap::new(),
        )
        .unwrap();
    direct.flush_now();
    direct.close();

    assert_eq!(report.hits(), 2);
    let bodies = GZIP_BODIES.get_or_init(|| Mutex::new(Vec::new())).lock().unwrap();
    assert!(bodies
        .iter()
        .any(|body| body.starts_with("\"cpu.load\" 1.5 source=\"host-1\"")));
    assert!(bodies
        .iter()
        .any(|body| body.starts_with("!M 1493773500 #20 30.0 #10 5.1 \"request.latency\"")));
}

#[test]
fn multi_sender_fans_out_to_every_endpoint() {
    let first_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let first_port = first_listener.local_addr().unwrap().port();
    let second_listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let second_port = second_listener.local_addr().unwrap().port();
    let first = recv_all(first_listener);
    let second = recv_all(second_listener);

    let mut factory = WavefrontClientFactory::new();
    for port in [first_port, second_port] {
        factory
            .add_client_with(&format!("proxy://127.0.0.1:{port}"), |builder| {
                builder.flush_interval(Duration::from_secs(3600))
            })
            .unwrap();
    }
    let client = factory.get_client().unwrap();
    client
        .send_metric("cpu.load", 1.0, None, "host-1", &HashMap::new())
        .unwrap();
    client.flush_now();
    client.close();

    for handle in [first, second] {
        let received = handle.join().unwrap();
        assert_eq!(received, "\"cpu.load\" 1.0 source=\"host-1\"\n");
    }
}
