use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proctel::agent::{self, Agent};
use proctel::config::Config;
use proctel::report::{render_json, render_text};
use proctel::telemetry::{Aggregator, Dispatch};
use proctel::tracer::event::{EventType, ProcessEvent};
use proctel::tracer::parse::{encode_event, parse_event, RECORD_SIZE};
use proctel::tracer::{channel, Source};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn fork_record(ts: u64, pid: u32, uid: u32, comm: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_SIZE);
    buf.extend_from_slice(&ts.to_le_bytes());
    buf.extend_from_slice(&pid.to_le_bytes());
    buf.extend_from_slice(&uid.to_le_bytes());
    buf.push(EventType::Fork as u8);
    buf.extend_from_slice(&[0u8; 7]);
    let mut name = [0u8; 16];
    name[..comm.len()].copy_from_slice(comm);
    buf.extend_from_slice(&name);
    buf
}

fn exit_record(ts: u64, pid: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_SIZE);
    buf.extend_from_slice(&ts.to_le_bytes());
    buf.extend_from_slice(&pid.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.push(EventType::Exit as u8);
    buf.extend_from_slice(&[0u8; 23]);
    buf
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.health.addr = "127.0.0.1:0".to_string();
    cfg
}

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.expect("write");

    let mut response = String::new();
    stream.read_to_string(&mut response).await.expect("read");
    response
}

#[test]
fn wire_records_to_text_report() {
    let sec = 1_000_000_000u64;
    let records = [
        fork_record(0, 100, 1000, b"make"),
        fork_record(sec, 101, 1000, b"cc1"),
        fork_record(2 * sec, 102, 0, b"sshd"),
        exit_record(3 * sec, 101),
        exit_record(4 * sec, 55),
        exit_record(10 * sec, 100),
    ];

    let agg = Aggregator::new(5);
    for raw in &records {
        assert_eq!(raw.len(), RECORD_SIZE);
        let event = parse_event(raw).expect("parse");
        agg.handle_event(&event);
    }

    let snap = agg.read();
    assert_eq!(snap.fork_count, 3);
    assert_eq!(snap.exit_count, 3);
    assert_eq!(snap.untracked_exits, 1);
    assert_eq!(snap.tracked, 1);

    let text = render_text(&snap);
    let expected_tail = "\
Top 5 Longest Running Processes:
1) PID=100 UID=1000 CMD=make LIFETIME=10.000 sec
2) PID=101 UID=1000 CMD=cc1 LIFETIME=2.000 sec
";
    assert!(text.ends_with(expected_tail), "{text}");
    assert!(text.contains("Untracked exits : 1"));
    assert!(text.contains("In flight       : 1"));
    assert!(text.contains("Last PID        : 102\nLast Command    : sshd\n"));

    let json = render_json(&snap).expect("json");
    assert!(json.contains("\"comm\": \"make\""));
}

#[test]
fn eviction_keeps_the_longest_lifetimes() {
    let agg = Aggregator::new(5);
    let mut pid = 0u32;
    let mut complete = |lifetime_ns: u64| {
        pid += 1;
        agg.handle_event(&ProcessEvent::fork(1_000, pid, 0, "job"));
        agg.handle_event(&ProcessEvent::exit(1_000 + lifetime_ns, pid))
    };

    for lt in [10, 20, 30, 40, 50] {
        assert!(matches!(complete(lt), Dispatch::Retained { .. }));
    }
    assert!(matches!(complete(5), Dispatch::Discarded { .. }));
    let Dispatch::Evicted { evicted, .. } = complete(15) else {
        panic!("expected eviction");
    };
    assert_eq!(evicted.lifetime_ns, 10);

    let mut kept: Vec<u64> = agg.read().top_k.iter().map(|r| r.lifetime_ns).collect();
    kept.sort_unstable();
    assert_eq!(kept, vec![15, 20, 30, 40, 50]);
}

#[test]
fn concurrent_producers_and_readers() {
    const PRODUCERS: u32 = 6;
    const PER_PRODUCER: u32 = 1_500;

    let agg = Arc::new(Aggregator::new(8));

    let reader = {
        let agg = Arc::clone(&agg);
        thread::spawn(move || {
            for _ in 0..500 {
                let snap = agg.read();
                assert!(snap.top_k.len() <= 8);
                assert!(snap.exit_count <= snap.fork_count);
                assert_eq!(snap.fork_count - snap.exit_count, snap.tracked as u64);
            }
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let agg = Arc::clone(&agg);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let pid = p * 100_000 + i;
                    agg.handle_event(&ProcessEvent::fork(0, pid, p, "worker"));
                    agg.handle_event(&ProcessEvent::exit(u64::from(pid), pid));
                }
            })
        })
        .collect();

    for handle in producers {
        handle.join().expect("producer");
    }
    reader.join().expect("reader");

    let snap = agg.read();
    let total = u64::from(PRODUCERS * PER_PRODUCER);
    assert_eq!(snap.fork_count, total);
    assert_eq!(snap.exit_count, total);
    assert_eq!(snap.tracked, 0);
    assert_eq!(snap.top_k.len(), 8);

    // The largest pid of the last producer has the longest lifetime.
    let longest = snap.ranked()[0];
    assert_eq!(longest.pid, (PRODUCERS - 1) * 100_000 + PER_PRODUCER - 1);
}

#[tokio::test]
async fn agent_serves_report_over_http() {
    let (tx, rx) = channel(32);
    let mut agent = Agent::with_source(test_config(), Source::Channel(rx)).expect("agent");
    agent.start().await.expect("start");
    let addr = agent.health_addr().expect("bound");

    tx.send(ProcessEvent::fork(0, 4242, 1000, "postgres"))
        .await
        .expect("send");
    tx.send(ProcessEvent::exit(7_250_000_000, 4242))
        .await
        .expect("send");
    tx.send(ProcessEvent::Unknown { event_type: 200 })
        .await
        .expect("send");
    drop(tx);
    agent.wait_for_source().await.expect("drain");

    let report = http_get(addr, "/report").await;
    assert!(report.contains("1) PID=4242 UID=1000 CMD=postgres LIFETIME=7.250 sec"));

    let metrics = http_get(addr, "/metrics").await;
    assert!(metrics.contains("proctel_events_received_total 3"));
    assert!(metrics.contains("proctel_events_by_type_total{event_type=\"unknown\"} 1"));
    assert!(metrics.contains("proctel_topk_admissions_total 1"));

    assert_eq!(agent.aggregator().read().unknown_events, 1);
    agent.stop().await.expect("stop");
}

#[tokio::test]
async fn replay_file_round_trip() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    let events = [
        ProcessEvent::fork(100, 1, 0, "init-helper"),
        ProcessEvent::exit(50, 1),
        ProcessEvent::fork(0, 2, 0, "cron"),
        ProcessEvent::exit(3_000_000, 2),
    ];
    for event in &events {
        file.write_all(&encode_event(event)).expect("write");
    }
    file.flush().expect("flush");

    let snap = agent::replay_file(file.path(), 3).await.expect("replay");
    assert_eq!(snap.fork_count, 2);
    assert_eq!(snap.exit_count, 2);
    assert_eq!(snap.clock_anomalies, 1);
    assert_eq!(snap.top_k.len(), 1);
    assert_eq!(snap.top_k[0].lifetime(), Duration::from_millis(3));
}
