//! End-to-end collection over a real TCP connection

use sitecollect::coordinator::ledger::FirstPending;
use sitecollect::coordinator::store::ResultStore;
use sitecollect::coordinator::{AssignmentSettings, Coordinator};
use sitecollect::distributed::protocol::{read_message, write_message, Browse, Message, PollMessage, PROTOCOL_VERSION};
use sitecollect::distributed::CoordinatorService;
use sitecollect::target::{read_table, TargetLoader};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};

fn build_coordinator(table: &Path, data_dir: &Path, samples: usize, scheme: &str, min_len: usize) -> Arc<Coordinator> {
    let rows = read_table(table).unwrap();
    let store = ResultStore::new(data_dir, ".pcap");
    let work = TargetLoader::new(samples, scheme).load(&rows, &store).unwrap();
    Arc::new(Coordinator::new(
        work,
        store,
        AssignmentSettings {
            timeout_secs: 15,
            all_traffic: false,
            min_payload_len: min_len,
        },
        Box::new(FirstPending),
    ))
}

async fn serve(coordinator: &Arc<Coordinator>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(CoordinatorService::new(Arc::clone(coordinator)).serve(listener));
    addr
}

async fn poll(stream: &mut TcpStream, worker: &str, previous: Browse) -> Browse {
    let request = Message::Poll(PollMessage {
        protocol_version: PROTOCOL_VERSION,
        worker_id: worker.to_string(),
        previous,
    });
    write_message(stream, &request).await.unwrap();
    match read_message(stream).await.unwrap() {
        Some(Message::Assignment(browse)) => browse,
        other => panic!("unexpected reply {:?}", other),
    }
}

fn result(assignment: &Browse, payload: &[u8]) -> Browse {
    Browse {
        payload: payload.to_vec(),
        ..assignment.clone()
    }
}

#[tokio::test]
async fn test_single_target_retry_then_accept() {
    let dir = TempDir::new().unwrap();
    let table = dir.path().join("sites.csv");
    std::fs::write(&table, "a,a.com\n").unwrap();
    let data_dir = dir.path().join("data");

    let coordinator = build_coordinator(&table, &data_dir, 1, "", 10);
    let addr = serve(&coordinator).await;
    let mut stream = TcpStream::connect(&addr).await.unwrap();

    let first = poll(&mut stream, "w1", Browse::default()).await;
    assert_eq!(first.id, "a-0");
    assert_eq!(first.target, "a.com");
    assert_eq!(coordinator.snapshot().workers, 1);

    let second = poll(&mut stream, "w1", result(&first, &[0; 5])).await;
    assert_eq!(second.id, "a-0");
    assert_eq!(second.target, "www.a.com");

    let third = poll(&mut stream, "w1", result(&second, &[1; 12])).await;
    assert!(third.id.is_empty());
    assert_eq!(third.timeout_secs, 15);

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.pending, 0);
    assert!(snapshot.is_finished());
    assert_eq!(std::fs::read(data_dir.join("a-0.pcap")).unwrap(), vec![1; 12]);
}

#[tokio::test]
async fn test_restart_resumes_from_data_dir() {
    let dir = TempDir::new().unwrap();
    let table = dir.path().join("sites.csv");
    std::fs::write(&table, "a,a.com\nb,b.com\n").unwrap();
    let data_dir = dir.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();

    // first run collects only a-0
    let coordinator = build_coordinator(&table, &data_dir, 1, "http", 4);
    let addr = serve(&coordinator).await;
    let mut stream = TcpStream::connect(&addr).await.unwrap();

    let first = poll(&mut stream, "w1", Browse::default()).await;
    assert_eq!(first.id, "a-0");
    assert_eq!(first.target, "http://a.com/");
    let second = poll(&mut stream, "w1", result(&first, b"capture")).await;
    assert_eq!(second.id, "b-0");
    // the worker (and coordinator) go away with b-0 in flight

    let restarted = build_coordinator(&table, &data_dir, 1, "http", 4);
    let snapshot = restarted.snapshot();
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.pending, 1);
    assert_eq!(snapshot.total, 2);

    // the old worker's late result for b-0 still counts and clears the re-created unit
    let addr = serve(&restarted).await;
    let mut stream = TcpStream::connect(&addr).await.unwrap();
    let reply = poll(&mut stream, "w1", result(&second, b"late capture")).await;
    assert!(reply.id.is_empty());

    let snapshot = restarted.snapshot();
    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.pending, 0);
    assert!(snapshot.is_finished());
}

#[tokio::test]
async fn test_many_workers_collect_every_sample() {
    let dir = TempDir::new().unwrap();
    let table = dir.path().join("sites.csv");
    let rows: String = (0..10).map(|i| format!("{},site{}.com\n", i, i)).collect();
    std::fs::write(&table, rows).unwrap();
    let data_dir = dir.path().join("data");

    let coordinator = build_coordinator(&table, &data_dir, 3, "https", 4);
    let addr = serve(&coordinator).await;

    let mut workers = Vec::new();
    for w in 0..5 {
        let addr = addr.clone();
        workers.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(&addr).await.unwrap();
            let worker = format!("w{}", w);
            let mut previous = Browse::default();
            loop {
                let next = poll(&mut stream, &worker, previous).await;
                if next.id.is_empty() {
                    break;
                }
                previous = result(&next, next.target.as_bytes());
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    let snapshot = coordinator.snapshot();
    assert_eq!(snapshot.completed, 30);
    assert!(snapshot.is_finished());
    assert_eq!(std::fs::read_dir(&data_dir).unwrap().count(), 30);
    assert_eq!(
        std::fs::read(data_dir.join("7-2.pcap")).unwrap(),
        b"https://site7.com/"
    );
}
