//! Coordinator service
//!
//! Accepts worker connections and answers every POLL frame with the result
//! of `Coordinator::poll`. Each connection gets its own task; the poll itself
//! runs on the blocking pool because it takes the coordinator lock and may
//! write a result file.

use crate::coordinator::Coordinator;
use crate::distributed::protocol::*;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};

/// TCP front end for a `Coordinator`
pub struct CoordinatorService {
    coordinator: Arc<Coordinator>,
}

impl CoordinatorService {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Bind `addr` and serve until the listener fails
    pub async fn run(self, addr: &str) -> Result<()> {
        let listener = TcpListener::bind(addr).await
            .with_context(|| format!("failed to listen on {}", addr))?;

        info!("listening on {}", listener.local_addr()?);

        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = listener.accept().await
                .context("Failed to accept connection")?;

            let coordinator = Arc::clone(&self.coordinator);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(coordinator, stream, peer).await {
                    warn!("connection from {} failed: {:#}", peer, e);
                }
            });
        }
    }
}

/// Answer polls on one connection until the worker hangs up
async fn handle_connection(
    coordinator: Arc<Coordinator>,
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<()> {
    debug!("worker connected from {}", peer);
    stream.set_nodelay(true).ok();

    while let Some(msg) = read_message(&mut stream).await? {
        let reply = match msg {
            Message::Poll(poll) => answer_poll(&coordinator, poll).await,
            other => {
                let error = format!("Expected POLL, got {}", message_kind(&other));
                write_message(&mut stream, &Message::Error(ErrorMessage { error: error.clone() })).await?;
                anyhow::bail!(error);
            }
        };

        write_message(&mut stream, &reply).await?;
    }

    debug!("worker at {} disconnected", peer);
    Ok(())
}

/// Run one poll and turn the outcome into a reply frame
///
/// Failures stay local to this poll: they are logged and sent back as an
/// ERROR frame, and the connection keeps serving.
pub async fn answer_poll(coordinator: &Arc<Coordinator>, poll: PollMessage) -> Message {
    if poll.protocol_version != PROTOCOL_VERSION {
        let err = crate::error::CollectError::ProtocolMismatch {
            coordinator: PROTOCOL_VERSION,
            worker: poll.protocol_version,
        };
        warn!("rejecting poll from {}: {}", poll.worker_id, err);
        return Message::Error(ErrorMessage { error: err.to_string() });
    }

    let coordinator = Arc::clone(coordinator);
    let PollMessage { worker_id, previous, .. } = poll;

    let outcome = tokio::task::spawn_blocking(move || {
        let report = previous.into_report();
        coordinator.poll(&worker_id, &report)
    })
    .await;

    match outcome {
        Ok(Ok(assignment)) => Message::Assignment(Browse::from(assignment)),
        Ok(Err(e)) => {
            warn!("poll failed: {}", e);
            Message::Error(ErrorMessage { error: e.to_string() })
        }
        Err(e) => {
            warn!("poll task failed: {}", e);
            Message::Error(ErrorMessage {
                error: format!("poll task failed: {}", e),
            })
        }
    }
}

fn message_kind(msg: &Message) -> &'static str {
    match msg {
        Message::Poll(_) => "POLL",
        Message::Assignment(_) => "ASSIGNMENT",
        Message::Error(_) => "ERROR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ledger::{FirstPending, WorkLedger, WorkUnit};
    use crate::coordinator::store::ResultStore;
    use crate::coordinator::AssignmentSettings;
    use crate::target::LoadedWork;
    use tempfile::TempDir;

    fn coordinator(dir: &std::path::Path, units: &[(&str, &str)]) -> Arc<Coordinator> {
        let mut ledger = WorkLedger::new();
        for (id, target) in units {
            ledger.insert(WorkUnit::new(*id, *target));
        }
        let total = units.len() as u64;
        Arc::new(Coordinator::new(
            LoadedWork {
                ledger,
                completed: 0,
                total,
            },
            ResultStore::new(dir, ".pcap"),
            AssignmentSettings {
                timeout_secs: 15,
                all_traffic: true,
                min_payload_len: 4,
            },
            Box::new(FirstPending),
        ))
    }

    fn poll(worker: &str, previous: Browse) -> PollMessage {
        PollMessage {
            protocol_version: PROTOCOL_VERSION,
            worker_id: worker.to_string(),
            previous,
        }
    }

    #[tokio::test]
    async fn test_answer_poll_assigns() {
        let dir = TempDir::new().unwrap();
        let coord = coordinator(dir.path(), &[("a-0", "a.com")]);

        match answer_poll(&coord, poll("w1", Browse::default())).await {
            Message::Assignment(browse) => {
                assert_eq!(browse.id, "a-0");
                assert_eq!(browse.target, "a.com");
                assert_eq!(browse.timeout_secs, 15);
                assert!(browse.all_traffic);
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_answer_poll_version_mismatch() {
        let dir = TempDir::new().unwrap();
        let coord = coordinator(dir.path(), &[("a-0", "a.com")]);
        let mut msg = poll("w1", Browse::default());
        msg.protocol_version = PROTOCOL_VERSION + 1;

        match answer_poll(&coord, msg).await {
            Message::Error(err) => assert!(err.error.contains("Protocol version mismatch")),
            other => panic!("unexpected reply {:?}", other),
        }
        // rejected before touching state
        assert_eq!(coord.snapshot().workers, 0);
        assert_eq!(coord.snapshot().pending, 1);
    }

    #[tokio::test]
    async fn test_answer_poll_store_failure_is_error_frame() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let coord = coordinator(&blocker, &[("b-0", "b.com")]);

        let previous = Browse {
            id: "a-0".to_string(),
            target: "a.com".to_string(),
            payload: b"payload".to_vec(),
            ..Default::default()
        };
        match answer_poll(&coord, poll("w1", previous)).await {
            Message::Error(err) => assert!(err.error.contains("a-0")),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let dir = TempDir::new().unwrap();
        let coord = coordinator(dir.path(), &[("a-0", "a.com")]);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(CoordinatorService::new(Arc::clone(&coord)).serve(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_message(&mut stream, &Message::Poll(poll("w1", Browse::default()))).await.unwrap();
        let reply = read_message(&mut stream).await.unwrap().unwrap();
        let assignment = match reply {
            Message::Assignment(browse) => browse,
            other => panic!("unexpected reply {:?}", other),
        };
        assert_eq!(assignment.id, "a-0");

        let result = Browse {
            payload: b"captured".to_vec(),
            ..assignment
        };
        write_message(&mut stream, &Message::Poll(poll("w1", result))).await.unwrap();
        match read_message(&mut stream).await.unwrap().unwrap() {
            Message::Assignment(browse) => assert!(browse.id.is_empty()),
            other => panic!("unexpected reply {:?}", other),
        }

        assert!(coord.snapshot().is_finished());
        assert_eq!(std::fs::read(dir.path().join("a-0.pcap")).unwrap(), b"captured");
    }

    #[tokio::test]
    async fn test_unexpected_message_closes_connection() {
        let dir = TempDir::new().unwrap();
        let coord = coordinator(dir.path(), &[]);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(CoordinatorService::new(coord).serve(listener));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_message(&mut stream, &Message::Assignment(Browse::default())).await.unwrap();

        match read_message(&mut stream).await.unwrap() {
            Some(Message::Error(err)) => assert!(err.error.contains("Expected POLL")),
            other => panic!("unexpected reply {:?}", other),
        }
        assert!(read_message(&mut stream).await.unwrap().is_none());
    }
}
