//! Worker service for distributed mode
//!
//! The worker side of the poll protocol:
//! - Connects to the coordinator (reconnecting when the connection drops)
//! - Reports its previous result and receives the next assignment
//! - Runs the capture for each assignment
//! - Sleeps for the advertised timeout when no work is available
//!
//! A failed poll is retried with the same previous result, so a result the
//! coordinator could not store is offered again.

use crate::coordinator::Assignment;
use crate::distributed::protocol::*;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::{ChildStdout, Command};
use tokio::time::{sleep, Instant};

/// Payload reported when every capture attempt failed
pub const FAILED_CAPTURE_PAYLOAD: &[u8] = b"none";

/// How long to keep reading output after the capture program was killed
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

/// Build the identity a worker reports on every poll
///
/// `<unix-nanos>\t<hostname> <local-addr>`, so operators can tell restarts
/// apart and find the machine again.
pub fn worker_identity(local_addr: Option<SocketAddr>) -> String {
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    match local_addr {
        Some(addr) => format!("{}\t{} {}", nanos, host, addr.ip()),
        None => format!("{}\t{}", nanos, host),
    }
}

/// Performs one capture of a target
#[allow(async_fn_in_trait)]
pub trait Capture {
    /// Capture `target`, giving up after `timeout`
    async fn capture(&mut self, target: &str, timeout: Duration, all_traffic: bool) -> Result<Vec<u8>>;
}

/// Capture by running an external program
///
/// The program receives the configured arguments followed by the target,
/// plus `SITECOLLECT_TIMEOUT` and `SITECOLLECT_ALL_TRAFFIC` in its
/// environment. Whatever it writes to stdout before exiting, or before being
/// killed at the timeout, is the payload.
#[derive(Debug, Clone)]
pub struct CommandCapture {
    program: PathBuf,
    args: Vec<String>,
    attempts: usize,
    min_output_len: usize,
    attempt_delay: Duration,
}

impl CommandCapture {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            attempts: 1,
            min_output_len: 0,
            attempt_delay: Duration::from_secs(1),
        }
    }

    /// Launch attempts per capture (at least 1)
    pub fn with_attempts(mut self, attempts: usize) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Output shorter than this counts as a failed attempt
    pub fn with_min_output_len(mut self, min_output_len: usize) -> Self {
        self.min_output_len = min_output_len;
        self
    }

    /// Pause before each attempt
    pub fn with_attempt_delay(mut self, delay: Duration) -> Self {
        self.attempt_delay = delay;
        self
    }

    async fn run_once(&self, target: &str, timeout: Duration, all_traffic: bool) -> Result<Vec<u8>> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(target)
            .env("SITECOLLECT_TIMEOUT", timeout.as_secs().to_string())
            .env("SITECOLLECT_ALL_TRAFFIC", if all_traffic { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        // own process group, so helpers it starts die with it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn()
            .with_context(|| format!("failed to launch {}", self.program.display()))?;
        let pid = child.id();

        let stdout = child.stdout.take()
            .context("capture program has no stdout")?;
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let mut reader = tokio::spawn(read_into(stdout, Arc::clone(&buffer)));
        let deadline = Instant::now() + timeout;

        let mut drained = None;
        match tokio::time::timeout_at(deadline, child.wait()).await {
            Ok(status) => {
                let status = status.context("failed to wait for capture program")?;
                debug!("capture program exited with {}", status);
                // processes it started may still hold stdout open
                drained = tokio::time::timeout_at(deadline, &mut reader).await.ok();
            }
            Err(_) => debug!("capture of {} timed out after {:?}", target, timeout),
        }

        let drained = match drained {
            Some(done) => done,
            None => {
                if let Some(pid) = pid {
                    kill_process_group(pid);
                }
                child.start_kill().ok();
                child.wait().await.ok();

                match tokio::time::timeout(OUTPUT_GRACE, &mut reader).await {
                    Ok(done) => done,
                    Err(_) => {
                        warn!("capture output of {} still open after kill, dropping the rest", target);
                        reader.abort();
                        Ok(Ok(()))
                    }
                }
            }
        };

        drained
            .context("capture output reader failed")?
            .context("failed to read capture output")?;

        let output = std::mem::take(&mut *buffer.lock());
        Ok(output)
    }
}

/// Copy a child's stdout into `buffer` until EOF
///
/// The buffer is shared so whatever arrived before the reader is abandoned
/// still counts as output.
async fn read_into(mut stdout: ChildStdout, buffer: Arc<Mutex<Vec<u8>>>) -> std::io::Result<()> {
    let mut chunk = [0u8; 8192];
    loop {
        let n = stdout.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buffer.lock().extend_from_slice(&chunk[..n]);
    }
}

#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal, no memory is touched
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

impl Capture for CommandCapture {
    async fn capture(&mut self, target: &str, timeout: Duration, all_traffic: bool) -> Result<Vec<u8>> {
        let mut last_err = None;

        for attempt in 1..=self.attempts {
            sleep(self.attempt_delay).await;

            match self.run_once(target, timeout, all_traffic).await {
                Ok(output) if output.len() >= self.min_output_len => return Ok(output),
                Ok(output) => {
                    last_err = Some(anyhow::anyhow!(
                        "didn't get enough data while capturing {} ({} bytes)",
                        target,
                        output.len()
                    ));
                }
                Err(e) => last_err = Some(e),
            }

            if let Some(ref e) = last_err {
                debug!("capture attempt {}/{} failed: {:#}", attempt, self.attempts, e);
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("no capture attempts made")))
    }
}

/// What one poll cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Captured an assignment; the result goes out on the next poll
    Worked { id: String },
    /// Nothing pending; sleep before polling again
    Idle { sleep: Duration },
    /// Poll failed; retry the same report after a pause
    Failed,
}

/// Worker poll loop
pub struct WorkerService<C> {
    coordinator_addr: String,
    capture: C,
    retry_delay: Duration,
    stream: Option<TcpStream>,
    identity: Option<String>,
    previous: Browse,
}

impl<C: Capture> WorkerService<C> {
    pub fn new(coordinator_addr: impl Into<String>, capture: C) -> Self {
        Self {
            coordinator_addr: coordinator_addr.into(),
            capture,
            retry_delay: Duration::from_secs(1),
            stream: None,
            identity: None,
            previous: Browse::default(),
        }
    }

    /// Pause after a failed poll
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Identity reported to the coordinator (set on first connect)
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Poll and work forever
    pub async fn run(mut self) -> Result<()> {
        info!("polling coordinator at {}", self.coordinator_addr);

        loop {
            match self.step().await {
                StepOutcome::Worked { .. } => {}
                StepOutcome::Idle { sleep: pause } => {
                    info!("no work, sleeping for {}s", pause.as_secs());
                    sleep(pause).await;
                }
                StepOutcome::Failed => sleep(self.retry_delay).await,
            }
        }
    }

    /// One poll, plus the capture if work was assigned
    pub async fn step(&mut self) -> StepOutcome {
        let assignment = match self.poll().await {
            Ok(Some(assignment)) => assignment,
            Ok(None) => return StepOutcome::Failed,
            Err(e) => {
                warn!("failed to poll {} ({:#})", self.coordinator_addr, e);
                self.stream = None;
                return StepOutcome::Failed;
            }
        };

        if assignment.is_idle() {
            self.previous = Browse::default();
            let secs = u64::try_from(assignment.timeout_secs).unwrap_or(0);
            return StepOutcome::Idle {
                sleep: Duration::from_secs(secs),
            };
        }

        info!("starting work: {}", assignment.target);
        let timeout = Duration::from_secs(u64::try_from(assignment.timeout_secs).unwrap_or(0));
        let payload = match self.capture.capture(&assignment.target, timeout, assignment.all_traffic).await {
            Ok(data) => data,
            Err(e) => {
                warn!("failed to capture {} ({:#})", assignment.target, e);
                FAILED_CAPTURE_PAYLOAD.to_vec()
            }
        };

        let id = assignment.id.clone();
        let mut previous = Browse::from(assignment);
        previous.payload = payload;
        self.previous = previous;

        StepOutcome::Worked { id }
    }

    /// Send the previous result and read the reply
    ///
    /// `Ok(None)` means the coordinator answered with an ERROR frame; the
    /// connection is still usable and the same result will be resent.
    async fn poll(&mut self) -> Result<Option<Assignment>> {
        if self.stream.is_none() {
            let stream = TcpStream::connect(&self.coordinator_addr).await
                .with_context(|| format!("did not connect to {}", self.coordinator_addr))?;
            stream.set_nodelay(true).ok();
            if self.identity.is_none() {
                self.identity = Some(worker_identity(stream.local_addr().ok()));
            }
            self.stream = Some(stream);
        }

        let worker_id = self.identity.clone().unwrap_or_default();
        let stream = self.stream.as_mut().context("no coordinator connection")?;

        let request = Message::Poll(PollMessage {
            protocol_version: PROTOCOL_VERSION,
            worker_id,
            previous: self.previous.clone(),
        });
        write_message(stream, &request).await?;

        match read_message(stream).await? {
            Some(Message::Assignment(browse)) => Ok(Some(browse.into_assignment())),
            Some(Message::Error(err)) => {
                warn!("coordinator rejected poll: {}", err.error);
                Ok(None)
            }
            Some(other) => anyhow::bail!("Expected ASSIGNMENT, got {:?}", other),
            None => anyhow::bail!("coordinator closed the connection"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::ledger::{FirstPending, WorkLedger, WorkUnit};
    use crate::coordinator::store::ResultStore;
    use crate::coordinator::{AssignmentSettings, Coordinator};
    use crate::distributed::coordinator::CoordinatorService;
    use crate::target::LoadedWork;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    /// Returns queued payloads in order, recording the targets it saw
    struct ScriptedCapture {
        payloads: Vec<Result<Vec<u8>>>,
        targets: Vec<String>,
    }

    impl Capture for ScriptedCapture {
        async fn capture(&mut self, target: &str, _timeout: Duration, _all: bool) -> Result<Vec<u8>> {
            self.targets.push(target.to_string());
            self.payloads.remove(0)
        }
    }

    async fn start_coordinator(dir: &std::path::Path, units: &[(&str, &str)]) -> (Arc<Coordinator>, String) {
        let mut ledger = WorkLedger::new();
        for (id, target) in units {
            ledger.insert(WorkUnit::new(*id, *target));
        }
        let coordinator = Arc::new(Coordinator::new(
            LoadedWork {
                ledger,
                completed: 0,
                total: units.len() as u64,
            },
            ResultStore::new(dir, ".pcap"),
            AssignmentSettings {
                timeout_secs: 3,
                all_traffic: false,
                min_payload_len: 10,
            },
            Box::new(FirstPending),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(CoordinatorService::new(Arc::clone(&coordinator)).serve(listener));
        (coordinator, addr)
    }

    #[test]
    fn test_worker_identity_format() {
        let identity = worker_identity(Some("10.1.2.3:40000".parse().unwrap()));
        let (stamp, rest) = identity.split_once('\t').unwrap();
        assert!(stamp.parse::<i64>().unwrap() > 0);
        assert!(rest.ends_with(" 10.1.2.3"));
    }

    #[tokio::test]
    async fn test_worker_retries_short_capture_then_finishes() {
        let dir = TempDir::new().unwrap();
        let (coordinator, addr) = start_coordinator(dir.path(), &[("a-0", "a.com")]).await;

        let capture = ScriptedCapture {
            payloads: vec![Ok(vec![1; 5]), Ok(vec![2; 12])],
            targets: Vec::new(),
        };
        let mut worker = WorkerService::new(addr, capture);

        assert_eq!(worker.step().await, StepOutcome::Worked { id: "a-0".to_string() });
        assert_eq!(worker.step().await, StepOutcome::Worked { id: "a-0".to_string() });
        assert_eq!(
            worker.step().await,
            StepOutcome::Idle {
                sleep: Duration::from_secs(3)
            }
        );

        assert_eq!(worker.capture.targets, vec!["a.com", "www.a.com"]);
        assert!(worker.identity().is_some());
        assert_eq!(std::fs::read(dir.path().join("a-0.pcap")).unwrap(), vec![2; 12]);
        assert!(coordinator.snapshot().is_finished());
        assert_eq!(coordinator.snapshot().workers, 1);
    }

    #[tokio::test]
    async fn test_failed_capture_reports_placeholder() {
        let dir = TempDir::new().unwrap();
        let (coordinator, addr) = start_coordinator(dir.path(), &[("a-0", "a.com")]).await;

        let capture = ScriptedCapture {
            payloads: vec![Err(anyhow::anyhow!("browser crashed"))],
            targets: Vec::new(),
        };
        let mut worker = WorkerService::new(addr, capture);

        worker.step().await;
        assert_eq!(worker.previous.payload, FAILED_CAPTURE_PAYLOAD);

        // "none" is shorter than the threshold, so the unit is re-queued
        match worker.poll().await.unwrap() {
            Some(assignment) => assert_eq!(assignment.target, "www.a.com"),
            None => panic!("poll rejected"),
        }
        assert_eq!(coordinator.snapshot().completed, 0);
    }

    #[tokio::test]
    async fn test_unreachable_coordinator_fails_step() {
        // bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let capture = ScriptedCapture {
            payloads: Vec::new(),
            targets: Vec::new(),
        };
        let mut worker = WorkerService::new(addr, capture);
        assert_eq!(worker.step().await, StepOutcome::Failed);
        assert!(worker.identity().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_collects_stdout() {
        let mut capture = CommandCapture::new("/bin/sh", vec!["-c".to_string(), "echo \"got $0\"".to_string()])
            .with_attempt_delay(Duration::ZERO);

        let output = capture.capture("a.com", Duration::from_secs(5), false).await.unwrap();
        assert_eq!(output, b"got a.com\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_keeps_output_on_timeout() {
        let mut capture = CommandCapture::new(
            "/bin/sh",
            vec!["-c".to_string(), "echo partial; exec sleep 30".to_string()],
        )
        .with_attempt_delay(Duration::ZERO);

        let output = capture.capture("a.com", Duration::from_millis(300), false).await.unwrap();
        assert_eq!(output, b"partial\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_timeout_kills_helper_processes() {
        // no exec: the sleep is a grandchild holding stdout open
        let mut capture = CommandCapture::new(
            "/bin/sh",
            vec!["-c".to_string(), "echo partial; sleep 8; echo late".to_string()],
        )
        .with_attempt_delay(Duration::ZERO);

        let started = std::time::Instant::now();
        let output = capture.capture("a.com", Duration::from_millis(300), false).await.unwrap();

        assert_eq!(output, b"partial\n");
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_bounds_background_output() {
        // the program exits but leaves a background writer on stdout
        let mut capture = CommandCapture::new(
            "/bin/sh",
            vec!["-c".to_string(), "echo early; (sleep 8; echo late) & exit 0".to_string()],
        )
        .with_attempt_delay(Duration::ZERO);

        let started = std::time::Instant::now();
        let output = capture.capture("a.com", Duration::from_millis(300), false).await.unwrap();

        assert_eq!(output, b"early\n");
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_capture_retries_short_output() {
        let mut capture = CommandCapture::new("/bin/sh", vec!["-c".to_string(), "printf x".to_string()])
            .with_attempts(3)
            .with_min_output_len(10)
            .with_attempt_delay(Duration::ZERO);

        let err = capture.capture("a.com", Duration::from_secs(5), false).await.unwrap_err();
        assert!(err.to_string().contains("didn't get enough data"));
    }
}
