//! Integration tests for the Unix socket transport.
//!
//! These tests run a ChannelServer on a temporary socket with servo
//! managers backed by the simulated PWM driver, and talk to it the way a
//! remote peer would.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use rdc_core::{Label, SharedChannel};
use rdc_servo::{PinMode, PwmDriver, PwmError, ServoConfig, SimulatedPwm};
use rdcd::server::{ChannelServer, MAX_LINE_LENGTH};
use rdcd::{ChannelManager, Dispatcher, HandlerId, HandlerSet, ServoManager};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for server socket to appear
const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);

/// Interval between condition checks
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum time to wait for the daemon to react to a client
const REACT_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a stalled duty-cycle write blocks
const HARDWARE_STALL: Duration = Duration::from_millis(300);

/// Longest acceptable gap between timer ticks while hardware stalls
const MAX_TICK_DELAY: Duration = Duration::from_millis(200);

// ============================================================================
// Test Helpers
// ============================================================================

/// Test server context that manages server lifecycle and cleanup.
struct TestServer {
    socket_path: PathBuf,
    cancel_token: CancellationToken,
    dispatcher: Arc<Dispatcher>,
    server: tokio::task::JoinHandle<()>,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("rdc.sock");
        let dispatcher = Arc::new(Dispatcher::new());
        let cancel_token = CancellationToken::new();

        let server = ChannelServer::new(socket_path.clone(), Arc::clone(&dispatcher), cancel_token.clone());
        let server = tokio::spawn(async move {
            server.run().await.expect("server runs");
        });

        let start = tokio::time::Instant::now();
        while start.elapsed() < SOCKET_WAIT_TIMEOUT && !socket_path.exists() {
            sleep(POLL_INTERVAL).await;
        }
        assert!(
            socket_path.exists(),
            "Server socket did not appear within {SOCKET_WAIT_TIMEOUT:?}"
        );

        Self {
            socket_path,
            cancel_token,
            dispatcher,
            server,
            _temp_dir: temp_dir,
        }
    }

    fn servo(&self) -> (Arc<ServoManager<SimulatedPwm>>, SimulatedPwm) {
        let sim = SimulatedPwm::new();
        let servo = ServoManager::create(Label::new("servo"), ServoConfig::default(), sim.clone())
            .expect("simulated servo initializes");
        self.dispatcher.add(&servo);
        sim.clear();
        (servo, sim)
    }

    /// Connects and sends the label line.
    async fn open(&self, label: &str) -> UnixStream {
        let mut stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        stream
            .write_all(format!("{label}\n").as_bytes())
            .await
            .expect("send label");
        stream
    }

    async fn shutdown(self) {
        self.cancel_token.cancel();
        tokio::time::timeout(REACT_TIMEOUT, self.server)
            .await
            .expect("server stops")
            .expect("server task");
    }
}

/// Polls `condition` until it holds or the timeout passes.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < REACT_TIMEOUT {
        if condition() {
            return true;
        }
        sleep(POLL_INTERVAL).await;
    }
    condition()
}

/// Greets every new channel, and remembers each message it receives.
struct GreetingManager {
    label: Label,
    me: Weak<GreetingManager>,
    handlers: HandlerSet,
    received: Mutex<Vec<Vec<u8>>>,
}

impl GreetingManager {
    fn new(label: &str) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            label: Label::new(label),
            me: me.clone(),
            handlers: HandlerSet::new(),
            received: Mutex::new(Vec::new()),
        })
    }
}

impl ChannelManager for GreetingManager {
    fn label(&self) -> &Label {
        &self.label
    }

    fn on_new_channel(&self, channel: SharedChannel) {
        let manager: Weak<dyn ChannelManager> = self.me.clone();
        self.handlers.attach(manager, Arc::clone(&channel));
        channel.send(b"hello");
    }

    fn on_closed(&self, handler: HandlerId) {
        self.handlers.remove(handler);
    }

    fn process(&self, data: &[u8]) {
        self.received.lock().unwrap().push(data.to_vec());
    }
}

/// Simulated driver whose duty-cycle writes can be made to stall, the way
/// an unresponsive pigpiod would.
struct StallingPwm {
    inner: SimulatedPwm,
    stall: Arc<Mutex<Option<Duration>>>,
}

impl PwmDriver for StallingPwm {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> Result<(), PwmError> {
        self.inner.set_mode(pin, mode)
    }

    fn set_pwm_frequency(&mut self, pin: u32, frequency: u32) -> Result<u32, PwmError> {
        self.inner.set_pwm_frequency(pin, frequency)
    }

    fn set_pwm_range(&mut self, pin: u32, range: u32) -> Result<(), PwmError> {
        self.inner.set_pwm_range(pin, range)
    }

    fn set_pwm_duty_cycle(&mut self, pin: u32, duty_cycle: u32) -> Result<(), PwmError> {
        let stall = *self.stall.lock().unwrap();
        if let Some(stall) = stall {
            std::thread::sleep(stall);
        }
        self.inner.set_pwm_duty_cycle(pin, duty_cycle)
    }

    fn stop(&mut self) {
        self.inner.stop();
    }
}

// ============================================================================
// Message Flow
// ============================================================================

#[tokio::test]
async fn test_setpoint_drives_simulated_servo() {
    let server = TestServer::spawn().await;
    let (servo, sim) = server.servo();

    let mut stream = server.open("servo").await;
    assert!(eventually(|| servo.handler_count() == 1).await);

    stream.write_all(b"180, 0\n").await.unwrap();
    assert!(eventually(|| sim.duty_cycles() == vec![(12, 5000), (13, 1000)]).await);

    server.shutdown().await;
}

#[tokio::test]
async fn test_crlf_lines_accepted() {
    let server = TestServer::spawn().await;
    let (_servo, sim) = server.servo();

    let mut stream = UnixStream::connect(&server.socket_path).await.unwrap();
    stream.write_all(b"servo\r\n90, 90\r\n").await.unwrap();

    assert!(eventually(|| sim.duty_cycles() == vec![(12, 3000), (13, 3000)]).await);
    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_lines_do_not_close_channel() {
    let server = TestServer::spawn().await;
    let (servo, sim) = server.servo();

    let mut stream = server.open("servo").await;
    stream.write_all(b"90\nabc, 90\n90  90\n45, 45\n").await.unwrap();

    assert!(eventually(|| sim.duty_cycles().len() == 2).await);
    assert_eq!(servo.handler_count(), 1);
    server.shutdown().await;
}

#[tokio::test]
async fn test_outbound_frames_are_lines() {
    let server = TestServer::spawn().await;
    let greeter = GreetingManager::new("chat");
    server.dispatcher.add(&greeter);

    let stream = server.open("chat").await;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut line = String::new();
    tokio::time::timeout(REACT_TIMEOUT, reader.read_line(&mut line))
        .await
        .expect("greeting arrives")
        .unwrap();
    assert_eq!(line, "hello\n");

    writer.write_all(b"\xff\xfe\n").await.unwrap();
    assert!(eventually(|| greeter.received.lock().unwrap().len() == 1).await);
    assert_eq!(greeter.received.lock().unwrap()[0], vec![0xff, 0xfe]);

    server.shutdown().await;
}

#[tokio::test]
async fn test_two_managers_share_a_label() {
    let server = TestServer::spawn().await;
    let (first, first_sim) = server.servo();
    let (second, second_sim) = server.servo();

    let mut stream = server.open("servo").await;
    assert!(eventually(|| first.handler_count() == 1 && second.handler_count() == 1).await);

    stream.write_all(b"100, 100\n").await.unwrap();
    assert!(eventually(|| first_sim.duty_cycles().len() == 2 && second_sim.duty_cycles().len() == 2).await);

    drop(first);
    drop(stream);
    assert!(eventually(|| second.handler_count() == 0).await);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn test_stalled_hardware_does_not_block_runtime() {
    let server = TestServer::spawn().await;
    let sim = SimulatedPwm::new();
    let stall = Arc::new(Mutex::new(None));
    let driver = StallingPwm {
        inner: sim.clone(),
        stall: Arc::clone(&stall),
    };
    let servo = ServoManager::create(Label::new("servo"), ServoConfig::default(), driver).unwrap();
    server.dispatcher.add(&servo);
    sim.clear();
    *stall.lock().unwrap() = Some(HARDWARE_STALL);

    let ticker = tokio::spawn(async {
        let mut worst = Duration::ZERO;
        for _ in 0..60 {
            let start = tokio::time::Instant::now();
            sleep(Duration::from_millis(10)).await;
            worst = worst.max(start.elapsed());
        }
        worst
    });

    let mut stream = server.open("servo").await;
    stream.write_all(b"90, 90\n").await.unwrap();

    let worst = ticker.await.unwrap();
    assert!(worst < MAX_TICK_DELAY, "runtime stalled for {worst:?}");
    assert!(eventually(|| sim.duty_cycles().len() == 2).await);

    server.shutdown().await;
}

// ============================================================================
// Channel Lifecycle
// ============================================================================

#[tokio::test]
async fn test_disconnect_releases_handler() {
    let server = TestServer::spawn().await;
    let (servo, _sim) = server.servo();

    let stream = server.open("servo").await;
    assert!(eventually(|| servo.handler_count() == 1).await);

    drop(stream);
    assert!(eventually(|| servo.handler_count() == 0).await);
    server.shutdown().await;
}

#[tokio::test]
async fn test_unrouted_label_is_harmless() {
    let server = TestServer::spawn().await;
    let (servo, sim) = server.servo();

    let mut stream = server.open("camera").await;
    stream.write_all(b"90, 90\n").await.unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(servo.handler_count(), 0);
    assert!(sim.calls().is_empty());
    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_label_rejected() {
    let server = TestServer::spawn().await;
    let (servo, _sim) = server.servo();

    let mut stream = server.open("").await;
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(REACT_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("server closes the connection")
        .unwrap_or(0);

    assert_eq!(read, 0);
    assert_eq!(servo.handler_count(), 0);
    server.shutdown().await;
}

#[tokio::test]
async fn test_oversized_line_closes_channel() {
    let server = TestServer::spawn().await;
    let (servo, _sim) = server.servo();

    let mut stream = server.open("servo").await;
    assert!(eventually(|| servo.handler_count() == 1).await);

    let line = vec![b'9'; MAX_LINE_LENGTH + 1];
    let _ = stream.write_all(&line).await;

    assert!(eventually(|| servo.handler_count() == 0).await);
    server.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_open_channels() {
    let server = TestServer::spawn().await;
    let (servo, _sim) = server.servo();

    let mut stream = server.open("servo").await;
    assert!(eventually(|| servo.handler_count() == 1).await);

    let socket_path = server.socket_path.clone();
    server.shutdown().await;

    assert_eq!(servo.handler_count(), 0);
    assert!(!socket_path.exists());

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(REACT_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("client sees close")
        .unwrap_or(0);
    assert_eq!(read, 0);
}
