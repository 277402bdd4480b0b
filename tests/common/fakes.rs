//! Fake DRM engines, clocks and servers for deterministic scenarios

use async_trait::async_trait;
use book_borrow::borrow::{
    AdobeEngine, AdobeFulfillment, AxisFulfillment, AxisNowService, DrmEngineError,
};
use book_borrow::drm::AdobeLoan;
use book_borrow::progress::Clock;
use book_borrow::types::AdobeCredentials;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a fake engine behaves
#[derive(Clone, Debug)]
pub enum FakeBehavior {
    /// Write `body` to a temp file and succeed
    Succeed(Vec<u8>),
    /// Fail with the message
    Fail(String),
    /// Never finish until cancelled
    Hang,
}

/// Adobe engine that records the tokens it was handed
pub struct FakeAdobeEngine {
    behavior: FakeBehavior,
    scratch: PathBuf,
    /// Tokens received, in order
    pub received: Mutex<Vec<Vec<u8>>>,
}

impl FakeAdobeEngine {
    /// Engine writing fulfilled books under `scratch`
    pub fn new(behavior: FakeBehavior, scratch: impl Into<PathBuf>) -> Self {
        Self {
            behavior,
            scratch: scratch.into(),
            received: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AdobeEngine for FakeAdobeEngine {
    async fn fulfill(
        &self,
        acsm: &[u8],
        _credentials: &AdobeCredentials,
        cancel: CancellationToken,
    ) -> Result<AdobeFulfillment, DrmEngineError> {
        self.received.lock().unwrap().push(acsm.to_vec());
        match &self.behavior {
            FakeBehavior::Succeed(body) => {
                std::fs::create_dir_all(&self.scratch).unwrap();
                let book = self.scratch.join("adobe-fulfilled.epub");
                std::fs::write(&book, body).unwrap();
                Ok(AdobeFulfillment {
                    book,
                    rights: b"<rights/>".to_vec(),
                    loan: AdobeLoan {
                        loan_id: "loan-1".to_string(),
                        returnable: true,
                        expires: None,
                    },
                })
            }
            FakeBehavior::Fail(message) => Err(DrmEngineError::new(message.clone())),
            FakeBehavior::Hang => {
                cancel.cancelled().await;
                Err(DrmEngineError::new("cancelled"))
            }
        }
    }
}

/// AxisNow service writing a fixed book
pub struct FakeAxisService {
    behavior: FakeBehavior,
    scratch: PathBuf,
}

impl FakeAxisService {
    /// Service writing fulfilled books under `scratch`
    pub fn new(behavior: FakeBehavior, scratch: impl Into<PathBuf>) -> Self {
        Self {
            behavior,
            scratch: scratch.into(),
        }
    }
}

#[async_trait]
impl AxisNowService for FakeAxisService {
    async fn fulfill(
        &self,
        _token: &[u8],
        cancel: CancellationToken,
    ) -> Result<AxisFulfillment, DrmEngineError> {
        match &self.behavior {
            FakeBehavior::Succeed(body) => {
                std::fs::create_dir_all(&self.scratch).unwrap();
                let book = self.scratch.join("axis-fulfilled.epub");
                std::fs::write(&book, body).unwrap();
                Ok(AxisFulfillment {
                    book,
                    license: br#"{"license":true}"#.to_vec(),
                    user_key: b"user-key".to_vec(),
                })
            }
            FakeBehavior::Fail(message) => Err(DrmEngineError::new(message.clone())),
            FakeBehavior::Hang => {
                cancel.cancelled().await;
                Err(DrmEngineError::new("cancelled"))
            }
        }
    }
}

/// Clock that advances a fixed step each time it is read
pub struct SteppingClock {
    now: Mutex<Instant>,
    step: Duration,
}

impl SteppingClock {
    /// A clock that moves `step` forward per reading
    pub fn new(step: Duration) -> Self {
        Self {
            now: Mutex::new(Instant::now()),
            step,
        }
    }

    /// A clock that never moves
    pub fn frozen() -> Self {
        Self::new(Duration::ZERO)
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> Instant {
        let mut now = self.now.lock().unwrap();
        let current = *now;
        *now += self.step;
        current
    }
}

/// Serve one EPUB response that sends `sent` bytes of a `declared`-byte body, then stalls
///
/// Returns the server's base URL and the task holding the connection open.
pub async fn stalled_download_server(sent: usize, declared: usize) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await;
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/epub+zip\r\nContent-Length: {declared}\r\n\r\n"
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.write_all(&vec![b'x'; sent]).await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
    });
    (format!("http://{address}"), server)
}
