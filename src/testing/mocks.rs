//! Mock implementations for testing
//!
//! Provides a scripted broker connector and a scripted sensor so the session
//! lifecycle and the sample loop can be exercised without a broker or a
//! Sense HAT.

use crate::sensor::{Reading, SensorError, SensorSource};
use crate::transport::{BrokerConnector, BrokerLink, CloseSignal, SessionError};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// `(topic, payload, retain)`
pub type PublishedMessage = (String, Vec<u8>, bool);

/// Scripted result of one connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Accept,
    Unreachable,
    RejectAuth,
    /// Never answer the handshake
    Hang,
}

/// Everything a connector and its links record
#[derive(Debug, Default)]
struct BrokerRecord {
    script: VecDeque<ConnectOutcome>,
    attempts: Vec<Instant>,
    published: Vec<PublishedMessage>,
    // Index into `published` at each successful connect
    session_starts: Vec<usize>,
    current: Option<Arc<MockLink>>,
}

/// Broker connector driven by a script of outcomes.
/// Once the script runs out every attempt is accepted.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    record: Arc<Mutex<BrokerRecord>>,
    publish_faults: PublishFaults,
    disconnects: Arc<AtomicUsize>,
}

/// Publish behavior shared by a connector and every link it hands out
#[derive(Debug, Clone, Default)]
struct PublishFaults {
    fail: Arc<AtomicBool>,
    hang: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        Self {
            record: Arc::new(Mutex::new(BrokerRecord {
                script: outcomes.into_iter().collect(),
                ..BrokerRecord::default()
            })),
            ..Self::default()
        }
    }

    /// Make every publish on current and future links fail
    pub fn set_publish_failure(&self, fail: bool) {
        self.publish_faults.fail.store(fail, Ordering::SeqCst);
    }

    /// Make publishes never complete
    pub fn set_publish_hang(&self, hang: bool) {
        self.publish_faults.hang.store(hang, Ordering::SeqCst);
    }

    /// Delay each publish before the broker records it
    pub fn set_publish_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.publish_faults.delay_ms.store(millis, Ordering::SeqCst);
    }

    /// Simulate the broker dropping the live session
    pub async fn drop_connection(&self, reason: &str) -> bool {
        let link = self.record.lock().await.current.clone();
        match link {
            Some(link) => link.closed.close(reason),
            None => false,
        }
    }

    pub async fn attempt_count(&self) -> usize {
        self.record.lock().await.attempts.len()
    }

    pub async fn attempt_times(&self) -> Vec<Instant> {
        self.record.lock().await.attempts.clone()
    }

    pub async fn published(&self) -> Vec<PublishedMessage> {
        self.record.lock().await.published.clone()
    }

    pub async fn published_to(&self, topic: &str) -> Vec<PublishedMessage> {
        self.published()
            .await
            .into_iter()
            .filter(|(t, _, _)| t == topic)
            .collect()
    }

    /// Messages published under a discovery prefix
    pub async fn discovery_messages(&self, discovery_prefix: &str) -> Vec<PublishedMessage> {
        let prefix = format!("{discovery_prefix}/");
        self.published()
            .await
            .into_iter()
            .filter(|(t, _, _)| t.starts_with(&prefix))
            .collect()
    }

    /// Published messages grouped by the session they were sent on
    pub async fn sessions(&self) -> Vec<Vec<PublishedMessage>> {
        let record = self.record.lock().await;
        let mut bounds = record.session_starts.clone();
        bounds.push(record.published.len());
        bounds
            .windows(2)
            .map(|w| record.published[w[0]..w[1]].to_vec())
            .collect()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerConnector for MockConnector {
    async fn connect(&self) -> Result<Arc<dyn BrokerLink>, SessionError> {
        let mut record = self.record.lock().await;
        record.attempts.push(Instant::now());

        let outcome = record.script.pop_front().unwrap_or(ConnectOutcome::Accept);
        match outcome {
            ConnectOutcome::Hang => {
                drop(record);
                std::future::pending::<()>().await;
                Err(SessionError::NotConnected)
            }
            ConnectOutcome::Unreachable => Err(SessionError::BrokerUnreachable(
                "connection refused".to_string(),
            )),
            ConnectOutcome::RejectAuth => Err(SessionError::AuthenticationRejected(
                "bad user name or password".to_string(),
            )),
            ConnectOutcome::Accept => {
                let link = Arc::new(MockLink {
                    record: Arc::clone(&self.record),
                    closed: CloseSignal::new(),
                    faults: self.publish_faults.clone(),
                    disconnects: Arc::clone(&self.disconnects),
                });
                let start = record.published.len();
                record.session_starts.push(start);
                record.current = Some(Arc::clone(&link));
                Ok(link)
            }
        }
    }

    fn describe(&self) -> String {
        "mock-broker:1883".to_string()
    }
}

/// Link handed out by [`MockConnector`]
#[derive(Debug)]
pub struct MockLink {
    record: Arc<Mutex<BrokerRecord>>,
    closed: CloseSignal,
    faults: PublishFaults,
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl BrokerLink for MockLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), SessionError> {
        if self.closed.is_closed() {
            return Err(SessionError::NotConnected);
        }
        if self.faults.fail.load(Ordering::SeqCst) {
            return Err(SessionError::PublishFailed("mock publish failure".to_string()));
        }
        if self.faults.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = self.faults.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.record
            .lock()
            .await
            .published
            .push((topic.to_string(), payload, retain));
        Ok(())
    }

    async fn closed(&self) -> String {
        self.closed.wait().await
    }

    fn close(&self, reason: String) {
        self.closed.close(reason);
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.closed.close("client disconnected");
    }
}

/// How a [`MockSensor`] behaves
#[derive(Debug, Clone)]
enum SensorBehavior {
    Ok,
    FailOn(HashSet<u64>),
    Hang,
}

/// Sensor returning a fixed reading, failing on chosen calls or never answering
#[derive(Debug, Clone)]
pub struct MockSensor {
    behavior: SensorBehavior,
    reading: (f64, f64, f64, f64),
    reads: Arc<AtomicU64>,
}

impl MockSensor {
    pub fn always_ok() -> Self {
        Self {
            behavior: SensorBehavior::Ok,
            reading: (23.4, 23.1, 41.2, 1013.2),
            reads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Fail on the given 1-based read numbers
    pub fn failing_on(reads: impl IntoIterator<Item = u64>) -> Self {
        Self {
            behavior: SensorBehavior::FailOn(reads.into_iter().collect()),
            ..Self::always_ok()
        }
    }

    /// Never complete a read
    pub fn hanging() -> Self {
        Self {
            behavior: SensorBehavior::Hang,
            ..Self::always_ok()
        }
    }

    pub fn with_reading(mut self, th: f64, tp: f64, h: f64, p: f64) -> Self {
        self.reading = (th, tp, h, p);
        self
    }

    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SensorSource for MockSensor {
    async fn read(&self) -> Result<Reading, SensorError> {
        let number = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.behavior {
            SensorBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(SensorError::unavailable("unreachable"))
            }
            SensorBehavior::FailOn(failing) if failing.contains(&number) => Err(
                SensorError::unavailable(format!("scripted failure on read {number}")),
            ),
            _ => {
                let (th, tp, h, p) = self.reading;
                Ok(Reading::new(th, tp, h, p))
            }
        }
    }

    fn name(&self) -> &str {
        "mock-sensor"
    }
}
