//! Sample-and-publish loop
//!
//! Every period the [`Reporter`] takes one reading, logs it, stores it as the
//! latest sample, and hands its payload to a [`PushNotifier`]. Read failures
//! are logged and skipped. The sleep between iterations is loop-relative and
//! cancellable through a shutdown watch channel.

use std::future::Future;
use std::time::Duration;

use coap_lite::ContentFormat;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::sensor::SensorSource;
use crate::types::Sample;

/// Payload served before the first successful read
pub const PLACEHOLDER_PAYLOAD: &str = "0";

/// Errors from a push notification attempt
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Nobody is subscribed to the path
    #[error("no active subscribers")]
    NotReady,

    #[error("notification encoding failed: {0}")]
    Encode(String),

    #[error("notification send failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Delivers a payload to every subscriber of a path
pub trait PushNotifier: Send {
    /// Returns the number of bytes sent, or `NotReady` when the path has
    /// no subscribers.
    fn notify(
        &mut self,
        path: &str,
        payload: &[u8],
    ) -> impl Future<Output = Result<usize, NotifyError>> + Send;
}

/// Notifier for variants without a network
#[derive(Debug, Clone, Copy, Default)]
pub struct NoNotifier;

impl PushNotifier for NoNotifier {
    async fn notify(&mut self, _path: &str, _payload: &[u8]) -> Result<usize, NotifyError> {
        Err(NotifyError::NotReady)
    }
}

/// Answers on-demand queries for a resource
pub trait PullResponder: Send + Sync + 'static {
    /// Response body
    fn respond(&self) -> Vec<u8>;

    fn content_format(&self) -> ContentFormat {
        ContentFormat::TextPlain
    }
}

/// Pull responder backed by the loop's latest sample
#[derive(Debug, Clone)]
pub struct LatestSample {
    rx: watch::Receiver<Option<Sample>>,
}

impl LatestSample {
    pub fn new(rx: watch::Receiver<Option<Sample>>) -> Self {
        Self { rx }
    }

    /// Latest sample, if any read has succeeded yet
    pub fn get(&self) -> Option<Sample> {
        *self.rx.borrow()
    }
}

impl PullResponder for LatestSample {
    fn respond(&self) -> Vec<u8> {
        match self.get() {
            Some(sample) => sample.payload().into_bytes(),
            None => PLACEHOLDER_PAYLOAD.as_bytes().to_vec(),
        }
    }
}

/// Result of one loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Iteration {
    /// Reading delivered to subscribers
    Published { sample: Sample, bytes: usize },
    /// Reading taken, nobody subscribed
    Unobserved(Sample),
    /// Reading taken, notification failed
    NotifyFailed(Sample),
    /// Sensor read failed, nothing published
    ReadFailed,
}

/// The sample-and-publish loop
pub struct Reporter<S, N> {
    sensor: S,
    notifier: N,
    path: String,
    period: Duration,
    latest: watch::Sender<Option<Sample>>,
    iteration: u64,
}

impl<S: SensorSource, N: PushNotifier> Reporter<S, N> {
    /// Create a reporter publishing readings of `sensor` on `path`
    pub fn new(sensor: S, notifier: N, path: impl Into<String>, period: Duration) -> Self {
        let (latest, _) = watch::channel(None);

        Self {
            sensor,
            notifier,
            path: path.into(),
            period,
            latest,
            iteration: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Pull responder that reflects this loop's latest sample
    pub fn latest(&self) -> LatestSample {
        LatestSample::new(self.latest.subscribe())
    }

    /// Take one reading and publish it
    pub async fn poll_once(&mut self) -> Iteration {
        let iteration = self.iteration;
        self.iteration += 1;

        let centi = match self.sensor.read().await {
            Ok(centi) => centi,
            Err(e) => {
                warn!("Temperature reading failed: {}", e);
                return Iteration::ReadFailed;
            }
        };

        let sample = Sample::new(centi, iteration);
        info!("temperature: {}", sample);
        self.latest.send_replace(Some(sample));

        let payload = sample.payload();
        match self.notifier.notify(&self.path, payload.as_bytes()).await {
            Ok(bytes) => {
                debug!("Notified {} ({} bytes)", self.path, bytes);
                Iteration::Published { sample, bytes }
            }
            Err(NotifyError::NotReady) => {
                debug!("No observers for {}", self.path);
                Iteration::Unobserved(sample)
            }
            Err(e) => {
                warn!("Notification for {} failed: {}", self.path, e);
                Iteration::NotifyFailed(sample)
            }
        }
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    ///
    /// Returns the number of iterations performed.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> u64 {
        info!(
            "Reporting {} from {} every {:?}",
            self.path,
            self.sensor.name(),
            self.period
        );

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            self.poll_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reporter stopped after {} iterations", self.iteration);
        self.iteration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{SensorError, SimulatedSensor};
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Notifier that records every payload
    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<(String, String)>>>,
        observed: bool,
    }

    impl RecordingNotifier {
        fn observed() -> Self {
            Self {
                observed: true,
                ..Default::default()
            }
        }

        fn payloads(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(_, p)| p.clone()).collect()
        }
    }

    impl PushNotifier for RecordingNotifier {
        async fn notify(&mut self, path: &str, payload: &[u8]) -> Result<usize, NotifyError> {
            self.sent.lock().unwrap().push((
                path.to_string(),
                String::from_utf8_lossy(payload).into_owned(),
            ));
            if self.observed {
                Ok(payload.len())
            } else {
                Err(NotifyError::NotReady)
            }
        }
    }

    /// Sensor that records when each read started
    struct TimedSensor {
        inner: SimulatedSensor,
        reads: Arc<Mutex<Vec<Instant>>>,
    }

    impl SensorSource for TimedSensor {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn read(&mut self) -> Result<i16, SensorError> {
            self.reads.lock().unwrap().push(Instant::now());
            self.inner.read().await
        }
    }

    /// Formatted log output of the current thread
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl LogCapture {
        fn lines(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock().unwrap())
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
        type Writer = LogCapture;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_failed_read_logs_one_warning() {
        let capture = LogCapture::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(capture.clone())
            .with_max_level(tracing::Level::TRACE)
            .with_ansi(false)
            .without_time()
            .with_target(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let notifier = RecordingNotifier::observed();
        let mut reporter = Reporter::new(
            SimulatedSensor::scripted("jc42", vec![None, Some(2100)]),
            notifier.clone(),
            "/dh/tmp",
            Duration::from_secs(20),
        );

        assert_eq!(reporter.poll_once().await, Iteration::ReadFailed);
        let lines = capture.lines();
        assert_eq!(lines.len(), 1, "{:?}", lines);
        assert!(lines[0].contains("WARN"));
        assert!(lines[0].contains("Temperature reading failed"));
        assert!(notifier.payloads().is_empty());

        reporter.poll_once().await;
        let lines = capture.lines();
        assert_eq!(lines.iter().filter(|l| l.contains("WARN")).count(), 1);
        assert!(lines
            .iter()
            .any(|l| l.contains("INFO") && l.contains("temperature: 21.00 C")));
    }

    #[tokio::test]
    async fn test_success_publishes_once() {
        let notifier = RecordingNotifier::observed();
        let mut reporter = Reporter::new(
            SimulatedSensor::constant("jc42", 2345),
            notifier.clone(),
            "/dh/tmp",
            Duration::from_secs(20),
        );

        let outcome = reporter.poll_once().await;
        assert_eq!(
            outcome,
            Iteration::Published {
                sample: Sample::new(2345, 0),
                bytes: 4
            }
        );
        assert_eq!(notifier.payloads(), vec!["2345".to_string()]);
        assert_eq!(notifier.sent.lock().unwrap()[0].0, "/dh/tmp");
    }

    #[tokio::test]
    async fn test_failure_skips_publish_and_recovers() {
        let notifier = RecordingNotifier::observed();
        let mut reporter = Reporter::new(
            SimulatedSensor::scripted("jc42", vec![Some(2100), None, Some(2200)]),
            notifier.clone(),
            "/dh/tmp",
            Duration::from_secs(20),
        );

        assert!(matches!(reporter.poll_once().await, Iteration::Published { .. }));
        assert_eq!(reporter.poll_once().await, Iteration::ReadFailed);
        assert_eq!(notifier.payloads().len(), 1);

        let outcome = reporter.poll_once().await;
        assert!(matches!(
            outcome,
            Iteration::Published { sample, .. } if sample == Sample::new(2200, 2)
        ));
        assert_eq!(notifier.payloads(), vec!["2100".to_string(), "2200".to_string()]);
    }

    #[tokio::test]
    async fn test_unobserved_still_updates_latest() {
        let notifier = RecordingNotifier::default();
        let mut reporter = Reporter::new(
            SimulatedSensor::constant("jc42", -50),
            notifier.clone(),
            "/dh/tmp",
            Duration::from_secs(20),
        );
        let latest = reporter.latest();
        assert_eq!(latest.respond(), b"0".to_vec());

        assert_eq!(
            reporter.poll_once().await,
            Iteration::Unobserved(Sample::new(-50, 0))
        );
        assert_eq!(notifier.payloads(), vec!["65486".to_string()]);
        assert_eq!(latest.get(), Some(Sample::new(-50, 0)));
        assert_eq!(latest.respond(), b"65486".to_vec());
    }

    #[tokio::test]
    async fn test_failed_read_keeps_previous_latest() {
        let mut reporter = Reporter::new(
            SimulatedSensor::scripted("jc42", vec![Some(1999), None]),
            NoNotifier,
            "/dh/tmp",
            Duration::from_secs(1),
        );
        let latest = reporter.latest();

        reporter.poll_once().await;
        reporter.poll_once().await;
        assert_eq!(latest.get(), Some(Sample::new(1999, 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_period_is_loop_relative() {
        let reads = Arc::new(Mutex::new(Vec::new()));
        let delay = Duration::from_millis(700);
        let period = Duration::from_secs(20);
        let sensor = TimedSensor {
            inner: SimulatedSensor::constant("jc42", 2345).with_delay(delay),
            reads: reads.clone(),
        };

        let reporter = Reporter::new(sensor, NoNotifier, "/dh/tmp", period);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(reporter.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(65)).await;
        shutdown_tx.send(true).unwrap();
        let iterations = handle.await.unwrap();

        let reads = reads.lock().unwrap().clone();
        assert_eq!(iterations as usize, reads.len());
        assert!(reads.len() >= 3);
        for pair in reads.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= period + delay, "gap {:?} too short", gap);
            assert!(gap < period + delay + Duration::from_millis(50), "gap {:?}", gap);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_sleep() {
        let reporter = Reporter::new(
            SimulatedSensor::constant("jc42", 2345),
            NoNotifier,
            "/dh/tmp",
            Duration::from_secs(3600),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(reporter.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let start = Instant::now();
        shutdown_tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_shutdown_before_first_iteration() {
        let reporter = Reporter::new(
            SimulatedSensor::constant("jc42", 2345),
            NoNotifier,
            "/dh/tmp",
            Duration::from_secs(1),
        );
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);
        assert_eq!(reporter.run(shutdown_rx).await, 0);
    }
}
