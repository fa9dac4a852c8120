//! Integration tests for the monitoring cycle.
//!
//! Drives [`Monitor`] tick by tick with scripted fakes for the sensor,
//! publisher, composer, and sinks, verifying the alerting and history
//! semantics end to end without hardware or a broker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use thermwatch_agent::monitor::{Monitor, ReadingPublisher};
use thermwatch_agent::sensor::{SensorError, SensorSource};
use thermwatch_alerts::{
    AlertComposer, AlertDispatcher, AlertSink, CompositionError, DispatchError,
};
use thermwatch_core::{AlertMessage, Classifier, Reading};
use thermwatch_telemetry::TelemetryError;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Sensor that replays a fixed script of readings.
struct ScriptedSensor {
    readings: VecDeque<Result<f64, SensorError>>,
}

impl ScriptedSensor {
    fn new(readings: Vec<Result<f64, SensorError>>) -> Self {
        Self {
            readings: readings.into(),
        }
    }

    fn of_temps(temps: &[f64]) -> Self {
        Self::new(temps.iter().map(|t| Ok(*t)).collect())
    }
}

impl SensorSource for ScriptedSensor {
    fn read(&mut self) -> Result<f64, SensorError> {
        self.readings.pop_front().unwrap_or_else(|| {
            Err(SensorError::NotReady {
                id: "28-0000000000aa".to_string(),
                reason: "script exhausted".to_string(),
            })
        })
    }
}

fn sensor_unavailable() -> Result<f64, SensorError> {
    Err(SensorError::NotReady {
        id: "28-0000000000aa".to_string(),
        reason: "CRC check failed".to_string(),
    })
}

/// Publisher that counts attempts and optionally fails every one.
#[derive(Clone)]
struct CountingPublisher {
    attempts: Arc<AtomicUsize>,
    fail: bool,
}

impl CountingPublisher {
    fn new(fail: bool) -> Self {
        Self {
            attempts: Arc::new(AtomicUsize::new(0)),
            fail,
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadingPublisher for CountingPublisher {
    async fn publish_reading(&self, _reading: &Reading) -> Result<(), TelemetryError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(TelemetryError::AckTimeout(Duration::from_secs(10)))
        } else {
            Ok(())
        }
    }
}

/// Composer that records each history snapshot it is asked to describe.
#[derive(Clone)]
struct RecordingComposer {
    calls: Arc<Mutex<Vec<Vec<f64>>>>,
    fail: bool,
}

impl RecordingComposer {
    fn new(fail: bool) -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            fail,
        }
    }

    fn calls(&self) -> Vec<Vec<f64>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertComposer for RecordingComposer {
    async fn compose(&self, history: &[f64]) -> Result<AlertMessage, CompositionError> {
        self.calls.lock().unwrap().push(history.to_vec());
        if self.fail {
            Err(CompositionError::EmptyCompletion)
        } else {
            Ok(AlertMessage {
                text: "Equipment is overheating.".to_string(),
                timestamp: 1_700_000_000,
            })
        }
    }
}

/// Sink that counts successful deliveries.
struct CountingSink {
    deliveries: Arc<AtomicUsize>,
}

impl CountingSink {
    fn new() -> (Self, Arc<AtomicUsize>) {
        let deliveries = Arc::new(AtomicUsize::new(0));
        (
            Self {
                deliveries: Arc::clone(&deliveries),
            },
            deliveries,
        )
    }
}

#[async_trait]
impl AlertSink for CountingSink {
    async fn deliver(&self, _message: &AlertMessage) -> Result<(), DispatchError> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn monitor_at(
    threshold_c: f64,
    sensor: ScriptedSensor,
    publisher: CountingPublisher,
    composer: RecordingComposer,
    dispatcher: AlertDispatcher,
) -> Monitor<ScriptedSensor, CountingPublisher, RecordingComposer> {
    Monitor::new(
        sensor,
        publisher,
        Classifier::threshold(threshold_c),
        composer,
        dispatcher,
        Duration::from_secs(5),
    )
}

// ---------------------------------------------------------------------------
// Test: alerting on a rising history
// ---------------------------------------------------------------------------

/// With readings 72.3, 75.9, 78.0 against a 75.0 threshold, the first tick
/// stays normal and each of the two overheat ticks composes one alert over
/// the history accumulated so far.
#[tokio::test]
async fn rising_history_composes_one_alert_per_overheat_tick() {
    let publisher = CountingPublisher::new(false);
    let composer = RecordingComposer::new(false);
    let mut monitor = monitor_at(
        75.0,
        ScriptedSensor::of_temps(&[72.3, 75.9, 78.0]),
        publisher.clone(),
        composer.clone(),
        AlertDispatcher::new(),
    );

    for _ in 0..3 {
        monitor.run_tick().await;
    }

    assert_eq!(publisher.attempts(), 3);
    assert_eq!(
        composer.calls(),
        vec![vec![72.3, 75.9], vec![72.3, 75.9, 78.0]]
    );
    assert_eq!(monitor.history().snapshot(), vec![72.3, 75.9, 78.0]);
}

/// Readings strictly below the threshold never reach the composer.
#[tokio::test]
async fn normal_readings_never_compose() {
    let composer = RecordingComposer::new(false);
    let mut monitor = monitor_at(
        70.0,
        ScriptedSensor::of_temps(&[60.0, 65.0, 69.9]),
        CountingPublisher::new(false),
        composer.clone(),
        AlertDispatcher::new(),
    );

    for _ in 0..3 {
        monitor.run_tick().await;
    }

    assert!(composer.calls().is_empty());
}

// ---------------------------------------------------------------------------
// Test: history window
// ---------------------------------------------------------------------------

/// Eleven readings roll the first one out of the ten-sample window; the
/// alert composed on the final tick sees only the last ten.
#[tokio::test]
async fn eleventh_reading_rolls_the_window_before_alerting() {
    let temps: Vec<f64> = (60..=70).map(f64::from).collect();
    let composer = RecordingComposer::new(false);
    let mut monitor = monitor_at(
        70.0,
        ScriptedSensor::of_temps(&temps),
        CountingPublisher::new(false),
        composer.clone(),
        AlertDispatcher::new(),
    );

    for _ in 0..temps.len() {
        monitor.run_tick().await;
    }

    let expected: Vec<f64> = (61..=70).map(f64::from).collect();
    assert_eq!(monitor.history().snapshot(), expected);
    // Only the final reading reaches the threshold.
    assert_eq!(composer.calls(), vec![expected.clone()]);
}

// ---------------------------------------------------------------------------
// Test: per-tick fault handling
// ---------------------------------------------------------------------------

/// Publish failures are absorbed: every tick still attempts a publish and
/// the history keeps growing.
#[tokio::test]
async fn publish_failures_do_not_stop_the_loop() {
    let publisher = CountingPublisher::new(true);
    let mut monitor = monitor_at(
        70.0,
        ScriptedSensor::of_temps(&[65.0, 65.0, 65.0, 65.0, 65.0]),
        publisher.clone(),
        RecordingComposer::new(false),
        AlertDispatcher::new(),
    );

    for _ in 0..5 {
        monitor.run_tick().await;
    }

    assert_eq!(publisher.attempts(), 5);
    assert_eq!(monitor.history().len(), 5);
}

/// A failed sensor read skips the whole tick: nothing is published and
/// nothing enters the history.
#[tokio::test]
async fn sensor_failure_skips_the_tick_entirely() {
    let publisher = CountingPublisher::new(false);
    let mut monitor = monitor_at(
        70.0,
        ScriptedSensor::new(vec![Ok(65.0), sensor_unavailable(), Ok(66.0)]),
        publisher.clone(),
        RecordingComposer::new(false),
        AlertDispatcher::new(),
    );

    for _ in 0..3 {
        monitor.run_tick().await;
    }

    assert_eq!(publisher.attempts(), 2);
    assert_eq!(monitor.history().snapshot(), vec![65.0, 66.0]);
}

/// When composition fails, no sink is attempted and the loop carries on.
#[tokio::test]
async fn composition_failure_skips_dispatch() {
    let (sink, deliveries) = CountingSink::new();
    let composer = RecordingComposer::new(true);
    let mut monitor = monitor_at(
        70.0,
        ScriptedSensor::of_temps(&[80.0, 81.0]),
        CountingPublisher::new(false),
        composer.clone(),
        AlertDispatcher::new().with_pubsub(sink),
    );

    for _ in 0..2 {
        monitor.run_tick().await;
    }

    assert_eq!(composer.calls().len(), 2);
    assert_eq!(deliveries.load(Ordering::SeqCst), 0);
}

/// A composed alert reaches every configured sink.
#[tokio::test]
async fn composed_alerts_reach_both_sinks() {
    let (pubsub, pubsub_deliveries) = CountingSink::new();
    let (cloud, cloud_deliveries) = CountingSink::new();
    let mut monitor = monitor_at(
        70.0,
        ScriptedSensor::of_temps(&[80.0]),
        CountingPublisher::new(false),
        RecordingComposer::new(false),
        AlertDispatcher::new().with_pubsub(pubsub).with_cloud(cloud),
    );

    monitor.run_tick().await;

    assert_eq!(pubsub_deliveries.load(Ordering::SeqCst), 1);
    assert_eq!(cloud_deliveries.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Test: cancellation
// ---------------------------------------------------------------------------

/// The running loop stops promptly once its token is cancelled.
#[tokio::test]
async fn run_stops_promptly_on_cancellation() {
    let monitor = Monitor::new(
        ScriptedSensor::of_temps(&[65.0]),
        CountingPublisher::new(false),
        Classifier::threshold(70.0),
        RecordingComposer::new(false),
        AlertDispatcher::new(),
        Duration::from_millis(5),
    );

    let cancel = CancellationToken::new();
    let task = tokio::spawn(monitor.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(30)).await;

    cancel.cancel();

    let joined = tokio::time::timeout(Duration::from_secs(1), task).await;
    assert!(joined.is_ok(), "monitor task should stop after cancellation");
}
