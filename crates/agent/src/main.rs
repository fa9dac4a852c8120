//! `thermwatch-agent` -- edge temperature monitoring daemon.
//!
//! Samples a DS18B20 probe over the 1-Wire bus, publishes each reading to
//! the IoT broker over mutual TLS, and on overheat composes and dispatches
//! a human-readable alert.
//!
//! # Environment variables
//!
//! | Variable               | Required | Default            | Description                                          |
//! |------------------------|----------|--------------------|------------------------------------------------------|
//! | `IOT_ENDPOINT`         | yes      | --                 | Broker hostname, e.g. `abc-ats.iot.us-east-1.amazonaws.com` |
//! | `ROOT_CA_PATH`         | yes      | --                 | Root CA bundle (PEM)                                 |
//! | `CERT_PATH`            | yes      | --                 | Client certificate (PEM)                             |
//! | `PRIVATE_KEY_PATH`     | yes      | --                 | Client private key (PEM)                             |
//! | `OPENAI_API_KEY`       | yes      | --                 | Text-generation service API key                      |
//! | `MQTT_PORT`            | no       | `8883`             | Broker TLS port                                      |
//! | `MQTT_CLIENT_ID`       | no       | `thermwatch-agent` | Broker client identifier                             |
//! | `SNS_TOPIC_ARN`        | no       | --                 | Cloud alert topic; cloud sink disabled when unset    |
//! | `OPENAI_MODEL`         | no       | `gpt-3.5-turbo`    | Completion model                                     |
//! | `THRESHOLD`            | no       | `70.0`             | Overheat threshold in degrees Celsius                |
//! | `SENSOR_ID`            | no       | first probe        | Fixed 1-Wire probe id                                |
//! | `MODEL_PATH`           | no       | --                 | Classifier model artifact; threshold mode when unset |
//! | `SAMPLE_INTERVAL_SECS` | no       | `5`                | Seconds between monitoring ticks                     |

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thermwatch_agent::config::AgentConfig;
use thermwatch_agent::monitor::Monitor;
use thermwatch_agent::sensor::W1Sensor;
use thermwatch_alerts::{AlertDispatcher, OpenAiComposer, PubSubSink, SnsSink};
use thermwatch_core::Classifier;
use thermwatch_telemetry::{TelemetryPublisher, TlsMaterial};

/// How long shutdown waits for the monitor task to finish its current tick.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "thermwatch_agent=info,thermwatch_telemetry=info,thermwatch_alerts=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AgentConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Configuration error");
        std::process::exit(1);
    });

    tracing::info!(
        endpoint = %config.endpoint,
        port = config.port,
        client_id = %config.client_id,
        threshold_c = config.threshold_c,
        interval_secs = config.sample_interval.as_secs(),
        "Starting thermwatch-agent",
    );

    let sensor = W1Sensor::detect(config.sensor_id.as_deref()).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Sensor detection failed");
        std::process::exit(1);
    });

    let tls = TlsMaterial::from_files(
        &config.root_ca_path,
        &config.cert_path,
        &config.private_key_path,
    )
    .unwrap_or_else(|e| {
        tracing::error!(error = %e, "TLS material error");
        std::process::exit(1);
    });

    let publisher =
        TelemetryPublisher::connect(&config.endpoint, config.port, &config.client_id, tls)
            .await
            .unwrap_or_else(|e| {
                tracing::error!(error = %e, "Broker connection failed");
                std::process::exit(1);
            });
    let publisher = Arc::new(publisher);

    let classifier = match &config.model_path {
        Some(path) => Classifier::from_model_artifact(path, config.threshold_c),
        None => Classifier::threshold(config.threshold_c),
    };

    let mut composer = OpenAiComposer::new(config.openai_api_key.clone());
    if let Some(model) = &config.openai_model {
        composer = composer.with_model(model.clone());
    }

    let mut dispatcher =
        AlertDispatcher::new().with_pubsub(PubSubSink::new(Arc::clone(&publisher)));
    if let Some(arn) = &config.sns_topic_arn {
        dispatcher = dispatcher.with_cloud(SnsSink::from_default_config(arn.clone()).await);
        tracing::info!(topic_arn = %arn, "Cloud alert sink enabled");
    }

    let monitor = Monitor::new(
        sensor,
        Arc::clone(&publisher),
        classifier,
        composer,
        dispatcher,
        config.sample_interval,
    );

    let cancel = CancellationToken::new();
    let monitor_task = tokio::spawn(monitor.run(cancel.clone()));

    shutdown_signal().await;

    cancel.cancel();
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, monitor_task)
        .await
        .is_err()
    {
        tracing::warn!("Monitor task did not stop in time");
    }
    publisher.shutdown().await;

    tracing::info!("thermwatch-agent stopped");
}

/// Resolve when the process receives SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
