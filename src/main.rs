//! Command-line runner for an ordered Kafka consumer group
//!
//! # Usage Examples
//!
//! ```bash
//! # Three consumers, one message at a time, no retries
//! ordered-consumer \
//!   --brokers localhost:9092 \
//!   --group-id billing \
//!   --topic orders \
//!   --num-consumers 3
//!
//! # Batches of 100, ordered per message key, retrying forever
//! KAFKA_BROKERS=localhost:9092 KAFKA_GROUP_ID=billing KAFKA_TOPIC=orders \
//! ordered-consumer --batch-size 100 --ordering key --retry non-stop
//! ```
//!
//! Logging is configured through `RUST_LOG`, e.g. `RUST_LOG=info`. With
//! `--otel-url`, handler spans are also exported over OTLP; combined with
//! `--trace` they join the producer's trace.

mod cli;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kafka_types::Message;
use opentelemetry::{KeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{BatchConfig, RandomIdGenerator, Tracer};
use opentelemetry_sdk::{runtime, Resource};
use ordered_consumer_kafka::{handler_fn, Group};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::cli::Config;

fn init_tracer(sink_url: &str, service_name: &str) -> anyhow::Result<Tracer> {
    let tracer = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default()
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    Value::from(service_name.to_string()),
                )])),
        )
        .with_batch_config(BatchConfig::default())
        .with_exporter(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(sink_url)
                .with_timeout(Duration::from_secs(3)),
        )
        .install_batch(runtime::Tokio)
        .with_context(|| format!("Failed to set up span export to {sink_url}"))?;
    Ok(tracer)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let result = run().await;
    // Flush spans still buffered by the batch exporter
    opentelemetry::global::shutdown_tracer_provider();
    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let config = Config::parse();

    // Instantiate tracing outputs:
    //   - stdout with a level configured by the RUST_LOG envvar
    //   - OpenTelemetry if enabled, for levels INFO and higher
    let log_layer = tracing_subscriber::fmt::layer().with_filter(EnvFilter::from_default_env());
    let otel_layer = match &config.otel_url {
        Some(url) => Some(OpenTelemetryLayer::new(init_tracer(
            url,
            &config.otel_service_name,
        )?)),
        None => None,
    }
    .with_filter(LevelFilter::INFO);
    tracing_subscriber::registry()
        .with(log_layer)
        .with(otel_layer)
        .init();
    let group = Group::new(config.consumer_config(), config.consumer_options())
        .context("Failed to create consumer group")?;
    info!(
        "Starting group {} with {} consumers on topic {}",
        group.name(),
        config.num_consumers.max(1),
        config.topic
    );

    // Shared counter for processed messages
    let processed_count = Arc::new(AtomicU64::new(0));
    let handler = {
        let counter = Arc::clone(&processed_count);
        handler_fn(move |_token, message: Message| {
            let counter = Arc::clone(&counter);
            async move {
                let count = counter.fetch_add(1, Ordering::Relaxed) + 1;
                info!(
                    "Message {}/{}@{} key={} attempt={} consumer={} ({count} total)",
                    message.topic,
                    message.partition,
                    message.offset,
                    message.key_str(),
                    message.metadata.attempt,
                    message.metadata.consumer_id,
                );
                Ok(())
            }
        })
    };

    let token = CancellationToken::new();
    let mut errors = group
        .run(&token, handler)
        .await
        .context("Failed to start consumers")?;

    let mut failures = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !token.is_cancelled() => {
                info!("Received Ctrl-C, shutting down");
                token.cancel();
                if let Err(e) = group.close().await {
                    error!("{e}");
                }
            }
            next = errors.recv() => match next {
                Some(e) => {
                    error!("{e}");
                    failures += 1;
                }
                None => break,
            },
        }
    }

    info!(
        "Group {} stopped after {} messages",
        group.name(),
        processed_count.load(Ordering::Relaxed)
    );
    if failures > 0 {
        anyhow::bail!("{failures} consumer(s) failed");
    }
    Ok(())
}
