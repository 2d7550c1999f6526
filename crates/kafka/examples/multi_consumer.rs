use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ordered_consumer_kafka::{
    backoff, handler_fn, ordering, ConsumerConfig, ConsumerOptions, Group, Message,
};
use tokio_util::sync::CancellationToken;

/// Example demonstrating multiple consumers in a consumer group
///
/// This example shows how to:
/// 1. Configure batching with one ordered lane per message key
/// 2. Retry failed messages with a bounded backoff
/// 3. Spawn multiple consumers in the same consumer group
/// 4. Stop the group on Ctrl-C and report consumer errors
///
/// To run this example:
/// 1. Start Kafka with Docker
///   docker run -d --name kafka -p 9092:9092 apache/kafka:latest
/// 2. Run the example
///   cargo run -p ordered-consumer-kafka --example multi_consumer
#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    match run_main().await {
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {e:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<()> {
    let config = ConsumerConfig {
        brokers: "localhost:9092".to_string(),
        group_id: "ordered-example-group".to_string(),
        topic: "user-events".to_string(),
        count: 3,
        ..Default::default()
    };
    let options = ConsumerOptions::default()
        .batching(100, ordering::by_message_key())
        .fetch_timeout(Duration::from_secs(2))
        .retry(backoff::max_retries(Duration::from_millis(500), 5))
        .notify_error(Arc::new(|err: &anyhow::Error, msg: &Message| {
            eprintln!(
                "Attempt {} failed for {}@{}: {err}",
                msg.metadata.attempt, msg.partition, msg.offset
            );
        }));

    let group = Group::new(config, options)?;
    println!("Consumer group {} created", group.name());

    // Shared counter for processed messages
    let processed_count = Arc::new(AtomicU64::new(0));

    let handler = {
        let counter = Arc::clone(&processed_count);
        handler_fn(move |_token, message: Message| {
            let counter = Arc::clone(&counter);
            async move {
                if message.payload.is_none() {
                    anyhow::bail!("empty payload");
                }
                let count = counter.fetch_add(1, Ordering::SeqCst) + 1;
                println!(
                    "[{}] key={} payload={} (total {count})",
                    message.metadata.consumer_id,
                    message.key_str(),
                    message.payload_str()
                );
                Ok(())
            }
        })
    };

    let token = CancellationToken::new();
    let mut errors = group.run(&token, handler).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("Shutting down");
            token.cancel();
            group.close().await?;
        }
        Some(e) = errors.recv() => {
            eprintln!("Consumer failed: {e}");
            token.cancel();
            group.close().await?;
        }
    }
    while let Some(e) = errors.recv().await {
        eprintln!("Consumer failed: {e}");
    }

    println!(
        "Processed {} messages",
        processed_count.load(Ordering::SeqCst)
    );
    Ok(())
}
