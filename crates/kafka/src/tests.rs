//! Cross-module tests: groups of consumers over in-memory readers.

use std::sync::Arc;

use kafka_types::Message;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::testing::{recording_handler, MockReader, OnEmpty};
use crate::{ConsumerConfig, ConsumerOptions, Error, Group, Reader, ReaderFactory};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

fn group_config(count: usize) -> ConsumerConfig {
    ConsumerConfig {
        group_id: "Billing".to_string(),
        topic: "orders".to_string(),
        count,
        ..Default::default()
    }
}

/// Hands out `readers[i]` to the consumer whose id ends in `-{i}`
fn indexed_factory(readers: Vec<Arc<MockReader>>) -> ReaderFactory {
    Arc::new(move |config: &ConsumerConfig| -> crate::Result<Arc<dyn Reader>> {
        let index = config
            .consumer_id
            .rsplit('-')
            .next()
            .and_then(|i| i.parse::<usize>().ok())
            .ok_or_else(|| Error::InvalidConfig(format!("bad id {}", config.consumer_id)))?;
        let reader = readers
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Reader(format!("no reader for {}", config.consumer_id)))?;
        let reader: Arc<dyn Reader> = reader;
        Ok(reader)
    })
}

fn messages(partition: i32, n: i64) -> Vec<Message> {
    (0..n).map(|i| Message::new("orders", partition, i)).collect()
}

// ============================================================================
// Group Tests
// ============================================================================

#[tokio::test]
async fn test_group_error_isolation() {
    init_tracing();

    let readers = vec![
        Arc::new(MockReader::new(messages(0, 3), OnEmpty::Block)),
        Arc::new(MockReader::new(vec![], OnEmpty::Fail("broker down".into()))),
        Arc::new(MockReader::new(messages(2, 3), OnEmpty::Block)),
    ];
    let options = ConsumerOptions::default().reader_factory(indexed_factory(readers.clone()));
    let group = Group::new(group_config(3), options).unwrap();
    let (handler, seen) = recording_handler();

    let mut errors = group.run(&CancellationToken::new(), handler).await.unwrap();

    let err = errors.recv().await.unwrap();
    let failed_id = format!("{}-1", group.name());
    match &err {
        Error::Group {
            group_id,
            consumer_id,
            ..
        } => {
            assert_eq!(group_id, "Billing");
            assert_eq!(consumer_id, &failed_id);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("broker down"));

    while readers[0].committed_count() < 3 || readers[2].committed_count() < 3 {
        tokio::task::yield_now().await;
    }
    assert!(matches!(errors.try_recv(), Err(TryRecvError::Empty)));

    let handled_by: Vec<String> = seen
        .lock()
        .unwrap()
        .iter()
        .map(|m| m.metadata.consumer_id.clone())
        .collect();
    assert_eq!(handled_by.len(), 6);
    assert!(!handled_by.contains(&failed_id));

    tokio_test::assert_ok!(group.close().await);
    assert!(errors.recv().await.is_none());
}

#[tokio::test]
async fn test_group_consumer_ids() {
    let readers: Vec<_> = (0..3)
        .map(|_| Arc::new(MockReader::new(vec![], OnEmpty::Block)))
        .collect();
    let options = ConsumerOptions::default().reader_factory(indexed_factory(readers));
    let group = Group::new(group_config(3), options).unwrap();
    let (handler, _seen) = recording_handler();

    let _errors = group.run(&CancellationToken::new(), handler).await.unwrap();

    let name = group.name();
    assert!(name.starts_with("billing-"));
    assert_eq!(
        group.consumer_ids(),
        vec![format!("{name}-0"), format!("{name}-1"), format!("{name}-2")]
    );
    group.close().await.unwrap();
}

#[tokio::test]
async fn test_group_cancellation_is_not_reported() {
    let readers: Vec<_> = (0..2)
        .map(|_| Arc::new(MockReader::new(vec![], OnEmpty::Block)))
        .collect();
    let options = ConsumerOptions::default().reader_factory(indexed_factory(readers));
    let group = Group::new(group_config(2), options).unwrap();
    let (handler, _seen) = recording_handler();
    let token = CancellationToken::new();

    let mut errors = group.run(&token, handler).await.unwrap();
    token.cancel();

    assert!(errors.recv().await.is_none());
}

#[tokio::test]
async fn test_group_close_collects_all_errors() {
    let readers = vec![
        Arc::new(MockReader::new(vec![], OnEmpty::Block).fail_close()),
        Arc::new(MockReader::new(vec![], OnEmpty::Block)),
        Arc::new(MockReader::new(vec![], OnEmpty::Block).fail_close()),
    ];
    let options = ConsumerOptions::default().reader_factory(indexed_factory(readers.clone()));
    let group = Group::new(group_config(3), options).unwrap();
    let (handler, _seen) = recording_handler();

    let mut errors = group.run(&CancellationToken::new(), handler).await.unwrap();
    let err = tokio_test::assert_err!(group.close().await);

    match &err {
        Error::Close(failures) => {
            assert_eq!(failures.len(), 2);
            assert!(failures.iter().all(|f| f.contains("close rejected")));
        }
        other => panic!("unexpected error: {other}"),
    }
    for reader in &readers {
        assert_eq!(reader.close_calls(), 1);
    }
    assert!(errors.recv().await.is_none());
}

#[tokio::test]
async fn test_group_construction_failure_closes_built_consumers() {
    // Only two readers for three consumers: the third construction fails.
    let readers: Vec<_> = (0..2)
        .map(|_| Arc::new(MockReader::new(vec![], OnEmpty::Block)))
        .collect();
    let options = ConsumerOptions::default().reader_factory(indexed_factory(readers.clone()));
    let group = Group::new(group_config(3), options).unwrap();
    let (handler, _seen) = recording_handler();

    let err = group
        .run(&CancellationToken::new(), handler)
        .await
        .err()
        .unwrap();

    assert!(err.to_string().contains("no reader for"));
    for reader in &readers {
        assert_eq!(reader.close_calls(), 1);
    }
    assert!(group.consumer_ids().is_empty());
}
