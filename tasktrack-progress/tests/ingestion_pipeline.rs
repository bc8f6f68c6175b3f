//! Task-creation events flowing through the broker into seed rows

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use tasktrack_common::broker::{MemoryBroker, QueueBinding};
use tasktrack_common::consumer::{Consumer, ConsumerState};
use tasktrack_common::events::{routing, ProgressStatus, TaskType};
use tasktrack_common::logchannel::{LogLevel, LogPublisher, LogRecord};
use tasktrack_common::publisher::EventPublisher;
use tasktrack_progress::db;
use tasktrack_progress::ingestion::{ingestion_spec, IngestionHandler, INGESTION_QUEUE};

async fn wait_for_acked(broker: &MemoryBroker, queue: &str, n: u64) {
    for _ in 0..400 {
        if broker.stats(queue).map(|s| s.acked()).unwrap_or(0) >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {} acks on {}", n, queue);
}

#[tokio::test]
async fn test_task_created_events_seed_progress() {
    let pool = tasktrack_common::db::open_in_memory().await.unwrap();
    db::init_schema(&pool).await.unwrap();

    let spec = ingestion_spec(routing::PROGRESS_EXCHANGE, INGESTION_QUEUE);
    let broker = Arc::new(MemoryBroker::with_topology(vec![
        spec.binding.clone(),
        QueueBinding::plain(routing::LOG_QUEUE),
    ]));
    let log = LogPublisher::new(broker.clone(), routing::LOG_QUEUE, "progress-service");

    let consumer = Consumer::new(
        broker.clone(),
        spec,
        Arc::new(IngestionHandler::new(pool.clone())),
        Some(log.clone()),
    );
    let (mut state, handle) = consumer.spawn();
    state.wait_for(|s| *s == ConsumerState::Consuming).await.unwrap();

    // The task service publishes on the same exchange
    let tasks = EventPublisher::new(broker.clone(), routing::PROGRESS_EXCHANGE, LogPublisher::disabled("task-service"));
    tasks
        .publish(
            routing::TASK_CREATED,
            &json!({"taskId": 55, "userId": 12, "taskType": "Individual", "createdBy": 3, "assignedTo": 12}),
        )
        .await;
    tasks
        .publish(
            routing::GROUP_TASK_CREATED,
            &json!({"taskId": 60, "userId": 12, "taskType": "Group", "groupId": 4, "createdBy": 3}),
        )
        .await;
    tasks
        .publish(routing::TASK_CREATED, &json!({"taskId": 61, "taskType": "Individual"}))
        .await;
    // Not bound to the ingestion queue
    tasks.publish(routing::TASK_UPDATED, &json!({"taskId": 55})).await;

    wait_for_acked(&broker, INGESTION_QUEUE, 3).await;

    let individual = db::progress::list_by_task(&pool, 55, TaskType::Individual).await.unwrap();
    assert_eq!(individual.len(), 1);
    assert_eq!(individual[0].progress, 0);
    assert_eq!(individual[0].status, ProgressStatus::Pending);

    let group = db::progress::list_by_task(&pool, 60, TaskType::Group).await.unwrap();
    assert_eq!(group.len(), 1);
    assert_eq!(group[0].group_id, Some(4));
    assert_eq!(group[0].assigned_to, Some(12));

    assert!(!db::progress::task_exists(&pool, 61, TaskType::Individual).await.unwrap());

    let stats = broker.stats(INGESTION_QUEUE).unwrap();
    assert_eq!(stats.published(), 3);
    assert_eq!(stats.requeued(), 0);

    // Two stored events produce info records, the dropped one does not
    let mut records = Vec::new();
    while let Some((_, bytes)) = broker.take(routing::LOG_QUEUE).await {
        records.push(serde_json::from_slice::<LogRecord>(&bytes).unwrap());
    }
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.level == LogLevel::Info && r.service == "progress-service"));

    handle.abort();
}
