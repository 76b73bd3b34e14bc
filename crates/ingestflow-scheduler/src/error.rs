pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("storage error: {0}")]
    Storage(#[from] ingestflow_storage::StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] ingestflow_queue::QueueError),
}
