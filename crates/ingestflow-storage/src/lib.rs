pub mod credentials;
pub mod database;
pub mod entity_repository;
pub mod error;
pub mod integration_repository;
pub mod job_repository;
pub mod raw_batch_repository;
pub mod vector_repository;

pub use credentials::{CredentialsStore, EncryptionService, PostgresCredentialsStore};
pub use database::Database;
pub use entity_repository::{EntityRepository, LoadOutcome, TextChange, MAX_DEFERRED_PASSES};
pub use error::{Result, StoreError};
pub use integration_repository::IntegrationRepository;
pub use job_repository::{JobRepository, NewJob};
pub use raw_batch_repository::RawBatchRepository;
pub use vector_repository::{PostgresVectorStore, VectorStore};
