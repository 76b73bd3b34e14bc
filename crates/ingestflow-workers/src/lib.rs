pub mod embedding;
pub mod extract;
pub mod load;
pub mod pool;
pub mod run_finalize;
pub mod transform;
pub mod vectorize;

pub use embedding::{EmbeddingProvider, HttpEmbeddingProvider};
pub use extract::ExtractWorker;
pub use load::LoadWorker;
pub use pool::{Disposition, MessageHandler, PoolConfig, WorkerPool};
pub use run_finalize::finalize_run;
pub use transform::TransformWorker;
pub use vectorize::VectorizeWorker;
