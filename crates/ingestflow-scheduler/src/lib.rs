pub mod cancellation;
pub mod error;
pub mod fire_time;
pub mod run_tracker;
pub mod scheduler;
pub mod store;

pub use cancellation::CancellationRegistry;
pub use error::{Result, SchedulerError};
pub use fire_time::{is_due, next_fire_at, order_due};
pub use run_tracker::RunTracker;
pub use scheduler::Scheduler;
pub use store::SchedulerStore;
