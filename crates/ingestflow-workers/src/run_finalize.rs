//! Shared completion path for Extract/Transform/Load/Vectorize (spec §4.3
//! step 5): whichever stage closes the run's last in-flight batch reports
//! the run finished and publishes the `completion` event, since none of the
//! four worker pools know in advance which of them will be last.

use ingestflow_core::events::PipelineEvent;
use ingestflow_progress::Broker;
use ingestflow_scheduler::Scheduler;
use tracing::warn;

pub async fn finalize_run(scheduler: &Scheduler, broker: &Broker, job_id: i64, tenant_id: i64, job_name: &str) {
    if let Err(e) = scheduler.report_run_finished(job_id, None).await {
        warn!(job_id, error = %e, "failed to record run success");
    }
    broker.publish(tenant_id, PipelineEvent::completion(job_name.to_string(), true, "pipeline finished"));
}
