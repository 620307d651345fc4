use crate::config::SchedulerConfig;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

/// Builds the multi-threaded Tokio runtime actors are scheduled on.
///
/// `max_threads = 0` leaves the worker count to Tokio (one per core).
pub fn build_runtime(config: &SchedulerConfig) -> std::io::Result<Runtime> {
    let mut builder = Builder::new_multi_thread();
    if config.max_threads > 0 {
        builder.worker_threads(config.max_threads);
    }
    let runtime = builder.thread_name("troupe.worker").enable_all().build()?;
    info!(max_threads = config.max_threads, "Runtime built");
    Ok(runtime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_with_fixed_worker_count_runs_tasks() {
        let runtime = build_runtime(&SchedulerConfig {
            max_threads: 2,
            ..SchedulerConfig::default()
        })
        .unwrap();
        let value = runtime.block_on(async { tokio::spawn(async { 21 * 2 }).await.unwrap() });
        assert_eq!(value, 42);
    }
}
