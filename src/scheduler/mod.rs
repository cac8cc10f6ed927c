pub mod reaper;

use std::time::Duration;

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info};
use uuid::Uuid;

/// Periodic background jobs on top of tokio-cron-scheduler
pub struct Scheduler {
    inner: JobScheduler,
    jobs: Vec<(Uuid, String)>,
}

impl Scheduler {
    pub async fn new() -> Result<Self> {
        let inner = JobScheduler::new()
            .await
            .context("Failed to create job scheduler")?;
        Ok(Self {
            inner,
            jobs: Vec::new(),
        })
    }

    /// Run `task` every `interval`. The first run happens one interval after
    /// the scheduler starts.
    pub async fn add_repeated_job<F>(&mut self, interval: Duration, name: &str, task: F) -> Result<Uuid>
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let label = name.to_string();
        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let label = label.clone();
            let run = task();
            Box::pin(async move {
                debug!("Job '{}' firing", label);
                run.await;
            })
        })
        .with_context(|| format!("Failed to build job '{}'", name))?;

        let id = self
            .inner
            .add(job)
            .await
            .with_context(|| format!("Failed to register job '{}'", name))?;
        self.jobs.push((id, name.to_string()));

        info!("Job '{}' runs every {:?}", name, interval);
        Ok(id)
    }

    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.iter().map(|(_, name)| name.as_str())
    }

    pub async fn start(&self) -> Result<()> {
        self.inner
            .start()
            .await
            .context("Failed to start scheduler")?;
        info!("Scheduler started with {} job(s)", self.jobs.len());
        Ok(())
    }

    /// Stop the scheduler; pending runs are dropped
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner
            .shutdown()
            .await
            .context("Failed to shutdown scheduler")?;
        info!("Scheduler stopped, cancelled {} job(s)", self.jobs.len());
        self.jobs.clear();
        Ok(())
    }
}
