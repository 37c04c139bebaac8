use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::job::{PageSource, ScrapeJob};

/// Owns the background refresh task. Dropping it without calling
/// [`Scheduler::shutdown`] leaves the task running until the runtime stops.
pub struct Scheduler<S> {
    job: Arc<ScrapeJob<S>>,
    post_id: String,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl<S: PageSource + 'static> Scheduler<S> {
    pub fn start(job: Arc<ScrapeJob<S>>, post_id: String, period: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let task_job = Arc::clone(&job);
        let task_post = post_id.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately; warm-up covers startup
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => run_logged(&task_job, &task_post).await,
                    _ = stopped.changed() => break,
                }
            }
            info!("Scheduler stopped");
        });

        info!(post_id = %post_id, every_secs = period.as_secs(), "Scheduler started");
        Self {
            job,
            post_id,
            stop,
            handle,
        }
    }

    /// Run the job once now, outside the timer.
    pub async fn warm_up(&self) {
        run_logged(&self.job, &self.post_id).await;
    }

    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

async fn run_logged<S: PageSource>(job: &ScrapeJob<S>, post_id: &str) {
    info!("Starting scheduled scrape...");
    match job.run(post_id).await {
        Ok(new) => info!(new, "Scheduled scrape finished"),
        Err(e) => error!(error = %e, "Scrape failed"),
    }
}
