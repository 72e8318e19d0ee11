use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::app::Radar;

/// One job per cron expression, each running the online pipeline.
pub async fn build_scheduler(radar: Radar, crons: &[String]) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    for cron in crons {
        let radar = radar.clone();
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let radar = radar.clone();
            Box::pin(async move {
                match radar.run(false).await {
                    Ok(summary) => info!(
                        run_id = %summary.run_id,
                        found = summary.opportunities_found,
                        errors = summary.errors,
                        "scheduled run finished"
                    ),
                    Err(err) => error!(error = %format!("{err:#}"), "scheduled run failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(sched)
}

/// `RADAR_CRON` may hold several expressions separated by `;`.
pub fn cron_expressions(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

/// Starts the scheduler and blocks until Ctrl-C.
pub async fn run_until_ctrl_c(radar: Radar) -> Result<()> {
    let crons = cron_expressions(&radar.config().cron);
    let mut sched = build_scheduler(radar.clone(), &crons).await?;
    sched.start().await.context("starting scheduler")?;
    info!(cron = %crons.join(" | "), "scheduler running, Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down scheduler");
    sched.shutdown().await.context("stopping scheduler")?;
    radar.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_cron_list() {
        assert_eq!(
            cron_expressions("0 0 7 * * * ; 0 0 19 * * *;"),
            vec!["0 0 7 * * *".to_string(), "0 0 19 * * *".to_string()]
        );
        assert_eq!(cron_expressions(crate::config::DEFAULT_CRON).len(), 1);
    }
}
