use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use super::control_plane::ControlPlane;
use super::types::{Job, Pipeline};
use crate::cancel::CancelToken;
use crate::error::{RefactorLensError, Result};

/// Bounds for polling a pipeline or job until it finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            poll_interval: Duration::from_secs(10),
        }
    }
}

/// Polls a pipeline until it reaches a terminal status.
///
/// # Errors
///
/// * `Canceled` if `cancel` fires before the pipeline finishes
/// * `Timeout` if it is still running once `options.timeout` has elapsed
/// * Any error returned by the control plane while fetching the pipeline
pub async fn wait_for_pipeline<C: ControlPlane>(
    control_plane: &C,
    project_id: u64,
    pipeline_id: u64,
    options: &WaitOptions,
    cancel: &CancelToken,
) -> Result<Pipeline> {
    poll_until_finished(
        format!("pipeline {pipeline_id}"),
        options,
        cancel,
        || control_plane.get_pipeline(project_id, pipeline_id),
        |pipeline: &Pipeline| (pipeline.is_finished(), pipeline.status.clone()),
    )
    .await
}

/// Polls a single job until it reaches a terminal status.
///
/// # Errors
///
/// Same as [`wait_for_pipeline`].
pub async fn wait_for_job<C: ControlPlane>(
    control_plane: &C,
    project_id: u64,
    job_id: u64,
    options: &WaitOptions,
    cancel: &CancelToken,
) -> Result<Job> {
    poll_until_finished(
        format!("job {job_id}"),
        options,
        cancel,
        || control_plane.get_job(project_id, job_id),
        |job: &Job| (job.is_finished(), job.status.clone()),
    )
    .await
}

async fn poll_until_finished<T, F, Fut>(
    what: String,
    options: &WaitOptions,
    cancel: &CancelToken,
    mut fetch: F,
    progress: impl Fn(&T) -> (bool, String),
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let deadline = Instant::now() + options.timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(RefactorLensError::Canceled(what));
        }

        let current = fetch().await?;
        let (finished, status) = progress(&current);
        if finished {
            debug!("{what} finished with status {status}");
            return Ok(current);
        }

        if Instant::now() + options.poll_interval > deadline {
            return Err(RefactorLensError::Timeout {
                what,
                waited: options.timeout,
            });
        }

        debug!("{what} is {status}, polling again in {}s", options.poll_interval.as_secs());
        tokio::select! {
            () = cancel.cancelled() => return Err(RefactorLensError::Canceled(what)),
            () = tokio::time::sleep(options.poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitlab::simulation::{SimulatedControlPlane, CI_FILE};

    async fn running_pipeline(polls: u32) -> (SimulatedControlPlane, u64, u64) {
        let cp = SimulatedControlPlane::default().with_running_polls(polls);
        let project = cp.create_project("app").await.unwrap();
        cp.create_or_update_file(project.id, CI_FILE, "build:\n  script: make\n", "Add CI")
            .await
            .unwrap();
        let pipeline = cp.trigger_pipeline(project.id, "main").await.unwrap();
        (cp, project.id, pipeline.id)
    }

    #[cfg(test)]
    mod wait_for_pipeline {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn returns_once_terminal() {
            let (cp, project_id, pipeline_id) = running_pipeline(3).await;
            let started = Instant::now();

            let pipeline = wait_for_pipeline(&cp, project_id, pipeline_id, &WaitOptions::default(), &CancelToken::new())
                .await
                .unwrap();

            assert_eq!(pipeline.status, "success");
            assert_eq!(started.elapsed(), Duration::from_secs(30), "three sleeps of ten seconds");
        }

        #[tokio::test(start_paused = true)]
        async fn times_out_when_never_finished() {
            let (cp, project_id, pipeline_id) = running_pipeline(1_000).await;
            let options = WaitOptions {
                timeout: Duration::from_secs(60),
                poll_interval: Duration::from_secs(10),
            };

            let err = wait_for_pipeline(&cp, project_id, pipeline_id, &options, &CancelToken::new())
                .await
                .unwrap_err();

            assert!(err.is_timeout(), "got: {err:?}");
        }

        #[tokio::test(start_paused = true)]
        async fn cancel_interrupts_sleep() {
            let (cp, project_id, pipeline_id) = running_pipeline(1_000).await;
            let cancel = CancelToken::new();
            let canceller = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(25)).await;
                    cancel.cancel();
                })
            };

            let err = wait_for_pipeline(&cp, project_id, pipeline_id, &WaitOptions::default(), &cancel)
                .await
                .unwrap_err();

            canceller.await.unwrap();
            assert!(matches!(err, RefactorLensError::Canceled(_)), "got: {err:?}");
            assert!(!err.is_timeout(), "cancellation is not a timeout");
        }

        #[tokio::test]
        async fn already_cancelled_does_not_poll() {
            let (cp, project_id, pipeline_id) = running_pipeline(0).await;
            let cancel = CancelToken::new();
            cancel.cancel();

            let err = wait_for_pipeline(&cp, project_id, pipeline_id, &WaitOptions::default(), &cancel)
                .await
                .unwrap_err();
            assert!(matches!(err, RefactorLensError::Canceled(_)));
        }
    }

    #[cfg(test)]
    mod wait_for_job {
        use super::*;

        #[tokio::test(start_paused = true)]
        async fn follows_pipeline_progress() {
            let (cp, project_id, pipeline_id) = running_pipeline(2).await;
            let job_id = cp.get_pipeline_jobs(project_id, pipeline_id).await.unwrap()[0].id;

            let poller = async {
                wait_for_job(&cp, project_id, job_id, &WaitOptions::default(), &CancelToken::new()).await
            };
            let driver = async {
                for _ in 0..2 {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    cp.get_pipeline(project_id, pipeline_id).await.unwrap();
                }
            };
            let (job, ()) = tokio::join!(poller, driver);

            assert_eq!(job.unwrap().status, "success");
        }
    }
}
