use log::debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::gitlab::ControlPlane;

/// Deletes disposable projects after a grace delay, in the background.
///
/// Deletion is best-effort: failures are logged at debug level and dropped,
/// nothing is retried, and pending deletions are lost if the runtime shuts down
/// before the delay elapses.
pub struct CleanupQueue<C> {
    control_plane: Arc<C>,
    delay: Duration,
    pending: Mutex<Vec<JoinHandle<()>>>,
}

impl<C: ControlPlane + 'static> CleanupQueue<C> {
    pub fn new(control_plane: Arc<C>, delay: Duration) -> Self {
        Self {
            control_plane,
            delay,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Schedules `project_id` for deletion once the delay has elapsed. Never blocks.
    pub fn schedule(&self, project_id: u64) {
        let control_plane = Arc::clone(&self.control_plane);
        let delay = self.delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match control_plane.delete_project(project_id).await {
                Ok(()) => debug!("Deleted project {project_id}"),
                Err(e) => debug!("Cleanup of project {project_id} failed: {e}"),
            }
        });

        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|handle| !handle.is_finished());
        pending.push(handle);
    }

    /// Number of deletions that have not completed yet.
    pub fn pending(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Waits for every scheduled deletion to run.
    pub async fn drain(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                debug!("Cleanup task did not complete: {e}");
            }
        }
    }
}
