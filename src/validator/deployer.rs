use serde::Serialize;
use std::future::Future;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentStatus {
    pub is_running: bool,
    /// Base URL the instance answers on
    pub url: String,
}

/// Brings up and tears down the disposable GitLab instance used for live runs.
pub trait Deployer: Send + Sync {
    fn status(&self) -> impl Future<Output = Result<DeploymentStatus>> + Send;

    fn deploy(&self) -> impl Future<Output = Result<()>> + Send;

    fn destroy(&self) -> impl Future<Output = Result<()>> + Send;
}

/// An instance someone else already runs. Always reported as running; deploying
/// and destroying are no-ops.
#[derive(Debug, Clone)]
pub struct ExistingInstance {
    url: String,
}

impl ExistingInstance {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Deployer for ExistingInstance {
    async fn status(&self) -> Result<DeploymentStatus> {
        Ok(DeploymentStatus {
            is_running: true,
            url: self.url.clone(),
        })
    }

    async fn deploy(&self) -> Result<()> {
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        Ok(())
    }
}
