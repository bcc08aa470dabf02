//! GitLab control plane: the contract the live validation path drives, a REST
//! client for real instances and an in-memory simulation.

pub mod client;
pub mod control_plane;
pub mod links;
pub mod simulation;
pub mod types;
pub mod wait;

pub use client::GitLabApiClient;
pub use control_plane::ControlPlane;
pub use simulation::{SimulatedControlPlane, CI_FILE};
pub use types::{is_terminal_status, Job, Pipeline, Project, TERMINAL_STATUSES};
pub use wait::{wait_for_job, wait_for_pipeline, WaitOptions};
