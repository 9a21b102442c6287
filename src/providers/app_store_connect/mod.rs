mod client;
mod provider;
mod types;


pub use client::{AppStoreConnectClient, BASE_URL, DEFAULT_PAGE_LIMIT, DEFAULT_USER_AGENT};
pub use provider::BuildService;
pub use types::{BuildRun, GitReferenceId, Repository, WorkflowInfo};
