use async_trait::async_trait;

use crate::auth::SignedToken;
use crate::error::ApiError;

use super::client::AppStoreConnectClient;
use super::types::{BuildRun, GitReferenceId, WorkflowInfo};

/// Remote operations a trigger run needs from Xcode Cloud.
///
/// Every call authenticates with the bearer `token` minted for the run.
#[async_trait]
pub trait BuildService: Send + Sync {
    /// Fetch a workflow and the repository it builds.
    async fn get_workflow(
        &self,
        token: &SignedToken,
        workflow_id: &str,
    ) -> Result<WorkflowInfo, ApiError>;

    /// Resolve `branch_name` to the git reference id App Store Connect
    /// tracks for `repository_id`.
    async fn get_git_reference(
        &self,
        token: &SignedToken,
        repository_id: &str,
        branch_name: &str,
    ) -> Result<GitReferenceId, ApiError>;

    /// Start a build of `workflow_id` on `reference`.
    async fn create_build(
        &self,
        token: &SignedToken,
        workflow_id: &str,
        reference: &GitReferenceId,
    ) -> Result<BuildRun, ApiError>;
}

#[async_trait]
impl<T: BuildService + ?Sized> BuildService for &T {
    async fn get_workflow(
        &self,
        token: &SignedToken,
        workflow_id: &str,
    ) -> Result<WorkflowInfo, ApiError> {
        (**self).get_workflow(token, workflow_id).await
    }

    async fn get_git_reference(
        &self,
        token: &SignedToken,
        repository_id: &str,
        branch_name: &str,
    ) -> Result<GitReferenceId, ApiError> {
        (**self)
            .get_git_reference(token, repository_id, branch_name)
            .await
    }

    async fn create_build(
        &self,
        token: &SignedToken,
        workflow_id: &str,
        reference: &GitReferenceId,
    ) -> Result<BuildRun, ApiError> {
        (**self).create_build(token, workflow_id, reference).await
    }
}

#[async_trait]
impl BuildService for AppStoreConnectClient {
    async fn get_workflow(
        &self,
        token: &SignedToken,
        workflow_id: &str,
    ) -> Result<WorkflowInfo, ApiError> {
        self.fetch_workflow(token, workflow_id).await
    }

    async fn get_git_reference(
        &self,
        token: &SignedToken,
        repository_id: &str,
        branch_name: &str,
    ) -> Result<GitReferenceId, ApiError> {
        self.find_git_reference(token, repository_id, branch_name)
            .await
    }

    async fn create_build(
        &self,
        token: &SignedToken,
        workflow_id: &str,
        reference: &GitReferenceId,
    ) -> Result<BuildRun, ApiError> {
        self.start_build(token, workflow_id, reference).await
    }
}
