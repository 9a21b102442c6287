use log::{debug, error, info};
use serde::Serialize;

use crate::auth::{normalize_private_key, CredentialSource, TokenIssuer};
use crate::config::{inputs, InputSource};
use crate::error::{ApiStep, Result, TriggerError};
use crate::output::ActionHost;
use crate::providers::BuildService;
use crate::retry::{retry, RetryPolicy, Sleeper, TokioSleeper};

/// What to build: an Xcode Cloud workflow on a branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerRequest {
    pub workflow_id: String,
    pub branch_name: String,
}

impl TriggerRequest {
    pub fn new(workflow_id: impl Into<String>, branch_name: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            branch_name: branch_name.into(),
        }
    }

    /// Reads the workflow id and branch from named inputs; missing ones are empty.
    pub fn from_inputs(source: &impl InputSource) -> Self {
        Self {
            workflow_id: source.input_or_empty(inputs::WORKFLOW_ID),
            branch_name: source.input_or_empty(inputs::BRANCH_NAME),
        }
    }

    /// Fails with the name of the first blank input.
    pub fn validate(&self) -> Result<()> {
        let required = [
            (inputs::WORKFLOW_ID, &self.workflow_id),
            (inputs::BRANCH_NAME, &self.branch_name),
        ];
        match required.iter().find(|(_, value)| value.trim().is_empty()) {
            Some((name, _)) => Err(TriggerError::InvalidParameters(*name)),
            None => Ok(()),
        }
    }
}

/// Outcome of a successful trigger run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildResult {
    pub build_id: String,
    pub build_number: u64,
    pub git_reference_id: String,
}

/// Runs the validate → authenticate → fetch workflow → resolve reference →
/// create build sequence against a [`BuildService`].
///
/// Only the git reference lookup is retried. Workflow fetch and build
/// creation run exactly once.
pub struct BuildOrchestrator<S, H, Z = TokioSleeper> {
    service: S,
    host: H,
    sleeper: Z,
    issuer: TokenIssuer,
    retry: RetryPolicy,
}

impl<S, H> BuildOrchestrator<S, H, TokioSleeper>
where
    S: BuildService,
    H: ActionHost,
{
    pub fn new(service: S, host: H) -> Self {
        Self {
            service,
            host,
            sleeper: TokioSleeper,
            issuer: TokenIssuer,
            retry: RetryPolicy::default(),
        }
    }
}

impl<S, H, Z> BuildOrchestrator<S, H, Z>
where
    S: BuildService,
    H: ActionHost,
    Z: Sleeper,
{
    pub fn with_sleeper<Z2: Sleeper>(self, sleeper: Z2) -> BuildOrchestrator<S, H, Z2> {
        BuildOrchestrator {
            service: self.service,
            host: self.host,
            sleeper,
            issuer: self.issuer,
            retry: self.retry,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Trigger a build, reporting failures to the host before returning them.
    ///
    /// # Errors
    ///
    /// Any step's error aborts the run. It is signalled through
    /// [`ActionHost::set_failed`] with a `❌` prefix and then returned
    /// unchanged.
    pub async fn trigger(
        &self,
        request: &TriggerRequest,
        credentials: &impl CredentialSource,
    ) -> Result<BuildResult> {
        match self.run(request, credentials).await {
            Ok(result) => Ok(result),
            Err(e) => {
                error!("Trigger failed: {e}");
                self.host.set_failed(&format!("❌ {e}"));
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        request: &TriggerRequest,
        credentials: &impl CredentialSource,
    ) -> Result<BuildResult> {
        request.validate()?;

        let credentials = credentials.credentials();
        self.host.mask_secret(&credentials.private_key_pem);
        let normalized = normalize_private_key(&credentials.private_key_pem);
        if normalized != credentials.private_key_pem.as_str() {
            self.host.mask_secret(&normalized);
        }

        let token = self.issuer.issue(&credentials)?;
        self.host.mask_secret(token.as_str());
        debug!("Issued App Store Connect token expiring at {}", token.expires_at());

        self.host.info("Getting workflow information…");
        let workflow = self
            .service
            .get_workflow(&token, &request.workflow_id)
            .await
            .map_err(|source| TriggerError::RemoteApi {
                step: ApiStep::FetchWorkflow,
                attempts: 1,
                source,
            })?;

        let repository = &workflow.repository;
        self.host.info(&format!(
            "Using repository: {}/{}",
            repository.owner_name, repository.name
        ));

        self.host.info(&format!(
            "Finding git reference for branch '{}'…",
            request.branch_name
        ));
        let reference = retry(
            || {
                self.service
                    .get_git_reference(&token, &repository.id, &request.branch_name)
            },
            self.retry,
            &self.sleeper,
        )
        .await
        .map_err(|source| TriggerError::RemoteApi {
            step: ApiStep::ResolveReference,
            attempts: self.retry.attempts(),
            source,
        })?;
        debug!("Branch '{}' is git reference {reference}", request.branch_name);

        self.host.info("Starting Xcode Cloud build…");
        let build = self
            .service
            .create_build(&token, &request.workflow_id, &reference)
            .await
            .map_err(|source| TriggerError::RemoteApi {
                step: ApiStep::TriggerBuild,
                attempts: 1,
                source,
            })?;

        self.host.info(&format!(
            "✅ Build successfully triggered: #{} on {} ({})",
            build.number, repository.name, request.branch_name
        ));
        info!("Created build run {} (#{})", build.id, build.number);

        let result = BuildResult {
            build_id: build.id,
            build_number: build.number,
            git_reference_id: reference.to_string(),
        };

        let build_number = result.build_number.to_string();
        self.host.set_outputs(&[
            ("build_id", result.build_id.as_str()),
            ("build_number", build_number.as_str()),
            ("git_reference_id", result.git_reference_id.as_str()),
        ])?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::tests::{test_credentials, TEST_PRIVATE_KEY};
    use crate::auth::{Credentials, SignedToken};
    use crate::error::{ApiError, ErrorKind};
    use crate::providers::{
        AppStoreConnectClient, BuildRun, GitReferenceId, Repository, WorkflowInfo,
        DEFAULT_USER_AGENT,
    };
    use crate::retry::tests::RecordingSleeper;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// Scripted Xcode Cloud backend that counts every call.
    #[derive(Default)]
    struct FakeService {
        fail_workflow: bool,
        reference_failures: u32,
        fail_build: bool,
        workflow_calls: AtomicU32,
        reference_calls: AtomicU32,
        build_calls: AtomicU32,
    }

    impl FakeService {
        fn total_calls(&self) -> u32 {
            self.workflow_calls.load(Ordering::SeqCst)
                + self.reference_calls.load(Ordering::SeqCst)
                + self.build_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BuildService for FakeService {
        async fn get_workflow(
            &self,
            token: &SignedToken,
            workflow_id: &str,
        ) -> std::result::Result<WorkflowInfo, ApiError> {
            self.workflow_calls.fetch_add(1, Ordering::SeqCst);
            assert!(!token.as_str().is_empty());
            if self.fail_workflow {
                return Err(ApiError::Status {
                    status: 404,
                    message: "The specified resource does not exist".to_string(),
                });
            }
            Ok(WorkflowInfo {
                id: workflow_id.to_string(),
                name: Some("Release".to_string()),
                repository: Repository {
                    id: "repo-1".to_string(),
                    owner_name: "acme".to_string(),
                    name: "ios-app".to_string(),
                },
            })
        }

        async fn get_git_reference(
            &self,
            _token: &SignedToken,
            repository_id: &str,
            branch_name: &str,
        ) -> std::result::Result<GitReferenceId, ApiError> {
            let call = self.reference_calls.fetch_add(1, Ordering::SeqCst) + 1;
            assert_eq!(repository_id, "repo-1");
            if call <= self.reference_failures {
                return Err(ApiError::GitReferenceNotFound {
                    branch: format!("{branch_name} (attempt {call})"),
                });
            }
            Ok(GitReferenceId::new("ref-789"))
        }

        async fn create_build(
            &self,
            _token: &SignedToken,
            workflow_id: &str,
            reference: &GitReferenceId,
        ) -> std::result::Result<BuildRun, ApiError> {
            self.build_calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(workflow_id, "wf-123");
            assert_eq!(reference.as_str(), "ref-789");
            if self.fail_build {
                return Err(ApiError::Status {
                    status: 409,
                    message: "conflict".to_string(),
                });
            }
            Ok(BuildRun {
                id: "b-1".to_string(),
                number: 42,
            })
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        infos: Mutex<Vec<String>>,
        secrets: Mutex<Vec<String>>,
        outputs: Mutex<Vec<(String, String)>>,
        failures: Mutex<Vec<String>>,
        reject_outputs: bool,
    }

    impl ActionHost for RecordingHost {
        fn info(&self, message: &str) {
            self.infos.lock().unwrap().push(message.to_string());
        }

        fn mask_secret(&self, secret: &str) {
            self.secrets.lock().unwrap().push(secret.to_string());
        }

        fn set_output(&self, name: &str, value: &str) -> io::Result<()> {
            self.outputs
                .lock()
                .unwrap()
                .push((name.to_string(), value.to_string()));
            Ok(())
        }

        fn set_outputs(&self, outputs: &[(&str, &str)]) -> io::Result<()> {
            if self.reject_outputs {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            for (name, value) in outputs {
                self.set_output(name, value)?;
            }
            Ok(())
        }

        fn set_failed(&self, message: &str) {
            self.failures.lock().unwrap().push(message.to_string());
        }
    }

    type TestOrchestrator<'a> = BuildOrchestrator<&'a FakeService, RecordingHost, &'a RecordingSleeper>;

    fn orchestrator<'a>(
        service: &'a FakeService,
        sleeper: &'a RecordingSleeper,
    ) -> TestOrchestrator<'a> {
        BuildOrchestrator::new(service, RecordingHost::default()).with_sleeper(sleeper)
    }

    fn outputs(host: &RecordingHost) -> Vec<(String, String)> {
        host.outputs.lock().unwrap().clone()
    }

    fn expected_outputs() -> Vec<(String, String)> {
        vec![
            ("build_id".to_string(), "b-1".to_string()),
            ("build_number".to_string(), "42".to_string()),
            ("git_reference_id".to_string(), "ref-789".to_string()),
        ]
    }

    fn expected_result() -> BuildResult {
        BuildResult {
            build_id: "b-1".to_string(),
            build_number: 42,
            git_reference_id: "ref-789".to_string(),
        }
    }

    #[tokio::test]
    async fn test_trigger_reports_build() {
        let service = FakeService::default();
        let sleeper = RecordingSleeper::default();
        let orchestrator = orchestrator(&service, &sleeper);

        let result = orchestrator
            .trigger(&TriggerRequest::new("wf-123", "main"), &test_credentials())
            .await;

        assert_eq!(assert_ok!(result), expected_result());
        assert_eq!(outputs(orchestrator.host()), expected_outputs());
        assert_eq!(sleeper.count(), 0);
        assert_eq!(service.reference_calls.load(Ordering::SeqCst), 1);

        let infos = orchestrator.host().infos.lock().unwrap().clone();
        assert!(infos.contains(&"Using repository: acme/ios-app".to_string()));
        assert_eq!(
            infos.last().unwrap(),
            "✅ Build successfully triggered: #42 on ios-app (main)"
        );
        assert!(orchestrator.host().failures.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_key_and_token_are_masked() {
        let service = FakeService::default();
        let sleeper = RecordingSleeper::default();
        let orchestrator = orchestrator(&service, &sleeper);
        let escaped = TEST_PRIVATE_KEY.trim_end().replace('\n', "\\n");
        let credentials = Credentials::new("KEY123", "issuer-abc", escaped.clone());

        assert_ok!(
            orchestrator
                .trigger(&TriggerRequest::new("wf-123", "main"), &credentials)
                .await
        );

        let secrets = orchestrator.host().secrets.lock().unwrap().clone();
        assert_eq!(secrets.len(), 3);
        assert_eq!(secrets[0], escaped);
        assert_eq!(secrets[1], TEST_PRIVATE_KEY.trim_end());
        // The third secret is the JWT: header.claims.signature
        assert_eq!(secrets[2].split('.').count(), 3);
    }

    #[tokio::test]
    async fn test_reference_resolved_after_two_failures() {
        let service = FakeService {
            reference_failures: 2,
            ..Default::default()
        };
        let sleeper = RecordingSleeper::default();
        let orchestrator = orchestrator(&service, &sleeper);

        let result = orchestrator
            .trigger(&TriggerRequest::new("wf-123", "main"), &test_credentials())
            .await;

        assert_eq!(assert_ok!(result), expected_result());
        assert_eq!(outputs(orchestrator.host()), expected_outputs());
        assert_eq!(service.reference_calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![Duration::from_millis(700); 2]
        );
    }

    #[tokio::test]
    async fn test_reference_exhaustion_aborts_before_build() {
        let service = FakeService {
            reference_failures: u32::MAX,
            ..Default::default()
        };
        let sleeper = RecordingSleeper::default();
        let orchestrator = orchestrator(&service, &sleeper);

        let err = assert_err!(
            orchestrator
                .trigger(&TriggerRequest::new("wf-123", "main"), &test_credentials())
                .await
        );

        assert!(err.is_retry_exhausted());
        match &err {
            TriggerError::RemoteApi {
                step,
                attempts,
                source: ApiError::GitReferenceNotFound { branch },
            } => {
                assert_eq!(*step, ApiStep::ResolveReference);
                assert_eq!(*attempts, 3);
                assert_eq!(branch, "main (attempt 3)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(service.reference_calls.load(Ordering::SeqCst), 3);
        assert_eq!(service.build_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sleeper.count(), 2);
        assert!(outputs(orchestrator.host()).is_empty());
        assert_eq!(
            *orchestrator.host().failures.lock().unwrap(),
            vec![format!("❌ {err}")]
        );
    }

    #[tokio::test]
    async fn test_empty_branch_fails_before_any_call() {
        let service = FakeService::default();
        let sleeper = RecordingSleeper::default();
        let orchestrator = orchestrator(&service, &sleeper);

        let err = assert_err!(
            orchestrator
                .trigger(&TriggerRequest::new("wf-123", ""), &test_credentials())
                .await
        );

        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
        assert_eq!(
            err.to_string(),
            "Required parameter 'gitBranchName' is not provided"
        );
        assert_eq!(service.total_calls(), 0);
        assert!(orchestrator.host().secrets.lock().unwrap().is_empty());
        assert_eq!(
            *orchestrator.host().failures.lock().unwrap(),
            vec!["❌ Required parameter 'gitBranchName' is not provided".to_string()]
        );
    }

    #[tokio::test]
    async fn test_workflow_id_is_checked_first() {
        let service = FakeService::default();
        let sleeper = RecordingSleeper::default();
        let orchestrator = orchestrator(&service, &sleeper);

        let err = assert_err!(
            orchestrator
                .trigger(&TriggerRequest::new("  ", ""), &test_credentials())
                .await
        );

        assert!(matches!(
            err,
            TriggerError::InvalidParameters("xcodeCloudWorkflowId")
        ));
        assert_eq!(service.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_credentials_make_no_calls() {
        let service = FakeService::default();
        let sleeper = RecordingSleeper::default();
        let orchestrator = orchestrator(&service, &sleeper);
        let credentials = Credentials::new("KEY123", "", TEST_PRIVATE_KEY);

        let err = assert_err!(
            orchestrator
                .trigger(&TriggerRequest::new("wf-123", "main"), &credentials)
                .await
        );

        assert_eq!(err.kind(), ErrorKind::MissingCredentials);
        assert_eq!(service.total_calls(), 0);
        assert_eq!(orchestrator.host().failures.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_workflow_failure_is_not_retried() {
        let service = FakeService {
            fail_workflow: true,
            ..Default::default()
        };
        let sleeper = RecordingSleeper::default();
        let orchestrator = orchestrator(&service, &sleeper);

        let err = assert_err!(
            orchestrator
                .trigger(&TriggerRequest::new("wf-123", "main"), &test_credentials())
                .await
        );

        assert!(matches!(
            err,
            TriggerError::RemoteApi {
                step: ApiStep::FetchWorkflow,
                attempts: 1,
                ..
            }
        ));
        assert!(!err.is_retry_exhausted());
        assert_eq!(service.workflow_calls.load(Ordering::SeqCst), 1);
        assert_eq!(service.reference_calls.load(Ordering::SeqCst), 0);
        assert_eq!(sleeper.count(), 0);
    }

    #[tokio::test]
    async fn test_build_failure_is_not_retried() {
        let service = FakeService {
            fail_build: true,
            ..Default::default()
        };
        let sleeper = RecordingSleeper::default();
        let orchestrator = orchestrator(&service, &sleeper);

        let err = assert_err!(
            orchestrator
                .trigger(&TriggerRequest::new("wf-123", "main"), &test_credentials())
                .await
        );

        assert!(matches!(
            err,
            TriggerError::RemoteApi {
                step: ApiStep::TriggerBuild,
                attempts: 1,
                ..
            }
        ));
        assert_eq!(service.build_calls.load(Ordering::SeqCst), 1);
        assert!(outputs(orchestrator.host()).is_empty());
    }

    #[tokio::test]
    async fn test_rejected_outputs_write_nothing() {
        let service = FakeService::default();
        let sleeper = RecordingSleeper::default();
        let host = RecordingHost {
            reject_outputs: true,
            ..Default::default()
        };
        let orchestrator = BuildOrchestrator::new(&service, host).with_sleeper(&sleeper);

        let err = assert_err!(
            orchestrator
                .trigger(&TriggerRequest::new("wf-123", "main"), &test_credentials())
                .await
        );

        assert!(matches!(err, TriggerError::Output(_)));
        assert_eq!(service.build_calls.load(Ordering::SeqCst), 1);
        assert!(outputs(orchestrator.host()).is_empty());
        let failures = orchestrator.host().failures.lock().unwrap().clone();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].starts_with("❌ "));
    }

    #[test]
    fn test_request_from_layered_inputs() {
        let overrides: HashMap<String, String> =
            [(inputs::BRANCH_NAME.to_string(), "release".to_string())].into();
        let fallback: HashMap<String, String> = [
            (inputs::BRANCH_NAME.to_string(), "main".to_string()),
            (inputs::WORKFLOW_ID.to_string(), "wf-123".to_string()),
        ]
        .into();

        let request = TriggerRequest::from_inputs(&(&overrides, &fallback));
        assert_eq!(request, TriggerRequest::new("wf-123", "release"));

        let empty = TriggerRequest::from_inputs(&HashMap::<String, String>::new());
        assert_eq!(empty, TriggerRequest::default());
    }

    #[tokio::test]
    async fn test_trigger_against_http_api() {
        let mut server = mockito::Server::new_async().await;

        let workflow = server
            .mock("GET", "/ciWorkflows/wf-123")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"data":{"type":"ciWorkflows","id":"wf-123","relationships":{"repository":{"data":{"type":"scmRepositories","id":"repo-1"}}}},"included":[{"type":"scmRepositories","id":"repo-1","attributes":{"ownerName":"acme","repositoryName":"ios-app"}}]}"#,
            )
            .create_async()
            .await;
        let references = server
            .mock("GET", "/scmRepositories/repo-1/gitReferences")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                r#"{"data":[{"type":"scmGitReferences","id":"ref-789","attributes":{"name":"main","canonicalName":"refs/heads/main","kind":"BRANCH"}}],"links":{"self":"ignored"}}"#,
            )
            .create_async()
            .await;
        let build = server
            .mock("POST", "/ciBuildRuns")
            .with_status(201)
            .with_body(r#"{"data":{"type":"ciBuildRuns","id":"b-1","attributes":{"number":42}}}"#)
            .create_async()
            .await;

        let client = AppStoreConnectClient::new(&server.url(), DEFAULT_USER_AGENT).unwrap();
        let sleeper = RecordingSleeper::default();
        let orchestrator =
            BuildOrchestrator::new(client, RecordingHost::default()).with_sleeper(&sleeper);

        let result = orchestrator
            .trigger(&TriggerRequest::new("wf-123", "main"), &test_credentials())
            .await;

        workflow.assert_async().await;
        references.assert_async().await;
        build.assert_async().await;
        assert_eq!(assert_ok!(result), expected_result());
        assert_eq!(outputs(orchestrator.host()), expected_outputs());
    }
}
