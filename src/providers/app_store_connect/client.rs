use std::collections::HashSet;

use log::{debug, warn};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::json;
use url::Url;

use crate::auth::SignedToken;
use crate::error::ApiError;

use super::types::{
    BuildRun, BuildRunAttributes, Document, ErrorDocument, GitReferenceAttributes,
    GitReferenceId, Repository, RepositoryAttributes, Resource, WorkflowAttributes,
    WorkflowInfo, WorkflowRelationships,
};

/// Production App Store Connect API root.
pub const BASE_URL: &str = "https://api.appstoreconnect.apple.com/v1";

pub const DEFAULT_USER_AGENT: &str = concat!("xcloud-trigger/", env!("CARGO_PKG_VERSION"));

/// Largest page size the git references endpoint accepts.
pub const DEFAULT_PAGE_LIMIT: usize = 200;

/// Upper bound on git reference pages followed in one lookup.
const MAX_REFERENCE_PAGES: usize = 50;

type Result<T> = std::result::Result<T, ApiError>;

/// HTTP client for the Xcode Cloud parts of the App Store Connect API.
#[derive(Clone)]
pub struct AppStoreConnectClient {
    client: Client,
    base_url: Url,
    page_limit: usize,
}

impl AppStoreConnectClient {
    /// Create a new client rooted at `base_url` (e.g. [`BASE_URL`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the base URL
    /// does not parse.
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| ApiError::Client(format!("Failed to create HTTP client: {e}")))?;

        // Trailing slash marks the base path as a directory; `endpoint` pops it.
        let base_url = if base_url.ends_with('/') {
            Url::parse(base_url)?
        } else {
            Url::parse(&format!("{base_url}/"))?
        };

        Ok(Self {
            client,
            base_url,
            page_limit: DEFAULT_PAGE_LIMIT,
        })
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends `segments` to the base URL, percent-encoding each one.
    pub(super) fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        if let Some(bad) = segments.iter().find(|s| matches!(**s, "" | "." | "..")) {
            return Err(ApiError::Client(format!("Invalid path segment '{bad}'")));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Client(format!("Base URL cannot be a base: {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(super) async fn fetch_workflow(
        &self,
        token: &SignedToken,
        workflow_id: &str,
    ) -> Result<WorkflowInfo> {
        let mut url = self.endpoint(&["ciWorkflows", workflow_id])?;
        url.query_pairs_mut().append_pair("include", "repository");

        let document: Document<Resource<WorkflowAttributes, WorkflowRelationships>> =
            self.get_json(token, url).await?;

        let workflow = document.data;
        let repository_id = workflow
            .relationships
            .and_then(|r| r.repository.data)
            .map(|r| r.id)
            .ok_or_else(|| {
                ApiError::UnexpectedResponse(format!(
                    "workflow '{workflow_id}' has no repository relationship"
                ))
            })?;

        let attributes = document
            .included
            .into_iter()
            .find(|r| r.kind == "scmRepositories" && r.id == repository_id)
            .and_then(|r| r.attributes)
            .map(serde_json::from_value::<RepositoryAttributes>)
            .transpose()?;

        if attributes.is_none() {
            warn!("Repository {repository_id} was not included in the workflow response");
        }
        let (owner_name, name) = attributes
            .map(|a| (a.owner_name, a.repository_name))
            .unwrap_or_default();

        Ok(WorkflowInfo {
            id: workflow.id,
            name: workflow.attributes.and_then(|a| a.name),
            repository: Repository {
                id: repository_id,
                owner_name: owner_name.unwrap_or_default(),
                name: name.unwrap_or_default(),
            },
        })
    }

    pub(super) async fn find_git_reference(
        &self,
        token: &SignedToken,
        repository_id: &str,
        branch_name: &str,
    ) -> Result<GitReferenceId> {
        let mut url = self.endpoint(&["scmRepositories", repository_id, "gitReferences"])?;
        url.query_pairs_mut()
            .append_pair("limit", &self.page_limit.to_string());

        let mut visited = HashSet::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            if visited.len() >= MAX_REFERENCE_PAGES {
                return Err(ApiError::UnexpectedResponse(format!(
                    "git references span more than {MAX_REFERENCE_PAGES} pages"
                )));
            }
            visited.insert(url.clone());

            let page: Document<Vec<Resource<GitReferenceAttributes>>> =
                self.get_json(token, url).await?;

            let found = page.data.into_iter().find(|r| {
                r.attributes
                    .as_ref()
                    .is_some_and(|a| a.is_branch(branch_name))
            });
            if let Some(reference) = found {
                return Ok(GitReferenceId::new(reference.id));
            }

            next = page
                .links
                .and_then(|l| l.next)
                .map(|n| self.next_page(&n, &visited))
                .transpose()?;
        }

        Err(ApiError::GitReferenceNotFound {
            branch: branch_name.to_string(),
        })
    }

    /// Validates a `links.next` URL: same origin as the API, not seen before.
    fn next_page(&self, next: &str, visited: &HashSet<Url>) -> Result<Url> {
        let url = Url::parse(next)?;
        if url.origin() != self.base_url.origin() {
            return Err(ApiError::UnexpectedResponse(format!(
                "next page {url} is outside {}",
                self.base_url
            )));
        }
        if visited.contains(&url) {
            return Err(ApiError::UnexpectedResponse(format!(
                "next page {url} was already fetched"
            )));
        }
        Ok(url)
    }

    pub(super) async fn start_build(
        &self,
        token: &SignedToken,
        workflow_id: &str,
        reference: &GitReferenceId,
    ) -> Result<BuildRun> {
        let url = self.endpoint(&["ciBuildRuns"])?;
        let body = json!({
            "data": {
                "type": "ciBuildRuns",
                "relationships": {
                    "workflow": {
                        "data": { "type": "ciWorkflows", "id": workflow_id }
                    },
                    "sourceBranchOrTag": {
                        "data": { "type": "scmGitReferences", "id": reference.as_str() }
                    }
                }
            }
        });

        debug!("POST {url}");
        let response = self
            .client
            .post(url)
            .bearer_auth(token.as_str())
            .json(&body)
            .send()
            .await?;

        let document: Document<Resource<BuildRunAttributes>> = Self::parse(response).await?;
        let run = document.data;
        let number = run.attributes.and_then(|a| a.number).ok_or_else(|| {
            ApiError::UnexpectedResponse(format!("build run {} has no number", run.id))
        })?;

        Ok(BuildRun { id: run.id, number })
    }

    async fn get_json<T: DeserializeOwned>(&self, token: &SignedToken, url: Url) -> Result<T> {
        debug!("GET {url}");
        let response = self
            .client
            .get(url)
            .bearer_auth(token.as_str())
            .send()
            .await?;

        Self::parse(response).await
    }

    /// Decode a success body, or turn a JSON:API error body into [`ApiError::Status`].
    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorDocument>(&body)
                .ok()
                .and_then(|doc| doc.message())
                .unwrap_or_else(|| {
                    if body.trim().is_empty() {
                        status.canonical_reason().unwrap_or("Unknown error").to_string()
                    } else {
                        body
                    }
                });
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}
