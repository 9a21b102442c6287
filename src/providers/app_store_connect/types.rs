use std::fmt;

use serde::{Deserialize, Serialize};

/// Xcode Cloud workflow with the repository it builds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowInfo {
    pub id: String,
    pub name: Option<String>,
    pub repository: Repository,
}

/// SCM repository connected to Xcode Cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: String,
    pub owner_name: String,
    pub name: String,
}

/// App Store Connect identifier of a (repository, branch) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GitReferenceId(String);

impl GitReferenceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GitReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A freshly created Xcode Cloud build run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRun {
    pub id: String,
    pub number: u64,
}

// JSON:API wire format

#[derive(Debug, Deserialize)]
pub(super) struct Document<T> {
    pub data: T,
    #[serde(default)]
    pub included: Vec<Resource<serde_json::Value>>,
    #[serde(default)]
    pub links: Option<Links>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Links {
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Resource<A, R = serde_json::Value> {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
    pub attributes: Option<A>,
    pub relationships: Option<R>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub(super) struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WorkflowAttributes {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WorkflowRelationships {
    pub repository: Relationship,
}

#[derive(Debug, Deserialize)]
pub(super) struct Relationship {
    pub data: Option<ResourceIdentifier>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RepositoryAttributes {
    pub owner_name: Option<String>,
    pub repository_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GitReferenceAttributes {
    pub name: Option<String>,
    pub canonical_name: Option<String>,
    pub kind: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl GitReferenceAttributes {
    /// Whether this live reference is the branch named `branch`.
    pub fn is_branch(&self, branch: &str) -> bool {
        if self.is_deleted {
            return false;
        }
        let canonical = format!("refs/heads/{branch}");
        if self.canonical_name.as_deref() == Some(canonical.as_str()) {
            return true;
        }
        self.name.as_deref() == Some(branch) && self.kind.as_deref() == Some("BRANCH")
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct BuildRunAttributes {
    pub number: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorDocument {
    #[serde(default)]
    pub errors: Vec<ApiErrorObject>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ApiErrorObject {
    pub code: Option<String>,
    pub title: Option<String>,
    pub detail: Option<String>,
}

impl ErrorDocument {
    /// Joins the `title: detail` pairs of every error object.
    pub fn message(&self) -> Option<String> {
        let parts: Vec<String> = self
            .errors
            .iter()
            .filter_map(|e| match (&e.title, &e.detail) {
                (Some(title), Some(detail)) => Some(format!("{title}: {detail}")),
                (Some(title), None) => Some(title.clone()),
                (None, Some(detail)) => Some(detail.clone()),
                (None, None) => e.code.clone(),
            })
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join("; "))
        }
    }
}
