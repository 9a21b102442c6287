mod app_store_connect;

pub use app_store_connect::{
    AppStoreConnectClient, BuildRun, BuildService, GitReferenceId, Repository, WorkflowInfo,
    BASE_URL, DEFAULT_PAGE_LIMIT, DEFAULT_USER_AGENT,
};
