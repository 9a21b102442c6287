//! Triggers Xcode Cloud builds through the App Store Connect API.
//!
//! A run mints an ES256 token, looks up the workflow, resolves the branch
//! to a git reference (retrying while it is not yet indexed) and starts a
//! build run. See [`trigger::BuildOrchestrator`].

pub mod auth;
pub mod config;
pub mod error;
pub mod output;
pub mod providers;
pub mod retry;
pub mod trigger;
