//! Bitbucket Server client for prbridge
//!
//! Implements [`prbridge_core::PullRequestSource`] over the REST API
//! (`/rest/api/1.0`) with bearer-token auth.

pub mod client;
pub mod models;

pub use client::{BitbucketClient, BitbucketConfig};
