//! waifu-core - Queueing and provider-dispatch core for waifu-queue
//!
//! This crate provides:
//! - Environment-sourced configuration ([`Config`])
//! - Provider clients for OpenRouter and Google Gemini behind the
//!   [`TextProvider`] trait
//! - A [`ProviderRouter`] that dispatches to the active provider and
//!   falls back to the other one exactly once
//! - A Redis-backed job queue ([`RedisJobQueue`]) plus an in-memory
//!   implementation, both behind the [`JobStore`] trait
//! - The [`JobExecutor`] worker loop that drains the queue

pub mod config;
pub mod providers;
pub mod queue;
pub mod worker;

pub use config::Config;
pub use providers::router::{DispatchError, ProviderRouter};
pub use providers::types::{ProviderError, ProviderKind, TextProvider};
pub use queue::{
    Job, JobState, JobStatus, JobStore, MemoryJobQueue, QueueError, RedisJobQueue,
};
pub use worker::JobExecutor;
