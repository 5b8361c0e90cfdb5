//! MCP (Model Context Protocol) front end for waifu-queue
//!
//! Exposes the job queue over STDIO JSON-RPC 2.0: a `generate_text` tool
//! that enqueues a prompt, a `job_status` tool for polling, and a
//! `job://<id>` resource mirroring the status payload.

pub mod gateway;
pub mod protocol;
pub mod server;

pub use gateway::{GatewayError, RequestGateway};
pub use server::McpServer;
