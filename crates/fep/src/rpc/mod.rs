// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request/response RPC between participants.
//!
//! Local method calls are mapped onto asynchronous [`RpcCommand`]s on the
//! command bus and correlated back by request id.
//!
//! # Overview
//!
//! - **Callers** use [`RpcService::send_request`] (or a typed [`RpcClient`])
//!   and block until the response, a cancellation or a timeout
//! - **Servers** register [`RpcObjectServer`]s in the [`ObjectRegistry`]
//! - Every participant serves a built-in `rpc_info` object for introspection
//!
//! # Example
//!
//! ```rust,ignore
//! let service = participant.rpc();
//! service.connect("server", "echo")?;
//! let reply = service.send_request("server", "echo", "ping")?;
//! ```
//!
//! # Correlation
//!
//! Each request carries a [`RequestId`] from a per-service counter. The server
//! echoes it in the response, which is queued in the caller's per-peer
//! [`ResponseQueue`] until the waiting caller claims it. The counter wraps
//! silently; correlation only needs uniqueness within the timeout window.
//!
//! [`RpcCommand`]: crate::command::RpcCommand

mod connections;
mod element_info;
pub mod json;
mod proxy;
mod queue;
mod registry;
mod service;

pub use connections::{PeerConnections, ResponseQueueRef};
pub use element_info::{ElementInfo, ElementInfoCalls, ElementInfoInterface};
pub use proxy::{ObjectClient, ObjectClientFactory, RpcClient, RpcInterface};
pub use queue::{PendingResponse, ResponseCode, ResponseQueue};
pub use registry::{
    ObjectName, ObjectRegistry, RpcObjectServer, WeakRegistry, JSON_RPC_CONTENT_TYPE,
};
pub use service::{RpcService, ServiceState};

/// Correlation id of a request (wraps at `u32::MAX`).
pub type RequestId = u32;
