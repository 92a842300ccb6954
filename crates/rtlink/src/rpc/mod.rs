// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Remote procedure calls between nodes.
//!
//! A [`Service`] owns a fixed arena of request slots. A requester acquires a
//! slot, submits a payload and later retrieves the response; the serving
//! node dispatches queued requests in class priority order (hard first, then
//! firm/soft, then best-effort) and responds. The same slot buffer carries
//! the request in and the response out.

pub mod request;
pub mod service;

pub use request::{Reply, RequestHandle, RetrievePolicy};
pub use service::{Dispatched, QueueLengths, Service, ServiceId, ServiceProfile};
