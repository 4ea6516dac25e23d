//! Threat Map Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction that lets the threat map
//! core run both against a live alarm backend (tokio + HTTP) and inside the
//! deterministic replay harness.
//!
//! # Core Concept: The Reactor Pattern
//!
//! Every source of non-determinism is intercepted:
//! - Time (`now()`, `sleep()`)
//! - Feed transport (`fetch()`, `next_push()`, `locate()`)
//! - Icon downloads (`fetch_icon()`)
//!
//! # Example
//!
//! ```ignore
//! use threatmap_env::{MapContext, FeedSource};
//!
//! async fn poll_loop<Ctx: MapContext, Src: FeedSource>(ctx: &Ctx, src: &Src) {
//!     loop {
//!         tokio::select! {
//!             push = src.next_push() => refetch(),
//!             _ = ctx.sleep(Duration::from_secs(10)) => refetch(),
//!         }
//!     }
//! }
//! ```

mod context;
mod network;
mod types;
mod error;
mod tokio_impl;
mod http_impl;

pub use context::MapContext;
pub use network::{FeedSource, IconFetcher};
pub use types::{FeedQuery, IconBytes, LocateResponse, LocateStatus, PushKind, PushSignal, RawPayload};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
pub use http_impl::{HttpFeedSource, SseDecoder};
