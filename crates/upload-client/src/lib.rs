//! Client half of stowage resumable uploads.
//!
//! [`UploadCoordinator`] splits a source into the server's fixed-size
//! chunks, drives them through a bounded worker pool with per-chunk retry,
//! and supports pause, resume and cancel. It talks to the server through the
//! [`SessionApi`] trait; [`WsSessionApi`] is the WebSocket implementation.

mod api;
mod coordinator;
mod error;
mod pool;
mod pumps;
mod source;
mod types;
mod ws_client;

pub use api::{ApiFuture, SessionApi};
pub use coordinator::UploadCoordinator;
pub use error::ClientError;
pub use pool::{PoolOutcome, run_pool};
pub use source::UploadSource;
pub use types::{
    CoordinatorOptions, MIN_CHUNK_TIMEOUT, MIN_THROUGHPUT, TaskSnapshot, TaskStatus, UploadEvent,
};
pub use ws_client::WsSessionApi;
