//! Background tasks that drive one client WebSocket connection.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;

use std::collections::HashMap;
use std::sync::Arc;

use stowage_protocol::Message;
use tokio::sync::{Mutex, oneshot};

/// Requests awaiting a response, keyed by message id.
pub(crate) type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;
