//! Handler trait for processing WebSocket messages.
//!
//! Implementors provide the upload operations while the server framework
//! handles connection management, routing and the binary protocol.

use std::future::Future;
use std::pin::Pin;

use stowage_protocol::constants::{ERR_NOT_IMPLEMENTED, MessageType};
use stowage_protocol::{ChunkHeader, Message};

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling client requests.
///
/// Each method receives a `sender` to reply through and the parsed request.
/// Default implementations reply "not implemented" so handlers only need
/// to override the message types they serve.
pub trait Handler: Send + Sync + 'static {
    /// Called for `ping` messages.
    fn on_ping(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            if let Ok(reply) = msg.reply(MessageType::Pong, Option::<&()>::None) {
                let _ = sender.send_msg(reply);
            }
        })
    }

    /// Called for `get_chunk_size`.
    fn on_get_chunk_size(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `init_upload`.
    fn on_init_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `upload_chunk` sent as JSON with base64 data.
    fn on_upload_chunk(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for binary chunk frames.
    fn on_binary_chunk(&self, sender: Sender, header: ChunkHeader, data: Vec<u8>) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_msg(Message::error(
                header.id,
                ERR_NOT_IMPLEMENTED,
                "not_implemented",
                "binary chunks not implemented",
            ));
            drop(data);
        })
    }

    /// Called for `get_upload_status`.
    fn on_get_upload_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `finalize_upload`.
    fn on_finalize_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called for `cancel_upload`.
    fn on_cancel_upload(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        not_implemented(sender, msg)
    }

    /// Called when a client connection closes.
    fn on_disconnected(&self, _peer: &str) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}

fn not_implemented<'a>(sender: Sender, msg: Message) -> HandlerFuture<'a> {
    Box::pin(async move {
        let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not_implemented", "not implemented");
    })
}
