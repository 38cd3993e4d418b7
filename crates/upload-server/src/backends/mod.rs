//! Reference collaborator backends so the server runs standalone.

mod blob;
mod metadata;
mod notify;
mod quota;

pub use blob::FsBlobStore;
pub use metadata::MemoryMetadataStore;
pub use notify::BroadcastNotifier;
pub use quota::MemoryQuotaLedger;
