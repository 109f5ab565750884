// src/models/mod.rs
pub mod messages;
pub mod wallet;

// Re-export so other modules can use `crate::models::X`
pub use messages::{
    HostRequest, SyncChannel, SyncState, TimerCommand, WalletPayload, WorkerBody, WorkerMessage,
};
pub use wallet::{Amount, CertifiedData, Identity};
