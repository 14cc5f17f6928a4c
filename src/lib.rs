//! Coordination layer between a world tick loop and a chain sequencer.

pub mod batching;
pub mod config;
pub mod lifecycle;
pub mod nonce;
pub mod observability;
pub mod submission;

pub use batching::MessageBatcher;
pub use config::WorldsyncConfig;
pub use lifecycle::{Actor, ShutdownCoordinator, Stage, StageRegister};
pub use nonce::{NonceError, NonceGuard};
pub use submission::Submitter;
