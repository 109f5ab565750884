pub mod icrc;
pub mod kaspa;

pub use icrc::{IcWalletParams, IcrcIndexClient, IcrcLedger};
pub use kaspa::{KaspaProviderRegistry, KaspaWalletParams};
