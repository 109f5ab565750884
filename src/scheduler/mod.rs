pub mod balance_and_transactions;
pub mod kaspa;
pub mod query_update;
pub mod retry;
pub mod store;
pub mod timer;

pub use balance_and_transactions::{BalanceAndTransactionsScheduler, ChainConfig};
pub use kaspa::KaspaWalletScheduler;
pub use retry::RetryPolicy;
pub use timer::{Poster, SyncInterval, TimerParams};
