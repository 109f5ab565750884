/// Application constants

// API version
pub const API_VERSION: &str = "v1";

// WebSocket configuration
pub const WS_HEARTBEAT_INTERVAL_SECS: u64 = 30;
pub const WS_CLIENT_TIMEOUT_SECS: u64 = 60;

// Background sync intervals
pub const WALLET_TIMER_INTERVAL_MILLIS: u64 = 30_000;
pub const KASPA_WALLET_TIMER_INTERVAL_MILLIS: u64 = 30_000;

// Kaspa REST backend
pub const KASPA_MAINNET_API_URL: &str = "https://api.kaspa.org";
pub const KASPA_TESTNET_API_URL: &str = "https://api-tn10.kaspa.org";
pub const KASPA_MAINNET_EXPLORER_URL: &str = "https://explorer.kaspa.org/txs";
pub const KASPA_TESTNET_EXPLORER_URL: &str = "https://explorer-tn10.kaspa.org/txs";
pub const KASPA_TRANSACTIONS_PAGE_SIZE: u32 = 50;

// Kaspa retry policy
pub const KASPA_RETRY_ATTEMPTS: u32 = 10;
pub const KASPA_RETRY_BASE_DELAY_MILLIS: u64 = 1_000;

// HTTP client
pub const HTTP_TIMEOUT_SECS: u64 = 30;

// Bigint-aware JSON encoding understood by the host
pub const JSON_BIGINT_TAG: &str = "__bigint__";
