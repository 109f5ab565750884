// src/api/mod.rs

pub mod health;

use std::sync::Arc;

use crate::config::Config;
use crate::integrations::{IcrcIndexClient, KaspaProviderRegistry};

// AppState definition
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub kaspa_providers: Arc<KaspaProviderRegistry>,
    /// Index canister access for ICP/ICRC schedulers, when one is wired in.
    pub icrc_client: Option<Arc<dyn IcrcIndexClient>>,
}
