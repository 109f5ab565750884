use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Ledger RPC error: {0}")]
    LedgerRPC(String),

    #[error("Certified balance regressed to uncertified for {reference}")]
    CertificationRegressed { reference: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certification_regressed_message_names_reference() {
        let err = AppError::CertificationRegressed {
            reference: "kaspa:mainnet".to_string(),
        };
        assert!(err.to_string().contains("kaspa:mainnet"));
    }
}
