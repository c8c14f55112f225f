/// Runtime configuration.
///
/// Every option can be given as a flag or through the environment (a `.env`
/// file is loaded first). Configuration is parsed once in `main` and passed
/// down explicitly; nothing below this module reads the environment.
use std::time::Duration;

use clap::Args;

/// Connection settings for the anchoring contract.
///
/// All three of endpoint, signing identity and contract address are needed
/// before the ledger client will touch the network.
#[derive(Debug, Clone, Args)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint of the ledger node.
    #[arg(long = "ledger-endpoint", env = "BLOCKCHAIN_RPC_URL")]
    pub endpoint: Option<String>,

    /// Hex private key of the process-wide registrant identity.
    #[arg(long, env = "PRIVATE_KEY", hide_env_values = true)]
    pub signing_identity: Option<String>,

    /// Address of the deployed MedicalRecords contract.
    #[arg(long, env = "CONTRACT_ADDRESS")]
    pub contract_address: Option<String>,

    /// Chain ID for transaction signing. Queried from the node when absent.
    #[arg(long, env = "CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Ceiling on waiting for a registration to be finalized.
    #[arg(long, env = "LEDGER_REGISTER_TIMEOUT_SECS", default_value_t = 60)]
    pub register_timeout_secs: u64,

    /// Ceiling on a read-only verification call.
    #[arg(long, env = "LEDGER_VERIFY_TIMEOUT_SECS", default_value_t = 10)]
    pub verify_timeout_secs: u64,

    /// Interval between receipt polls while waiting for finalization.
    #[arg(long, env = "LEDGER_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            signing_identity: None,
            contract_address: None,
            chain_id: None,
            register_timeout_secs: 60,
            verify_timeout_secs: 10,
            poll_interval_ms: 1000,
        }
    }
}

impl LedgerConfig {
    pub fn register_timeout(&self) -> Duration {
        Duration::from_secs(self.register_timeout_secs)
    }

    pub fn verify_timeout(&self) -> Duration {
        Duration::from_secs(self.verify_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:5000")]
    pub bind_addr: String,

    /// PostgreSQL URL. Without one, documents live in memory only.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// HS256 secret used to verify bearer tokens.
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Base URL of the OCR extraction service.
    #[arg(long, env = "OCR_SERVICE_URL", default_value = "http://localhost:8000")]
    pub ocr_service_url: String,

    /// Allowed CORS origin. Any origin when absent.
    #[arg(long, env = "CORS_ORIGIN")]
    pub cors_origin: Option<String>,
}
