use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use mediledger::anchor::ethereum::EthereumLedger;
use mediledger::config::{LedgerConfig, ServerConfig};
use mediledger::crypto::hash::{generate_hash, HashableFields};
use mediledger::error::{MediError, Result};
use mediledger::ocr::OcrClient;
use mediledger::server::{self, auth, AppState};
use mediledger::state::{Database, DocumentStore, MemoryDocumentStore, PgDocumentStore};

#[derive(Parser)]
#[command(name = "mediledger")]
#[command(about = "Medical document records with tamper-evident ledger anchoring")]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    Serve {
        #[command(flatten)]
        server: ServerConfig,
        #[command(flatten)]
        ledger: LedgerConfig,
    },
    /// Print the fingerprint of a document given as a JSON file
    Hash {
        /// JSON object with title, documentType, ocrText, date, doctorName, hospitalName
        path: PathBuf,
    },
    /// Check the ledger node, contract and signing identity
    CheckLedger {
        #[command(flatten)]
        ledger: LedgerConfig,
    },
    /// Issue a bearer token for local development
    MintToken {
        user_id: Uuid,
        #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
        secret: String,
    },
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(database_url: Option<&str>) -> Result<Arc<dyn DocumentStore>> {
    match database_url {
        Some(url) => {
            let db = Database::connect(url).await?;
            db.migrate().await?;
            tracing::info!("Connected to PostgreSQL");
            Ok(Arc::new(PgDocumentStore::new(&db)))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; documents are kept in memory only");
            Ok(Arc::new(MemoryDocumentStore::new()))
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Serve { server, ledger } => {
            let store = open_store(server.database_url.as_deref()).await?;
            let ledger = Arc::new(EthereumLedger::new(ledger));
            let ocr = OcrClient::new(&server.ocr_service_url);
            let state = AppState::new(store, ledger, ocr, server.jwt_secret.clone());

            server::serve(state, &server.bind_addr, server.cors_origin.as_deref()).await
        }
        Commands::Hash { path } => {
            let raw = std::fs::read(&path)?;
            let value: serde_json::Value = serde_json::from_slice(&raw)
                .map_err(|e| MediError::Serialization(format!("{}: {e}", path.display())))?;
            let fields = HashableFields::from_json(&value)?;
            println!("{}", generate_hash(&fields));
            Ok(())
        }
        Commands::CheckLedger { ledger } => {
            let status = EthereumLedger::new(ledger).status().await?;
            println!("chain id:    {}", status.chain_id);
            println!("registrant:  {}", status.registrant);
            println!("contract:    {}", if status.contract_has_code { "deployed" } else { "NO CODE" });
            if !status.contract_has_code {
                return Err(MediError::NotConfigured(
                    "no contract code at the configured address".into(),
                ));
            }
            Ok(())
        }
        Commands::MintToken { user_id, secret } => {
            println!("{}", auth::issue_token(user_id, &secret)?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mediledger: {e}");
            ExitCode::FAILURE
        }
    }
}
