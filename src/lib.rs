pub mod anchor;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ocr;
pub mod orchestrator;
pub mod server;
pub mod state;
