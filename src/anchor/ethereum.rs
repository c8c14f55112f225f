/// EVM smart-contract ledger client.
///
/// Talks to a `MedicalRecords` contract over raw JSON-RPC:
/// - `registerDocument(bytes32)`: state-changing, signed by this process
/// - `verifyDocument(bytes32) -> (bool, address, uint256)`: read-only
/// - `getUserDocuments(address) -> bytes32[]`: read-only
///
/// Hash encoding on the wire: the 32 raw SHA-256 bytes are the `bytes32`
/// argument, unchanged. Hex strings are converted here and nowhere else.
use alloy::primitives::{Address, FixedBytes, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Ledger, LedgerReceipt, LedgerRecord};
use crate::config::LedgerConfig;
use crate::crypto::hash::DocumentHash;
use crate::error::{MediError, Result};

sol! {
    interface IMedicalRecords {
        function registerDocument(bytes32 _documentHash) external;
        function verifyDocument(bytes32 _documentHash) external view returns (bool, address, uint256);
        function getUserDocuments(address _owner) external view returns (bytes32[]);
        event DocumentRegistered(bytes32 indexed documentHash, address indexed owner, uint256 timestamp);
    }
}

/// Selector of the standard `Error(string)` revert payload.
const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// Validated connection settings.
struct Connection {
    rpc_url: String,
    signer: PrivateKeySigner,
    contract: Address,
}

/// Chain facts reported by `EthereumLedger::status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStatus {
    pub chain_id: u64,
    /// False when the address holds no code (wrong address or an EOA).
    pub contract_has_code: bool,
    pub registrant: String,
}

/// Ledger client for an EVM `MedicalRecords` contract.
///
/// Construction never fails: missing or malformed settings are remembered
/// and reported as `NotConfigured` by every call, before any network I/O.
pub struct EthereumLedger {
    config: LedgerConfig,
    connection: std::result::Result<Connection, String>,
    client: Client,
    /// Serializes nonce acquisition through broadcast for the shared key.
    submit_lock: Mutex<()>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    #[serde(default)]
    code: i64,
    message: String,
    data: Option<serde_json::Value>,
}

impl JsonRpcError {
    fn is_revert(&self) -> bool {
        self.code == 3 || self.message.to_ascii_lowercase().contains("revert")
    }

    /// Contract-supplied revert reason, falling back to the node's message.
    fn revert_reason(&self) -> String {
        if let Some(reason) = self
            .data
            .as_ref()
            .and_then(|d| d.as_str())
            .and_then(decode_revert_reason)
        {
            return reason;
        }
        let msg = self
            .message
            .strip_prefix("execution reverted:")
            .unwrap_or(&self.message)
            .trim();
        if msg.is_empty() {
            "execution reverted".to_string()
        } else {
            msg.to_string()
        }
    }
}

/// Why a JSON-RPC request produced no result.
enum RpcFailure {
    /// The request may or may not have reached the node.
    Transport(String),
    /// The node answered with an error object.
    Node(JsonRpcError),
}

impl RpcFailure {
    fn into_error(self, method: &str) -> MediError {
        match self {
            RpcFailure::Transport(msg) => MediError::Connectivity(format!("{method}: {msg}")),
            RpcFailure::Node(err) if err.is_revert() => MediError::Rejected(err.revert_reason()),
            RpcFailure::Node(err) => MediError::Connectivity(format!(
                "{method}: RPC error {}: {}",
                err.code, err.message
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: String,
    block_number: Option<String>,
    status: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    #[serde(default)]
    topics: Vec<String>,
    data: String,
}

/// Decode an ABI `Error(string)` revert payload.
fn decode_revert_reason(data: &str) -> Option<String> {
    let bytes = hex::decode(data.trim_start_matches("0x")).ok()?;
    if bytes.len() < 68 || bytes[..4] != ERROR_STRING_SELECTOR {
        return None;
    }
    let len = u64::try_from(U256::from_be_slice(&bytes[36..68])).ok()? as usize;
    let end = 68usize.checked_add(len)?;
    let reason = bytes.get(68..end)?;
    String::from_utf8(reason.to_vec()).ok()
}

fn parse_quantity(method: &str, value: &str) -> Result<u128> {
    u128::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| MediError::Connectivity(format!("{method}: invalid quantity `{value}`: {e}")))
}

fn parse_u64(method: &str, value: &str) -> Result<u64> {
    u64::try_from(parse_quantity(method, value)?)
        .map_err(|_| MediError::Connectivity(format!("{method}: quantity `{value}` exceeds 64 bits")))
}

fn to_bytes32(hash: &DocumentHash) -> FixedBytes<32> {
    FixedBytes::from(*hash.as_bytes())
}

fn to_hex_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

fn connect(config: &LedgerConfig) -> std::result::Result<Connection, String> {
    let present = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);

    let endpoint = present(&config.endpoint);
    let identity = present(&config.signing_identity);
    let address = present(&config.contract_address);

    let missing: Vec<&str> = [
        ("endpoint", endpoint.is_none()),
        ("signing identity", identity.is_none()),
        ("contract address", address.is_none()),
    ]
    .into_iter()
    .filter_map(|(name, absent)| absent.then_some(name))
    .collect();

    let (Some(rpc_url), Some(identity), Some(address)) = (endpoint, identity, address) else {
        return Err(format!("missing {}", missing.join(", ")));
    };

    let signer: PrivateKeySigner = identity
        .trim_start_matches("0x")
        .parse()
        .map_err(|e| format!("invalid signing identity: {e}"))?;
    let contract: Address = address
        .parse()
        .map_err(|e| format!("invalid contract address `{address}`: {e}"))?;

    Ok(Connection {
        rpc_url,
        signer,
        contract,
    })
}

impl EthereumLedger {
    pub fn new(config: LedgerConfig) -> Self {
        let connection = connect(&config);
        if let Err(reason) = &connection {
            warn!(reason = %reason, "Ledger client not configured; anchoring calls will fail");
        }

        let client = Client::builder()
            .timeout(config.register_timeout().max(config.verify_timeout()))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            config,
            connection,
            client,
            submit_lock: Mutex::new(()),
        }
    }

    fn connection(&self) -> Result<&Connection> {
        self.connection
            .as_ref()
            .map_err(|reason| MediError::NotConfigured(reason.clone()))
    }

    /// Send a JSON-RPC request. `Ok(None)` means the node returned `null`.
    async fn rpc_request<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<Option<T>, RpcFailure> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        debug!(method, "Ledger RPC call");

        let resp = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcFailure::Transport(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(RpcFailure::Transport(format!("HTTP {}", resp.status())));
        }

        let resp: JsonRpcResponse<T> = resp
            .json()
            .await
            .map_err(|e| RpcFailure::Transport(format!("malformed RPC response: {e}")))?;

        if let Some(err) = resp.error {
            return Err(RpcFailure::Node(err));
        }
        Ok(resp.result)
    }

    /// Send a JSON-RPC request that must return a result.
    async fn rpc_call<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T> {
        self.rpc_request(url, method, params)
            .await
            .map_err(|f| f.into_error(method))?
            .ok_or_else(|| MediError::Connectivity(format!("{method}: empty RPC response")))
    }

    /// Read-only contract call, bounded by the verify timeout.
    async fn eth_call(&self, conn: &Connection, calldata: Vec<u8>) -> Result<Vec<u8>> {
        let params = serde_json::json!([
            { "to": conn.contract.to_string(), "data": to_hex_data(&calldata) },
            "latest"
        ]);
        let raw: String = tokio::time::timeout(
            self.config.verify_timeout(),
            self.rpc_call(&conn.rpc_url, "eth_call", params),
        )
        .await
        .map_err(|_| MediError::Connectivity("eth_call: timed out".into()))??;

        hex::decode(raw.trim_start_matches("0x"))
            .map_err(|e| MediError::Connectivity(format!("eth_call: result is not hex: {e}")))
    }

    /// Simulate, sign and broadcast a contract transaction.
    /// Returns the transaction reference once the node accepted it.
    async fn submit(&self, conn: &Connection, calldata: Vec<u8>) -> Result<String> {
        use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
        use alloy::eips::eip2718::Encodable2718;
        use alloy::primitives::{Bytes, TxKind};
        use alloy::signers::Signer;

        let from = conn.signer.address();
        let url = conn.rpc_url.as_str();

        // Simulate first so a contract revert comes back with its reason
        // and nothing is broadcast.
        let gas_hex: String = self
            .rpc_call(
                url,
                "eth_estimateGas",
                serde_json::json!([{
                    "from": from.to_string(),
                    "to": conn.contract.to_string(),
                    "data": to_hex_data(&calldata)
                }]),
            )
            .await?;
        let gas_estimate = parse_u64("eth_estimateGas", &gas_hex)?;

        let nonce_hex: String = self
            .rpc_call(
                url,
                "eth_getTransactionCount",
                serde_json::json!([from.to_string(), "pending"]),
            )
            .await?;
        let nonce = parse_u64("eth_getTransactionCount", &nonce_hex)?;

        let gas_price_hex: String = self.rpc_call(url, "eth_gasPrice", serde_json::json!([])).await?;
        let gas_price = parse_quantity("eth_gasPrice", &gas_price_hex)?;

        let chain_id = match self.config.chain_id {
            Some(id) => id,
            None => {
                let id_hex: String = self.rpc_call(url, "eth_chainId", serde_json::json!([])).await?;
                parse_u64("eth_chainId", &id_hex)?
            }
        };

        let tx = TxLegacy {
            chain_id: Some(chain_id),
            nonce,
            gas_price,
            // 20% headroom over the estimate
            gas_limit: gas_estimate.saturating_mul(6) / 5,
            to: TxKind::Call(conn.contract),
            value: U256::ZERO,
            input: Bytes::from(calldata),
        };

        let sig_hash = tx.signature_hash();
        let sig = conn
            .signer
            .sign_hash(&sig_hash)
            .await
            .map_err(|e| MediError::NotConfigured(format!("signing identity failed to sign: {e}")))?;

        let signed = TxEnvelope::Legacy(tx.into_signed(sig));
        let tx_ref = signed.tx_hash().to_string();

        let mut raw_tx = Vec::new();
        signed.encode_2718(&mut raw_tx);

        match self
            .rpc_request::<String>(url, "eth_sendRawTransaction", serde_json::json!([to_hex_data(&raw_tx)]))
            .await
        {
            Ok(Some(node_ref)) => Ok(node_ref),
            // The node may have taken the transaction; only the chain can tell.
            Ok(None) => Err(MediError::Unconfirmed { tx_ref }),
            Err(RpcFailure::Transport(reason)) => {
                warn!(tx_ref = %tx_ref, reason = %reason, "Broadcast outcome unknown");
                Err(MediError::Unconfirmed { tx_ref })
            }
            Err(failure) => Err(failure.into_error("eth_sendRawTransaction")),
        }
    }

    /// Poll until the transaction has a block number. The transaction is
    /// already out, so failed polls are retried until the caller's deadline.
    async fn wait_for_receipt(&self, conn: &Connection, tx_ref: &str) -> RpcReceipt {
        loop {
            match self
                .rpc_request::<RpcReceipt>(
                    &conn.rpc_url,
                    "eth_getTransactionReceipt",
                    serde_json::json!([tx_ref]),
                )
                .await
            {
                Ok(Some(receipt)) if receipt.block_number.is_some() => return receipt,
                Ok(_) => {}
                Err(failure) => {
                    let reason = failure.into_error("eth_getTransactionReceipt");
                    warn!(tx_ref = %tx_ref, reason = %reason, "Receipt poll failed, retrying");
                }
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Chain ID, contract presence and registrant address.
    pub async fn status(&self) -> Result<LedgerStatus> {
        let conn = self.connection()?;

        let id_hex: String = self
            .rpc_call(&conn.rpc_url, "eth_chainId", serde_json::json!([]))
            .await?;
        let code: String = self
            .rpc_call(
                &conn.rpc_url,
                "eth_getCode",
                serde_json::json!([conn.contract.to_string(), "latest"]),
            )
            .await?;

        Ok(LedgerStatus {
            chain_id: parse_u64("eth_chainId", &id_hex)?,
            contract_has_code: !code.trim_start_matches("0x").is_empty(),
            registrant: conn.signer.address().to_string(),
        })
    }
}

/// Registration time from the contract's `DocumentRegistered` event.
fn registered_at(receipt: &RpcReceipt, hash: &DocumentHash) -> Option<u64> {
    let signature = IMedicalRecords::DocumentRegistered::SIGNATURE_HASH.to_string();
    let hash_topic = to_bytes32(hash).to_string();

    receipt
        .logs
        .iter()
        .find(|log| {
            log.topics.first().is_some_and(|t| t.eq_ignore_ascii_case(&signature))
                && log.topics.get(1).is_some_and(|t| t.eq_ignore_ascii_case(&hash_topic))
        })
        .and_then(|log| {
            let data = hex::decode(log.data.trim_start_matches("0x")).ok()?;
            let word = data.get(..32)?;
            u64::try_from(U256::from_be_slice(word)).ok()
        })
}

#[async_trait]
impl Ledger for EthereumLedger {
    fn registrant(&self) -> Option<String> {
        self.connection
            .as_ref()
            .ok()
            .map(|c| c.signer.address().to_string())
    }

    async fn register(&self, hash: &DocumentHash) -> Result<LedgerReceipt> {
        let conn = self.connection()?;
        let calldata = IMedicalRecords::registerDocumentCall {
            _documentHash: to_bytes32(hash),
        }
        .abi_encode();

        let tx_ref = {
            let _guard = self.submit_lock.lock().await;
            self.submit(conn, calldata).await?
        };
        info!(hash = %hash, tx_ref = %tx_ref, "Registration transaction sent");

        let receipt =
            match tokio::time::timeout(self.config.register_timeout(), self.wait_for_receipt(conn, &tx_ref)).await {
                Ok(receipt) => receipt,
                Err(_) => {
                    warn!(
                        tx_ref = %tx_ref,
                        timeout_secs = self.config.register_timeout_secs,
                        "Registration not finalized in time"
                    );
                    return Err(MediError::Unconfirmed { tx_ref });
                }
            };

        if receipt.status.as_deref().is_some_and(|s| parse_quantity("status", s).ok() == Some(0)) {
            return Err(MediError::Rejected(format!(
                "transaction {} reverted",
                receipt.transaction_hash
            )));
        }

        // Mined: an unreadable receipt is unconfirmed, never retryable.
        let block_number = match receipt.block_number.as_deref().map(|n| parse_u64("blockNumber", n)) {
            Some(Ok(n)) => Some(n),
            Some(Err(e)) => {
                warn!(tx_ref = %receipt.transaction_hash, error = %e, "Unreadable receipt");
                return Err(MediError::Unconfirmed {
                    tx_ref: receipt.transaction_hash,
                });
            }
            None => None,
        };
        let registered_at = registered_at(&receipt, hash);

        info!(
            hash = %hash,
            tx_ref = %receipt.transaction_hash,
            block = block_number.unwrap_or(0),
            "Registration finalized"
        );

        Ok(LedgerReceipt {
            tx_ref: receipt.transaction_hash,
            block_number,
            registered_at,
        })
    }

    async fn verify(&self, hash: &DocumentHash) -> Result<LedgerRecord> {
        let conn = self.connection()?;
        let calldata = IMedicalRecords::verifyDocumentCall {
            _documentHash: to_bytes32(hash),
        }
        .abi_encode();

        let output = self.eth_call(conn, calldata).await?;
        let ret = IMedicalRecords::verifyDocumentCall::abi_decode_returns(&output, true).map_err(|e| {
            MediError::Connectivity(format!("verifyDocument: undecodable result: {e}"))
        })?;

        if !ret._0 {
            return Ok(LedgerRecord::absent());
        }

        Ok(LedgerRecord {
            exists: true,
            owner: Some(ret._1.to_string()),
            timestamp: Some(u64::try_from(ret._2).unwrap_or(u64::MAX)),
        })
    }

    async fn documents_of(&self, owner: &str) -> Result<Vec<DocumentHash>> {
        let conn = self.connection()?;
        let owner: Address = owner
            .parse()
            .map_err(|e| MediError::InvalidInput(format!("invalid address `{owner}`: {e}")))?;

        let calldata = IMedicalRecords::getUserDocumentsCall { _owner: owner }.abi_encode();
        let output = self.eth_call(conn, calldata).await?;
        let ret = IMedicalRecords::getUserDocumentsCall::abi_decode_returns(&output, true).map_err(|e| {
            MediError::Connectivity(format!("getUserDocuments: undecodable result: {e}"))
        })?;

        Ok(ret._0.into_iter().map(|b| DocumentHash::from_bytes(b.0)).collect())
    }
}
