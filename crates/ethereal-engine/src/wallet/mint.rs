use std::collections::HashSet;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use ethereal_contracts::events::ActivityLog;
use ethereal_contracts::gallery::{GalleryStore, GeneratedImage, ImagePatch, StoreError};
use indexmap::IndexMap;
use rand::Rng;
use serde::Serialize;
use serde_json::{json, Value};

use super::abi::{self, parse_quantity, to_quantity};
use super::{ProviderError, WalletError, WalletProvider, WalletSession};
use crate::config::StudioConfig;
use crate::{encode_uri_component, error_chain_text, map_object, timestamp_millis};

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
pub const DEMO_EXPLORER_URL: &str = "#demo-mode";
pub const SEPOLIA_CHAIN_ID: u64 = 11_155_111;

const MINT_SIGNATURE: &str = "mint(address,string)";
const PAYABLE_MINT_SIGNATURE: &str = "mintArtwork(address,string)";
const TOKEN_COUNTER_SIGNATURE: &str = "tokenCounter()";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractEntry {
    Deployed(String),
    /// Listed but still the zero address.
    NotDeployed,
    /// Always minted in demo mode.
    Demo,
}

impl ContractEntry {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("demo") {
            Self::Demo
        } else if raw.eq_ignore_ascii_case(ZERO_ADDRESS) {
            Self::NotDeployed
        } else {
            Self::Deployed(raw.to_string())
        }
    }
}

/// Mint contract per chain id, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTable {
    entries: IndexMap<u64, ContractEntry>,
}

impl Default for ChainTable {
    fn default() -> Self {
        let mut entries = IndexMap::new();
        entries.insert(SEPOLIA_CHAIN_ID, ContractEntry::NotDeployed);
        entries.insert(1, ContractEntry::Demo);
        entries.insert(80_001, ContractEntry::NotDeployed);
        entries.insert(137, ContractEntry::Demo);
        Self { entries }
    }
}

impl ChainTable {
    /// Layers `chainId=address` pairs (comma separated) over the table.
    pub fn with_overrides(mut self, raw: &str) -> Result<Self> {
        for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
            let Some((chain, address)) = pair.split_once('=') else {
                bail!("contract override {pair:?} is not chainId=address");
            };
            let chain_id: u64 = chain
                .trim()
                .parse()
                .with_context(|| format!("contract override {pair:?} has a bad chain id"))?;
            self.entries.insert(chain_id, ContractEntry::parse(address));
        }
        Ok(self)
    }

    pub fn get(&self, chain_id: u64) -> Option<&ContractEntry> {
        self.entries.get(&chain_id)
    }

    /// First chain with a deployed contract; where a switch should go.
    pub fn preferred_chain(&self) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, entry)| matches!(entry, ContractEntry::Deployed(_)))
            .map(|(chain_id, _)| *chain_id)
    }
}

pub fn explorer_base(chain_id: u64) -> &'static str {
    match chain_id {
        SEPOLIA_CHAIN_ID => "https://sepolia.etherscan.io",
        137 => "https://polygonscan.com",
        80_001 => "https://mumbai.polygonscan.com",
        _ => "https://etherscan.io",
    }
}

pub fn explorer_tx_url(chain_id: u64, hash: &str) -> String {
    format!("{}/tx/{hash}", explorer_base(chain_id))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MintMode {
    OnChain { chain_id: u64 },
    /// Broadcast, but no receipt was seen before polling gave up.
    Pending { chain_id: u64, reason: String },
    Simulated { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintResult {
    pub transaction_hash: String,
    pub explorer_url: String,
    /// Unknown while the transaction is pending.
    pub token_id: Option<String>,
    pub contract_address: String,
    pub mode: MintMode,
}

impl MintResult {
    pub fn is_simulated(&self) -> bool {
        matches!(self.mode, MintMode::Simulated { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.mode, MintMode::Pending { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MintError {
    #[error("connect a wallet before minting")]
    NotConnected,
    #[error("image {0} not found")]
    ImageNotFound(String),
    #[error("image {0} is already an NFT")]
    AlreadyMinted(String),
    #[error("a mint for image {0} is already in progress")]
    InFlight(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

/// Called with `(current_chain, target_chain)`; `true` approves a switch.
pub type ConfirmSwitch<'a> = &'a mut dyn FnMut(u64, u64) -> bool;

pub struct Minter {
    chains: ChainTable,
    mint_fee_wei: Option<u128>,
    simulated_delay: Duration,
    receipt_timeout: Duration,
    poll_interval: Duration,
    in_flight: Mutex<HashSet<String>>,
    activity: ActivityLog,
}

impl Default for Minter {
    fn default() -> Self {
        Self::new(ChainTable::default())
    }
}

impl Minter {
    pub fn new(chains: ChainTable) -> Self {
        Self {
            chains,
            mint_fee_wei: None,
            simulated_delay: Duration::from_millis(3_000),
            receipt_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(2),
            in_flight: Mutex::new(HashSet::new()),
            activity: ActivityLog::disabled(),
        }
    }

    pub fn from_config(config: &StudioConfig) -> Result<Self> {
        let mut chains = ChainTable::default();
        if let Some(raw) = config.contract_overrides.as_deref() {
            chains = chains.with_overrides(raw)?;
        }
        Ok(Self::new(chains)
            .with_simulated_delay(config.simulated_mint_delay)
            .with_receipt_timeout(config.receipt_timeout)
            .with_mint_fee(config.mint_fee_wei))
    }

    pub fn with_simulated_delay(mut self, delay: Duration) -> Self {
        self.simulated_delay = delay;
        self
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_mint_fee(mut self, fee_wei: Option<u128>) -> Self {
        self.mint_fee_wei = fee_wei;
        self
    }

    pub fn with_activity(mut self, activity: ActivityLog) -> Self {
        self.activity = activity;
        self
    }

    /// Mints image `id` and marks it as an NFT in `gallery`.
    ///
    /// Failures before broadcast, reverted transactions and unsupported
    /// networks end in a simulated mint rather than an error; only the
    /// preconditions are reported as errors. A broadcast transaction whose
    /// receipt never arrives keeps its real hash as [`MintMode::Pending`].
    pub fn mint(
        &self,
        session: &mut WalletSession,
        gallery: &dyn GalleryStore,
        id: &str,
        confirm_switch: Option<ConfirmSwitch<'_>>,
    ) -> Result<MintResult, MintError> {
        if !session.state().connected {
            return Err(MintError::NotConnected);
        }
        let image = gallery
            .get(id)?
            .ok_or_else(|| MintError::ImageNotFound(id.to_string()))?;
        if image.is_nft {
            return Err(MintError::AlreadyMinted(id.to_string()));
        }
        let _guard = InFlightGuard::acquire(&self.in_flight, id)?;

        self.activity.record(
            "mint_started",
            map_object(json!({
                "image_id": id,
                "chain_id": session.state().chain_id,
                "advance_mode": session.state().advance_mode,
            })),
        );

        let result = self.run(session, &image, confirm_switch);
        gallery.update(
            id,
            &ImagePatch::minted(
                result.transaction_hash.clone(),
                result.explorer_url.clone(),
                result.token_id.clone(),
                result.contract_address.clone(),
            ),
        )?;

        tracing::info!(
            image_id = id,
            token_id = ?result.token_id,
            simulated = result.is_simulated(),
            pending = result.is_pending(),
            "mint completed"
        );
        self.activity.record(
            "mint_completed",
            map_object(json!({
                "image_id": id,
                "transaction_hash": result.transaction_hash,
                "token_id": result.token_id,
                "mode": result.mode,
            })),
        );
        Ok(result)
    }

    fn run(
        &self,
        session: &mut WalletSession,
        image: &GeneratedImage,
        confirm_switch: Option<ConfirmSwitch<'_>>,
    ) -> MintResult {
        if !session.state().advance_mode {
            return self.simulate("advance mode is off");
        }
        match self.mint_on_chain(session, image, confirm_switch) {
            Ok(result) => result,
            Err(err) => {
                let reason = error_chain_text(&err, 300);
                tracing::warn!(image_id = %image.id, reason = %reason, "on-chain mint failed, using demo mint");
                self.simulate(reason)
            }
        }
    }

    fn mint_on_chain(
        &self,
        session: &mut WalletSession,
        image: &GeneratedImage,
        confirm_switch: Option<ConfirmSwitch<'_>>,
    ) -> Result<MintResult> {
        let chain_id = session
            .state()
            .chain_id
            .context("wallet did not report a chain id")?;
        match self.chains.get(chain_id) {
            Some(ContractEntry::Demo) => {
                return Ok(self.simulate(format!("chain {chain_id} mints in demo mode")));
            }
            Some(ContractEntry::Deployed(contract)) => {
                return self.send_mint(session, chain_id, contract, image);
            }
            Some(ContractEntry::NotDeployed) | None => {}
        }

        let Some(target) = self.chains.preferred_chain() else {
            bail!("network {chain_id} is not supported and no chain has a deployed contract");
        };
        let Some(confirm) = confirm_switch else {
            bail!("network {chain_id} is not supported; switch to chain {target}");
        };
        if !confirm(chain_id, target) {
            bail!("switch from chain {chain_id} to {target} was declined");
        }
        self.switch_chain(session, target)?;

        let Some(ContractEntry::Deployed(contract)) = self.chains.get(target) else {
            bail!("chain {target} has no deployed contract");
        };
        self.send_mint(session, target, contract, image)
    }

    fn switch_chain(&self, session: &mut WalletSession, target: u64) -> Result<()> {
        let provider = session.provider().ok_or(WalletError::NoProvider)?;
        let switch_params = json!([{ "chainId": to_quantity(u128::from(target)) }]);
        match provider.request("wallet_switchEthereumChain", switch_params.clone()) {
            Ok(_) => {}
            Err(err) if err.code == ProviderError::UNRECOGNIZED_CHAIN => {
                let params = chain_parameters(target)
                    .with_context(|| format!("no network parameters known for chain {target}"))?;
                provider
                    .request("wallet_addEthereumChain", json!([params]))
                    .with_context(|| format!("failed to add chain {target} to the wallet"))?;
                provider
                    .request("wallet_switchEthereumChain", switch_params)
                    .with_context(|| format!("failed to switch to chain {target}"))?;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("failed to switch to chain {target}"));
            }
        }
        session
            .reload()
            .context("failed to reload wallet after switching chains")?;
        if session.state().chain_id != Some(target) {
            bail!("wallet is still on chain {:?} after switching", session.state().chain_id);
        }
        Ok(())
    }

    fn send_mint(
        &self,
        session: &WalletSession,
        chain_id: u64,
        contract: &str,
        image: &GeneratedImage,
    ) -> Result<MintResult> {
        let provider = session.provider().ok_or(WalletError::NoProvider)?;
        let from = session
            .state()
            .address
            .clone()
            .context("wallet has no selected account")?;
        let token_uri = token_uri(image, timestamp_millis());
        let signature = if self.mint_fee_wei.is_some() {
            PAYABLE_MINT_SIGNATURE
        } else {
            MINT_SIGNATURE
        };

        let mut transaction = json!({
            "from": from,
            "to": contract,
            "data": abi::encode_address_string_call(signature, &from, &token_uri)?,
        });
        if let Some(fee) = self.mint_fee_wei {
            transaction["value"] = json!(to_quantity(fee));
        }

        let estimate = provider
            .request("eth_estimateGas", json!([transaction.clone()]))
            .context("gas estimation failed")?;
        let gas = estimate
            .as_str()
            .and_then(parse_quantity)
            .with_context(|| format!("unexpected gas estimate {estimate}"))?;
        transaction["gas"] = json!(to_quantity(gas.saturating_mul(120) / 100));

        tracing::info!(chain_id, contract, image_id = %image.id, "sending mint transaction");
        let hash = provider
            .request("eth_sendTransaction", json!([transaction]))
            .context("mint transaction was not sent")?
            .as_str()
            .map(str::to_string)
            .context("wallet returned no transaction hash")?;

        let receipt = match self.wait_for_receipt(provider.as_ref(), &hash) {
            Ok(receipt) => receipt,
            Err(err) => {
                let reason = error_chain_text(&err, 300);
                tracing::warn!(chain_id, hash = %hash, reason = %reason, "mint sent but not confirmed");
                return Ok(MintResult {
                    explorer_url: explorer_tx_url(chain_id, &hash),
                    transaction_hash: hash,
                    token_id: None,
                    contract_address: contract.to_string(),
                    mode: MintMode::Pending { chain_id, reason },
                });
            }
        };
        if receipt.get("status").and_then(Value::as_str) == Some("0x0") {
            bail!("transaction {hash} failed");
        }
        let token_id = self.token_id(provider.as_ref(), contract, &receipt);

        Ok(MintResult {
            explorer_url: explorer_tx_url(chain_id, &hash),
            transaction_hash: hash,
            token_id: Some(token_id),
            contract_address: contract.to_string(),
            mode: MintMode::OnChain { chain_id },
        })
    }

    fn wait_for_receipt(&self, provider: &dyn WalletProvider, hash: &str) -> Result<Value> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            let receipt = provider
                .request("eth_getTransactionReceipt", json!([hash]))
                .with_context(|| format!("failed to fetch receipt for {hash}"))?;
            if !receipt.is_null() {
                return Ok(receipt);
            }
            if Instant::now() >= deadline {
                bail!(
                    "timed out after {}s waiting for receipt of {hash}",
                    self.receipt_timeout.as_secs()
                );
            }
            thread::sleep(self.poll_interval);
        }
    }

    /// Transfer log topic 3, then `tokenCounter() - 1`, then the clock.
    fn token_id(&self, provider: &dyn WalletProvider, contract: &str, receipt: &Value) -> String {
        let transfer_topic = abi::event_topic(abi::TRANSFER_EVENT);
        let from_logs = receipt
            .get("logs")
            .and_then(Value::as_array)
            .and_then(|logs| {
                logs.iter().find(|log| {
                    log.pointer("/topics/0")
                        .and_then(Value::as_str)
                        .is_some_and(|topic| topic.eq_ignore_ascii_case(&transfer_topic))
                })
            })
            .and_then(|log| log.pointer("/topics/3"))
            .and_then(Value::as_str)
            .and_then(abi::uint_hex_to_decimal);
        if let Some(token_id) = from_logs {
            return token_id;
        }

        let call = json!([
            { "to": contract, "data": abi::encode_no_arg_call(TOKEN_COUNTER_SIGNATURE) },
            "latest"
        ]);
        let from_counter = provider
            .request("eth_call", call)
            .ok()
            .and_then(|value| value.as_str().and_then(parse_quantity))
            .and_then(|counter| counter.checked_sub(1));
        match from_counter {
            Some(token_id) => token_id.to_string(),
            None => timestamp_millis().to_string(),
        }
    }

    fn simulate(&self, reason: impl Into<String>) -> MintResult {
        let reason = reason.into();
        tracing::info!(reason = %reason, "simulating mint");
        if !self.simulated_delay.is_zero() {
            thread::sleep(self.simulated_delay);
        }
        let mut rng = rand::thread_rng();
        let hash_bytes: [u8; 32] = rng.gen();
        let token_id: u32 = rng.gen_range(1000..=10_998);
        MintResult {
            transaction_hash: format!("0x{}", hex::encode(hash_bytes)),
            explorer_url: DEMO_EXPLORER_URL.to_string(),
            token_id: Some(token_id.to_string()),
            contract_address: ZERO_ADDRESS.to_string(),
            mode: MintMode::Simulated { reason },
        }
    }
}

fn token_uri(image: &GeneratedImage, millis: u128) -> String {
    format!(
        "ipfs://QmMockHash{millis}?prompt={}&image={}",
        encode_uri_component(&image.prompt),
        encode_uri_component(&image.image_url)
    )
}

fn chain_parameters(chain_id: u64) -> Option<Value> {
    let (name, rpc, symbol) = match chain_id {
        SEPOLIA_CHAIN_ID => ("Sepolia", "https://rpc.sepolia.org", "SepoliaETH"),
        80_001 => ("Polygon Mumbai", "https://rpc-mumbai.maticvigil.com", "MATIC"),
        137 => ("Polygon", "https://polygon-rpc.com", "MATIC"),
        1 => ("Ethereum", "https://cloudflare-eth.com", "ETH"),
        _ => return None,
    };
    Some(json!({
        "chainId": to_quantity(u128::from(chain_id)),
        "chainName": name,
        "rpcUrls": [rpc],
        "nativeCurrency": { "name": symbol, "symbol": symbol, "decimals": 18 },
        "blockExplorerUrls": [explorer_base(chain_id)],
    }))
}

struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(set: &'a Mutex<HashSet<String>>, id: &str) -> Result<Self, MintError> {
        let mut active = set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(id.to_string()) {
            return Err(MintError::InFlight(id.to_string()));
        }
        Ok(Self {
            set,
            id: id.to_string(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut active = self
            .set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.id);
    }
}
