//! Wallet connection state and the NFT mint flow.
//!
//! A [`WalletProvider`] speaks EIP-1193 style `request(method, params)`.
//! [`WalletSession`] tracks the connected account on top of it and
//! republishes every change on a [`ChangeBus`].

pub mod abi;
mod mint;
mod rpc;

use std::sync::Arc;

use ethereal_contracts::events::ActivityLog;
use ethereal_contracts::notify::{ChangeBus, Subscription};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::map_object;

pub use mint::{
    explorer_base, explorer_tx_url, ChainTable, ConfirmSwitch, ContractEntry, MintError, MintMode,
    MintResult, Minter, DEMO_EXPLORER_URL, SEPOLIA_CHAIN_ID, ZERO_ADDRESS,
};
pub use rpc::JsonRpcWallet;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("wallet provider error {code}: {message}")]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl ProviderError {
    pub const USER_REJECTED: i64 = 4001;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const INTERNAL: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(Self::INTERNAL, message)
    }

    pub fn is_user_rejection(&self) -> bool {
        self.code == Self::USER_REJECTED
    }
}

pub trait WalletProvider: Send + Sync {
    fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError>;
}

/// Notifications a provider pushes (or [`WalletSession::sync`] synthesizes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    AccountsChanged(Vec<String>),
    ChainChanged(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletState {
    pub connected: bool,
    pub address: Option<String>,
    pub balance: String,
    pub advance_mode: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

impl Default for WalletState {
    fn default() -> Self {
        Self {
            connected: false,
            address: None,
            balance: "0.0".to_string(),
            advance_mode: false,
            chain_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    Connected {
        address: String,
        chain_id: Option<u64>,
    },
    Disconnected,
    AccountChanged {
        address: String,
    },
    ChainChanged {
        chain_id: Option<u64>,
    },
    AdvanceModeChanged(bool),
}

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("No Ethereum wallet found. Please install MetaMask or another Web3 wallet.")]
    NoProvider,
    #[error("wallet connection was rejected")]
    Rejected,
    #[error("wallet is not connected")]
    NotConnected,
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub struct WalletSession {
    provider: Option<Arc<dyn WalletProvider>>,
    state: WalletState,
    status: ConnectionStatus,
    bus: ChangeBus<WalletEvent>,
    activity: ActivityLog,
}

impl WalletSession {
    pub fn new(provider: Option<Arc<dyn WalletProvider>>) -> Self {
        Self {
            provider,
            state: WalletState::default(),
            status: ConnectionStatus::Disconnected,
            bus: ChangeBus::new(),
            activity: ActivityLog::disabled(),
        }
    }

    pub fn with_activity(mut self, activity: ActivityLog) -> Self {
        self.activity = activity;
        self
    }

    pub fn with_bus(mut self, bus: ChangeBus<WalletEvent>) -> Self {
        self.bus = bus;
        self
    }

    pub fn state(&self) -> &WalletState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn provider(&self) -> Option<Arc<dyn WalletProvider>> {
        self.provider.clone()
    }

    pub fn subscribe(&self) -> Subscription<WalletEvent> {
        self.bus.subscribe()
    }

    pub fn connect(&mut self) -> Result<&WalletState, WalletError> {
        let provider = self.require_provider()?;
        self.status = ConnectionStatus::Connecting;

        let accounts = match provider.request("eth_requestAccounts", json!([])) {
            Ok(value) => account_list(&value),
            Err(err) => {
                self.status = ConnectionStatus::Disconnected;
                if err.is_user_rejection() {
                    return Err(WalletError::Rejected);
                }
                return Err(err.into());
            }
        };
        let Some(address) = accounts.into_iter().next() else {
            self.status = ConnectionStatus::Disconnected;
            return Err(WalletError::Rejected);
        };

        if let Err(err) = self.load_account(provider.as_ref(), &address) {
            self.status = ConnectionStatus::Disconnected;
            return Err(err);
        }
        self.status = ConnectionStatus::Connected;
        tracing::info!(address = %address, chain_id = ?self.state.chain_id, "wallet connected");
        self.activity.record(
            "wallet_connected",
            map_object(json!({
                "address": address,
                "chain_id": self.state.chain_id,
            })),
        );
        self.bus.publish(WalletEvent::Connected {
            address,
            chain_id: self.state.chain_id,
        });
        Ok(&self.state)
    }

    pub fn disconnect(&mut self) {
        let was_connected = self.state.connected;
        self.state = WalletState::default();
        self.status = ConnectionStatus::Disconnected;
        if was_connected {
            tracing::info!("wallet disconnected");
            self.activity
                .record("wallet_disconnected", map_object(json!({})));
        }
        self.bus.publish(WalletEvent::Disconnected);
    }

    pub fn set_advance_mode(&mut self, enabled: bool) {
        if self.state.advance_mode == enabled {
            return;
        }
        self.state.advance_mode = enabled;
        self.bus.publish(WalletEvent::AdvanceModeChanged(enabled));
    }

    pub fn handle_event(&mut self, event: ProviderEvent) -> Result<(), WalletError> {
        match event {
            ProviderEvent::AccountsChanged(accounts) => {
                let Some(address) = accounts.into_iter().next() else {
                    self.disconnect();
                    return Ok(());
                };
                let provider = self.require_provider()?;
                self.load_account(provider.as_ref(), &address)?;
                self.status = ConnectionStatus::Connected;
                self.bus.publish(WalletEvent::AccountChanged { address });
            }
            ProviderEvent::ChainChanged(_) => {
                self.reload()?;
                if self.state.connected {
                    self.bus.publish(WalletEvent::ChainChanged {
                        chain_id: self.state.chain_id,
                    });
                }
            }
        }
        Ok(())
    }

    /// Rebuilds the state from `eth_accounts` without prompting the user.
    pub fn reload(&mut self) -> Result<&WalletState, WalletError> {
        let provider = self.require_provider()?;
        let accounts = account_list(&provider.request("eth_accounts", json!([]))?);
        let Some(address) = accounts.into_iter().next() else {
            if self.state.connected {
                self.disconnect();
            }
            return Ok(&self.state);
        };
        let was_connected = self.state.connected;
        self.load_account(provider.as_ref(), &address)?;
        self.status = ConnectionStatus::Connected;
        if !was_connected {
            self.bus.publish(WalletEvent::Connected {
                address,
                chain_id: self.state.chain_id,
            });
        }
        Ok(&self.state)
    }

    /// Polls the provider and applies whatever changed since the last look.
    pub fn sync(&mut self) -> Result<Vec<ProviderEvent>, WalletError> {
        if !self.state.connected {
            return Ok(Vec::new());
        }
        let provider = self.require_provider()?;
        let mut events = Vec::new();

        let accounts = account_list(&provider.request("eth_accounts", json!([]))?);
        if accounts.first() != self.state.address.as_ref() {
            events.push(ProviderEvent::AccountsChanged(accounts.clone()));
        }
        if !accounts.is_empty() {
            let raw_chain = provider.request("eth_chainId", json!([]))?;
            if parse_chain_id(&raw_chain) != self.state.chain_id {
                let hex_chain = raw_chain
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| raw_chain.to_string());
                events.push(ProviderEvent::ChainChanged(hex_chain));
            }
        }

        for event in &events {
            self.handle_event(event.clone())?;
        }
        Ok(events)
    }

    fn require_provider(&self) -> Result<Arc<dyn WalletProvider>, WalletError> {
        self.provider.clone().ok_or(WalletError::NoProvider)
    }

    fn load_account(&mut self, provider: &dyn WalletProvider, address: &str) -> Result<(), WalletError> {
        let balance = provider.request("eth_getBalance", json!([address, "latest"]))?;
        let chain = provider.request("eth_chainId", json!([]))?;
        self.state.connected = true;
        self.state.address = Some(address.to_string());
        self.state.balance = format_ether(balance.as_str().unwrap_or("0x0"));
        self.state.chain_id = parse_chain_id(&chain);
        Ok(())
    }
}

/// Renders a wei quantity as ether, trimming trailing zeros (`"1.5"`, `"0.0"`).
pub fn format_ether(wei_hex: &str) -> String {
    let Some(decimal) = abi::uint_hex_to_decimal(wei_hex) else {
        return "0.0".to_string();
    };
    let padded = format!("{decimal:0>19}");
    let (whole, fraction) = padded.split_at(padded.len() - 18);
    let fraction = fraction.trim_end_matches('0');
    format!(
        "{whole}.{}",
        if fraction.is_empty() { "0" } else { fraction }
    )
}

pub fn parse_chain_id(value: &Value) -> Option<u64> {
    match value {
        Value::String(raw) => match raw.strip_prefix("0x") {
            Some(digits) => u64::from_str_radix(digits, 16).ok(),
            None => raw.parse().ok(),
        },
        Value::Number(number) => number.as_u64(),
        _ => None,
    }
}

fn account_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
