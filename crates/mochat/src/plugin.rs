use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    clawlink_channels::{
        ChannelEventSink, ChannelHealthSnapshot, ChannelOutbound, ChannelPlugin, ChannelStatus,
    },
    tracing::{info, warn},
};

use crate::{
    config::MochatAccount,
    inbound::CHANNEL_TYPE,
    outbound::MochatOutbound,
    runtime::start_account,
    state::{AccountState, AccountStateMap},
    status::AccountStatus,
};

/// Mochat channel plugin.
pub struct MochatPlugin {
    accounts: AccountStateMap,
    outbound: MochatOutbound,
    sink: Arc<dyn ChannelEventSink>,
    state_dir: PathBuf,
}

impl MochatPlugin {
    pub fn new(sink: Arc<dyn ChannelEventSink>, state_dir: impl Into<PathBuf>) -> Self {
        let accounts: AccountStateMap = Arc::new(RwLock::new(HashMap::new()));
        let outbound = MochatOutbound {
            accounts: Arc::clone(&accounts),
        };
        Self {
            accounts,
            outbound,
            sink,
            state_dir: state_dir.into(),
        }
    }

    pub fn account_ids(&self) -> Vec<String> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = accounts.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn has_account(&self, account_id: &str) -> bool {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.contains_key(account_id)
    }

    pub fn account_status(&self, account_id: &str) -> Option<AccountStatus> {
        let accounts = self.accounts.read().unwrap_or_else(|e| e.into_inner());
        accounts.get(account_id).map(|s| s.status.snapshot())
    }

    fn take_account(&self, account_id: &str) -> Option<AccountState> {
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        accounts.remove(account_id)
    }
}

#[async_trait]
impl ChannelPlugin for MochatPlugin {
    fn id(&self) -> &str {
        CHANNEL_TYPE
    }

    fn name(&self) -> &str {
        "Mochat"
    }

    async fn start_account(&mut self, account_id: &str, config: serde_json::Value) -> Result<()> {
        let account = MochatAccount::from_value(account_id, config)?;
        if !account.enabled {
            info!(account_id, "mochat account disabled, not starting");
            return Ok(());
        }
        if let Some(previous) = self.take_account(account_id) {
            info!(account_id, "restarting mochat account");
            previous.shutdown().await;
        }

        let state = start_account(account, &self.state_dir, Arc::clone(&self.sink)).await?;
        let mut accounts = self.accounts.write().unwrap_or_else(|e| e.into_inner());
        accounts.insert(account_id.to_string(), state);
        Ok(())
    }

    async fn stop_account(&mut self, account_id: &str) -> Result<()> {
        match self.take_account(account_id) {
            Some(state) => state.shutdown().await,
            None => warn!(account_id, "mochat account not found"),
        }
        Ok(())
    }

    fn outbound(&self) -> Option<&dyn ChannelOutbound> {
        Some(&self.outbound)
    }

    fn status(&self) -> Option<&dyn ChannelStatus> {
        Some(self)
    }
}

#[async_trait]
impl ChannelStatus for MochatPlugin {
    async fn probe(&self, account_id: &str) -> Result<ChannelHealthSnapshot> {
        let Some(status) = self.account_status(account_id) else {
            return Ok(ChannelHealthSnapshot {
                connected: false,
                account_id: account_id.to_string(),
                details: Some("account not started".into()),
            });
        };
        let details = match (&status.last_error, status.last_inbound_at) {
            (Some(error), _) => format!("last error: {error}"),
            (None, Some(at)) => format!("last inbound: {}", at.to_rfc3339()),
            (None, None) => "waiting for first inbound message".to_string(),
        };
        Ok(ChannelHealthSnapshot {
            connected: status.connected,
            account_id: account_id.to_string(),
            details: Some(details),
        })
    }
}
