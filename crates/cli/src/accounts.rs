use std::path::PathBuf;

use {
    anyhow::{Context, Result, bail},
    clawlink_config::ClawlinkConfig,
    clawlink_mochat::{
        MochatAccount,
        config::{account_ids, account_value},
    },
    serde_json::Value,
};

/// One account from the `channels.mochat` section, resolved and raw.
pub struct ConfiguredAccount {
    pub account: MochatAccount,
    /// Merged per-account JSON handed to the plugin.
    pub raw: Value,
}

pub fn configured_accounts(config: &ClawlinkConfig) -> Result<Vec<ConfiguredAccount>> {
    let Some(section) = config.channels.mochat.as_ref() else {
        return Ok(Vec::new());
    };
    let mut ids = account_ids(section);
    ids.sort();
    ids.into_iter()
        .map(|id| {
            let raw = account_value(section, &id);
            let account = MochatAccount::from_value(&id, raw.clone())
                .with_context(|| format!("invalid mochat account {id}"))?;
            Ok(ConfiguredAccount { account, raw })
        })
        .collect()
}

/// The named account, or the first enabled one.
pub fn select_account(config: &ClawlinkConfig, account_id: Option<&str>) -> Result<MochatAccount> {
    let accounts = configured_accounts(config)?;
    let found = match account_id {
        Some(id) => accounts.into_iter().find(|a| a.account.account_id == id),
        None => accounts.into_iter().find(|a| a.account.enabled),
    };
    match (found, account_id) {
        (Some(configured), _) => Ok(configured.account),
        (None, Some(id)) => bail!("mochat account {id} is not configured"),
        (None, None) => bail!("no enabled mochat account is configured"),
    }
}

/// Where cursor files and event logs live.
pub fn state_dir(config: &ClawlinkConfig) -> PathBuf {
    config
        .state_dir
        .clone()
        .or_else(clawlink_config::data_dir)
        .unwrap_or_else(|| PathBuf::from(".clawlink"))
}
