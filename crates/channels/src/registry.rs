use {
    super::plugin::ChannelPlugin,
    std::collections::BTreeMap,
    tracing::{info, warn},
};

/// Registry of all loaded channel plugins and the accounts started on them.
#[derive(Default)]
pub struct ChannelRegistry {
    plugins: BTreeMap<String, Box<dyn ChannelPlugin>>,
    started: BTreeMap<String, Vec<String>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) {
        self.plugins.insert(plugin.id().to_string(), plugin);
    }

    pub fn get(&self, id: &str) -> Option<&dyn ChannelPlugin> {
        self.plugins.get(id).map(|p| p.as_ref())
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Box<dyn ChannelPlugin>> {
        self.plugins.get_mut(id)
    }

    pub fn list(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }

    /// Start one account on a registered plugin and remember it for
    /// [`Self::stop_all`].
    pub async fn start_account(
        &mut self,
        channel: &str,
        account_id: &str,
        config: serde_json::Value,
    ) -> anyhow::Result<()> {
        let Some(plugin) = self.plugins.get_mut(channel) else {
            anyhow::bail!("unknown channel: {channel}");
        };
        plugin.start_account(account_id, config).await?;
        self.started
            .entry(channel.to_string())
            .or_default()
            .push(account_id.to_string());
        Ok(())
    }

    /// Stop every started account. Failures are logged and do not stop the
    /// remaining accounts from shutting down.
    pub async fn stop_all(&mut self) {
        let started = std::mem::take(&mut self.started);
        for (channel, accounts) in started {
            let Some(plugin) = self.plugins.get_mut(&channel) else {
                continue;
            };
            for account_id in accounts {
                match plugin.stop_account(&account_id).await {
                    Ok(()) => info!(channel = %channel, account_id = %account_id, "channel account stopped"),
                    Err(e) => {
                        warn!(channel = %channel, account_id = %account_id, error = %e, "failed to stop account")
                    },
                }
            }
        }
    }
}
