//! `run`, `check` and `send`.

use std::sync::Arc;

use {
    anyhow::{Result, bail},
    clawlink_channels::ChannelRegistry,
    clawlink_config::ClawlinkConfig,
    clawlink_mochat::{
        MochatApi, MochatPlugin, inbound::CHANNEL_TYPE, resolve_target, types::ConversationKind,
    },
    serde_json::json,
    tracing::{error, info},
};

use crate::{
    accounts::{ConfiguredAccount, configured_accounts, select_account, state_dir},
    responder::CommandResponder,
};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Problems that keep enabled accounts from starting.
fn validation_errors(accounts: &[ConfiguredAccount]) -> Vec<String> {
    accounts
        .iter()
        .filter(|c| c.account.enabled)
        .filter_map(|c| c.account.validate().err())
        .map(|e| e.to_string())
        .collect()
}

/// Start every enabled account and block until Ctrl-C.
pub async fn run(config: &ClawlinkConfig) -> Result<()> {
    let enabled: Vec<ConfiguredAccount> = configured_accounts(config)?
        .into_iter()
        .filter(|c| c.account.enabled)
        .collect();
    if enabled.is_empty() {
        eprintln!("No enabled mochat accounts configured; nothing to run.");
        return Ok(());
    }
    let errors = validation_errors(&enabled);
    if !errors.is_empty() {
        for message in &errors {
            eprintln!("  {BOLD}{RED}error{RESET} {message}");
        }
        std::process::exit(1);
    }

    let state_dir = state_dir(config);
    let sink = Arc::new(CommandResponder::from_config(&config.responder));
    let mut registry = ChannelRegistry::new();
    registry.register(Box::new(MochatPlugin::new(sink, &state_dir)));
    info!(state_dir = %state_dir.display(), accounts = enabled.len(), "starting mochat accounts");

    for configured in &enabled {
        let account_id = &configured.account.account_id;
        if let Err(e) = registry
            .start_account(CHANNEL_TYPE, account_id, configured.raw.clone())
            .await
        {
            error!(account_id = %account_id, error = %e, "failed to start mochat account");
            registry.stop_all().await;
            return Err(e);
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    registry.stop_all().await;
    Ok(())
}

/// Print a redacted summary of every account; exit 1 if an enabled one is
/// incomplete.
pub fn check(config: &ClawlinkConfig) -> Result<()> {
    let accounts = configured_accounts(config)?;
    if accounts.is_empty() {
        eprintln!("No mochat section configured.");
        return Ok(());
    }
    for configured in &accounts {
        let account = &configured.account;
        let (color, label) = match (account.enabled, account.is_configured()) {
            (false, _) => (RESET, "disabled"),
            (true, true) => (GREEN, "ok"),
            (true, false) => (RED, "incomplete"),
        };
        eprintln!("{BOLD}{color}{label}{RESET} {}", account.account_id);
        println!("{}", serde_json::to_string_pretty(&account.redacted_summary())?);
    }

    let errors = validation_errors(&accounts);
    if !errors.is_empty() {
        eprintln!();
        for message in &errors {
            eprintln!("  {BOLD}{RED}error{RESET} {message}");
        }
        std::process::exit(1);
    }
    Ok(())
}

/// One-off send through target resolution.
pub async fn send(
    config: &ClawlinkConfig,
    account_id: Option<&str>,
    to: &str,
    message: &str,
    reply_to: Option<&str>,
) -> Result<()> {
    let account = select_account(config, account_id)?;
    let Some(target) = resolve_target(to, &account.panels) else {
        bail!("empty mochat target: {to:?}");
    };
    if message.trim().is_empty() {
        bail!("message is empty");
    }
    let api = MochatApi::for_account(&account)?;
    let result = match target.kind {
        ConversationKind::Panel => {
            api.send_panel(&target.id, message.trim(), reply_to, None)
                .await?
        },
        ConversationKind::Session => api.send_session(&target.id, message.trim(), reply_to).await?,
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "accountId": account.account_id,
            "kind": target.kind,
            "target": target.id,
            "result": result,
        }))?
    );
    Ok(())
}
