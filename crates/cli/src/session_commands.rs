use {
    anyhow::{Result, bail},
    clap::Subcommand,
    clawlink_config::ClawlinkConfig,
    clawlink_mochat::{MochatApi, types::Participant},
    serde::Serialize,
    serde_json::{Value, json},
};

use crate::accounts::select_account;

#[derive(Subcommand)]
pub enum SessionAction {
    /// List sessions visible to the agent.
    List {
        /// Only sessions updated after this timestamp.
        #[arg(long)]
        updated_after: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Fetch one session.
    Get { session_id: String },
    /// Fetch a session with its participants.
    Detail { session_id: String },
    /// Page through session messages, newest first.
    Messages {
        session_id: String,
        #[arg(long)]
        before: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Create a session. Participants are `agent:<id>` or `user:<id>`.
    Create {
        #[arg(required = true)]
        participants: Vec<String>,
        #[arg(long)]
        visibility: Option<String>,
        /// Session metadata as a JSON object.
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Close a session.
    Close {
        session_id: String,
        #[arg(long)]
        policy: Option<String>,
    },
    /// Add participants to a session.
    AddParticipants {
        session_id: String,
        #[arg(required = true)]
        participants: Vec<String>,
    },
    /// Remove participants from a session.
    RemoveParticipants {
        session_id: String,
        #[arg(required = true)]
        participants: Vec<String>,
    },
    /// Long-poll a session once and print the delivered events.
    Watch {
        session_id: String,
        #[arg(long, default_value_t = 0)]
        cursor: i64,
    },
}

fn participants(raw: &[String]) -> Result<Vec<Participant>> {
    raw.iter()
        .map(|p| match Participant::parse(p) {
            Some(participant) => Ok(participant),
            None => bail!("invalid participant: {p:?}"),
        })
        .collect()
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn handle_session(
    config: &ClawlinkConfig,
    account_id: Option<&str>,
    action: SessionAction,
) -> Result<()> {
    let account = select_account(config, account_id)?;
    let api = MochatApi::for_account(&account)?;

    match action {
        SessionAction::List {
            updated_after,
            limit,
        } => print_json(&api.list_sessions(updated_after.as_deref(), limit).await?),
        SessionAction::Get { session_id } => print_json(&api.get_session(&session_id).await?),
        SessionAction::Detail { session_id } => {
            print_json(&api.session_detail(&session_id).await?)
        },
        SessionAction::Messages {
            session_id,
            before,
            limit,
        } => print_json(
            &api.session_messages(&session_id, before.as_deref(), limit)
                .await?,
        ),
        SessionAction::Create {
            participants: raw,
            visibility,
            metadata,
        } => {
            let metadata = metadata
                .map(|m| serde_json::from_str::<Value>(&m))
                .transpose()?;
            print_json(
                &api.create_session(&participants(&raw)?, visibility.as_deref(), metadata)
                    .await?,
            )
        },
        SessionAction::Close { session_id, policy } => {
            print_json(&api.close_session(&session_id, policy.as_deref()).await?)
        },
        SessionAction::AddParticipants {
            session_id,
            participants: raw,
        } => print_json(
            &api.add_participants(&session_id, &participants(&raw)?)
                .await?,
        ),
        SessionAction::RemoveParticipants {
            session_id,
            participants: raw,
        } => print_json(
            &api.remove_participants(&session_id, &participants(&raw)?)
                .await?,
        ),
        SessionAction::Watch { session_id, cursor } => {
            let response = api
                .watch(&session_id, cursor, account.watch_timeout, account.watch_limit)
                .await?;
            print_json(&json!({
                "sessionId": response.session_id,
                "cursor": response.cursor,
                "events": response.events,
            }))
        },
    }
}
