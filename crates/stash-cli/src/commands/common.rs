use std::io::{self, IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use stash_core::auth::SharedCredentialStore;
use stash_core::editor::LocalEditor;
use stash_core::media::NoopMediaPipeline;
use stash_core::services::LocalStore;
use stash_core::session::SyncSession;
use stash_core::sync::PendingOperationLog;
use stash_core::{Message, Tab};

use crate::config::load_settings;
use crate::credentials::KeyringCredentialStore;
use crate::error::CliError;

const SHORT_ID_LEN: usize = 8;

/// Store and editor for commands that never touch the network.
pub struct LocalContext {
    pub store: LocalStore,
    pub editor: LocalEditor,
}

pub async fn open_local(db_path: &Path) -> Result<LocalContext, CliError> {
    let store = LocalStore::open_path(db_path).await?;
    let log = PendingOperationLog::spawn(store.clone());
    Ok(LocalContext {
        editor: LocalEditor::new(store.clone(), log),
        store,
    })
}

pub async fn open_session(db_path: &Path) -> Result<SyncSession, CliError> {
    let settings = load_settings().map_err(CliError::Config)?;
    let Some(api_base_url) = settings.api_base_url.clone() else {
        return Err(CliError::SyncNotConfigured);
    };
    let credentials: SharedCredentialStore =
        Arc::new(KeyringCredentialStore::for_backend(&api_base_url));
    Ok(SyncSession::open(&settings, db_path, credentials, Arc::new(NoopMediaPipeline)).await?)
}

#[derive(Debug, Serialize)]
pub struct TabListItem {
    pub id: String,
    pub server_id: Option<String>,
    pub title: String,
    pub position: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize)]
pub struct MessageListItem {
    pub id: String,
    pub server_id: Option<String>,
    pub tab_id: Option<String>,
    pub preview: String,
    pub text: String,
    pub position: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub relative_time: String,
}

pub fn tab_to_list_item(tab: &Tab) -> TabListItem {
    TabListItem {
        id: tab.local_id.to_string(),
        server_id: tab.server_id.clone(),
        title: tab.title.clone(),
        position: tab.position,
        updated_at: tab.updated_at,
    }
}

pub fn message_to_list_item(message: &Message) -> MessageListItem {
    let now_ms = Utc::now().timestamp_millis();
    MessageListItem {
        id: message.local_id.to_string(),
        server_id: message.server_id.clone(),
        tab_id: message.tab_local_id.map(|tab| tab.to_string()),
        preview: message_preview(message, 80),
        text: message.text.clone(),
        position: message.position,
        created_at: message.created_at,
        updated_at: message.updated_at,
        relative_time: format_relative_time(message.updated_at, now_ms),
    }
}

/// Trailing characters of an id; the leading ones only encode creation time.
pub fn short_id(id: &str) -> String {
    let count = id.chars().count();
    id.chars().skip(count.saturating_sub(SHORT_ID_LEN)).collect()
}

const fn sync_label(server_id: Option<&String>) -> &'static str {
    if server_id.is_some() {
        "synced"
    } else {
        "local"
    }
}

pub fn format_tab_lines(tabs: &[Tab]) -> Vec<String> {
    tabs.iter()
        .map(|tab| {
            let id = short_id(&tab.local_id.to_string());
            let status = sync_label(tab.server_id.as_ref());
            format!("{id:<8}  {:<30}  {status}", tab.title)
        })
        .collect()
}

pub fn format_message_lines(messages: &[Message]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    messages
        .iter()
        .map(|message| {
            let id = short_id(&message.local_id.to_string());
            let preview = message_preview(message, 40);
            let relative_time = format_relative_time(message.updated_at, now_ms);
            let status = sync_label(message.server_id.as_ref());
            format!("{id:<8}  {preview:<40}  {relative_time:<10}  {status}")
        })
        .collect()
}

pub fn message_preview(message: &Message, max_chars: usize) -> String {
    let first_line = message.text.lines().next().unwrap_or("").trim();
    let collapsed = first_line.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

/// Pick the single item whose id equals, starts with or ends with `fragment`.
pub fn find_by_fragment<'a, T>(
    items: &'a [T],
    fragment: &str,
    kind: &'static str,
    id_of: impl Fn(&T) -> String,
) -> Result<&'a T, CliError> {
    let fragment = normalize_identifier(fragment)?.to_lowercase();
    if let Some(exact) = items.iter().find(|item| id_of(item) == fragment) {
        return Ok(exact);
    }

    let matches = items
        .iter()
        .filter(|item| {
            let id = id_of(item);
            id.starts_with(&fragment) || id.ends_with(&fragment)
        })
        .collect::<Vec<_>>();
    match matches.as_slice() {
        [] => Err(CliError::NotFound(kind, fragment)),
        [single] => Ok(*single),
        many => Err(CliError::AmbiguousIdentifier(format!(
            "{kind} id '{fragment}' matches {} entries; use more characters",
            many.len()
        ))),
    }
}

pub async fn resolve_tab(editor: &LocalEditor, fragment: &str) -> Result<Tab, CliError> {
    let tabs = editor.list_tabs().await?;
    find_by_fragment(&tabs, fragment, "tab", |tab| tab.local_id.to_string()).cloned()
}

pub async fn resolve_optional_tab(
    editor: &LocalEditor,
    fragment: Option<&str>,
) -> Result<Option<Tab>, CliError> {
    match fragment {
        Some(fragment) => resolve_tab(editor, fragment).await.map(Some),
        None => Ok(None),
    }
}

pub async fn resolve_message(store: &LocalStore, fragment: &str) -> Result<Message, CliError> {
    let messages = store.list_all_messages().await?;
    find_by_fragment(&messages, fragment, "message", |message| {
        message.local_id.to_string()
    })
    .cloned()
}

/// Text from the arguments, else from piped stdin.
pub fn resolve_content(parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&parts.join(" ")) {
        return Ok(content);
    }
    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }
    Err(CliError::EmptyContent)
}

pub fn resolve_title(parts: &[String]) -> Result<String, CliError> {
    normalize_content(&parts.join(" ")).ok_or(CliError::EmptyTitle)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub fn normalize_identifier(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptyIdentifier)
    } else {
        Ok(trimmed.to_string())
    }
}

pub fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.lock().read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}
