use std::path::Path;

use stash_core::editor::MessageDraft;

use crate::commands::common::{
    format_message_lines, message_to_list_item, open_local, resolve_content, resolve_message,
    resolve_optional_tab, short_id, MessageListItem,
};
use crate::error::CliError;

pub async fn run_add(
    content_parts: &[String],
    tab: Option<&str>,
    db_path: &Path,
) -> Result<(), CliError> {
    let content = resolve_content(content_parts)?;
    let local = open_local(db_path).await?;
    let tab = resolve_optional_tab(&local.editor, tab).await?;

    let message = local
        .editor
        .create_message(MessageDraft::text(
            tab.map(|tab| tab.local_id),
            content,
        ))
        .await?;
    println!("{}", message.local_id);
    Ok(())
}

pub async fn run_list(
    tab: Option<&str>,
    limit: usize,
    as_json: bool,
    db_path: &Path,
) -> Result<(), CliError> {
    let local = open_local(db_path).await?;
    let tab = resolve_optional_tab(&local.editor, tab).await?;
    let mut messages = local
        .editor
        .list_messages(tab.as_ref().map(|tab| &tab.local_id))
        .await?;
    messages.truncate(limit);

    if as_json {
        let items = messages
            .iter()
            .map(message_to_list_item)
            .collect::<Vec<MessageListItem>>();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for line in format_message_lines(&messages) {
            println!("{line}");
        }
    }
    Ok(())
}

pub async fn run_edit(id: &str, content_parts: &[String], db_path: &Path) -> Result<(), CliError> {
    let content = resolve_content(content_parts)?;
    let local = open_local(db_path).await?;
    let message = resolve_message(&local.store, id).await?;

    let message = local.editor.edit_message(&message.local_id, &content).await?;
    println!("Updated message {}", short_id(&message.local_id.to_string()));
    Ok(())
}

pub async fn run_move(
    id: &str,
    tab: Option<&str>,
    position: Option<i64>,
    db_path: &Path,
) -> Result<(), CliError> {
    let local = open_local(db_path).await?;
    let message = resolve_message(&local.store, id).await?;
    let tab = resolve_optional_tab(&local.editor, tab).await?;

    local
        .editor
        .move_message(&message.local_id, tab.as_ref().map(|tab| tab.local_id), position)
        .await?;
    let target = tab.map_or_else(|| "the inbox".to_string(), |tab| tab.title);
    println!(
        "Moved message {} to {target}",
        short_id(&message.local_id.to_string())
    );
    Ok(())
}

pub async fn run_delete(id: &str, db_path: &Path) -> Result<(), CliError> {
    let local = open_local(db_path).await?;
    let message = resolve_message(&local.store, id).await?;

    local.editor.delete_message(&message.local_id).await?;
    println!("Deleted message {}", short_id(&message.local_id.to_string()));
    Ok(())
}
