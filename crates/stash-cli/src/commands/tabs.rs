use std::path::Path;

use crate::cli::TabCommands;
use crate::commands::common::{
    format_tab_lines, open_local, resolve_tab, resolve_title, short_id, tab_to_list_item,
    TabListItem,
};
use crate::error::CliError;

pub async fn run_tab(command: TabCommands, db_path: &Path) -> Result<(), CliError> {
    let local = open_local(db_path).await?;
    let editor = &local.editor;

    match command {
        TabCommands::List { json } => {
            let tabs = editor.list_tabs().await?;
            if json {
                let items = tabs.iter().map(tab_to_list_item).collect::<Vec<TabListItem>>();
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else if tabs.is_empty() {
                println!("No tabs yet. Create one with `stash tab add <TITLE>`.");
            } else {
                for line in format_tab_lines(&tabs) {
                    println!("{line}");
                }
            }
        }
        TabCommands::Add { title } => {
            let title = resolve_title(&title)?;
            let tab = editor.create_tab(&title).await?;
            println!("{}", tab.local_id);
        }
        TabCommands::Rename { id, title } => {
            let title = resolve_title(&title)?;
            let tab = resolve_tab(editor, &id).await?;
            let tab = editor.rename_tab(&tab.local_id, &title).await?;
            println!("Renamed tab {} to {}", short_id(&tab.local_id.to_string()), tab.title);
        }
        TabCommands::Reorder { id, position } => {
            let tab = resolve_tab(editor, &id).await?;
            editor.reorder_tab(&tab.local_id, position).await?;
            println!("Moved tab {} to position {position}", short_id(&tab.local_id.to_string()));
        }
        TabCommands::Delete { id } => {
            let tab = resolve_tab(editor, &id).await?;
            editor.delete_tab(&tab.local_id).await?;
            println!("Deleted tab {}", tab.title);
        }
    }
    Ok(())
}
