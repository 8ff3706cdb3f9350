use std::path::Path;

use serde::Serialize;
use stash_core::auth::CredentialStore;
use stash_core::sync::{SyncOutcome, SyncReport};

use crate::commands::common::{format_timestamp, open_local, open_session};
use crate::config::load_settings;
use crate::credentials::KeyringCredentialStore;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub configured: bool,
    pub signed_in: bool,
    pub initial_sync_complete: bool,
    pub watermark: Option<i64>,
    pub watermark_iso: Option<String>,
    pub pending_operations: u64,
    pub tabs: usize,
    pub inbox_messages: usize,
}

pub async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let session = open_session(db_path).await?;
    if !session.auth().is_authenticated() {
        return Err(CliError::NotSignedIn);
    }

    match session.sync_now().await? {
        SyncOutcome::Completed(report) => println!("{}", describe_report(&report)),
        SyncOutcome::Skipped => println!("Another sync is already running"),
    }
    Ok(())
}

pub fn describe_report(report: &SyncReport) -> String {
    let mut summary = format!(
        "Sync completed: {} tab(s), {} message(s) and {} deletion(s) applied; {} local change(s) pushed",
        report.tabs_applied,
        report.messages_applied,
        report.deletions_applied,
        report.drain.acknowledged
    );
    if report.initial_upload {
        summary.push_str("; initial upload done");
    }
    if report.drain.retried > 0 {
        summary.push_str(&format!("; {} awaiting retry", report.drain.retried));
    }
    if report.drain.dropped > 0 {
        summary.push_str(&format!("; {} dropped", report.drain.dropped));
    }
    if report.apply_failures > 0 {
        summary.push_str(&format!("; {} remote change(s) failed", report.apply_failures));
    }
    summary
}

pub async fn run_status(as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let settings = load_settings().map_err(CliError::Config)?;
    let signed_in = settings.api_base_url.as_deref().is_some_and(|url| {
        matches!(
            KeyringCredentialStore::for_backend(url).load(),
            Ok(Some(_))
        )
    });

    let local = open_local(db_path).await?;
    let watermark = local.store.watermark().await?;
    let status = StatusItem {
        configured: settings.api_base_url.is_some(),
        signed_in,
        initial_sync_complete: local.store.initial_sync_complete().await?,
        watermark,
        watermark_iso: watermark.map(format_timestamp),
        pending_operations: local.editor.pending_count().await?,
        tabs: local.editor.list_tabs().await?.len(),
        inbox_messages: local.editor.list_messages(None).await?.len(),
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Configured:     {}", yes_no(status.configured));
    println!("Signed in:      {}", yes_no(status.signed_in));
    println!("Initial sync:   {}", yes_no(status.initial_sync_complete));
    println!(
        "Last sync:      {}",
        status.watermark_iso.as_deref().unwrap_or("never")
    );
    println!("Pending:        {}", status.pending_operations);
    println!("Tabs:           {}", status.tabs);
    println!("Inbox messages: {}", status.inbox_messages);
    Ok(())
}

const fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

pub async fn run_watch(db_path: &Path) -> Result<(), CliError> {
    let session = open_session(db_path).await?;
    if !session.auth().is_authenticated() {
        return Err(CliError::NotSignedIn);
    }

    let mut state = session.orchestrator().subscribe_state();
    session.start().await?;
    println!("Watching for changes, press Ctrl-C to stop");

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                break;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                println!("sync: {}", current.label());
            }
        }
    }

    session.stop().await;
    println!("Stopped");
    Ok(())
}
