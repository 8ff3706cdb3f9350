use stash_core::config::SyncSettings;

use crate::cli::CompletionShell;
use crate::commands::common::{
    find_by_fragment, format_relative_time, format_timestamp, normalize_content,
    normalize_identifier, open_local, resolve_message, resolve_tab, short_id,
};
use crate::commands::completions::run_completions;
use crate::commands::messages::{run_delete, run_move};
use crate::commands::sync::describe_report;
use crate::config::{apply_overrides, load_stored_settings, save_settings};
use crate::error::CliError;
use stash_core::editor::MessageDraft;
use stash_core::sync::{DrainReport, SyncReport};

#[test]
fn normalize_content_trims_and_rejects_empty() {
    assert_eq!(normalize_content("  hello  "), Some("hello".to_string()));
    assert_eq!(normalize_content(" \n\t "), None);
}

#[test]
fn normalize_content_keeps_multiline_text() {
    assert_eq!(
        normalize_content("line 1\nline 2\n"),
        Some("line 1\nline 2".to_string())
    );
}

#[test]
fn normalize_identifier_rejects_empty() {
    assert!(matches!(
        normalize_identifier("   "),
        Err(CliError::EmptyIdentifier)
    ));
    assert_eq!(normalize_identifier(" abc ").unwrap(), "abc");
}

#[test]
fn format_relative_time_units() {
    let now = 10 * 7 * 24 * 60 * 60 * 1000;
    assert_eq!(format_relative_time(now - 10_000, now), "just now");
    assert_eq!(format_relative_time(now - 5 * 60_000, now), "5m ago");
    assert_eq!(format_relative_time(now - 3 * 3_600_000, now), "3h ago");
    assert_eq!(format_relative_time(now - 2 * 86_400_000, now), "2d ago");
    assert_eq!(format_relative_time(now - 21 * 86_400_000, now), "3w ago");
}

#[test]
fn format_timestamp_returns_utc_label() {
    assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
}

#[test]
fn short_id_keeps_trailing_characters() {
    assert_eq!(
        short_id("0190a1b2-c3d4-7e5f-8a9b-1234deadbeef"),
        "deadbeef"
    );
    assert_eq!(short_id("abc"), "abc");
}

fn ids() -> Vec<String> {
    vec![
        "0190a1b2-0000-7000-8000-aaaa11112222".to_string(),
        "0190a1b2-0000-7000-8000-bbbb33334444".to_string(),
        "0190a1b2-0000-7000-8000-cccc33334444".to_string(),
    ]
}

#[test]
fn find_by_fragment_matches_exact_prefix_and_suffix() {
    let items = ids();
    let exact = find_by_fragment(&items, &items[1], "tab", Clone::clone).unwrap();
    assert_eq!(exact, &items[1]);

    let suffix = find_by_fragment(&items, "11112222", "tab", Clone::clone).unwrap();
    assert_eq!(suffix, &items[0]);

    let uppercase = find_by_fragment(&items, "CCCC33334444", "tab", Clone::clone).unwrap();
    assert_eq!(uppercase, &items[2]);
}

#[test]
fn find_by_fragment_rejects_ambiguous_and_missing() {
    let items = ids();
    assert!(matches!(
        find_by_fragment(&items, "33334444", "message", Clone::clone),
        Err(CliError::AmbiguousIdentifier(_))
    ));
    assert!(matches!(
        find_by_fragment(&items, "0190a1b2", "message", Clone::clone),
        Err(CliError::AmbiguousIdentifier(_))
    ));
    assert!(matches!(
        find_by_fragment(&items, "ffff", "message", Clone::clone),
        Err(CliError::NotFound("message", _))
    ));
}

#[test]
fn apply_overrides_prefers_explicit_urls() {
    let stored = SyncSettings {
        api_base_url: Some("https://stored.example.com".to_string()),
        ..SyncSettings::default()
    };

    let settings = apply_overrides(
        stored.clone(),
        Some(" https://override.example.com/ ".to_string()),
        None,
    )
    .unwrap();
    assert_eq!(
        settings.api_base_url.as_deref(),
        Some("https://override.example.com")
    );
    assert_eq!(
        settings.resolved_realtime_url().as_deref(),
        Some("wss://override.example.com/v1/realtime")
    );

    let untouched = apply_overrides(stored, Some("  ".to_string()), None).unwrap();
    assert_eq!(
        untouched.api_base_url.as_deref(),
        Some("https://stored.example.com")
    );
}

#[test]
fn apply_overrides_rejects_unsupported_scheme() {
    let result = apply_overrides(
        SyncSettings::default(),
        None,
        Some("http://realtime.example.com".to_string()),
    );
    assert!(result.is_err());
}

#[test]
fn settings_survive_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");
    let settings = SyncSettings {
        api_base_url: Some("https://api.example.com".to_string()),
        sync_interval_secs: 120,
        ..SyncSettings::default()
    };

    save_settings(&settings, &path).unwrap();

    assert_eq!(load_stored_settings(&path).unwrap(), settings);
}

#[test]
fn missing_config_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = load_stored_settings(&dir.path().join("absent.json")).unwrap();
    assert_eq!(loaded, SyncSettings::default());
}

#[test]
fn describe_report_mentions_retries_and_drops() {
    let report = SyncReport {
        tabs_applied: 1,
        messages_applied: 2,
        drain: DrainReport {
            acknowledged: 3,
            retried: 1,
            dropped: 1,
        },
        ..SyncReport::default()
    };

    let summary = describe_report(&report);
    assert!(summary.contains("1 tab(s), 2 message(s)"));
    assert!(summary.contains("3 local change(s) pushed"));
    assert!(summary.contains("1 awaiting retry"));
    assert!(summary.contains("1 dropped"));
}

#[tokio::test(flavor = "multi_thread")]
async fn run_delete_accepts_trailing_fragment() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stash.db");
    let local = open_local(&db_path).await.unwrap();
    let kept = local
        .editor
        .create_message(MessageDraft::text(None, "Keep me"))
        .await
        .unwrap();
    let doomed = local
        .editor
        .create_message(MessageDraft::text(None, "Delete me"))
        .await
        .unwrap();

    run_delete(&short_id(&doomed.local_id.to_string()), &db_path)
        .await
        .unwrap();

    let remaining = local.store.list_all_messages().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].local_id, kept.local_id);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_move_places_message_into_tab() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("stash.db");
    let local = open_local(&db_path).await.unwrap();
    let tab = local.editor.create_tab("Reading").await.unwrap();
    let message = local
        .editor
        .create_message(MessageDraft::text(None, "a link"))
        .await
        .unwrap();

    run_move(
        &message.local_id.to_string(),
        Some(short_id(&tab.local_id.to_string()).as_str()),
        None,
        &db_path,
    )
    .await
    .unwrap();

    let moved = resolve_message(&local.store, &message.local_id.to_string())
        .await
        .unwrap();
    assert_eq!(moved.tab_local_id, Some(tab.local_id));
    let resolved = resolve_tab(&local.editor, &tab.local_id.to_string())
        .await
        .unwrap();
    assert_eq!(resolved.title, "Reading");
}

#[tokio::test(flavor = "multi_thread")]
async fn resolve_tab_reports_missing_tab() {
    let dir = tempfile::tempdir().unwrap();
    let local = open_local(&dir.path().join("stash.db")).await.unwrap();

    let error = resolve_tab(&local.editor, "nothing").await.unwrap_err();
    assert!(matches!(error, CliError::NotFound("tab", _)));
}

#[test]
fn run_completions_writes_bash_script_file() {
    let dir = tempfile::tempdir().unwrap();
    let output_path = dir.path().join("stash.bash");

    run_completions(CompletionShell::Bash, Some(output_path.as_path())).unwrap();

    let script = std::fs::read_to_string(&output_path).unwrap();
    assert!(script.contains("_stash()"));
    assert!(script.contains("complete -F _stash"));
}
