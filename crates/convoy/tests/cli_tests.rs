//! CLI integration tests.
//!
//! Exercises the `convoy` binary end-to-end against a temp data directory.
//! No Anthropic API key is configured, so the provider falls back to the
//! mock provider (§9) — these tests only exercise commands that don't
//! require a turn to actually complete.

use std::path::PathBuf;
use std::process::Command;

fn binary_path() -> PathBuf {
    let mut path = std::env::current_exe()
        .expect("failed to get current exe")
        .parent()
        .expect("failed to get parent directory")
        .to_path_buf();

    if path.ends_with("deps") {
        path.pop();
    }

    path.join("convoy")
}

fn convoy(data_dir: &std::path::Path) -> Command {
    let mut cmd = Command::new(binary_path());
    cmd.env_remove("ANTHROPIC_API_KEY")
        .arg("--data-dir")
        .arg(data_dir);
    cmd
}

#[test]
fn test_help_command() {
    let output = Command::new(binary_path())
        .arg("--help")
        .output()
        .expect("failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Durable conversational orchestrator"));
    assert!(stdout.contains("--model"));
    assert!(stdout.contains("--data-dir"));
}

#[test]
fn test_subcommand_help() {
    let subcommands = [
        "new", "list", "show", "set-title", "delete", "send", "edit", "unqueue", "status",
        "cancel", "attach", "chat",
    ];

    for cmd in subcommands {
        let output = Command::new(binary_path())
            .args([cmd, "--help"])
            .output()
            .unwrap_or_else(|e| panic!("failed to execute {cmd} --help: {e}"));

        assert!(
            output.status.success(),
            "{cmd} --help should succeed, got: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }
}

#[test]
fn test_invalid_subcommand() {
    let output = Command::new(binary_path())
        .arg("nonexistent-subcommand")
        .output()
        .expect("failed to execute command");

    assert!(!output.status.success());
}

#[test]
fn test_create_list_show_delete_conversation() {
    let temp = tempfile::tempdir().expect("failed to create temp dir");

    let new_output = convoy(temp.path())
        .args(["new", "usr_test", "--title", "Integration test chat"])
        .output()
        .expect("failed to run new");
    assert!(
        new_output.status.success(),
        "new failed: {}",
        String::from_utf8_lossy(&new_output.stderr)
    );
    let created: serde_json::Value =
        serde_json::from_slice(&new_output.stdout).expect("new did not print valid JSON");
    let conversation_id = created["id"].as_str().expect("missing id").to_string();
    assert_eq!(created["title"], "Integration test chat");
    assert_eq!(created["user_id"], "usr_test");

    let list_output = convoy(temp.path())
        .args(["list", "usr_test"])
        .output()
        .expect("failed to run list");
    assert!(list_output.status.success());
    let listed: serde_json::Value =
        serde_json::from_slice(&list_output.stdout).expect("list did not print valid JSON");
    let conversations = listed.as_array().expect("list output should be an array");
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["id"], conversation_id);

    let show_output = convoy(temp.path())
        .args(["show", &conversation_id])
        .output()
        .expect("failed to run show");
    assert!(show_output.status.success());
    let snapshot: serde_json::Value =
        serde_json::from_slice(&show_output.stdout).expect("show did not print valid JSON");
    assert_eq!(snapshot["conversation"]["id"], conversation_id);
    assert_eq!(snapshot["messages"].as_array().unwrap().len(), 0);

    let set_title_output = convoy(temp.path())
        .args(["set-title", &conversation_id, "Renamed"])
        .output()
        .expect("failed to run set-title");
    assert!(set_title_output.status.success());
    let renamed: serde_json::Value =
        serde_json::from_slice(&set_title_output.stdout).expect("set-title did not print valid JSON");
    assert_eq!(renamed["title"], "Renamed");

    let delete_output = convoy(temp.path())
        .args(["delete", &conversation_id])
        .output()
        .expect("failed to run delete");
    assert!(delete_output.status.success());

    let show_after_delete = convoy(temp.path())
        .args(["show", &conversation_id])
        .output()
        .expect("failed to run show after delete");
    assert!(!show_after_delete.status.success());
}

#[test]
fn test_send_queues_message_and_returns_without_blocking() {
    let temp = tempfile::tempdir().expect("failed to create temp dir");

    let new_output = convoy(temp.path())
        .args(["new", "usr_test", "--title", "Chat"])
        .output()
        .expect("failed to run new");
    let created: serde_json::Value = serde_json::from_slice(&new_output.stdout).unwrap();
    let conversation_id = created["id"].as_str().unwrap().to_string();

    // With no API key, the provider falls back to a mock that never
    // completes a turn; `send` still returns promptly because queuing only
    // starts the turn in a detached task.
    let send_output = convoy(temp.path())
        .args(["send", &conversation_id, "hello", "there"])
        .output()
        .expect("failed to run send");
    assert!(
        send_output.status.success(),
        "send failed: {}",
        String::from_utf8_lossy(&send_output.stderr)
    );
    let message: serde_json::Value = serde_json::from_slice(&send_output.stdout).unwrap();
    // `send` prints the Message as it was right after creation, before
    // `process_queue`'s synchronous dequeue step advances it.
    assert_eq!(message["status"], "queued");
    let message_id = message["id"].as_str().unwrap().to_string();

    // By the time the `send` process exits, `process_queue` has already run
    // synchronously up through marking the triggering message `completed`
    // (only the provider turn itself is left running in a detached task,
    // which dies with the process). So a later `edit` against the same,
    // now-persisted message is rejected (§8 boundary behavior).
    let edit_output = convoy(temp.path())
        .args(["edit", &conversation_id, &message_id, "hello", "again"])
        .output()
        .expect("failed to run edit");
    assert!(!edit_output.status.success());
    let stderr = String::from_utf8_lossy(&edit_output.stderr);
    assert!(stderr.contains("not") || stderr.contains("queued"), "unexpected error: {stderr}");
}

#[test]
fn test_status_with_no_active_prompt() {
    let temp = tempfile::tempdir().expect("failed to create temp dir");

    let new_output = convoy(temp.path())
        .args(["new", "usr_test", "--title", "Chat"])
        .output()
        .unwrap();
    let created: serde_json::Value = serde_json::from_slice(&new_output.stdout).unwrap();
    let conversation_id = created["id"].as_str().unwrap().to_string();

    let status_output = convoy(temp.path())
        .args(["status", &conversation_id])
        .output()
        .expect("failed to run status");
    assert!(status_output.status.success());
    let stdout = String::from_utf8_lossy(&status_output.stdout);
    assert_eq!(stdout.trim(), "null");
}
