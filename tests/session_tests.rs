//! Integration tests for remote sessions.
//!
//! These tests verify that:
//! - Command output is returned exactly, without the completion marker
//! - Success and failure are told apart by the marker that arrives
//! - Markers split across reads or echoed back by the shell are handled
//! - Timeouts and transport faults close the session
//! - File operations issue the expected commands

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use device_discovery::session::test_utils::{Reply, ScriptedChannel};
use device_discovery::session::{RemoteOs, RemoteSession, SessionError, SessionOptions};

fn open(script: ScriptedChannel) -> RemoteSession {
    RemoteSession::from_channel(Box::new(script), SessionOptions::default())
        .expect("scripted session should open")
}

fn open_with_timeout(script: ScriptedChannel, timeout: Duration) -> RemoteSession {
    let options = SessionOptions {
        command_timeout: timeout,
        ..SessionOptions::default()
    };
    RemoteSession::from_channel(Box::new(script), options).expect("scripted session should open")
}

// ============================================================================
// Command Framing Tests
// ============================================================================

mod framing_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_output_excludes_marker() {
        let mut session = open(ScriptedChannel::new().on("uname -a", Reply::success("Linux pi 6.1\n")));
        assert_eq!(session.execute("uname -a").unwrap(), "Linux pi 6.1\n");
    }

    #[test]
    fn test_empty_output() {
        let mut session = open(ScriptedChannel::new().on("true", Reply::success("")));
        assert_eq!(session.execute("true").unwrap(), "");
    }

    #[test]
    fn test_failure_carries_partial_output() {
        let script = ScriptedChannel::new().on("cat /etc/shadow", Reply::failure("Permission denied\n"));
        let mut session = open(script);
        match session.execute("cat /etc/shadow") {
            Err(SessionError::CommandFailed { command, output }) => {
                assert_eq!(command, "cat /etc/shadow");
                assert_eq!(output, "Permission denied\n");
            }
            other => panic!("expected CommandFailed, got {other:?}"),
        }
        assert!(session.is_open());
    }

    #[test]
    fn test_marker_split_across_reads() {
        let script = ScriptedChannel::new().on("ls", Reply::success("a\nb\n").in_chunks(1));
        let mut session = open(script);
        assert_eq!(session.execute("ls").unwrap(), "a\nb\n");
    }

    #[test]
    fn test_echoed_command_line_does_not_complete() {
        let script = ScriptedChannel::new()
            .with_input_echo()
            .on("hostname", Reply::success("pi-07\n"));
        let mut session = open(script);
        let out = session.execute("hostname").unwrap();
        assert!(out.ends_with("pi-07\n"));
    }

    #[test]
    fn test_sequential_commands_do_not_bleed() {
        let script = ScriptedChannel::new()
            .on("echo one", Reply::success("one\n"))
            .on("echo two", Reply::success("two\n"));
        let mut session = open(script);
        assert_eq!(session.execute("echo one").unwrap(), "one\n");
        assert_eq!(session.execute("echo two").unwrap(), "two\n");
    }

    #[test]
    fn test_login_banner_is_not_returned() {
        let script = ScriptedChannel::new()
            .with_banner("Debian GNU/Linux system\nThe programs included...\n")
            .on("whoami", Reply::success("pi\n"));
        let mut session = open(script);
        assert_eq!(session.execute("whoami").unwrap(), "pi\n");
    }

    #[test]
    fn test_chunk_callback_sees_output() {
        let script = ScriptedChannel::new().on("dmesg", Reply::success("line1\nline2\n").in_chunks(4));
        let mut session = open(script);
        let mut chunks = Vec::new();
        let out = session
            .execute_with("dmesg", &mut |chunk: &str| chunks.push(chunk.to_string()))
            .unwrap();
        assert_eq!(out, "line1\nline2\n");
        assert!(!chunks.is_empty());
        assert_eq!(chunks.concat(), out);
    }

    proptest! {
        #[test]
        fn prop_output_round_trips(output in "[a-zA-Z0-9 ./_\\n-]{0,200}", chunk in 1usize..64) {
            let script = ScriptedChannel::new().on("probe", Reply::success(output.clone()).in_chunks(chunk));
            let mut session = open(script);
            prop_assert_eq!(session.execute("probe").unwrap(), output);
        }
    }
}

// ============================================================================
// Session Lifecycle Tests
// ============================================================================

mod lifecycle_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_timeout_closes_session() {
        let script = ScriptedChannel::new().on("sleep 600", Reply::hang());
        let log = script.log();
        let mut session = open_with_timeout(script, Duration::from_millis(100));

        let err = session.execute("sleep 600").unwrap_err();
        assert!(matches!(err, SessionError::TimedOut { .. }));
        assert!(!session.is_open());
        assert_eq!(log.close_count(), 1);

        let err = session.execute("echo again").unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_connection_reset_is_transport_error() {
        let mut session = open(ScriptedChannel::new().on("reboot", Reply::reset()));
        let err = session.execute("reboot").unwrap_err();
        assert!(matches!(err, SessionError::Transport(_)));
        assert!(!session.is_open());
    }

    #[test]
    fn test_close_is_idempotent() {
        let script = ScriptedChannel::new();
        let log = script.log();
        let mut session = open(script);
        session.close();
        session.close();
        drop(session);
        assert_eq!(log.close_count(), 1);
    }

    #[test]
    fn test_drop_closes_channel() {
        let script = ScriptedChannel::new();
        let log = script.log();
        drop(open(script));
        assert_eq!(log.close_count(), 1);
    }

    #[test]
    fn test_execute_after_close() {
        let mut session = open(ScriptedChannel::new());
        session.close();
        assert!(matches!(session.execute("ls"), Err(SessionError::Closed)));
    }

    #[test]
    fn test_execute_boolean() {
        let script = ScriptedChannel::new().on("test -f /boot/config.txt", Reply::failure(""));
        let mut session = open(script);
        assert!(!session.execute_boolean("test -f /boot/config.txt").unwrap());
        assert!(session.execute_boolean("test -d /").unwrap());
    }

    #[test]
    #[should_panic(expected = "required remote command failed")]
    fn test_asserting_success_is_fatal() {
        let mut session = open(ScriptedChannel::new().on("apt-get install x", Reply::failure("E: locked\n")));
        let _ = session.execute_asserting_success("apt-get install x");
    }
}

// ============================================================================
// File Operation Tests
// ============================================================================

mod file_ops_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_linux_commands_use_sudo() {
        let script = ScriptedChannel::new();
        let log = script.log();
        let mut session = open(script);
        let mut files = session.file_ops();
        files.move_path("/tmp/a", "/opt/a").unwrap();
        files.remove("/tmp/b", false, true).unwrap();
        files.set_permissions("/opt/a", 0o644).unwrap();

        let commands = log.commands();
        assert!(commands.contains(&"sudo mv /tmp/a /opt/a".to_string()));
        assert!(commands.contains(&"sudo rm -f /tmp/b".to_string()));
        assert!(commands.contains(&"sudo chmod 644 /opt/a".to_string()));
    }

    #[test]
    fn test_mac_commands_have_no_prefix() {
        let script = ScriptedChannel::new();
        let log = script.log();
        let options = SessionOptions {
            remote_os: RemoteOs::Mac,
            ..SessionOptions::default()
        };
        let mut session = RemoteSession::from_channel(Box::new(script), options).unwrap();
        session.file_ops().move_path("/tmp/a", "/tmp/b").unwrap();
        assert!(log.commands().contains(&"mv /tmp/a /tmp/b".to_string()));
    }

    #[test]
    fn test_directory_exists() {
        let script = ScriptedChannel::new()
            .on("test -d /opt/app", Reply::success(""))
            .on("test -d /opt/none", Reply::failure(""));
        let mut session = open(script);
        let mut files = session.file_ops();
        assert!(files.directory_exists("/opt/app").unwrap());
        assert!(!files.directory_exists("/opt/none").unwrap());
    }

    #[test]
    fn test_failed_move_reports_output() {
        let script = ScriptedChannel::new().on_prefix("sudo mv", Reply::failure("mv: cannot stat\n"));
        let mut session = open(script);
        let err = session.file_ops().move_path("/x", "/y").unwrap_err();
        assert_eq!(err.output(), Some("mv: cannot stat\n"));
    }
}
