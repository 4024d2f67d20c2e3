//! Teardown integration tests.
//!
//! Kept in its own binary: it counts this process's open descriptors, so
//! no other test may open or close any while it runs.

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use shell_bridge::{
    ClientMessage, CommandOutput, ServerMessage, Session, SessionConfig, SessionContext,
    ShellConfig,
};

const WAIT: Duration = Duration::from_secs(10);

fn open_fds() -> usize {
    std::fs::read_dir("/proc/self/fd").unwrap().count()
}

fn shell_config() -> Option<ShellConfig> {
    let base = ShellConfig {
        settle_delay: Duration::from_millis(20),
        line_delay: Duration::from_millis(10),
        terminate_timeout: Duration::from_millis(500),
        ..ShellConfig::default()
    };
    if Path::new("/bin/bash").exists() {
        Some(base)
    } else if Path::new("/bin/sh").exists() {
        Some(ShellConfig {
            program: "/bin/sh".to_string(),
            args: Vec::new(),
            ..base
        })
    } else {
        None
    }
}

fn command(line: &str) -> ClientMessage {
    ClientMessage::Command {
        command: line.to_string(),
    }
}

async fn next_output(rx: &mut mpsc::Receiver<ServerMessage>) -> CommandOutput {
    loop {
        let message = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for output")
            .expect("channel closed");
        if let ServerMessage::Output(output) = message {
            return output;
        }
    }
}

async fn shell_output_until(rx: &mut mpsc::Receiver<ServerMessage>, needle: &str) {
    let mut seen = String::new();
    while !seen.contains(needle) {
        let message = timeout(WAIT, rx.recv())
            .await
            .expect("timed out waiting for shell output")
            .expect("channel closed");
        if let ServerMessage::ShellOutput { output, .. } = message {
            seen.push_str(&output);
        }
    }
}

#[tokio::test]
async fn test_exit_releases_pty_with_background_job() {
    let Some(shell) = shell_config() else {
        return;
    };
    if !Path::new("/proc/self/fd").exists() {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let mut ctx = SessionContext::new(dir.path());
    ctx.set_env("PATH", "/usr/local/bin:/usr/bin:/bin");
    let config = SessionConfig {
        shell,
        ..SessionConfig::default()
    };
    let (tx, mut rx) = mpsc::channel(256);
    let mut session = Session::with_context(config, ctx, tx);

    let before = open_fds();

    session.handle(command("interactive")).await.unwrap();
    assert_eq!(next_output(&mut rx).await.interactive, Some(true));

    // Under job control the job gets its own process group, outlives the
    // shell and keeps the secondary side open.
    session.handle(command("sleep 3 &")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    session.handle(command("echo job_$((40+2))")).await.unwrap();
    shell_output_until(&mut rx, "job_42").await;

    session.handle(command("exit")).await.unwrap();
    assert_eq!(next_output(&mut rx).await.interactive, Some(false));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(open_fds() <= before);
}
