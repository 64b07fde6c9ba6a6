use std::process::Stdio;

use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::core::collaborators::AlertChannel;

/// Alert channel that spawns an external command and never waits for it.
#[derive(Debug, Clone)]
pub struct CommandAlert {
    program: String,
    args: Vec<String>,
}

impl CommandAlert {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parses a whitespace-separated command line such as `python send_mail.py`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

impl AlertChannel for CommandAlert {
    fn notify(&self) {
        let Ok(runtime) = Handle::try_current() else {
            error!(program = %self.program, "alert raised outside the runtime; command not launched");
            return;
        };
        let spawned = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(mut child) => {
                info!(program = %self.program, pid = child.id(), "alert command launched");
                let program = self.program.clone();
                runtime.spawn(async move {
                    match child.wait().await {
                        Ok(status) => debug!(%program, %status, "alert command exited"),
                        Err(e) => warn!(%program, error = %e, "alert command could not be reaped"),
                    }
                });
            }
            Err(e) => error!(program = %self.program, error = %e, "failed to launch alert command"),
        }
    }
}

/// Alert channel used when no command is configured: the alert only reaches the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyAlert;

impl AlertChannel for LogOnlyAlert {
    fn notify(&self) {
        warn!("disconnect alert raised; no alert command configured");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_line() {
        let alert = CommandAlert::from_command_line("python send_mail.py --to ops").unwrap();
        assert_eq!(alert.program, "python");
        assert_eq!(alert.args, vec!["send_mail.py", "--to", "ops"]);
        assert!(CommandAlert::from_command_line("").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn notify_launches_the_command() {
        let tmp = tempfile::tempdir().unwrap();
        let marker = tmp.path().join("alerted");
        let alert = CommandAlert::new(
            "sh",
            vec!["-c".to_string(), format!("touch {}", marker.display())],
        );
        alert.notify();

        for _ in 0..100 {
            if marker.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("alert command never ran");
    }

    #[tokio::test]
    async fn missing_program_does_not_panic() {
        CommandAlert::new("definitely-not-an-alert-binary", Vec::new()).notify();
        LogOnlyAlert.notify();
    }

    #[test]
    fn notify_outside_a_runtime_is_logged_not_fatal() {
        CommandAlert::new("sh", vec!["-c".to_string(), "true".to_string()]).notify();
    }
}
