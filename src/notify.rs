//! Outcome notification channel
//!
//! The runner reports every cycle through a [`Notifier`]. Delivery is
//! fire-and-forget: a delivery failure is logged by the runner and never
//! changes the cycle's result.
//!
//! Implementations:
//! - [`LogNotifier`]: writes the outcome to the log (the default)
//! - [`CommandNotifier`]: pipes the body into an external program such as
//!   `mail -s {subject} {recipient}`
//! - [`RecordingNotifier`]: keeps notifications in memory

use crate::error::{Result, SnapError};
use parking_lot::Mutex;
use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;
use tracing::{info, warn};

/// A delivered notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Subject line
    pub subject: String,
    /// Message body
    pub body: String,
    /// Recipient address
    pub recipient: String,
}

/// Delivery channel for cycle outcomes
pub trait Notifier: Send + Sync {
    /// Send `subject` and `body` to `recipient`
    ///
    /// # Errors
    ///
    /// - [`SnapError::Notify`] when delivery fails
    fn notify(&self, subject: &str, body: &str, recipient: &str) -> Result<()>;
}

/// Notifier that writes to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, subject: &str, body: &str, recipient: &str) -> Result<()> {
        if subject == crate::types::SUBJECT_SUCCESS {
            info!(recipient, "{}: {}", subject, body);
        } else {
            warn!(recipient, "{}: {}", subject, body);
        }
        Ok(())
    }
}

/// Notifier running an external program per message
///
/// Arguments may contain `{subject}` and `{recipient}` placeholders. The body
/// is written to the program's standard input.
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    program: String,
    args: Vec<String>,
}

impl CommandNotifier {
    /// Notifier running `program` with `args`
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a command line such as `mail -s {subject} {recipient}`
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| SnapError::config("notification command is empty"))?;
        Ok(Self::new(program, parts.collect()))
    }

    /// Arguments with placeholders substituted
    pub fn render_args(&self, subject: &str, recipient: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{subject}", subject).replace("{recipient}", recipient))
            .collect()
    }
}

impl Notifier for CommandNotifier {
    fn notify(&self, subject: &str, body: &str, recipient: &str) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(self.render_args(subject, recipient))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SnapError::Notify(format!("failed to start {}: {}", self.program, e)))?;

        // Feed stdin from its own thread while stderr is drained and the child reaped
        let stdin = child.stdin.take();
        let (written, output) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || match stdin {
                Some(mut stdin) => stdin.write_all(body.as_bytes()),
                None => Ok(()),
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });

        let output = output.map_err(|e| SnapError::Notify(e.to_string()))?;
        if !output.status.success() {
            return Err(SnapError::Notify(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(SnapError::Notify(format!("failed to write body: {}", e))),
            Err(_) => return Err(SnapError::Notify("body writer panicked".to_string())),
        }

        info!("Email sent to {}: {}", recipient, subject);
        Ok(())
    }
}

/// Notifier keeping every message in memory
///
/// Clones share the same message list.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages delivered so far
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, subject: &str, body: &str, recipient: &str) -> Result<()> {
        self.sent.lock().push(Notification {
            subject: subject.to_string(),
            body: body.to_string(),
            recipient: recipient.to_string(),
        });
        Ok(())
    }
}
