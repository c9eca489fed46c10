//! Mail notifier: pipes a plain-text message into a local mail command.

use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{Context, bail};
use tracing::debug;

use fleetwatch_autoscale::Notifier;

/// Sends emergency mail through a sendmail-compatible command.
pub struct MailNotifier {
    program: String,
    args: Vec<String>,
    sender: String,
}

impl MailNotifier {
    /// `command` is split on whitespace, e.g. `"sendmail -t"`.
    pub fn new(command: &str) -> anyhow::Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let Some(program) = parts.next() else {
            bail!("mail command is empty");
        };
        let sender = std::env::var("USER").unwrap_or_else(|_| "fleetwatch".to_string());
        Ok(Self {
            program,
            args: parts.collect(),
            sender,
        })
    }
}

/// Build the RFC 822 message handed to the mail command.
pub fn compose_message(sender: &str, recipient: &str, action: &str, summary: &str) -> String {
    format!(
        "From: {sender}\nTo: {recipient}\nSubject: Watch warning\n\nAction: {action}\n\nINSTANCES SUMMARY:\n{summary}"
    )
}

impl Notifier for MailNotifier {
    fn notify(&self, action: &str, summary: &str, recipient: &str) -> anyhow::Result<()> {
        let message = compose_message(&self.sender, recipient, action, summary);
        debug!(program = %self.program, %recipient, "sending mail");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to execute '{}'", self.program))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message.as_bytes())?;
        }
        let status = child.wait()?;
        if !status.success() {
            let code = status.code().unwrap_or(-1);
            bail!("{} exited with code {code}", self.program);
        }
        Ok(())
    }
}
