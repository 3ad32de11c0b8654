/*
 * Robin mail transfer agent
 *
 * Copyright (C) 2024 - the Robin authors
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

//! Local delivery through an external LDA, invoked per recipient with the
//! message on its standard input.

use robin_common::envelope::{Action, Envelope};
use robin_protocol::{Reply, Transaction, Verb};

/// `sysexits.h` codes the LDA contract cares about.
pub const EX_NOUSER: i32 = 67;
pub const EX_TEMPFAIL: i32 = 75;

/// What the LDA process left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdaOutput {
    pub exit_code: i32,
    pub stderr_tail: String,
}

/// Seam between the delivery loop and the subprocess, so classification is
/// testable without spawning anything.
#[async_trait::async_trait]
pub trait LdaRunner: Send + Sync {
    async fn run(&self, recipient: &str, message: &[u8]) -> std::io::Result<LdaOutput>;
}

/// The real thing: `<path> <flag> <recipient>` with the message piped in.
pub struct LdaProcess {
    pub path: std::path::PathBuf,
    pub recipient_flag: String,
}

impl LdaProcess {
    #[must_use]
    pub fn from_config(config: &robin_config::server::Lda) -> Self {
        Self {
            path: config.path.clone(),
            recipient_flag: config.recipient_flag.clone(),
        }
    }
}

#[async_trait::async_trait]
impl LdaRunner for LdaProcess {
    async fn run(&self, recipient: &str, message: &[u8]) -> std::io::Result<LdaOutput> {
        use tokio::io::AsyncWriteExt;

        let mut child = tokio::process::Command::new(&self.path)
            .arg(&self.recipient_flag)
            .arg(recipient)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(message).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        Ok(LdaOutput {
            // Killed by a signal reads as a temporary failure.
            exit_code: output.status.code().unwrap_or(EX_TEMPFAIL),
            stderr_tail: stderr
                .chars()
                .rev()
                .take(512)
                .collect::<String>()
                .chars()
                .rev()
                .collect(),
        })
    }
}

/// Map an exit code to the per-recipient outcome.
#[must_use]
pub fn classify_exit(output: &LdaOutput) -> Action {
    match output.exit_code {
        0 => Action::Delivered,
        EX_NOUSER => Action::Failed {
            diagnostic_code: Some(format!("5.1.1 lda exit {EX_NOUSER}")),
        },
        EX_TEMPFAIL => Action::Delayed {
            diagnostic_code: Some(format!("4.2.0 lda exit {EX_TEMPFAIL}")),
        },
        code => Action::Delayed {
            diagnostic_code: Some(format!("4.3.0 lda exit {code}")),
        },
    }
}

fn reply_for(output: &LdaOutput) -> Reply {
    let tail = if output.stderr_tail.is_empty() {
        String::new()
    } else {
        format!(": {}", output.stderr_tail.replace(['\r', '\n'], " "))
    };

    #[allow(clippy::expect_used)]
    match output.exit_code {
        0 => "250 2.0.0 delivered locally\r\n".parse(),
        EX_NOUSER => format!("550 5.1.1 no such user (lda exit {EX_NOUSER}{tail})\r\n").parse(),
        code => format!("451 4.3.0 local delivery failed (lda exit {code}{tail})\r\n").parse(),
    }
    .expect("static reply is well-formed")
}

/// Deliver every pending recipient of the envelope through the LDA.
/// Failures stay per-recipient and never abort the rest of the envelope.
pub async fn deliver_local(runner: &dyn LdaRunner, envelope: &mut Envelope) {
    let message = match envelope.body.read().await {
        Ok(message) => message,
        Err(error) => {
            tracing::error!(%error, "cannot read the spooled message body");
            for recipient in &mut envelope.recipients {
                recipient.action = Some(Action::Delayed {
                    diagnostic_code: Some("4.3.0 message body unavailable".to_owned()),
                });
            }
            return;
        }
    };

    let mut outcomes = vec![];
    for recipient in envelope.pending_recipients() {
        let forward_path = recipient.forward_path.to_string();
        match runner.run(&forward_path, &message).await {
            Ok(output) => {
                tracing::debug!(
                    recipient = %forward_path,
                    exit_code = output.exit_code,
                    "lda finished"
                );
                outcomes.push((forward_path, classify_exit(&output), reply_for(&output)));
            }
            Err(error) => {
                tracing::warn!(%error, recipient = %forward_path, "failed to spawn the lda");
                outcomes.push((
                    forward_path,
                    Action::Delayed {
                        diagnostic_code: Some(format!("4.3.0 {error}")),
                    },
                    #[allow(clippy::expect_used)]
                    "451 4.3.0 local delivery agent unavailable\r\n"
                        .parse()
                        .expect("static reply is well-formed"),
                ));
            }
        }
    }

    for (forward_path, action, reply) in outcomes {
        envelope.log.push(Transaction::new(
            Verb::Data,
            format!("LDA {forward_path}"),
            reply,
        ));
        if let Some(recipient) = envelope
            .recipients
            .iter_mut()
            .find(|r| r.forward_path.to_string() == forward_path)
        {
            recipient.action = Some(action);
        }
    }
}
