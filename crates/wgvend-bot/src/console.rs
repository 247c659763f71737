//! Line-oriented console transport.
//!
//! Lets the service run without a chat platform: inbound events are typed
//! on stdin as `<user-id> <message>`, outbound traffic is printed to
//! stdout, and delivered documents are copied into an outbox directory.
//! Useful for local operation and smoke testing; a real platform adapter
//! implements the same [`MessagingGateway`] trait.
//!
//! Input forms:
//!
//! ```text
//! 7 /get                  command from user 7
//! 7 Ivan Petrov           free text from user 7
//! 100 press approve_7     choice press from user 100
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use wgvend_core::gateway::{
    Choice, Command, EventPayload, GatewayError, InboundEvent, MessagingGateway, UserId,
};

/// Console-backed gateway. Outbound messages go to stdout; documents are
/// copied under `outbox/<user-id>/`.
pub struct ConsoleGateway {
    outbox: PathBuf,
}

impl ConsoleGateway {
    /// Creates the gateway with the given outbox root.
    #[must_use]
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }
}

impl MessagingGateway for ConsoleGateway {
    fn send_text(&self, to: UserId, text: &str) -> Result<(), GatewayError> {
        println!("[to {to}] {text}");
        Ok(())
    }

    fn send_choice(&self, to: UserId, text: &str, choices: &[Choice]) -> Result<(), GatewayError> {
        println!("[to {to}] {text}");
        for choice in choices {
            println!("[to {to}]   ({}) {}", choice.data, choice.label);
        }
        Ok(())
    }

    fn send_document(
        &self,
        to: UserId,
        filename: &str,
        path: &Path,
        caption: &str,
    ) -> Result<(), GatewayError> {
        let dir = self.outbox.join(to.to_string());
        fs::create_dir_all(&dir)?;
        fs::copy(path, dir.join(filename))?;
        println!("[to {to}] <document {filename}> {caption}");
        Ok(())
    }

    // The console has no handle registry.
    fn resolve_handle(&self, _id: UserId) -> Result<Option<String>, GatewayError> {
        Ok(None)
    }

    fn resolve_user_by_handle(&self, _handle: &str) -> Result<Option<UserId>, GatewayError> {
        Ok(None)
    }
}

/// Parses one console input line into an inbound event. Returns `None` for
/// blank lines and lines without a leading numeric user ID.
#[must_use]
pub fn parse_line(line: &str) -> Option<InboundEvent> {
    let trimmed = line.trim();
    let (id_part, rest) = trimmed.split_once(char::is_whitespace)?;
    let sender = UserId(id_part.parse::<i64>().ok()?);
    let rest = rest.trim();
    if rest.is_empty() {
        return None;
    }

    let payload = if let Some(data) = rest.strip_prefix("press ") {
        EventPayload::Choice(data.trim().to_string())
    } else if let Some(command) = Command::parse(rest) {
        EventPayload::Command(command)
    } else {
        EventPayload::Text(rest.to_string())
    };
    Some(InboundEvent { sender, payload })
}
