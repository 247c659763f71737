//! Messaging gateway abstraction and the inbound event model.
//!
//! The gateway is the seam between the domain core and whatever chat
//! platform carries the conversation. The core only needs five operations:
//! send text, send text with interactive choices, transfer a document,
//! resolve a user's public handle, and resolve a user by handle. Connection
//! lifecycle, retries, and rate limiting are the transport's problem.

use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Identifier of a chat principal (requester or administrator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One interactive choice attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    /// Opaque payload echoed back in the matching [`EventPayload::Choice`].
    pub data: String,
    /// Human-readable button label.
    pub label: String,
}

impl Choice {
    /// Creates a choice from its payload and label.
    pub fn new(data: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            label: label.into(),
        }
    }
}

/// Errors reported by the messaging transport.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The recipient cannot be reached (blocked the bot, never opened a
    /// private chat, unknown ID).
    #[error("recipient unreachable: {user_id}")]
    Unreachable {
        /// The recipient that could not be reached.
        user_id: UserId,
    },

    /// The transport failed to carry the message.
    #[error("transport failure: {message}")]
    Transport {
        /// Transport-provided description of the failure.
        message: String,
    },

    /// Local I/O failed while preparing a document transfer.
    #[error("i/o failure during transfer: {0}")]
    Io(#[from] std::io::Error),
}

/// Outbound surface of the chat transport.
///
/// Implementations must be shareable across threads; the dispatcher and the
/// workflow both hold a reference.
pub trait MessagingGateway: Send + Sync {
    /// Sends plain text to a recipient.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when the transport cannot deliver.
    fn send_text(&self, to: UserId, text: &str) -> Result<(), GatewayError>;

    /// Sends text with a set of interactive choices attached.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when the transport cannot deliver.
    fn send_choice(&self, to: UserId, text: &str, choices: &[Choice]) -> Result<(), GatewayError>;

    /// Transfers a named document read from `path` to a recipient.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when the file cannot be read or the
    /// transfer fails.
    fn send_document(
        &self,
        to: UserId,
        filename: &str,
        path: &Path,
        caption: &str,
    ) -> Result<(), GatewayError>;

    /// Resolves a user's public handle, if they have one.
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when the lookup itself fails; an unknown
    /// or absent handle is `Ok(None)`.
    fn resolve_handle(&self, id: UserId) -> Result<Option<String>, GatewayError>;

    /// Resolves a user ID from a public handle (forced-issue target lookup).
    ///
    /// # Errors
    ///
    /// Returns a [`GatewayError`] when the lookup itself fails; an unknown
    /// handle is `Ok(None)`.
    fn resolve_user_by_handle(&self, handle: &str) -> Result<Option<UserId>, GatewayError>;
}

/// Slash commands understood by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/start` — greeting with the request button.
    Start,
    /// `/get` — begin the reviewed request dialog.
    Get,
    /// `/getfast` — unreviewed fast issue to the invoker.
    GetFast,
    /// `/list` — paginated issuance ledger (admin only).
    List,
    /// `/grant_admin` — grant administrator rights (owner only).
    GrantAdmin,
    /// `/cancel` — abandon the in-progress dialog or pending request.
    Cancel,
    /// `/force <handle>` — forced issue to a user resolved by handle
    /// (admin only).
    ForceIssue {
        /// Target handle without the leading `@`.
        handle: String,
    },
}

impl Command {
    /// Parses a slash command from message text. Returns `None` for
    /// anything that is not a recognized command.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split_whitespace();
        match parts.next()? {
            "/start" => Some(Self::Start),
            "/get" => Some(Self::Get),
            "/getfast" => Some(Self::GetFast),
            "/list" => Some(Self::List),
            "/grant_admin" => Some(Self::GrantAdmin),
            "/cancel" => Some(Self::Cancel),
            "/force" => parts.next().map(|handle| Self::ForceIssue {
                handle: handle.trim_start_matches('@').to_string(),
            }),
            _ => None,
        }
    }
}

/// Payload of one inbound event, as a closed set of kinds.
///
/// The transport tags every event; the dispatcher pattern-matches instead of
/// probing attributes at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// A recognized slash command.
    Command(Command),
    /// Free-form text (dialog answers, numeric ID replies).
    Text(String),
    /// An interactive choice press, carrying the choice's `data` payload.
    Choice(String),
}

/// One inbound event from the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// The principal that produced the event.
    pub sender: UserId,
    /// What they sent.
    pub payload: EventPayload,
}
