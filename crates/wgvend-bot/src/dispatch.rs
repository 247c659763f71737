//! Single-worker event dispatcher.
//!
//! Consumes inbound events from a channel one at a time and routes them to
//! the workflow, the fast-issue path, the ledger view, or the grant flow.
//! Every event is handled behind a top-level catch: a failed handler is
//! logged and reported to the sender as text, and the worker moves on to
//! the next event.

use std::collections::HashSet;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{error, info, warn};

use wgvend_core::admin::{AdminDirectory, AdminError};
use wgvend_core::gateway::{
    Choice, Command, EventPayload, GatewayError, InboundEvent, MessagingGateway, UserId,
};
use wgvend_core::workflow::{Decision, FastIssue, RequestWorkflow, WorkflowError};

use crate::listing::LedgerView;

/// Choice payload on the `/start` greeting button.
const CHOICE_REQUEST: &str = "request_config";

/// Errors surfaced by event handlers. The dispatch loop logs these and
/// keeps running.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A workflow or listing operation failed.
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    /// The admin directory could not be read or appended.
    #[error(transparent)]
    Admin(#[from] AdminError),

    /// An outbound message could not be sent.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A session-state lock was poisoned by a panicking thread.
    #[error("session state lock poisoned")]
    LockPoisoned,
}

/// Routes inbound events and owns the per-user prompt state that does not
/// belong to the workflow (grant-admin ID prompts).
pub struct Dispatcher {
    gateway: Arc<dyn MessagingGateway>,
    workflow: Arc<RequestWorkflow>,
    fast: Arc<FastIssue>,
    admins: Arc<AdminDirectory>,
    listing: Arc<LedgerView>,
    owner: UserId,
    grant_prompts: Mutex<HashSet<UserId>>,
}

impl Dispatcher {
    /// Creates the dispatcher over its collaborators.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        workflow: Arc<RequestWorkflow>,
        fast: Arc<FastIssue>,
        admins: Arc<AdminDirectory>,
        listing: Arc<LedgerView>,
        owner: UserId,
    ) -> Self {
        Self {
            gateway,
            workflow,
            fast,
            admins,
            listing,
            owner,
            grant_prompts: Mutex::new(HashSet::new()),
        }
    }

    /// Drains the event channel until every sender is dropped.
    pub fn run(&self, events: &Receiver<InboundEvent>) {
        info!("dispatcher started");
        for event in events.iter() {
            self.dispatch(&event);
        }
        info!("event channel closed, dispatcher stopping");
    }

    /// Handles one event, absorbing handler failures.
    pub fn dispatch(&self, event: &InboundEvent) {
        if let Err(e) = self.handle(event) {
            error!(sender = event.sender.0, "event handler failed: {e}");
            if let Err(send_err) = self.gateway.send_text(
                event.sender,
                "Something went wrong while handling your request. Try again later.",
            ) {
                warn!(sender = event.sender.0, "failed to report error: {send_err}");
            }
        }
    }

    fn handle(&self, event: &InboundEvent) -> Result<(), DispatchError> {
        let sender = event.sender;
        match &event.payload {
            EventPayload::Command(command) => self.handle_command(sender, command),
            EventPayload::Text(text) => self.handle_text(sender, text),
            EventPayload::Choice(data) => self.handle_choice(sender, data),
        }
    }

    fn handle_command(&self, sender: UserId, command: &Command) -> Result<(), DispatchError> {
        match command {
            Command::Start => {
                self.gateway.send_choice(
                    sender,
                    "Hello! This bot issues WireGuard configuration files.\n\
                     Press the button below or use /get to request one.",
                    &[Choice::new(CHOICE_REQUEST, "Request configuration")],
                )?;
            },
            Command::Get => {
                self.workflow.start_request(sender)?;
            },
            Command::GetFast => {
                self.fast.fast_issue(sender)?;
            },
            Command::ForceIssue { handle } => {
                if !self.require_admin(sender)? {
                    return Ok(());
                }
                self.fast.force_issue(sender, handle)?;
            },
            Command::List => {
                if !self.require_admin(sender)? {
                    return Ok(());
                }
                self.listing.open(sender)?;
            },
            Command::GrantAdmin => {
                if sender != self.owner {
                    self.gateway
                        .send_text(sender, "Only the owner can grant administrator rights.")?;
                    return Ok(());
                }
                self.grant_prompts()?.insert(sender);
                self.gateway
                    .send_text(sender, "Enter the user ID to grant administrator rights:")?;
            },
            Command::Cancel => {
                // Cancel clears every prompt the sender may have armed, not
                // just the request dialog.
                self.grant_prompts()?.remove(&sender);
                self.listing.clear_prompt(sender)?;
                self.workflow.cancel(sender)?;
            },
        }
        Ok(())
    }

    /// Free text is claimed by at most one consumer, checked in priority
    /// order: delete-ID prompt, grant-ID prompt, request dialog. Unclaimed
    /// text is ignored.
    fn handle_text(&self, sender: UserId, text: &str) -> Result<(), DispatchError> {
        if self.listing.awaiting_delete_id(sender)? {
            self.listing.submit_delete_id(sender, text)?;
            return Ok(());
        }
        if self.grant_prompts()?.contains(&sender) {
            self.submit_grant_id(sender, text)?;
            return Ok(());
        }
        if self.workflow.submit_input(sender, text)?.is_none() {
            info!(sender = sender.0, "ignoring text outside any dialog");
        }
        Ok(())
    }

    fn handle_choice(&self, sender: UserId, data: &str) -> Result<(), DispatchError> {
        if data == CHOICE_REQUEST {
            self.workflow.start_request(sender)?;
            return Ok(());
        }
        if let Some(rest) = data.strip_prefix("approve_") {
            return self.handle_decision(sender, rest, Decision::Approve);
        }
        if let Some(rest) = data.strip_prefix("reject_") {
            return self.handle_decision(sender, rest, Decision::Reject);
        }
        if !self.admins.is_admin(sender) {
            warn!(sender = sender.0, data, "non-admin pressed a privileged choice");
            return Ok(());
        }
        if !self.listing.handle_choice(sender, data)? {
            warn!(sender = sender.0, data, "unrecognized choice payload");
        }
        Ok(())
    }

    fn handle_decision(
        &self,
        sender: UserId,
        requester_part: &str,
        decision: Decision,
    ) -> Result<(), DispatchError> {
        if !self.require_admin(sender)? {
            return Ok(());
        }
        let Ok(requester) = requester_part.parse::<i64>() else {
            warn!(sender = sender.0, payload = requester_part, "malformed decision payload");
            self.gateway
                .send_text(sender, "Malformed decision payload; request not handled.")?;
            return Ok(());
        };
        self.workflow.decide(sender, UserId(requester), decision)?;
        Ok(())
    }

    fn submit_grant_id(&self, owner: UserId, text: &str) -> Result<(), DispatchError> {
        let Ok(raw_id) = text.trim().parse::<i64>() else {
            self.gateway
                .send_text(owner, "Enter a numeric user ID.")?;
            return Ok(());
        };
        self.grant_prompts()?.remove(&owner);
        let granted = self.admins.grant(UserId(raw_id))?;
        if granted {
            self.gateway
                .send_text(owner, &format!("User {raw_id} is now an administrator."))?;
            self.notify_granted(UserId(raw_id));
        } else {
            self.gateway
                .send_text(owner, &format!("User {raw_id} is already an administrator."))?;
        }
        Ok(())
    }

    /// Best-effort: the new admin may never have opened a chat with the bot.
    fn notify_granted(&self, id: UserId) {
        if let Err(e) = self
            .gateway
            .send_text(id, "You have been granted administrator rights.")
        {
            warn!(user_id = id.0, "could not notify new administrator: {e}");
        }
    }

    fn require_admin(&self, sender: UserId) -> Result<bool, DispatchError> {
        if self.admins.is_admin(sender) {
            return Ok(true);
        }
        self.gateway
            .send_text(sender, "This command is available to administrators only.")?;
        Ok(false)
    }

    fn grant_prompts(&self) -> Result<MutexGuard<'_, HashSet<UserId>>, DispatchError> {
        self.grant_prompts
            .lock()
            .map_err(|_| DispatchError::LockPoisoned)
    }
}
