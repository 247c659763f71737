//! Dialog and pending-request state for the reviewed issuance workflow.

use chrono::{DateTime, Utc};

use crate::gateway::UserId;

/// Where a requester currently is in the two-step collection dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogState {
    /// Waiting for the requester's full name.
    AwaitingFullName,
    /// Waiting for the requester's organization.
    AwaitingOrganization {
        /// Full name collected in the previous step.
        full_name: String,
    },
}

/// A request that has passed collection and awaits the admin decision.
///
/// In-memory only: process restart drops all pending requests, and the pool
/// returns their reservations to `available/` on the next open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    /// The requesting user.
    pub requester: UserId,
    /// The artifact reserved for this request.
    pub config_file: String,
    /// Collected full name.
    pub full_name: String,
    /// Collected organization.
    pub organization: String,
    /// When the request reached review.
    pub requested_at: DateTime<Utc>,
}

/// An administrator's verdict on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Deliver the reserved artifact.
    Approve,
    /// Turn the request down and release the reservation.
    Reject,
}

/// What happens when a requester starts a new request while one is already
/// awaiting review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingPolicy {
    /// Refuse the new request until the outstanding one resolves.
    #[default]
    Reject,
    /// Release the outstanding reservation and replace the request.
    Replace,
}

/// Result of a requester-driven workflow step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStep {
    /// Entry accepted; the full-name prompt was sent.
    PromptedFullName,
    /// Full name stored; the organization prompt was sent.
    PromptedOrganization,
    /// Request handed to the administrator for review.
    AwaitingDecision,
    /// Pool exhausted; the request terminated before review.
    Aborted,
    /// Refused because a request is already outstanding
    /// ([`PendingPolicy::Reject`]).
    Refused,
}

/// Result of an administrator decision event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// Artifact delivered and committed. `ledger_id` is `None` when the
    /// ledger write failed after the file move (logged inconsistency).
    Delivered {
        /// Surrogate ID of the ledger row, when the write succeeded.
        ledger_id: Option<i64>,
    },
    /// Delivery or commit failed; the request terminated anyway.
    DeliveryFailed,
    /// Request rejected; the reservation was released.
    Rejected,
    /// No pending request for that requester (duplicate press or race).
    NotFound,
}

/// Result of a requester cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A dialog or pending request was cleared.
    Cancelled,
    /// There was nothing to cancel.
    NothingToCancel,
}
