//! Fast issuance: allocate and deliver without the review step.
//!
//! `/getfast` issues to the invoker; `/force <handle>` lets an administrator
//! issue to a user resolved by handle. Both still commit the pool move and
//! record a ledger row, and both summarize to the owner afterwards. Unlike
//! the reviewed path, pool exhaustion here is reported to the invoker only.

use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use super::error::WorkflowError;
use crate::gateway::{MessagingGateway, UserId};
use crate::ledger::{ISSUE_TIME_FORMAT, IssuanceLedger, IssueKind, NewIssuance};
use crate::pool::{FilePool, PoolError};

/// Result of a fast or forced issuance attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastOutcome {
    /// Artifact delivered, committed, and summarized to the owner.
    Issued {
        /// The delivered artifact.
        config_file: String,
        /// Ledger row ID; `None` when the write failed after the move.
        ledger_id: Option<i64>,
    },
    /// Pool exhausted; the invoker was told, the owner was not.
    NoArtifacts,
    /// Delivery or commit failed; no ledger row was written.
    DeliveryFailed,
    /// Forced issue only: the target handle resolved to nobody.
    UnknownHandle,
}

/// Zero-review issuance path over the same pool and ledger.
pub struct FastIssue {
    gateway: Arc<dyn MessagingGateway>,
    pool: Arc<FilePool>,
    ledger: Arc<IssuanceLedger>,
    owner: UserId,
}

impl FastIssue {
    /// Creates the fast-issue path over its collaborators.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        pool: Arc<FilePool>,
        ledger: Arc<IssuanceLedger>,
        owner: UserId,
    ) -> Self {
        Self {
            gateway,
            pool,
            ledger,
            owner,
        }
    }

    /// `/getfast`: issue directly to the invoker.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when the step's own notifications cannot
    /// be sent or the pool fails for a reason other than exhaustion.
    pub fn fast_issue(&self, invoker: UserId) -> Result<FastOutcome, WorkflowError> {
        info!(invoker = invoker.0, "fast issue requested");
        self.issue(invoker, invoker, IssueKind::Fast)
    }

    /// `/force <handle>`: issue to a user resolved by handle, on an
    /// administrator's behalf.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when the handle lookup or the step's own
    /// notifications fail.
    pub fn force_issue(&self, admin: UserId, handle: &str) -> Result<FastOutcome, WorkflowError> {
        let Some(target) = self.gateway.resolve_user_by_handle(handle)? else {
            self.gateway
                .send_text(admin, &format!("No user found for handle @{handle}."))?;
            return Ok(FastOutcome::UnknownHandle);
        };
        info!(
            admin = admin.0,
            target = target.0,
            "forced issue requested"
        );
        self.issue(admin, target, IssueKind::AdminForced)
    }

    fn issue(
        &self,
        invoker: UserId,
        target: UserId,
        kind: IssueKind,
    ) -> Result<FastOutcome, WorkflowError> {
        let config_file = match self.pool.allocate() {
            Ok(name) => name,
            Err(PoolError::NoArtifacts) => {
                // Deliberately no owner notification on this path.
                self.gateway
                    .send_text(invoker, "All configuration keys are temporarily exhausted!")?;
                return Ok(FastOutcome::NoArtifacts);
            },
            Err(e) => return Err(e.into()),
        };

        let path = self.pool.reserved_path(&config_file);
        let caption = format!("Your configuration (fast issue): {config_file}");
        if let Err(e) = self
            .gateway
            .send_document(target, &config_file, &path, &caption)
        {
            error!(
                target = target.0,
                artifact = %config_file,
                "fast delivery failed: {e}"
            );
            if let Err(release_err) = self.pool.release(&config_file) {
                warn!(artifact = %config_file, "failed to release reservation: {release_err}");
            }
            self.send_quietly(
                invoker,
                "Could not issue a configuration. Try again later or contact the administrator.",
            );
            return Ok(FastOutcome::DeliveryFailed);
        }

        if let Err(e) = self.pool.commit(&config_file) {
            error!(
                artifact = %config_file,
                "fast issue delivered but commit failed: {e}"
            );
            self.send_quietly(
                invoker,
                &format!("Configuration {config_file} was delivered but could not be retired."),
            );
            return Ok(FastOutcome::DeliveryFailed);
        }

        let username = match self.gateway.resolve_handle(target) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(target = target.0, "handle lookup failed: {e}");
                None
            },
        };
        let ledger_id = match self.ledger.record(&NewIssuance {
            user_id: target,
            username: username.as_deref(),
            full_name: "fast issue",
            organization: "unspecified",
            config_file: &config_file,
            kind,
        }) {
            Ok(id) => Some(id),
            Err(e) => {
                error!(artifact = %config_file, "fast issue recorded nowhere: {e}");
                None
            },
        };

        let user_display = username
            .map(|h| format!("@{h}"))
            .unwrap_or_else(|| format!("ID: {target}"));
        self.send_quietly(
            self.owner,
            &format!(
                "Fast issue completed:\n\
                 Artifact: {config_file}\n\
                 User: {user_display}\n\
                 Time: {}\n\
                 Kind: {kind}",
                Utc::now().format(ISSUE_TIME_FORMAT)
            ),
        );
        self.send_quietly(
            invoker,
            &format!("Configuration {config_file} issued. The administrator has been notified."),
        );
        Ok(FastOutcome::Issued {
            config_file,
            ledger_id,
        })
    }

    fn send_quietly(&self, to: UserId, text: &str) {
        if let Err(e) = self.gateway.send_text(to, text) {
            warn!(recipient = to.0, "notification failed: {e}");
        }
    }
}
