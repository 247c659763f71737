//! Request/approval/issuance state machine.
//!
//! Drives a single requester through identity collection, organization
//! collection, admin review, and delivery:
//!
//! ```text
//! (entry) --> AwaitingFullName --> AwaitingOrganization --> AwaitingDecision
//!                                        |                        |
//!                                  Aborted(NoArtifacts)   Delivered | Rejected
//! ```
//!
//! A requester-issued `/cancel` terminates the instance at any point before
//! the admin decision. All terminal outcomes are absorbing: once a request
//! resolves, further decision events for it report not-found.
//!
//! State lives in mutex-guarded maps keyed by requester ID, so the workflow
//! is safe under a multi-threaded host even though the dispatcher normally
//! serializes events through a single worker.

pub mod error;
pub mod fast;
pub mod state;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::{error, info, warn};

pub use self::error::WorkflowError;
pub use self::fast::{FastIssue, FastOutcome};
pub use self::state::{
    CancelOutcome, Decision, DecisionOutcome, DialogState, PendingPolicy, PendingRequest,
    RequestStep,
};
use crate::gateway::{Choice, MessagingGateway, UserId};
use crate::ledger::{ISSUE_TIME_FORMAT, IssuanceLedger, IssueKind, NewIssuance};
use crate::pool::{FilePool, PoolError};

/// Orchestrates reviewed issuance for all requesters.
pub struct RequestWorkflow {
    gateway: Arc<dyn MessagingGateway>,
    pool: Arc<FilePool>,
    ledger: Arc<IssuanceLedger>,
    /// Administrator review channel: the owner receives approval requests.
    owner: UserId,
    policy: PendingPolicy,
    dialogs: Mutex<HashMap<UserId, DialogState>>,
    pending: Mutex<HashMap<UserId, PendingRequest>>,
}

impl RequestWorkflow {
    /// Creates the workflow over its collaborators.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        pool: Arc<FilePool>,
        ledger: Arc<IssuanceLedger>,
        owner: UserId,
        policy: PendingPolicy,
    ) -> Self {
        Self {
            gateway,
            pool,
            ledger,
            owner,
            policy,
            dialogs: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Entry event: `/get` or the request button. Starts the collection
    /// dialog, subject to the pending policy.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when a prompt cannot be sent or a replaced
    /// reservation cannot be handled.
    pub fn start_request(&self, requester: UserId) -> Result<RequestStep, WorkflowError> {
        let mut refused = false;
        let mut replaced = None;
        {
            let mut pending = self.pending()?;
            if pending.contains_key(&requester) {
                match self.policy {
                    PendingPolicy::Reject => refused = true,
                    PendingPolicy::Replace => replaced = pending.remove(&requester),
                }
            }
        }
        if refused {
            self.gateway.send_text(
                requester,
                "You already have a request awaiting review. Use /cancel to abandon it.",
            )?;
            return Ok(RequestStep::Refused);
        }
        if let Some(old) = replaced {
            info!(
                requester = requester.0,
                artifact = %old.config_file,
                "replacing outstanding request"
            );
            self.release_quietly(&old.config_file);
        }

        self.dialogs()?.insert(requester, DialogState::AwaitingFullName);
        self.gateway.send_text(requester, "Enter your full name:")?;
        Ok(RequestStep::PromptedFullName)
    }

    /// Free-text input from a requester. Returns `Ok(None)` when no dialog
    /// is in progress for them (the dispatcher then ignores the text).
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when a step's I/O fails.
    pub fn submit_input(
        &self,
        requester: UserId,
        text: &str,
    ) -> Result<Option<RequestStep>, WorkflowError> {
        let dialog = self.dialogs()?.remove(&requester);
        match dialog {
            None => Ok(None),
            Some(DialogState::AwaitingFullName) => {
                self.dialogs()?.insert(
                    requester,
                    DialogState::AwaitingOrganization {
                        full_name: text.trim().to_string(),
                    },
                );
                self.gateway.send_text(requester, "Enter your organization:")?;
                Ok(Some(RequestStep::PromptedOrganization))
            },
            Some(DialogState::AwaitingOrganization { full_name }) => self
                .finalize(requester, full_name, text.trim().to_string())
                .map(Some),
        }
    }

    /// Administrator decision event, correlated to the pending request by
    /// requester ID. Idempotent against duplicate button presses: a second
    /// decision for the same requester reports not-found.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when the decision's own notifications
    /// cannot be sent.
    pub fn decide(
        &self,
        admin: UserId,
        requester: UserId,
        decision: Decision,
    ) -> Result<DecisionOutcome, WorkflowError> {
        let request = self.pending()?.remove(&requester);
        let Some(request) = request else {
            self.gateway
                .send_text(admin, "Request not found or already handled.")?;
            return Ok(DecisionOutcome::NotFound);
        };
        match decision {
            Decision::Approve => self.approve(admin, &request),
            Decision::Reject => self.reject(admin, &request),
        }
    }

    /// Requester cancel. Honored at any point before the admin decision;
    /// clears the dialog and releases a pending reservation.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when the confirmation cannot be sent.
    pub fn cancel(&self, requester: UserId) -> Result<CancelOutcome, WorkflowError> {
        let had_dialog = self.dialogs()?.remove(&requester).is_some();
        let pending = self.pending()?.remove(&requester);
        let had_pending = pending.is_some();
        if let Some(request) = pending {
            self.release_quietly(&request.config_file);
        }
        if had_dialog || had_pending {
            info!(requester = requester.0, "request cancelled");
            self.gateway.send_text(requester, "Request cancelled.")?;
            Ok(CancelOutcome::Cancelled)
        } else {
            self.gateway.send_text(requester, "You have no active request.")?;
            Ok(CancelOutcome::NothingToCancel)
        }
    }

    /// Whether a pending request exists for the requester.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::LockPoisoned`] when the state lock is
    /// poisoned.
    pub fn has_pending(&self, requester: UserId) -> Result<bool, WorkflowError> {
        Ok(self.pending()?.contains_key(&requester))
    }

    /// Organization received: allocate, hand the request to review.
    fn finalize(
        &self,
        requester: UserId,
        full_name: String,
        organization: String,
    ) -> Result<RequestStep, WorkflowError> {
        let config_file = match self.pool.allocate() {
            Ok(name) => name,
            Err(PoolError::NoArtifacts) => {
                warn!(requester = requester.0, "request aborted: pool exhausted");
                self.gateway.send_text(
                    requester,
                    "All configuration keys are temporarily exhausted. \
                     The administrator has been notified.",
                )?;
                self.notify_owner("WARNING: the available configuration pool is empty!");
                return Ok(RequestStep::Aborted);
            },
            Err(e) => return Err(e.into()),
        };

        let request = PendingRequest {
            requester,
            config_file: config_file.clone(),
            full_name,
            organization,
            requested_at: Utc::now(),
        };
        let review_text = self.render_review_request(&request);
        if let Some(old) = self.pending()?.insert(requester, request) {
            // Entry-time policy checks make this unreachable; release the
            // superseded reservation anyway.
            warn!(
                requester = requester.0,
                artifact = %old.config_file,
                "pending request overwritten at finalize"
            );
            self.release_quietly(&old.config_file);
        }

        let choices = [
            Choice::new(format!("approve_{requester}"), "Approve"),
            Choice::new(format!("reject_{requester}"), "Reject"),
        ];
        if let Err(e) = self.gateway.send_choice(self.owner, &review_text, &choices) {
            error!(requester = requester.0, "failed to notify administrator: {e}");
            // Without a review message the reservation would leak; roll the
            // request back and tell the requester.
            self.pending()?.remove(&requester);
            self.release_quietly(&config_file);
            if let Err(text_err) = self.gateway.send_text(
                requester,
                "Could not process your request right now. Try again later.",
            ) {
                warn!(requester = requester.0, "failed to report request failure: {text_err}");
            }
            return Err(e.into());
        }

        if let Err(e) = self.gateway.send_text(
            requester,
            "Your request has been sent to the administrator. Await the decision.",
        ) {
            warn!(requester = requester.0, "failed to confirm review to requester: {e}");
        }
        Ok(RequestStep::AwaitingDecision)
    }

    fn approve(
        &self,
        admin: UserId,
        request: &PendingRequest,
    ) -> Result<DecisionOutcome, WorkflowError> {
        let path = self.pool.reserved_path(&request.config_file);
        let caption = format!("Your configuration: {}", request.config_file);
        if let Err(e) =
            self.gateway
                .send_document(request.requester, &request.config_file, &path, &caption)
        {
            error!(
                requester = request.requester.0,
                artifact = %request.config_file,
                "delivery failed: {e}"
            );
            self.release_quietly(&request.config_file);
            self.send_quietly(
                admin,
                &format!(
                    "Failed to deliver {} to user {}: {e}. \
                     The artifact was returned to the pool.",
                    request.config_file, request.requester
                ),
            );
            return Ok(DecisionOutcome::DeliveryFailed);
        }

        if let Err(e) = self.pool.commit(&request.config_file) {
            // Delivered but still in the reserved pool: the artifact is out
            // in the world and must not be offered again.
            error!(
                artifact = %request.config_file,
                "delivered but commit failed: {e}"
            );
            self.send_quietly(
                admin,
                &format!(
                    "Delivered {} to user {} but failed to move it out of the pool: {e}",
                    request.config_file, request.requester
                ),
            );
            return Ok(DecisionOutcome::DeliveryFailed);
        }

        let username = self.resolve_handle_quietly(request.requester);
        let ledger_id = match self.ledger.record(&NewIssuance {
            user_id: request.requester,
            username: username.as_deref(),
            full_name: &request.full_name,
            organization: &request.organization,
            config_file: &request.config_file,
            kind: IssueKind::Standard,
        }) {
            Ok(id) => Some(id),
            Err(e) => {
                // The file move already happened; the issuance stands with a
                // missing ledger row rather than being rolled back.
                error!(
                    artifact = %request.config_file,
                    "issuance delivered but ledger write failed: {e}"
                );
                self.send_quietly(
                    admin,
                    &format!(
                        "Configuration {} was issued but the ledger write failed.",
                        request.config_file
                    ),
                );
                None
            },
        };

        self.send_quietly(
            admin,
            &format!(
                "Issued {} to user {}\nFull name: {}\nOrganization: {}",
                request.config_file, request.requester, request.full_name, request.organization
            ),
        );
        Ok(DecisionOutcome::Delivered { ledger_id })
    }

    fn reject(
        &self,
        admin: UserId,
        request: &PendingRequest,
    ) -> Result<DecisionOutcome, WorkflowError> {
        // Best-effort: a requester who blocked the bot must not wedge the
        // rejection.
        if let Err(e) = self.gateway.send_text(
            request.requester,
            "Your configuration request was rejected by the administrator.",
        ) {
            warn!(
                requester = request.requester.0,
                "failed to notify requester of rejection: {e}"
            );
        }
        self.release_quietly(&request.config_file);
        self.gateway.send_text(
            admin,
            &format!("Request from user {} rejected.", request.requester),
        )?;
        Ok(DecisionOutcome::Rejected)
    }

    fn render_review_request(&self, request: &PendingRequest) -> String {
        let handle = match self.resolve_handle_quietly(request.requester) {
            Some(h) => format!("@{h}"),
            None => "none".to_string(),
        };
        format!(
            "New configuration request:\n\
             User ID: {}\n\
             Handle: {}\n\
             Full name: {}\n\
             Organization: {}\n\
             Requested at: {}\n\
             Artifact: {}",
            request.requester,
            handle,
            request.full_name,
            request.organization,
            request.requested_at.format(ISSUE_TIME_FORMAT),
            request.config_file
        )
    }

    fn notify_owner(&self, text: &str) {
        self.send_quietly(self.owner, text);
    }

    fn send_quietly(&self, to: UserId, text: &str) {
        if let Err(e) = self.gateway.send_text(to, text) {
            warn!(recipient = to.0, "notification failed: {e}");
        }
    }

    fn release_quietly(&self, config_file: &str) {
        if let Err(e) = self.pool.release(config_file) {
            warn!(artifact = %config_file, "failed to release reservation: {e}");
        }
    }

    fn resolve_handle_quietly(&self, id: UserId) -> Option<String> {
        match self.gateway.resolve_handle(id) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(user_id = id.0, "handle lookup failed: {e}");
                None
            },
        }
    }

    fn dialogs(&self) -> Result<MutexGuard<'_, HashMap<UserId, DialogState>>, WorkflowError> {
        self.dialogs.lock().map_err(|_| WorkflowError::LockPoisoned)
    }

    fn pending(&self) -> Result<MutexGuard<'_, HashMap<UserId, PendingRequest>>, WorkflowError> {
        self.pending.lock().map_err(|_| WorkflowError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::gateway::testing::RecordingGateway;

    const OWNER: UserId = UserId(100);
    const REQUESTER: UserId = UserId(7);

    struct Fixture {
        _tmp: TempDir,
        gateway: Arc<RecordingGateway>,
        pool: Arc<FilePool>,
        ledger: Arc<IssuanceLedger>,
        workflow: RequestWorkflow,
    }

    fn fixture(artifacts: &[&str], policy: PendingPolicy) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let pool = Arc::new(FilePool::open(tmp.path()).unwrap());
        for name in artifacts {
            fs::write(tmp.path().join("available").join(name), b"[Interface]\n").unwrap();
        }
        let ledger = Arc::new(IssuanceLedger::open_in_memory().unwrap());
        let gateway = Arc::new(RecordingGateway::new());
        let workflow = RequestWorkflow::new(
            Arc::clone(&gateway) as Arc<dyn MessagingGateway>,
            Arc::clone(&pool),
            Arc::clone(&ledger),
            OWNER,
            policy,
        );
        Fixture {
            _tmp: tmp,
            gateway,
            pool,
            ledger,
            workflow,
        }
    }

    fn complete_dialog(fx: &Fixture) {
        assert_eq!(
            fx.workflow.start_request(REQUESTER).unwrap(),
            RequestStep::PromptedFullName
        );
        assert_eq!(
            fx.workflow.submit_input(REQUESTER, "Ivan Petrov").unwrap(),
            Some(RequestStep::PromptedOrganization)
        );
        assert_eq!(
            fx.workflow.submit_input(REQUESTER, "Acme").unwrap(),
            Some(RequestStep::AwaitingDecision)
        );
    }

    #[test]
    fn test_approval_delivers_first_artifact_and_records() {
        let fx = fixture(&["a.conf", "b.conf"], PendingPolicy::default());
        complete_dialog(&fx);
        assert!(fx.workflow.has_pending(REQUESTER).unwrap());

        let outcome = fx.workflow.decide(OWNER, REQUESTER, Decision::Approve).unwrap();
        assert!(matches!(
            outcome,
            DecisionOutcome::Delivered { ledger_id: Some(_) }
        ));

        assert_eq!(
            fx.gateway.document_names(),
            vec![(REQUESTER, "a.conf".to_string())]
        );
        assert_eq!(fx.pool.list_available().unwrap(), vec!["b.conf"]);
        assert_eq!(fx.pool.list_used().unwrap(), vec!["a.conf"]);

        assert_eq!(fx.ledger.count().unwrap(), 1);
        let record = fx.ledger.list(1, 0).unwrap().remove(0);
        assert_eq!(record.kind, crate::ledger::IssueKind::Standard);
        assert_eq!(record.full_name, "Ivan Petrov");
        assert_eq!(record.organization, "Acme");
        assert!(!fx.workflow.has_pending(REQUESTER).unwrap());
    }

    #[test]
    fn test_second_decision_reports_not_found() {
        let fx = fixture(&["a.conf"], PendingPolicy::default());
        complete_dialog(&fx);

        fx.workflow.decide(OWNER, REQUESTER, Decision::Approve).unwrap();
        let second = fx.workflow.decide(OWNER, REQUESTER, Decision::Approve).unwrap();
        assert_eq!(second, DecisionOutcome::NotFound);
        // No duplicate delivery.
        assert_eq!(fx.gateway.document_names().len(), 1);
        assert_eq!(fx.ledger.count().unwrap(), 1);
    }

    #[test]
    fn test_exhausted_pool_aborts_and_notifies_owner() {
        let fx = fixture(&[], PendingPolicy::default());
        fx.workflow.start_request(REQUESTER).unwrap();
        fx.workflow.submit_input(REQUESTER, "Ivan Petrov").unwrap();
        let step = fx.workflow.submit_input(REQUESTER, "Acme").unwrap();
        assert_eq!(step, Some(RequestStep::Aborted));

        assert!(!fx.workflow.has_pending(REQUESTER).unwrap());
        assert_eq!(fx.ledger.count().unwrap(), 0);
        let owner_texts = fx.gateway.texts_for(OWNER);
        assert!(owner_texts.iter().any(|t| t.contains("pool is empty")));
        let requester_texts = fx.gateway.texts_for(REQUESTER);
        assert!(requester_texts.iter().any(|t| t.contains("exhausted")));
    }

    #[test]
    fn test_reject_releases_reservation_and_notifies() {
        let fx = fixture(&["a.conf"], PendingPolicy::default());
        complete_dialog(&fx);
        assert_eq!(fx.pool.available_count().unwrap(), 0);

        let outcome = fx.workflow.decide(OWNER, REQUESTER, Decision::Reject).unwrap();
        assert_eq!(outcome, DecisionOutcome::Rejected);

        assert_eq!(fx.pool.list_available().unwrap(), vec!["a.conf"]);
        assert_eq!(fx.ledger.count().unwrap(), 0);
        let requester_texts = fx.gateway.texts_for(REQUESTER);
        assert!(requester_texts.iter().any(|t| t.contains("rejected")));
    }

    #[test]
    fn test_delivery_failure_releases_and_terminates_request() {
        let fx = fixture(&["a.conf"], PendingPolicy::default());
        complete_dialog(&fx);
        fx.gateway.fail_documents(true);

        let outcome = fx.workflow.decide(OWNER, REQUESTER, Decision::Approve).unwrap();
        assert_eq!(outcome, DecisionOutcome::DeliveryFailed);

        assert_eq!(fx.pool.list_available().unwrap(), vec!["a.conf"]);
        assert_eq!(fx.ledger.count().unwrap(), 0);
        // Request terminated: a retry decision finds nothing.
        let retry = fx.workflow.decide(OWNER, REQUESTER, Decision::Approve).unwrap();
        assert_eq!(retry, DecisionOutcome::NotFound);
    }

    #[test]
    fn test_cancel_before_decision_releases_reservation() {
        let fx = fixture(&["a.conf"], PendingPolicy::default());
        complete_dialog(&fx);

        let outcome = fx.workflow.cancel(REQUESTER).unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert_eq!(fx.pool.list_available().unwrap(), vec!["a.conf"]);

        let decision = fx.workflow.decide(OWNER, REQUESTER, Decision::Approve).unwrap();
        assert_eq!(decision, DecisionOutcome::NotFound);
    }

    #[test]
    fn test_cancel_mid_dialog_clears_state() {
        let fx = fixture(&["a.conf"], PendingPolicy::default());
        fx.workflow.start_request(REQUESTER).unwrap();
        fx.workflow.submit_input(REQUESTER, "Ivan Petrov").unwrap();

        assert_eq!(
            fx.workflow.cancel(REQUESTER).unwrap(),
            CancelOutcome::Cancelled
        );
        // Dialog gone: further text is not workflow input.
        assert_eq!(fx.workflow.submit_input(REQUESTER, "Acme").unwrap(), None);
    }

    #[test]
    fn test_cancel_without_request_reports_nothing() {
        let fx = fixture(&[], PendingPolicy::default());
        assert_eq!(
            fx.workflow.cancel(REQUESTER).unwrap(),
            CancelOutcome::NothingToCancel
        );
    }

    #[test]
    fn test_reject_policy_refuses_second_request() {
        let fx = fixture(&["a.conf", "b.conf"], PendingPolicy::Reject);
        complete_dialog(&fx);

        let step = fx.workflow.start_request(REQUESTER).unwrap();
        assert_eq!(step, RequestStep::Refused);
        // The first reservation is untouched.
        assert_eq!(fx.pool.list_available().unwrap(), vec!["b.conf"]);
    }

    #[test]
    fn test_replace_policy_releases_previous_reservation() {
        let fx = fixture(&["a.conf", "b.conf"], PendingPolicy::Replace);
        complete_dialog(&fx);
        assert_eq!(fx.pool.list_available().unwrap(), vec!["b.conf"]);

        // New request replaces the outstanding one; a.conf returns first.
        assert_eq!(
            fx.workflow.start_request(REQUESTER).unwrap(),
            RequestStep::PromptedFullName
        );
        assert_eq!(
            fx.pool.list_available().unwrap(),
            vec!["a.conf", "b.conf"]
        );
        fx.workflow.submit_input(REQUESTER, "Ivan Petrov").unwrap();
        fx.workflow.submit_input(REQUESTER, "Acme Two").unwrap();

        let outcome = fx.workflow.decide(OWNER, REQUESTER, Decision::Approve).unwrap();
        assert!(matches!(outcome, DecisionOutcome::Delivered { .. }));
        assert_eq!(
            fx.gateway.document_names(),
            vec![(REQUESTER, "a.conf".to_string())]
        );
    }

    #[test]
    fn test_review_message_carries_metadata_and_choices() {
        let fx = fixture(&["a.conf"], PendingPolicy::default());
        fx.gateway
            .handles
            .lock()
            .unwrap()
            .insert(REQUESTER.0, "ivan".to_string());
        complete_dialog(&fx);

        let choices = fx.gateway.choices.lock().unwrap();
        let (to, text, options) = &choices[0];
        assert_eq!(*to, OWNER);
        assert!(text.contains("@ivan"));
        assert!(text.contains("Ivan Petrov"));
        assert!(text.contains("Acme"));
        assert!(text.contains("a.conf"));
        let data: Vec<&str> = options.iter().map(|c| c.data.as_str()).collect();
        assert_eq!(data, vec!["approve_7", "reject_7"]);
    }

    #[test]
    fn test_free_text_without_dialog_is_ignored() {
        let fx = fixture(&["a.conf"], PendingPolicy::default());
        assert_eq!(fx.workflow.submit_input(REQUESTER, "hello").unwrap(), None);
    }
}
