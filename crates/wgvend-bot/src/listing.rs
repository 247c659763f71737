//! Paginated ledger view and delete flow for administrators.
//!
//! Each administrator gets an independent page cursor. The delete choice
//! arms a numeric-ID prompt; the next free-text message from that admin is
//! consumed as the target ID.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{error, info};

use wgvend_core::gateway::{Choice, MessagingGateway, UserId};
use wgvend_core::ledger::{IssuanceLedger, IssuanceRecord, LedgerError};
use wgvend_core::workflow::WorkflowError;

/// Choice payloads understood by the view.
const CHOICE_PREV: &str = "list_prev";
const CHOICE_NEXT: &str = "list_next";
const CHOICE_DELETE: &str = "delete_record";

/// Per-admin paginated view over the issuance ledger.
pub struct LedgerView {
    gateway: Arc<dyn MessagingGateway>,
    ledger: Arc<IssuanceLedger>,
    page_size: u32,
    pages: Mutex<HashMap<UserId, u32>>,
    delete_prompts: Mutex<HashSet<UserId>>,
}

impl LedgerView {
    /// Creates the view over the gateway and ledger.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        ledger: Arc<IssuanceLedger>,
        page_size: u32,
    ) -> Self {
        Self {
            gateway,
            ledger,
            page_size: page_size.max(1),
            pages: Mutex::new(HashMap::new()),
            delete_prompts: Mutex::new(HashSet::new()),
        }
    }

    /// `/list`: reset the cursor and show the first page.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when the ledger read or the send fails.
    pub fn open(&self, admin: UserId) -> Result<(), WorkflowError> {
        self.pages()?.insert(admin, 0);
        self.delete_prompts()?.remove(&admin);
        self.show_page(admin)
    }

    /// Handles a navigation or delete choice press. Returns `false` when
    /// the payload is not a listing choice.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when the resulting page cannot be shown.
    pub fn handle_choice(&self, admin: UserId, data: &str) -> Result<bool, WorkflowError> {
        match data {
            CHOICE_PREV => {
                {
                    let mut pages = self.pages()?;
                    let page = pages.entry(admin).or_insert(0);
                    *page = page.saturating_sub(1);
                }
                self.show_page(admin)?;
            },
            CHOICE_NEXT => {
                {
                    let mut pages = self.pages()?;
                    let page = pages.entry(admin).or_insert(0);
                    *page = page.saturating_add(1);
                }
                self.show_page(admin)?;
            },
            CHOICE_DELETE => {
                self.delete_prompts()?.insert(admin);
                self.gateway
                    .send_text(admin, "Enter the record ID to delete:")?;
            },
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Whether the next free-text message from this user is a delete-ID
    /// reply.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::LockPoisoned`] when the prompt set lock is
    /// poisoned.
    pub fn awaiting_delete_id(&self, user: UserId) -> Result<bool, WorkflowError> {
        Ok(self.delete_prompts()?.contains(&user))
    }

    /// Consumes the armed delete prompt with the admin's reply.
    ///
    /// Non-numeric input reports the problem and keeps the prompt armed;
    /// an unknown ID reports not-found; success re-shows the first page.
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError`] when the ledger delete or a send fails.
    pub fn submit_delete_id(&self, admin: UserId, text: &str) -> Result<(), WorkflowError> {
        let Ok(record_id) = text.trim().parse::<i64>() else {
            self.gateway
                .send_text(admin, "Enter a numeric record ID.")?;
            return Ok(());
        };
        self.delete_prompts()?.remove(&admin);

        if self.ledger.delete_by_id(record_id).map_err(log_ledger)? {
            info!(record_id, admin = admin.0, "ledger record deleted by admin");
            self.gateway
                .send_text(admin, &format!("Record #{record_id} deleted."))?;
            self.pages()?.insert(admin, 0);
            self.show_page(admin)?;
        } else {
            self.gateway
                .send_text(admin, "No record with that ID was found.")?;
        }
        Ok(())
    }

    /// Drops any armed delete prompt for the user (requester `/cancel`).
    ///
    /// # Errors
    ///
    /// Returns [`WorkflowError::LockPoisoned`] when the prompt set lock is
    /// poisoned.
    pub fn clear_prompt(&self, user: UserId) -> Result<(), WorkflowError> {
        self.delete_prompts()?.remove(&user);
        Ok(())
    }

    fn show_page(&self, admin: UserId) -> Result<(), WorkflowError> {
        let page = *self.pages()?.get(&admin).unwrap_or(&0);
        let offset = page * self.page_size;
        let records = self
            .ledger
            .list(self.page_size, offset)
            .map_err(log_ledger)?;
        let total = self.ledger.count().map_err(log_ledger)?;

        if records.is_empty() && page == 0 {
            self.gateway
                .send_text(admin, "The issuance ledger is empty.")?;
            return Ok(());
        }

        let mut text = format!("Issued configurations (page {}):\n\n", page + 1);
        for record in &records {
            text.push_str(&render_record(record));
            text.push('\n');
        }

        let mut choices = vec![Choice::new(CHOICE_DELETE, "Delete record")];
        if page > 0 {
            choices.push(Choice::new(CHOICE_PREV, "Back"));
        }
        if u64::from(offset + self.page_size) < total {
            choices.push(Choice::new(CHOICE_NEXT, "Forward"));
        }
        self.gateway.send_choice(admin, &text, &choices)?;
        Ok(())
    }

    fn pages(&self) -> Result<MutexGuard<'_, HashMap<UserId, u32>>, WorkflowError> {
        self.pages.lock().map_err(|_| WorkflowError::LockPoisoned)
    }

    fn delete_prompts(&self) -> Result<MutexGuard<'_, HashSet<UserId>>, WorkflowError> {
        self.delete_prompts
            .lock()
            .map_err(|_| WorkflowError::LockPoisoned)
    }
}

fn render_record(record: &IssuanceRecord) -> String {
    let handle = record.username.as_deref().unwrap_or("n/a");
    format!(
        "#{} — {}\n\
         User: @{handle} (ID: {})\n\
         Full name: {}\n\
         Organization: {}\n\
         Issued at: {}\n\
         Kind: {}\n",
        record.id,
        record.config_file,
        record.user_id,
        record.full_name,
        record.organization,
        record.issue_time,
        record.kind
    )
}

fn log_ledger(e: LedgerError) -> WorkflowError {
    error!("ledger operation failed: {e}");
    WorkflowError::Ledger(e)
}
