//! Shared fixture for service-level tests: an in-memory recording gateway
//! plus a fully wired dispatcher over temp-directory storage.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use wgvend_bot::dispatch::Dispatcher;
use wgvend_bot::listing::LedgerView;
use wgvend_core::admin::AdminDirectory;
use wgvend_core::gateway::{
    Choice, Command, EventPayload, GatewayError, InboundEvent, MessagingGateway, UserId,
};
use wgvend_core::ledger::IssuanceLedger;
use wgvend_core::pool::FilePool;
use wgvend_core::workflow::{FastIssue, PendingPolicy, RequestWorkflow};

pub const OWNER: UserId = UserId(100);
pub const REQUESTER: UserId = UserId(7);

/// Gateway double recording all outbound traffic.
#[derive(Default)]
pub struct MockGateway {
    pub texts: Mutex<Vec<(UserId, String)>>,
    pub choices: Mutex<Vec<(UserId, String, Vec<Choice>)>>,
    pub documents: Mutex<Vec<(UserId, String)>>,
    pub fail_documents: AtomicBool,
    pub handles: Mutex<HashMap<i64, String>>,
}

impl MockGateway {
    pub fn fail_documents(&self, fail: bool) {
        self.fail_documents.store(fail, Ordering::SeqCst);
    }

    pub fn texts_for(&self, to: UserId) -> Vec<String> {
        self.texts
            .lock()
            .unwrap()
            .iter()
            .filter(|(recipient, _)| *recipient == to)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn last_text_for(&self, to: UserId) -> Option<String> {
        self.texts_for(to).pop()
    }

    pub fn document_names(&self) -> Vec<(UserId, String)> {
        self.documents.lock().unwrap().clone()
    }

    pub fn choices_for(&self, to: UserId) -> Vec<(String, Vec<Choice>)> {
        self.choices
            .lock()
            .unwrap()
            .iter()
            .filter(|(recipient, _, _)| *recipient == to)
            .map(|(_, text, options)| (text.clone(), options.clone()))
            .collect()
    }
}

impl MessagingGateway for MockGateway {
    fn send_text(&self, to: UserId, text: &str) -> Result<(), GatewayError> {
        self.texts.lock().unwrap().push((to, text.to_string()));
        Ok(())
    }

    fn send_choice(&self, to: UserId, text: &str, choices: &[Choice]) -> Result<(), GatewayError> {
        self.choices
            .lock()
            .unwrap()
            .push((to, text.to_string(), choices.to_vec()));
        Ok(())
    }

    fn send_document(
        &self,
        to: UserId,
        filename: &str,
        _path: &Path,
        _caption: &str,
    ) -> Result<(), GatewayError> {
        if self.fail_documents.load(Ordering::SeqCst) {
            return Err(GatewayError::Unreachable { user_id: to });
        }
        self.documents
            .lock()
            .unwrap()
            .push((to, filename.to_string()));
        Ok(())
    }

    fn resolve_handle(&self, id: UserId) -> Result<Option<String>, GatewayError> {
        Ok(self.handles.lock().unwrap().get(&id.0).cloned())
    }

    fn resolve_user_by_handle(&self, handle: &str) -> Result<Option<UserId>, GatewayError> {
        Ok(self
            .handles
            .lock()
            .unwrap()
            .iter()
            .find(|(_, h)| h.as_str() == handle)
            .map(|(id, _)| UserId(*id)))
    }
}

pub struct Service {
    pub _tmp: TempDir,
    pub gateway: Arc<MockGateway>,
    pub pool: Arc<FilePool>,
    pub ledger: Arc<IssuanceLedger>,
    pub admins: Arc<AdminDirectory>,
    pub dispatcher: Dispatcher,
}

impl Service {
    pub fn command(&self, sender: UserId, command: Command) {
        self.dispatcher.dispatch(&InboundEvent {
            sender,
            payload: EventPayload::Command(command),
        });
    }

    pub fn text(&self, sender: UserId, text: &str) {
        self.dispatcher.dispatch(&InboundEvent {
            sender,
            payload: EventPayload::Text(text.to_string()),
        });
    }

    pub fn press(&self, sender: UserId, data: &str) {
        self.dispatcher.dispatch(&InboundEvent {
            sender,
            payload: EventPayload::Choice(data.to_string()),
        });
    }

    /// Drives the requester through the full reviewed-request dialog.
    pub fn complete_request_dialog(&self, requester: UserId) {
        self.command(requester, Command::Get);
        self.text(requester, "Ivan Petrov");
        self.text(requester, "Acme");
    }
}

pub fn service(artifacts: &[&str], policy: PendingPolicy) -> Service {
    service_with_page_size(artifacts, policy, 5)
}

pub fn service_with_page_size(
    artifacts: &[&str],
    policy: PendingPolicy,
    page_size: u32,
) -> Service {
    let tmp = TempDir::new().unwrap();
    let pool = Arc::new(FilePool::open(&tmp.path().join("configs")).unwrap());
    for name in artifacts {
        fs::write(
            tmp.path().join("configs").join("available").join(name),
            b"[Interface]\n",
        )
        .unwrap();
    }
    let ledger = Arc::new(IssuanceLedger::open_in_memory().unwrap());
    let admins = Arc::new(AdminDirectory::new(tmp.path().join("admins.txt")));
    admins.bootstrap(OWNER).unwrap();
    let gateway = Arc::new(MockGateway::default());
    let shared: Arc<dyn MessagingGateway> = Arc::clone(&gateway) as Arc<dyn MessagingGateway>;

    let workflow = Arc::new(RequestWorkflow::new(
        Arc::clone(&shared),
        Arc::clone(&pool),
        Arc::clone(&ledger),
        OWNER,
        policy,
    ));
    let fast = Arc::new(FastIssue::new(
        Arc::clone(&shared),
        Arc::clone(&pool),
        Arc::clone(&ledger),
        OWNER,
    ));
    let listing = Arc::new(LedgerView::new(
        Arc::clone(&shared),
        Arc::clone(&ledger),
        page_size,
    ));
    let dispatcher = Dispatcher::new(
        shared,
        workflow,
        fast,
        Arc::clone(&admins),
        listing,
        OWNER,
    );

    Service {
        _tmp: tmp,
        gateway,
        pool,
        ledger,
        admins,
        dispatcher,
    }
}
