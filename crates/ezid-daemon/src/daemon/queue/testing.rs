use async_trait::async_trait;
use ezid::{
    Destination, Identifier, IdentifierName, MemoryStore, Operation, OwnerId, QueueEntry,
    RefIdentifier, Store,
};
use ezid_daemon_core::{Disposition, Error, Handler, Result};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};

/// One scripted handler answer.
#[derive(Clone, Copy, Debug)]
pub enum Step {
    Succeed,
    Reject,
    Unavailable,
    Await,
    Panic,
}

/// A binder-shaped handler answering from a script; the last step repeats.
pub struct ScriptedHandler {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(String, Operation)>>,
}

impl ScriptedHandler {
    pub fn always(step: Step) -> Self {
        Self::sequence([step])
    }

    pub fn sequence(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Identifiers and operations dispatched so far, in call order.
    pub fn calls(&self) -> Vec<(String, Operation)> {
        self.calls.lock().clone()
    }

    fn next(&self) -> Step {
        let mut steps = self.steps.lock();
        if steps.len() > 1 {
            steps.pop_front().unwrap_or(Step::Succeed)
        } else {
            steps.front().copied().unwrap_or(Step::Succeed)
        }
    }

    fn answer(&self, snapshot: &RefIdentifier, operation: Operation) -> Result<Disposition> {
        self.calls
            .lock()
            .push((snapshot.record.identifier.clone(), operation));
        self.answer_step(self.next())
    }

    fn answer_step(&self, step: Step) -> Result<Disposition> {
        match step {
            Step::Succeed => Ok(Disposition::Success),
            Step::Reject => Err(Error::permanent(Destination::Binder, "400 Bad Request")),
            Step::Unavailable => Err(Error::transient(Destination::Binder, "503")),
            Step::Await => Ok(Disposition::AwaitingResult {
                batch_id: "batch-1".into(),
                message: "deposit submitted".into(),
            }),
            Step::Panic => panic!("scripted panic"),
        }
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    fn destination(&self) -> Destination {
        Destination::Binder
    }

    async fn create(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        self.answer(snapshot, Operation::Create)
    }

    async fn update(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        self.answer(snapshot, Operation::Update)
    }

    async fn delete(&self, snapshot: &RefIdentifier) -> Result<Disposition> {
        self.answer(snapshot, Operation::Delete)
    }

    fn polls(&self) -> bool {
        true
    }

    async fn poll(&self, _entry: &QueueEntry, _snapshot: &RefIdentifier) -> Result<Disposition> {
        self.answer_step(self.next())
    }
}

/// A memory store holding one created identifier per name, created at 1000.
pub fn seeded_store(identifiers: &[&str]) -> Arc<dyn Store> {
    let store = MemoryStore::new();
    for identifier in identifiers {
        let name = IdentifierName::parse(identifier).unwrap();
        let mut record = Identifier::new(&name, 1_000);
        record.owner = Some(OwnerId::new("user"));
        record.target = "http://example.com/a".into();
        store
            .insert_identifier_and_enqueue_all(&record, Operation::Create, 1_000)
            .unwrap();
    }
    Arc::new(store)
}
