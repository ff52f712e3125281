//! Test doubles and common utilities for contract tests
//!
//! [`MockRecordStore`] is an in-memory record store with call counters,
//! scripted failures, per-operation gates that hold calls until released, and
//! a frozen listing mode that simulates writes not yet visible to `list`.

#![allow(dead_code)]

use dnsmirror_core::error::{Error, Result};
use dnsmirror_core::traits::{Authenticator, RecordStore, SessionToken};
use dnsmirror_core::{Record, RecordDraft, RecordId, Session, SessionConfig, SessionEvent, Zone};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

pub const ZONE_A: &str = "zone-a";
pub const ZONE_B: &str = "zone-b";

/// Store operation, for counters, failures and gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListZones,
    List,
    Create,
    Update,
    Delete,
}

/// Failure a scripted call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Remote,
    Network,
    Unauthorized,
    Validation,
}

impl Failure {
    fn into_error(self) -> Error {
        match self {
            Failure::Remote => Error::remote("internal server error"),
            Failure::Network => Error::network("connection refused"),
            Failure::Unauthorized => Error::unauthorized("token expired"),
            Failure::Validation => Error::validation("content is not a valid address"),
        }
    }
}

/// In-memory RecordStore that tracks calls
pub struct MockRecordStore {
    zones: Vec<Zone>,
    records: Mutex<HashMap<String, Vec<Record>>>,
    calls: Mutex<HashMap<Op, usize>>,
    /// `None` lets a call through, `Some` fails it
    script: Mutex<HashMap<Op, VecDeque<Option<Failure>>>>,
    gates: Mutex<HashMap<Op, Arc<Semaphore>>>,
    /// Listing served instead of the real one, and how many more times
    frozen: Mutex<Option<(usize, HashMap<String, Vec<Record>>)>>,
    echo_writes: AtomicBool,
    next_id: AtomicUsize,
}

impl MockRecordStore {
    /// Two zones: `example.com` with the sample records, `example.org` with one record
    pub fn new() -> Self {
        Self::empty()
            .with_zone(ZONE_A, "example.com", sample_records())
            .with_zone(
                ZONE_B,
                "example.org",
                vec![record("b1", "A", "example.org", "198.51.100.7", false)],
            )
    }

    pub fn empty() -> Self {
        Self {
            zones: Vec::new(),
            records: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            script: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            frozen: Mutex::new(None),
            echo_writes: AtomicBool::new(true),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn with_zone(mut self, zone_id: &str, apex: &str, records: Vec<Record>) -> Self {
        self.zones.push(Zone::new(zone_id, apex));
        self.records
            .get_mut()
            .unwrap()
            .insert(zone_id.to_string(), records);
        self
    }

    /// Number of calls made to `op`
    pub fn calls(&self, op: Op) -> usize {
        self.calls.lock().unwrap().get(&op).copied().unwrap_or(0)
    }

    /// Fail the next call to `op`
    pub fn fail_next(&self, op: Op, failure: Failure) {
        self.fail_after(op, 0, failure);
    }

    /// Let `successes` calls to `op` through, then fail one
    pub fn fail_after(&self, op: Op, successes: usize, failure: Failure) {
        let mut script = self.script.lock().unwrap();
        let queue = script.entry(op).or_default();
        queue.extend(std::iter::repeat_n(None, successes));
        queue.push_back(Some(failure));
    }

    /// Hold every call to `op` until released
    pub fn hold(&self, op: Op) {
        self.gates.lock().unwrap().insert(op, Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held calls to `op` proceed
    pub fn release(&self, op: Op, n: usize) {
        if let Some(gate) = self.gates.lock().unwrap().get(&op) {
            gate.add_permits(n);
        }
    }

    /// Serve the current listing for the next `n` list calls, ignoring later writes
    pub fn freeze_listing(&self, n: usize) {
        let snapshot = self.records.lock().unwrap().clone();
        *self.frozen.lock().unwrap() = Some((n, snapshot));
    }

    /// Make create/update acknowledge without echoing the record
    pub fn stop_echoing(&self) {
        self.echo_writes.store(false, Ordering::SeqCst);
    }

    /// Authoritative records of a zone
    pub fn authoritative(&self, zone_id: &str) -> Vec<Record> {
        self.records
            .lock()
            .unwrap()
            .get(zone_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Simulate another client deleting a record
    pub fn remove_remote(&self, zone_id: &str, record_id: &str) {
        if let Some(records) = self.records.lock().unwrap().get_mut(zone_id) {
            records.retain(|r| r.id.as_confirmed() != Some(record_id));
        }
    }

    async fn enter(&self, op: Op) -> Result<()> {
        *self.calls.lock().unwrap().entry(op).or_insert(0) += 1;

        let gate = self.gates.lock().unwrap().get(&op).cloned();
        if let Some(gate) = gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        let scripted = self
            .script
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(|queue| queue.pop_front())
            .flatten();
        match scripted {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }

    fn zone_records<T>(&self, zone_id: &str, f: impl FnOnce(&mut Vec<Record>) -> T) -> Result<T> {
        let mut records = self.records.lock().unwrap();
        let zone = records
            .get_mut(zone_id)
            .ok_or_else(|| Error::not_found(format!("zone {}", zone_id)))?;
        Ok(f(zone))
    }
}

#[async_trait::async_trait]
impl RecordStore for MockRecordStore {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        self.enter(Op::ListZones).await?;
        Ok(self.zones.clone())
    }

    async fn list(&self, zone_id: &str) -> Result<Vec<Record>> {
        self.enter(Op::List).await?;

        let mut frozen = self.frozen.lock().unwrap();
        if let Some((remaining, snapshot)) = frozen.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(snapshot.get(zone_id).cloned().unwrap_or_default());
            }
            *frozen = None;
        }
        drop(frozen);

        self.zone_records(zone_id, |records| records.clone())
    }

    async fn create(&self, zone_id: &str, draft: &RecordDraft) -> Result<Option<Record>> {
        self.enter(Op::Create).await?;
        let id = format!("rec-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = Record::from_draft(RecordId::confirmed(id), draft);
        self.zone_records(zone_id, |records| records.push(record.clone()))?;
        Ok(self.echo_writes.load(Ordering::SeqCst).then_some(record))
    }

    async fn update(&self, zone_id: &str, record_id: &str, draft: &RecordDraft) -> Result<Option<Record>> {
        self.enter(Op::Update).await?;
        let updated = self.zone_records(zone_id, |records| {
            records
                .iter_mut()
                .find(|r| r.id.as_confirmed() == Some(record_id))
                .map(|r| {
                    r.apply(draft);
                    r.clone()
                })
        })?;
        let updated = updated.ok_or_else(|| Error::not_found(format!("record {}", record_id)))?;
        Ok(self.echo_writes.load(Ordering::SeqCst).then_some(updated))
    }

    async fn delete(&self, zone_id: &str, record_id: &str) -> Result<()> {
        self.enter(Op::Delete).await?;
        let removed = self.zone_records(zone_id, |records| {
            let before = records.len();
            records.retain(|r| r.id.as_confirmed() != Some(record_id));
            before != records.len()
        })?;
        if removed {
            Ok(())
        } else {
            Err(Error::not_found(format!("record {}", record_id)))
        }
    }

    fn store_name(&self) -> &'static str {
        "mock"
    }
}

/// Authenticator accepting a single password
pub struct MockAuthenticator {
    password: String,
    login_calls: AtomicUsize,
}

impl MockAuthenticator {
    pub fn new(password: &str) -> Self {
        Self {
            password: password.to_string(),
            login_calls: AtomicUsize::new(0),
        }
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Authenticator for MockAuthenticator {
    async fn login(&self, secret: &str) -> Result<SessionToken> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if secret == self.password {
            Ok(SessionToken::new("token-1"))
        } else {
            Err(Error::unauthorized("invalid password"))
        }
    }
}

pub fn record(id: &str, record_type: &str, name: &str, content: &str, proxied: bool) -> Record {
    Record {
        id: RecordId::confirmed(id),
        record_type: record_type.to_string(),
        name: name.to_string(),
        content: content.to_string(),
        ttl: 1,
        proxied,
    }
}

/// Seven records of mixed types under example.com
pub fn sample_records() -> Vec<Record> {
    vec![
        record("r1", "A", "test.example.com", "192.168.1.1", true),
        record("r2", "CNAME", "www.example.com", "example.com", true),
        record("r3", "MX", "example.com", "mail.example.com", false),
        record("r4", "TXT", "_dmarc.example.com", "v=DMARC1; p=none", false),
        record("r5", "AAAA", "ipv6.example.com", "2001:db8::1", true),
        record("r6", "NS", "example.com", "ns1.example.com", false),
        record("r7", "A", "api.example.com", "192.168.1.2", false),
    ]
}

pub fn id(raw: &str) -> RecordId {
    RecordId::confirmed(raw)
}

/// Defaults, except notices that outlive the virtual clock jumps of a test
pub fn test_config() -> SessionConfig {
    SessionConfig {
        notice_ttl_secs: 3600,
        ..Default::default()
    }
}

/// Session over the store with zone A loaded
pub async fn session_on(
    store: &Arc<MockRecordStore>,
    config: SessionConfig,
) -> (Arc<Session>, mpsc::Receiver<SessionEvent>) {
    let (session, events) = Session::new(store.clone(), config).expect("session construction succeeds");
    session.load_zones().await.expect("zones load");
    session.select_zone(ZONE_A).await.expect("zone selects");
    (Arc::new(session), events)
}

/// Receive events until one matches
pub async fn wait_for_event(
    events: &mut mpsc::Receiver<SessionEvent>,
    mut predicate: impl FnMut(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let event = events.recv().await.expect("event channel open");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event arrives within 60s")
}

/// Poll a condition on the (virtual) clock
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(60), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("condition holds within 60s")
}

/// Drain whatever events are queued right now
pub fn drain(events: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
