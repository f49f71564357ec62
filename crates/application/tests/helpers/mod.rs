#![allow(dead_code)]

use async_trait::async_trait;
use ferrous_gate_application::ports::{CachedResponse, QueryPipeline, ResponseCache};
use ferrous_gate_domain::{DomainError, RequestMeta};
use hickory_proto::op::{Message, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

// ============================================================================
// Queries
// ============================================================================

pub fn query(name: &str, record_type: RecordType) -> Message {
    let mut message = Message::new();
    message.set_id(fastid()).set_recursion_desired(true);
    message.add_query(Query::query(Name::from_str(name).unwrap(), record_type));
    message
}

fn fastid() -> u16 {
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed) as u16
}

pub fn a_answer(query: &Message, ip: Ipv4Addr, ttl: u32) -> Message {
    let mut response = ferrous_gate_application::message::reply_to(query);
    let name = query.queries()[0].name().clone();
    response.add_answer(Record::from_rdata(name, ttl, RData::A(A(ip))));
    response
}

// ============================================================================
// Mock QueryPipeline
// ============================================================================

pub enum Behavior {
    Answer { ip: Ipv4Addr, ttl: u32 },
    Rcode(ResponseCode),
    Nothing,
    Fail,
    Hang,
}

pub struct MockPipeline {
    behavior: Behavior,
    calls: AtomicUsize,
}

impl MockPipeline {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryPipeline for MockPipeline {
    async fn exec(
        &self,
        query: &Message,
        _meta: &RequestMeta,
    ) -> Result<Option<Message>, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Answer { ip, ttl } => Ok(Some(a_answer(query, *ip, *ttl))),
            Behavior::Rcode(rcode) => Ok(Some(
                ferrous_gate_application::message::error_reply(query, *rcode),
            )),
            Behavior::Nothing => Ok(None),
            Behavior::Fail => Err(DomainError::EntryFailed("upstream unreachable".into())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }
}

// ============================================================================
// Mock ResponseCache
// ============================================================================

#[derive(Default)]
pub struct MockCache {
    entries: Mutex<HashMap<String, (CachedResponse, Instant)>>,
}

impl MockCache {
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn expires_at(&self, key: &str) -> Option<Instant> {
        self.entries.lock().unwrap().get(key).map(|(_, e)| *e)
    }

    /// Pretend `key` was stored `age` ago.
    pub fn backdate(&self, key: &str, age: Duration) {
        if let Some((entry, _)) = self.entries.lock().unwrap().get_mut(key) {
            entry.stored_at -= age;
        }
    }
}

impl ResponseCache for MockCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        let entries = self.entries.lock().unwrap();
        let (entry, expires_at) = entries.get(key)?;
        if Instant::now() >= *expires_at {
            return None;
        }
        Some(entry.clone())
    }

    fn store(&self, key: &str, value: bytes::Bytes, stored_at: Instant, expires_at: Instant) {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            (CachedResponse { value, stored_at }, expires_at),
        );
    }
}
