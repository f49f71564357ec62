use crate::message::reply_to;
use crate::ports::QueryPipeline;
use async_trait::async_trait;
use ferrous_gate_domain::{ConfigError, DomainError, LocalDnsRecord, RequestMeta};
use hickory_proto::op::Message;
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::info;

struct LocalEntry {
    name: Name,
    ip: IpAddr,
    ttl: u32,
}

/// Answers A/AAAA questions for names listed in `[[local_records]]`.
///
/// Names it does not know produce no response. Known names asked for a type
/// they have no address of get an empty NOERROR.
pub struct LocalRecordsPipeline {
    records: HashMap<String, Vec<LocalEntry>>,
}

impl LocalRecordsPipeline {
    pub fn new(records: &[LocalDnsRecord]) -> Result<Self, ConfigError> {
        let mut map: HashMap<String, Vec<LocalEntry>> = HashMap::new();

        for record in records {
            let fqdn = record.fqdn();
            let name = Name::from_str(&fqdn)
                .map(|n| n.to_lowercase())
                .map_err(|e| ConfigError::InvalidLocalRecord {
                    hostname: record.hostname.clone(),
                    reason: e.to_string(),
                })?;
            let entry = LocalEntry {
                name,
                ip: record.ip_addr()?,
                ttl: record.ttl_or_default(),
            };
            map.entry(normalize(&fqdn)).or_default().push(entry);
        }

        info!(names = map.len(), "Local records loaded");

        Ok(Self { records: map })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn normalize(name: &str) -> String {
    let mut name = name.trim_end_matches('.').to_ascii_lowercase();
    name.push('.');
    name
}

#[async_trait]
impl QueryPipeline for LocalRecordsPipeline {
    async fn exec(
        &self,
        query: &Message,
        _meta: &RequestMeta,
    ) -> Result<Option<Message>, DomainError> {
        let Some(question) = query.queries().first() else {
            return Ok(None);
        };
        let Some(entries) = self.records.get(&normalize(&question.name().to_string())) else {
            return Ok(None);
        };

        let mut response = reply_to(query);
        response.set_authoritative(true);

        for entry in entries {
            let rdata = match (question.query_type(), entry.ip) {
                (RecordType::A, IpAddr::V4(v4)) => RData::A(A(v4)),
                (RecordType::AAAA, IpAddr::V6(v6)) => RData::AAAA(AAAA(v6)),
                _ => continue,
            };
            response.add_answer(Record::from_rdata(entry.name.clone(), entry.ttl, rdata));
        }

        Ok(Some(response))
    }
}
