mod helpers;

use ferrous_gate_application::ports::DnsHandler;
use ferrous_gate_application::use_cases::{EntryHandler, EntryHandlerOpts, DEFAULT_QUERY_TIMEOUT};
use ferrous_gate_domain::RequestMeta;
use helpers::{query, Behavior, MockPipeline};
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::RecordType;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

fn handler(behavior: Behavior, timeout: Duration) -> EntryHandler {
    EntryHandler::new(EntryHandlerOpts {
        entry: Arc::new(MockPipeline::new(behavior)),
        query_timeout: timeout,
        recursion_available: true,
    })
}

#[tokio::test]
async fn test_answer_passes_through_with_ra() {
    let h = handler(
        Behavior::Answer {
            ip: Ipv4Addr::new(192, 0, 2, 7),
            ttl: 60,
        },
        Duration::from_secs(1),
    );
    let q = query("example.com.", RecordType::A);

    let r = h.serve_dns(&q, &RequestMeta::default()).await.unwrap().unwrap();

    assert_eq!(r.id(), q.id());
    assert_eq!(r.response_code(), ResponseCode::NoError);
    assert_eq!(r.answers().len(), 1);
    assert!(r.recursion_available());
}

#[tokio::test]
async fn test_no_response_becomes_refused() {
    let h = handler(Behavior::Nothing, Duration::from_secs(1));
    let q = query("example.com.", RecordType::A);

    let r = h.serve_dns(&q, &RequestMeta::default()).await.unwrap().unwrap();

    assert_eq!(r.response_code(), ResponseCode::Refused);
    assert_eq!(r.queries(), q.queries());
    assert!(r.recursion_available());
}

#[tokio::test]
async fn test_entry_error_becomes_servfail() {
    let h = handler(Behavior::Fail, Duration::from_secs(1));
    let q = query("example.com.", RecordType::AAAA);

    let r = h.serve_dns(&q, &RequestMeta::default()).await.unwrap().unwrap();

    assert_eq!(r.response_code(), ResponseCode::ServFail);
}

#[tokio::test(start_paused = true)]
async fn test_deadline_becomes_servfail() {
    let h = handler(Behavior::Hang, Duration::from_secs(2));
    let q = query("slow.example.", RecordType::A);

    let r = h.serve_dns(&q, &RequestMeta::default()).await.unwrap().unwrap();

    assert_eq!(r.response_code(), ResponseCode::ServFail);
}

#[test]
fn test_zero_timeout_uses_default() {
    let h = handler(Behavior::Nothing, Duration::ZERO);
    assert_eq!(h.query_timeout(), DEFAULT_QUERY_TIMEOUT);
    assert_eq!(DEFAULT_QUERY_TIMEOUT, Duration::from_secs(5));
}
