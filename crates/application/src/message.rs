//! Small helpers for building replies on top of `hickory-proto` messages.

use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::Record;

/// Start a response to `query`: same ID, opcode, RD/CD bits and question.
pub fn reply_to(query: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(query.op_code())
        .set_recursion_desired(query.recursion_desired())
        .set_checking_disabled(query.checking_disabled());
    response.add_queries(query.queries().iter().cloned());
    response
}

/// A response to `query` carrying only `rcode`.
pub fn error_reply(query: &Message, rcode: ResponseCode) -> Message {
    let mut response = reply_to(query);
    response.set_response_code(rcode);
    response
}

/// Smallest TTL across the answer, authority and additional sections.
pub fn min_ttl(message: &Message) -> Option<u32> {
    message
        .answers()
        .iter()
        .chain(message.name_servers())
        .chain(message.additionals())
        .map(Record::ttl)
        .min()
}

/// Subtract `elapsed` seconds from every record TTL, flooring at zero.
pub fn age_ttls(message: &mut Message, elapsed: u32) {
    let mut answers = message.take_answers();
    let mut authorities = message.take_name_servers();
    let mut additionals = message.take_additionals();

    for record in answers
        .iter_mut()
        .chain(authorities.iter_mut())
        .chain(additionals.iter_mut())
    {
        record.set_ttl(record.ttl().saturating_sub(elapsed));
    }

    message.insert_answers(answers);
    message.insert_name_servers(authorities);
    message.insert_additionals(additionals);
}
