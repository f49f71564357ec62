use hickory_proto::op::Message;
use hickory_proto::rr::Record;
use hickory_proto::serialize::binary::{BinEncodable, BinEncoder};
use hickory_proto::ProtoError;

/// Minimum payload every DNS client accepts over UDP.
pub const MIN_UDP_SIZE: usize = 512;

/// Largest response the querier accepts over UDP.
///
/// Uses the EDNS0 advertised payload size, floored at 512 bytes.
pub fn udp_size(query: &Message) -> usize {
    let advertised = query
        .extensions()
        .as_ref()
        .map(|edns| usize::from(edns.max_payload()))
        .unwrap_or(0);
    advertised.max(MIN_UDP_SIZE)
}

/// Emit the leading `records` that keep the encoder within `budget` bytes and
/// return how many there were. Sets `full` at the first record that does not
/// fit; nothing is emitted after that.
fn emit_fitting(
    encoder: &mut BinEncoder<'_>,
    records: &[Record],
    budget: usize,
    full: &mut bool,
) -> Result<usize, ProtoError> {
    let mut kept = 0;
    for record in records {
        if *full {
            break;
        }
        record.emit(encoder)?;
        if encoder.offset() as usize > budget {
            *full = true;
        } else {
            kept += 1;
        }
    }
    Ok(kept)
}

/// Shrink `message` so its wire form is at most `max_size` bytes.
///
/// Records are kept in order (answers, then authority, then additional) for as
/// long as they fit. The EDNS0 OPT record is carried separately and always
/// kept. TC is set when an answer or authority record had to be dropped;
/// dropping additional records alone does not set it.
pub fn truncate(message: &mut Message, max_size: usize) -> Result<(), ProtoError> {
    if message.to_vec()?.len() <= max_size {
        return Ok(());
    }

    let mut answers = message.take_answers();
    let mut authorities = message.take_name_servers();
    let mut additionals = message.take_additionals();
    let bare_len = message.to_vec()?.len();

    // Sections are emitted in wire order into one encoder so names compress
    // exactly as they will in the final message.
    let mut buf = Vec::with_capacity(max_size);
    let mut encoder = BinEncoder::new(&mut buf);
    message.header().emit(&mut encoder)?;
    for query in message.queries() {
        query.emit(&mut encoder)?;
    }
    // OPT (and SIG0) follow every section.
    let trailer = bare_len.saturating_sub(encoder.offset() as usize);
    let budget = max_size.saturating_sub(trailer);

    let mut full = bare_len > max_size;
    let kept_answers = emit_fitting(&mut encoder, &answers, budget, &mut full)?;
    let kept_authorities = emit_fitting(&mut encoder, &authorities, budget, &mut full)?;
    let kept_additionals = emit_fitting(&mut encoder, &additionals, budget, &mut full)?;

    let dropped = answers.len() - kept_answers + authorities.len() - kept_authorities;
    answers.truncate(kept_answers);
    authorities.truncate(kept_authorities);
    additionals.truncate(kept_additionals);
    message.insert_answers(answers);
    message.insert_name_servers(authorities);
    message.insert_additionals(additionals);

    if dropped > 0 || bare_len > max_size {
        message.set_truncated(true);
    }
    Ok(())
}
