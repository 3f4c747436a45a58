//! Encoding and decoding of the messages exchanged over the channels.
//!
//! The channels themselves take care of framing, so these are only the
//! message bodies. Every body starts with a command octet. All integers are
//! in network byte order; strings and octet sequences are preceded by
//! their length.
//!
//! A new query body looks like this:
//!
//! ```text
//! cmd(1) id(4) qtype(2) qclass(2) qname_len(2) qname
//! ```
//!
//! An answer body carries the status and, if the status is success, the
//! answer itself:
//!
//! ```text
//! cmd(1) id(4) status(1)
//!     qname_len(2) qname qtype(2) qclass(2) rcode(1) flags(1) ttl(4)
//!     canonname(opt) why_bogus(opt)
//!     data_count(2) { rdata_len(2) rdata }*
//!     packet_len(4) packet
//! ```
//!
//! where an optional string is a presence octet followed by the string if
//! the octet is one.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::answer::Answer;
use crate::channel::MAX_MESSAGE_LEN;
use crate::error::Error;
use crate::queries::QueryId;
use crate::question::Question;

//------------ Constants -----------------------------------------------------

/// Command octet of a new query.
const CMD_NEW_QUERY: u8 = 1;

/// Command octet of an answer.
const CMD_ANSWER: u8 = 2;

/// Status octet of a successful resolution.
const STATUS_OK: u8 = 0;

const FLAG_NXDOMAIN: u8 = 0x01;
const FLAG_SECURE: u8 = 0x02;
const FLAG_BOGUS: u8 = 0x04;

//------------ New query -----------------------------------------------------

/// Encodes a new query into `buf`, replacing its content.
pub(crate) fn encode_query(
    id: QueryId,
    question: &Question,
    buf: &mut BytesMut,
) -> Result<(), Error> {
    buf.clear();
    buf.put_u8(CMD_NEW_QUERY);
    buf.put_u32(id.into_int());
    buf.put_u16(question.qtype());
    buf.put_u16(question.qclass());
    put_str(buf, question.qname())
}

/// Decodes a new query.
///
/// The outer error means the message was unusable. The inner one means the
/// identifier could be read but the question could not, so the worker can
/// still answer with an error.
pub(crate) fn decode_query(
    mut msg: Bytes,
) -> Result<(QueryId, Result<Question, Error>), Error> {
    if get_u8(&mut msg)? != CMD_NEW_QUERY {
        return Err(Error::malformed("expected new query command"));
    }
    let id = QueryId::from_int(get_u32(&mut msg)?);
    let question = decode_question(&mut msg);
    Ok((id, question))
}

fn decode_question(msg: &mut Bytes) -> Result<Question, Error> {
    let qtype = get_u16(msg)?;
    let qclass = get_u16(msg)?;
    let qname = get_str(msg)?;
    Question::new(qname, qtype, qclass)
}

//------------ Answer --------------------------------------------------------

/// Encodes the result of a query into `buf`, replacing its content.
pub(crate) fn encode_answer(
    id: QueryId,
    result: &Result<Answer, Error>,
    buf: &mut BytesMut,
) -> Result<(), Error> {
    buf.clear();
    buf.put_u8(CMD_ANSWER);
    buf.put_u32(id.into_int());
    let answer = match result {
        Ok(answer) => answer,
        Err(err) => {
            buf.put_u8(err.code());
            return Ok(());
        }
    };
    buf.put_u8(STATUS_OK);
    let question = answer.question();
    put_str(buf, question.qname())?;
    buf.put_u16(question.qtype());
    buf.put_u16(question.qclass());
    buf.put_u8(answer.rcode());
    let mut flags = 0;
    if answer.is_nxdomain() {
        flags |= FLAG_NXDOMAIN
    }
    if answer.is_secure() {
        flags |= FLAG_SECURE
    }
    if answer.is_bogus() {
        flags |= FLAG_BOGUS
    }
    buf.put_u8(flags);
    buf.put_u32(answer.ttl());
    put_opt_str(buf, answer.canonname())?;
    put_opt_str(buf, answer.why_bogus())?;
    let count = u16::try_from(answer.data().len())
        .map_err(|_| Error::malformed("too many records"))?;
    buf.put_u16(count);
    for rdata in answer.data() {
        put_octets(buf, rdata)?;
    }
    let len = u32::try_from(answer.packet().len())
        .map_err(|_| Error::malformed("packet too long"))?;
    buf.put_u32(len);
    buf.put_slice(answer.packet());
    if buf.len() > MAX_MESSAGE_LEN {
        return Err(Error::malformed("answer too long"));
    }
    Ok(())
}

/// Decodes the result of a query.
pub(crate) fn decode_answer(
    mut msg: Bytes,
) -> Result<(QueryId, Result<Answer, Error>), Error> {
    if get_u8(&mut msg)? != CMD_ANSWER {
        return Err(Error::malformed("expected answer command"));
    }
    let id = QueryId::from_int(get_u32(&mut msg)?);
    let status = get_u8(&mut msg)?;
    if status != STATUS_OK {
        return Ok((id, Err(Error::from_code(status))));
    }
    let qname = get_str(&mut msg)?;
    let qtype = get_u16(&mut msg)?;
    let qclass = get_u16(&mut msg)?;
    let question = Question::new(qname, qtype, qclass)
        .map_err(|_| Error::malformed("bad question in answer"))?;
    let mut answer = Answer::new(question);
    answer.set_rcode(get_u8(&mut msg)?);
    let flags = get_u8(&mut msg)?;
    answer.set_flags(
        flags & FLAG_NXDOMAIN != 0,
        flags & FLAG_SECURE != 0,
        flags & FLAG_BOGUS != 0,
    );
    answer.set_ttl(get_u32(&mut msg)?);
    answer.set_canonname(get_opt_str(&mut msg)?);
    answer.set_why_bogus(get_opt_str(&mut msg)?);
    for _ in 0..get_u16(&mut msg)? {
        let len = usize::from(get_u16(&mut msg)?);
        answer.push_data(get_octets(&mut msg, len)?);
    }
    let len = get_u32(&mut msg)? as usize;
    answer.set_packet(get_octets(&mut msg, len)?);
    if msg.has_remaining() {
        return Err(Error::malformed("trailing data in answer"));
    }
    Ok((id, Ok(answer)))
}

//------------ Helpers -------------------------------------------------------

fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), Error> {
    put_octets(buf, s.as_bytes())
}

fn put_opt_str(buf: &mut BytesMut, s: Option<&str>) -> Result<(), Error> {
    match s {
        Some(s) => {
            buf.put_u8(1);
            put_str(buf, s)
        }
        None => {
            buf.put_u8(0);
            Ok(())
        }
    }
}

fn put_octets(buf: &mut BytesMut, octets: &[u8]) -> Result<(), Error> {
    let len = u16::try_from(octets.len())
        .map_err(|_| Error::malformed("octet sequence too long"))?;
    buf.put_u16(len);
    buf.put_slice(octets);
    Ok(())
}

fn need(msg: &Bytes, len: usize) -> Result<(), Error> {
    if msg.remaining() < len {
        Err(Error::malformed("short message"))
    } else {
        Ok(())
    }
}

fn get_u8(msg: &mut Bytes) -> Result<u8, Error> {
    need(msg, 1)?;
    Ok(msg.get_u8())
}

fn get_u16(msg: &mut Bytes) -> Result<u16, Error> {
    need(msg, 2)?;
    Ok(msg.get_u16())
}

fn get_u32(msg: &mut Bytes) -> Result<u32, Error> {
    need(msg, 4)?;
    Ok(msg.get_u32())
}

fn get_octets(msg: &mut Bytes, len: usize) -> Result<Bytes, Error> {
    need(msg, len)?;
    Ok(msg.split_to(len))
}

fn get_str(msg: &mut Bytes) -> Result<String, Error> {
    let len = usize::from(get_u16(msg)?);
    let octets = get_octets(msg, len)?;
    String::from_utf8(octets.to_vec())
        .map_err(|_| Error::malformed("string is not UTF-8"))
}

fn get_opt_str(msg: &mut Bytes) -> Result<Option<String>, Error> {
    match get_u8(msg)? {
        0 => Ok(None),
        1 => get_str(msg).map(Some),
        _ => Err(Error::malformed("bad presence octet")),
    }
}

//============ Tests =========================================================
