//! The resolved payload of a query.
//!
//! The context treats an [`Answer`] as opaque. It is produced by the module
//! stack or the local data inside a worker, travels back over the result
//! channel and is handed to whoever owns the query.

use std::vec::Vec;

use bytes::Bytes;

use crate::question::Question;

//------------ Answer --------------------------------------------------------

/// The answer to a question.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Answer {
    /// The question this is the answer to.
    question: Question,

    /// The response code of the answer.
    rcode: u8,

    /// The record data of the answer, in wire format.
    data: Vec<Bytes>,

    /// The canonical name if the query name was an alias.
    canonname: Option<String>,

    /// Time to live of the answer in seconds.
    ttl: u32,

    /// Was the name found not to exist?
    nxdomain: bool,

    /// Was the answer validated as secure?
    secure: bool,

    /// Did validation fail?
    bogus: bool,

    /// Why validation failed, if it did.
    why_bogus: Option<String>,

    /// The complete response message, if the modules kept it.
    packet: Bytes,
}

impl Answer {
    /// Creates a new, empty answer for the given question.
    pub fn new(question: Question) -> Self {
        Answer {
            question,
            rcode: 0,
            data: Vec::new(),
            canonname: None,
            ttl: 0,
            nxdomain: false,
            secure: false,
            bogus: false,
            why_bogus: None,
            packet: Bytes::new(),
        }
    }

    /// Creates a negative answer stating the name does not exist.
    pub fn nxdomain(question: Question) -> Self {
        let mut res = Self::new(question);
        res.rcode = 3;
        res.nxdomain = true;
        res
    }

    pub fn question(&self) -> &Question {
        &self.question
    }

    pub fn rcode(&self) -> u8 {
        self.rcode
    }

    pub fn set_rcode(&mut self, rcode: u8) {
        self.rcode = rcode
    }

    /// Returns whether there is any record data.
    pub fn havedata(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn data(&self) -> &[Bytes] {
        &self.data
    }

    pub fn push_data(&mut self, rdata: Bytes) {
        self.data.push(rdata)
    }

    pub fn canonname(&self) -> Option<&str> {
        self.canonname.as_deref()
    }

    pub fn set_canonname(&mut self, name: Option<String>) {
        self.canonname = name
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: u32) {
        self.ttl = ttl
    }

    pub fn is_nxdomain(&self) -> bool {
        self.nxdomain
    }

    pub fn set_nxdomain(&mut self, value: bool) {
        self.nxdomain = value
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn set_secure(&mut self, value: bool) {
        self.secure = value
    }

    pub fn is_bogus(&self) -> bool {
        self.bogus
    }

    /// Marks the answer as bogus, giving a reason.
    ///
    /// A bogus answer is never secure.
    pub fn set_bogus(&mut self, why: impl Into<String>) {
        self.bogus = true;
        self.secure = false;
        self.why_bogus = Some(why.into());
    }

    pub fn why_bogus(&self) -> Option<&str> {
        self.why_bogus.as_deref()
    }

    pub fn packet(&self) -> &Bytes {
        &self.packet
    }

    pub fn set_packet(&mut self, packet: Bytes) {
        self.packet = packet
    }

    /// Sets the validation flags in one go.
    ///
    /// Used by the wire decoder which has the flags but not the reason
    /// separately.
    pub(crate) fn set_flags(
        &mut self,
        nxdomain: bool,
        secure: bool,
        bogus: bool,
    ) {
        self.nxdomain = nxdomain;
        self.secure = secure;
        self.bogus = bogus;
    }

    pub(crate) fn set_why_bogus(&mut self, why: Option<String>) {
        self.why_bogus = why
    }
}
