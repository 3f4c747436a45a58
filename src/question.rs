//! The question asked by a query.

use std::fmt;

use crate::error::Error;

//------------ Well-known values ---------------------------------------------

/// Record types used throughout the crate and its tests.
pub mod rtype {
    /// A host address.
    pub const A: u16 = 1;

    /// The canonical name for an alias.
    pub const CNAME: u16 = 5;

    /// Text strings.
    pub const TXT: u16 = 16;

    /// An IPv6 host address.
    pub const AAAA: u16 = 28;
}

/// The Internet class.
pub const CLASS_IN: u16 = 1;

/// The longest permitted presentation name, without the final dot.
const MAX_NAME_LEN: usize = 253;

/// The longest permitted label.
const MAX_LABEL_LEN: usize = 63;

//------------ Question ------------------------------------------------------

/// A query name together with its type and class.
///
/// The name is kept in presentation format, lower-cased and without the
/// trailing dot. The root is the empty string.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Question {
    qname: String,
    qtype: u16,
    qclass: u16,
}

impl Question {
    /// Creates a new question, checking the name.
    pub fn new(
        qname: impl AsRef<str>,
        qtype: u16,
        qclass: u16,
    ) -> Result<Self, Error> {
        let qname = normalize(qname.as_ref())?;
        Ok(Question {
            qname,
            qtype,
            qclass,
        })
    }

    /// Creates a question for the Internet class.
    pub fn new_in(qname: impl AsRef<str>, qtype: u16) -> Result<Self, Error> {
        Self::new(qname, qtype, CLASS_IN)
    }

    pub fn qname(&self) -> &str {
        &self.qname
    }

    pub fn qtype(&self) -> u16 {
        self.qtype
    }

    pub fn qclass(&self) -> u16 {
        self.qclass
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {} TYPE{}", self.qname, self.qclass, self.qtype)
    }
}

/// Checks a presentation name and brings it into canonical form.
pub(crate) fn normalize(name: &str) -> Result<String, Error> {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() {
        return Ok(String::new());
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::Syntax("name too long"));
    }
    for label in name.split('.') {
        if label.is_empty() {
            return Err(Error::Syntax("empty label"));
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(Error::Syntax("label too long"));
        }
        if !label.bytes().all(|ch| ch.is_ascii_graphic()) {
            return Err(Error::Syntax("illegal character in name"));
        }
    }
    Ok(name.to_ascii_lowercase())
}

//============ Tests =========================================================
