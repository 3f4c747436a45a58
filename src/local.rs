//! Local authority data.
//!
//! Workers consult the local data before handing a query to the module
//! stack. The data is built once when the context is finalized and is
//! read-only afterwards.

use std::collections::HashMap;
use std::vec::Vec;

use bytes::Bytes;

use crate::answer::Answer;
use crate::config::LocalData;
use crate::error::Error;
use crate::question::{self, Question};

//------------ LocalZones ----------------------------------------------------

/// Records served directly by the workers.
#[derive(Clone, Debug, Default)]
pub struct LocalZones {
    /// The record sets, keyed by owner name and class.
    names: HashMap<(String, u16), Vec<Rrset>>,
}

#[derive(Clone, Debug)]
struct Rrset {
    rtype: u16,
    ttl: u32,
    data: Vec<Bytes>,
}

impl LocalZones {
    pub fn new() -> Self {
        Default::default()
    }

    /// Builds the local data from configured entries.
    pub fn from_config(data: &[LocalData]) -> Result<Self, Error> {
        let mut res = Self::new();
        for item in data {
            res.insert(item)?;
        }
        Ok(res)
    }

    /// Adds a single record.
    ///
    /// Records of the same name, class, and type form a set. The smallest
    /// TTL of the set wins.
    pub fn insert(&mut self, item: &LocalData) -> Result<(), Error> {
        let name = question::normalize(&item.name)?;
        let sets = self.names.entry((name, item.rclass)).or_default();
        match sets.iter_mut().find(|set| set.rtype == item.rtype) {
            Some(set) => {
                set.ttl = set.ttl.min(item.ttl);
                set.data.push(item.rdata.clone());
            }
            None => sets.push(Rrset {
                rtype: item.rtype,
                ttl: item.ttl,
                data: vec![item.rdata.clone()],
            }),
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Answers a question from local data.
    ///
    /// Returns `None` if the name is not known locally. If the name is
    /// known but has no records of the requested type, the answer is
    /// empty.
    pub fn answer(&self, question: &Question) -> Option<Answer> {
        let sets = self
            .names
            .get(&(question.qname().to_owned(), question.qclass()))?;
        let mut answer = Answer::new(question.clone());
        if let Some(set) = sets.iter().find(|set| set.rtype == question.qtype())
        {
            answer.set_ttl(set.ttl);
            for rdata in &set.data {
                answer.push_data(rdata.clone());
            }
        }
        Some(answer)
    }
}

//============ Tests =========================================================
