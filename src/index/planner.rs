// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Query planning: from a [`Query`] to a scan of one orientation.

use log::debug;

use super::{reverse_name, Field, InvalidQuery, Orientation};
use crate::codec::key::{self, SEPARATOR};
use crate::observation::{Observation, Query};
use crate::store::{ScanSpec, PUBLIC};

/// The wildcard marker in rrname patterns.
pub const WILDCARD: char = '%';

/// How a query is executed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueryPlan {
    /// The orientation (table) to scan.
    pub orientation: Orientation,

    /// The row key prefix bounding the scan.
    pub prefix: Vec<u8>,

    /// Substring filters pushed down to the store. These only narrow
    /// the scan: a term can also match at the wrong field position.
    pub filters: Vec<Vec<u8>>,

    /// Exact field values every returned observation must have. These
    /// are checked after decoding and make up for the imprecision of
    /// `filters`.
    pub checks: Vec<(Field, String)>,
}

impl QueryPlan {
    /// Returns the store scan for this plan.
    pub fn scan_spec(&self) -> ScanSpec {
        ScanSpec {
            prefix: self.prefix.clone(),
            filters: self.filters.clone(),
            authorizations: vec![PUBLIC.to_owned()],
        }
    }

    /// Returns whether a decoded observation passes the exact field
    /// checks.
    pub fn accepts(&self, observation: &Observation) -> bool {
        self.checks
            .iter()
            .all(|(field, value)| field.get(observation) == value)
    }
}

/// The ways an rrname pattern can match.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum NamePattern<'a> {
    Exact(&'a str),
    Prefix(&'a str),
    Suffix(&'a str),
}

impl<'a> NamePattern<'a> {
    fn parse(pattern: &'a str) -> Result<Self, InvalidQuery> {
        if !pattern.contains(WILDCARD) {
            return Ok(Self::Exact(pattern));
        } else if pattern.matches(WILDCARD).count() > 1 {
            return Err(InvalidQuery::MisplacedWildcard);
        }

        if let Some(suffix) = pattern.strip_prefix(WILDCARD) {
            Ok(Self::Suffix(suffix))
        } else if let Some(prefix) = pattern.strip_suffix(WILDCARD) {
            Ok(Self::Prefix(prefix))
        } else {
            Err(InvalidQuery::MisplacedWildcard)
        }
    }
}

/// Plans `query`.
///
/// Queries with an rrname pattern scan one of the name orientations,
/// depending on the pattern's wildcard; a sensor filter or an rdata
/// pattern given alongside become pushdown filters and exact checks.
/// Otherwise, queries with an rdata pattern scan the by-data
/// orientation, with the sensor filter (if any) folded into the scan
/// prefix.
pub fn plan(query: &Query) -> Result<QueryPlan, InvalidQuery> {
    let plan = if !query.rrname.is_empty() {
        plan_rrname(query)?
    } else if !query.rdata.is_empty() {
        plan_rdata(query)
    } else {
        return Err(InvalidQuery::NeitherFieldGiven);
    };
    debug!(
        "Planned query {:?}: scan {} with {} filters and {} checks",
        query,
        plan.orientation,
        plan.filters.len(),
        plan.checks.len(),
    );
    Ok(plan)
}

fn plan_rrname(query: &Query) -> Result<QueryPlan, InvalidQuery> {
    let (orientation, prefix) = match NamePattern::parse(&query.rrname)? {
        NamePattern::Exact(name) => (Orientation::ByName, key::encode_prefix([name])),
        NamePattern::Prefix(prefix) => (Orientation::ByName, key::escape_field(prefix)),
        NamePattern::Suffix(suffix) => (
            Orientation::ByReversedName,
            key::escape_field(&reverse_name(suffix)),
        ),
    };

    let mut plan = QueryPlan {
        orientation,
        prefix,
        filters: Vec::new(),
        checks: Vec::new(),
    };
    for (field, value) in [(Field::Sensorid, &query.sensorid), (Field::Rdata, &query.rdata)] {
        if !value.is_empty() {
            plan.filters.push(bracketed_term(value));
            plan.checks.push((field, value.clone()));
        }
    }
    Ok(plan)
}

fn plan_rdata(query: &Query) -> QueryPlan {
    let prefix = if query.sensorid.is_empty() {
        key::encode_prefix([&query.rdata])
    } else {
        key::encode_prefix([&query.rdata, &query.sensorid])
    };
    QueryPlan {
        orientation: Orientation::ByData,
        prefix,
        filters: Vec::new(),
        checks: Vec::new(),
    }
}

/// Returns the pushdown term matching `field` as a whole key field:
/// its encoding bracketed by separators.
fn bracketed_term(field: &str) -> Vec<u8> {
    let mut term = vec![SEPARATOR];
    term.extend_from_slice(&key::escape_field(field));
    term.push(SEPARATOR);
    term
}
