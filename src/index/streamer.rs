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

//! Streaming query results to a caller.

use std::fmt;
use std::io;

use log::trace;

use super::{decoder, QueryPlan, RowError};
use crate::observation::Observation;
use crate::store::{self, Row};

/// A consumer of query results.
pub trait ObservationSink {
    /// Accepts one result. An error stops the stream.
    fn submit(&mut self, observation: Observation) -> io::Result<()>;
}

impl ObservationSink for Vec<Observation> {
    fn submit(&mut self, observation: Observation) -> io::Result<()> {
        self.push(observation);
        Ok(())
    }
}

/// Decodes the rows of a scan executing `plan` and submits them to
/// `sink`, stopping once `limit` observations have been submitted.
///
/// Rows are pulled from `rows` one at a time and no row is pulled once
/// the limit is reached. Rows whose observation fails the plan's exact
/// checks are skipped and do not count towards the limit. Returns the
/// number of observations submitted.
pub fn stream<I, K>(
    plan: &QueryPlan,
    rows: I,
    limit: usize,
    sink: &mut K,
) -> Result<usize, StreamError>
where
    I: IntoIterator<Item = Result<Row, store::Error>>,
    K: ObservationSink + ?Sized,
{
    let mut rows = rows.into_iter();
    let mut submitted = 0;
    while submitted < limit {
        let row = match rows.next() {
            Some(row) => row.map_err(StreamError::Scan)?,
            None => break,
        };
        let observation = decoder::decode(plan.orientation, &row).map_err(StreamError::Decode)?;
        if !plan.accepts(&observation) {
            trace!("Skipping {:?}: pushdown filter false positive", observation);
            continue;
        }
        sink.submit(observation).map_err(StreamError::Sink)?;
        submitted += 1;
    }
    Ok(submitted)
}

/// Errors terminating a [`stream`].
#[derive(Debug)]
pub enum StreamError {
    /// The store failed while scanning.
    Scan(store::Error),

    /// A scanned row could not be decoded.
    Decode(RowError),

    /// The sink refused an observation.
    Sink(io::Error),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Scan(e) => write!(f, "scan failed: {}", e),
            Self::Decode(e) => write!(f, "failed to decode row: {}", e),
            Self::Sink(e) => write!(f, "failed to deliver result: {}", e),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Scan(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Sink(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::index::writer::row_mutation;
    use crate::index::{plan, Orientation};
    use crate::observation::Query;
    use crate::store;

    fn row(name: &str, sensorid: &str) -> Row {
        let observation = Observation {
            rrname: name.to_owned(),
            rrtype: "A".to_owned(),
            rdata: "192.0.2.1".to_owned(),
            sensorid: sensorid.to_owned(),
            count: 1,
            first_seen_ts: 10,
            last_seen_ts: 20,
        };
        let mutation = row_mutation(Orientation::ByName, &observation);
        Row {
            key: mutation.row().to_vec(),
            cells: mutation
                .updates()
                .iter()
                .map(|u| store::Cell {
                    family: u.family.clone(),
                    qualifier: u.qualifier.clone(),
                    value: u.value.clone(),
                })
                .collect(),
        }
    }

    #[test]
    fn stops_pulling_rows_at_the_limit() {
        let plan = plan(&Query::by_rrname("foo%", 3)).unwrap();
        let pulled = Cell::new(0);
        let rows = (0..10).map(|i| {
            pulled.set(pulled.get() + 1);
            Ok(row(&format!("foo{i}"), "s1"))
        });
        let mut sink: Vec<Observation> = Vec::new();
        assert_eq!(stream(&plan, rows, 3, &mut sink).unwrap(), 3);
        assert_eq!(pulled.get(), 3);
        let names: Vec<&str> = sink.iter().map(|o| o.rrname.as_str()).collect();
        assert_eq!(names, ["foo0", "foo1", "foo2"]);
    }

    #[test]
    fn exhaustion_is_not_an_error() {
        let plan = plan(&Query::by_rrname("foo%", 10)).unwrap();
        let mut sink: Vec<Observation> = Vec::new();
        let rows = vec![Ok(row("foo", "s1"))];
        assert_eq!(stream(&plan, rows, 10, &mut sink).unwrap(), 1);
    }

    #[test]
    fn zero_limit_emits_nothing() {
        let plan = plan(&Query::by_rrname("foo", 0)).unwrap();
        let mut sink: Vec<Observation> = Vec::new();
        let rows = vec![Ok(row("foo", "s1"))];
        assert_eq!(stream(&plan, rows, 0, &mut sink).unwrap(), 0);
        assert!(sink.is_empty());
    }

    #[test]
    fn false_positives_are_skipped_without_counting() {
        // "s1" appears bracketed in the rrtype position of the first
        // row, so a substring filter would let it through.
        let plan = plan(&Query::by_rrname("foo%", 1).with_sensorid("s1")).unwrap();
        let mut impostor = row("foo0", "s2");
        impostor.key = crate::codec::key::encode(["foo0", "s2", "s1", "192.0.2.1"]);
        let rows = vec![Ok(impostor), Ok(row("foo1", "s1"))];
        let mut sink: Vec<Observation> = Vec::new();
        assert_eq!(stream(&plan, rows, 1, &mut sink).unwrap(), 1);
        assert_eq!(sink[0].rrname, "foo1");
    }

    #[test]
    fn scan_errors_terminate_the_stream() {
        let plan = plan(&Query::by_rrname("foo%", 10)).unwrap();
        let rows = vec![
            Ok(row("foo0", "s1")),
            Err(store::Error::Unavailable("connection lost".to_owned())),
            Ok(row("foo1", "s1")),
        ];
        let mut sink: Vec<Observation> = Vec::new();
        assert!(matches!(
            stream(&plan, rows, 10, &mut sink),
            Err(StreamError::Scan(store::Error::Unavailable(_)))
        ));
        assert_eq!(sink.len(), 1);
    }

    struct BrokenSink;

    impl ObservationSink for BrokenSink {
        fn submit(&mut self, _: Observation) -> io::Result<()> {
            Err(io::ErrorKind::BrokenPipe.into())
        }
    }

    #[test]
    fn sink_errors_terminate_the_stream() {
        let plan = plan(&Query::by_rrname("foo%", 10)).unwrap();
        let rows = vec![Ok(row("foo0", "s1"))];
        assert!(matches!(
            stream(&plan, rows, 10, &mut BrokenSink),
            Err(StreamError::Sink(_))
        ));
    }
}
