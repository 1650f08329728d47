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

//! Decoding scanned rows back into observations.

use super::{reverse_name, Orientation, RowError, COUNT_CELL, FIRST_SEEN_CELL, LAST_SEEN_CELL};
use crate::codec::{counter, key};
use crate::observation::Observation;
use crate::store::Row;

/// Reconstructs the observation stored in `row`, a row scanned from
/// the table of `orientation`.
///
/// The counters come from the row's cells, which are told apart by
/// their qualifier; cells with unknown qualifiers are ignored, and
/// counters without a cell are left at zero. The other fields come from
/// the row key, read according to the orientation's layout. Names from
/// the [`Orientation::ByReversedName`] table are reversed back.
pub fn decode(orientation: Orientation, row: &Row) -> Result<Observation, RowError> {
    if row.cells.is_empty() {
        return Err(RowError::EmptyRow);
    }

    let mut observation = Observation::default();
    for cell in &row.cells {
        let (name, target) = match cell.qualifier.as_str() {
            q if q == COUNT_CELL.1 => ("count", &mut observation.count),
            q if q == FIRST_SEEN_CELL.1 => ("first-seen", &mut observation.first_seen_ts),
            q if q == LAST_SEEN_CELL.1 => ("last-seen", &mut observation.last_seen_ts),
            _ => continue,
        };
        *target = counter::decode(&cell.value).map_err(|e| RowError::Value(name, e))?;
    }

    let fields = key::decode(&row.key).map_err(RowError::Key)?;
    if fields.len() != 4 {
        return Err(RowError::FieldCount(fields.len()));
    }
    for (field, value) in orientation.layout().into_iter().zip(fields) {
        *field.get_mut(&mut observation) = value;
    }
    if orientation == Orientation::ByReversedName {
        observation.rrname = reverse_name(&observation.rrname);
    }

    Ok(observation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DecodeError;
    use crate::index::writer::row_mutation;
    use crate::store::Cell;

    fn observation() -> Observation {
        Observation {
            rrname: "foo.example.com".to_owned(),
            rrtype: "AAAA".to_owned(),
            rdata: "2001:db8::1".to_owned(),
            sensorid: "s1".to_owned(),
            count: 12,
            first_seen_ts: 1_500_000_000,
            last_seen_ts: 1_600_000_000,
        }
    }

    /// Produces the row a scan would return after writing `observation`.
    fn scanned_row(orientation: Orientation, observation: &Observation) -> Row {
        let mutation = row_mutation(orientation, observation);
        Row {
            key: mutation.row().to_vec(),
            cells: mutation
                .updates()
                .iter()
                .map(|u| Cell {
                    family: u.family.clone(),
                    qualifier: u.qualifier.clone(),
                    value: u.value.clone(),
                })
                .collect(),
        }
    }

    #[test]
    fn every_orientation_decodes_to_the_written_observation() {
        for orientation in Orientation::ALL {
            let row = scanned_row(orientation, &observation());
            assert_eq!(decode(orientation, &row).unwrap(), observation());
        }
    }

    #[test]
    fn reversed_table_is_read_as_reversed() {
        let row = scanned_row(Orientation::ByReversedName, &observation());
        assert_eq!(
            decode(Orientation::ByName, &row).unwrap().rrname,
            "moc.elpmaxe.oof"
        );
    }

    #[test]
    fn unknown_cells_are_ignored() {
        let mut row = scanned_row(Orientation::ByName, &observation());
        row.cells.push(Cell {
            family: "extra".to_owned(),
            qualifier: "extra".to_owned(),
            value: vec![0xff, 0xff, 0xff],
        });
        assert_eq!(decode(Orientation::ByName, &row).unwrap(), observation());
    }

    #[test]
    fn missing_cells_leave_counters_at_zero() {
        let mut row = scanned_row(Orientation::ByName, &observation());
        row.cells.retain(|c| c.qualifier == "count");
        let decoded = decode(Orientation::ByName, &row).unwrap();
        assert_eq!(decoded.count, 12);
        assert_eq!(decoded.first_seen_ts, 0);
        assert_eq!(decoded.last_seen_ts, 0);
    }

    #[test]
    fn empty_rows_are_rejected() {
        let mut row = scanned_row(Orientation::ByName, &observation());
        row.cells.clear();
        assert_eq!(decode(Orientation::ByName, &row), Err(RowError::EmptyRow));
    }

    #[test]
    fn malformed_rows_are_rejected() {
        let mut row = scanned_row(Orientation::ByName, &observation());
        row.key = key::encode(["only", "three", "fields"]);
        assert_eq!(
            decode(Orientation::ByName, &row),
            Err(RowError::FieldCount(3))
        );

        row.key = b"unterminated".to_vec();
        assert_eq!(
            decode(Orientation::ByName, &row),
            Err(RowError::Key(DecodeError::Unterminated))
        );

        let mut row = scanned_row(Orientation::ByName, &observation());
        row.cells[0].value.clear();
        assert_eq!(
            decode(Orientation::ByName, &row),
            Err(RowError::Value("count", DecodeError::UnexpectedEnd))
        );
    }
}
