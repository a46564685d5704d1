//! Match index & sample weights (spec §4.2).

use relboost_common::{ColumnData, ColumnRole, DataFrame, RelboostError, Result};

use crate::placeholder::Placeholder;

/// A qualifying (population-row, peripheral-row) pair.
///
/// `ix_output` indexes the population frame, `ix_input` the peripheral
/// frame. `active` starts `false` and is flipped by the aggregation engine
/// as splits activate/deactivate it (spec §3 "Match", §4.4).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Match {
    pub ix_output: u32,
    pub ix_input: u32,
    pub sample_weight: f32,
    pub active: bool,
}

/// A stable, cheaply-reordered view over a `Matches`' backing vector. Sort
/// routines permute `MatchPtr`s rather than `Match` values, so the dense
/// `matches` vector never moves.
pub type MatchPtr = u32;

#[derive(Clone, Debug, Default)]
pub struct Matches {
    pub matches: Vec<Match>,
    pub ptrs: Vec<MatchPtr>,
}

impl Matches {
    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    /// Re-sorts `ptrs` by the given key function, leaving `matches` itself
    /// untouched. Ties are broken by `ix_input` to keep ordering
    /// deterministic (spec §4.2 "Ties ... broken deterministically by
    /// peripheral row id").
    pub fn sort_ptrs_by<F: Fn(&Match) -> f64>(&mut self, key: F) {
        let matches = &self.matches;
        self.ptrs.sort_by(|&a, &b| {
            let ka = key(&matches[a as usize]);
            let kb = key(&matches[b as usize]);
            ka.partial_cmp(&kb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| matches[a as usize].ix_input.cmp(&matches[b as usize].ix_input))
        });
    }
}

fn category_at(col: &ColumnData, row: usize) -> Option<i32> {
    match col {
        ColumnData::CategoryId(v) => {
            let id = v[row];
            (id >= 0).then_some(id)
        }
        _ => None,
    }
}

fn timestamp_at(col: &ColumnData, row: usize) -> Option<f64> {
    match col {
        ColumnData::TimeStampFloat(v) | ColumnData::Float64(v) => Some(v[row]),
        _ => None,
    }
}

/// Enumerates pairs `(ix_output, ix_input)` satisfying every join-key
/// equality in `placeholder.join_keys_used` and the time-stamp window, if
/// any. Uses the peripheral's per-join-key index on the first join key to
/// avoid a Cartesian scan, then filters remaining join keys and the
/// time-stamp bound directly (spec §4.2 "Complexity").
pub fn make_matches(
    population: &DataFrame,
    peripheral: &DataFrame,
    placeholder: &Placeholder,
    sample_weights: Option<&[f32]>,
) -> Result<Matches> {
    if population.nrows() == 0 {
        return Err(RelboostError::invalid("make_matches: empty population"));
    }
    if placeholder.join_keys_used.is_empty() {
        return Err(RelboostError::invalid(
            "make_matches: placeholder declares no join keys",
        ));
    }

    let first_jk = &placeholder.join_keys_used[0];
    let pop_first = population.column(&first_jk.population_column)?;
    let per_first = peripheral.column(&first_jk.peripheral_column)?;
    let index = peripheral
        .index_for(&first_jk.peripheral_column)
        .ok_or_else(|| {
            RelboostError::invalid(format!(
                "make_matches: peripheral has no index for join key {:?}; call create_indices() first",
                first_jk.peripheral_column
            ))
        })?;

    let rest_jks: Vec<(&relboost_common::Column, &relboost_common::Column)> = placeholder
        .join_keys_used[1..]
        .iter()
        .map(|jk| -> Result<_> {
            Ok((
                population.column(&jk.population_column)?,
                peripheral.column(&jk.peripheral_column)?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let (pop_ts, per_ts_lower) = match &placeholder.time_stamps_used {
        Some(bound) => (
            Some(population.column(&bound.population_column)?),
            Some(peripheral.column(&bound.peripheral_column)?),
        ),
        None => (None, None),
    };
    let per_ts_upper = match &placeholder.upper_time_stamps_used {
        Some(bound) => Some(peripheral.column(&bound.peripheral_column)?),
        None => None,
    };

    let mut matches = Vec::new();
    for out in 0..population.nrows() {
        let weight = sample_weights.map(|w| w[out]).unwrap_or(1.0);
        if weight == 0.0 {
            continue;
        }
        let Some(key) = category_at(&pop_first.data, out) else {
            continue;
        };
        let Some(candidates) = index.get(&key) else {
            continue;
        };
        let pop_ts_val = pop_ts.and_then(|c| timestamp_at(&c.data, out));

        'candidates: for &input in candidates {
            let input = input as usize;
            debug_assert_eq!(category_at(&per_first.data, input), Some(key));

            for (pop_col, per_col) in &rest_jks {
                let pop_key = category_at(&pop_col.data, out);
                let per_key = category_at(&per_col.data, input);
                if pop_key.is_none() || pop_key != per_key {
                    continue 'candidates;
                }
            }

            if let (Some(pop_ts_val), Some(lower_col)) = (pop_ts_val, per_ts_lower) {
                let Some(lower) = timestamp_at(&lower_col.data, input) else {
                    continue;
                };
                if !(lower <= pop_ts_val) {
                    continue;
                }
                if let Some(upper_col) = per_ts_upper {
                    let Some(upper) = timestamp_at(&upper_col.data, input) else {
                        continue;
                    };
                    if !(pop_ts_val < upper) {
                        continue;
                    }
                }
            }

            matches.push(Match {
                ix_output: out as u32,
                ix_input: input as u32,
                sample_weight: weight,
                active: false,
            });
        }
    }

    let ptrs = (0..matches.len() as u32).collect();
    Ok(Matches { matches, ptrs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relboost_common::Column;

    fn build_frames() -> (DataFrame, DataFrame) {
        let enc = relboost_common::EncodingHandle::new();
        let mut population = DataFrame::new("population");
        let pop_keys: Vec<Option<String>> = vec!["a", "b", "a"]
            .into_iter()
            .map(|s| Some(s.to_owned()))
            .collect();
        population
            .add_column(Column::from_strings(
                "jk",
                ColumnRole::JoinKey,
                &pop_keys,
                enc.clone(),
            ))
            .unwrap();

        let mut peripheral = DataFrame::new("peripheral");
        let per_keys: Vec<Option<String>> = vec!["a", "a", "b", "a", "c"]
            .into_iter()
            .map(|s| Some(s.to_owned()))
            .collect();
        peripheral
            .add_column(Column::from_strings(
                "jk",
                ColumnRole::JoinKey,
                &per_keys,
                enc,
            ))
            .unwrap();
        peripheral.create_indices();
        (population, peripheral)
    }

    #[test]
    fn count_matches_scenario_s1() {
        let (population, peripheral) = build_frames();
        let placeholder = Placeholder::new("peripheral").with_join_key("jk", "jk");
        let matches = make_matches(&population, &peripheral, &placeholder, None).unwrap();

        let mut counts = [0u32; 3];
        for m in &matches.matches {
            counts[m.ix_output as usize] += 1;
        }
        assert_eq!(counts, [3, 1, 3]);
    }

    #[test]
    fn zero_sample_weight_drops_the_row() {
        let (population, peripheral) = build_frames();
        let placeholder = Placeholder::new("peripheral").with_join_key("jk", "jk");
        let weights = [0.0, 1.0, 1.0];
        let matches = make_matches(&population, &peripheral, &placeholder, Some(&weights)).unwrap();
        assert!(matches.matches.iter().all(|m| m.ix_output != 0));
    }

    #[test]
    fn empty_population_is_rejected() {
        let population = DataFrame::new("population");
        let (_, peripheral) = build_frames();
        let placeholder = Placeholder::new("peripheral").with_join_key("jk", "jk");
        let err = make_matches(&population, &peripheral, &placeholder, None).unwrap_err();
        assert_eq!(err.tag(), "InvalidInput");
    }
}
