//! Fast-propositionalization aggregator (spec §4.8): evaluates a fixed
//! catalog of `AbstractFeature`s across match sets without any training,
//! mirroring `fastprop::algorithm::Aggregator::apply_aggregation`'s
//! per-column-kind dispatch.

use std::collections::HashMap;

use relboost_common::{AggKind, Column, ColumnData, ColumnRole, DataFrame, Result};

use crate::agg::{finalize, Item};
use crate::matches::Match;

/// Which column family an `AbstractFeature` reads from, matching
/// `Aggregator`'s `apply_{numerical,discrete,categorical,same_units_*,
/// text,not_applicable}` dispatch one-for-one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataUsed {
    NotApplicable,
    Numerical,
    Discrete,
    Categorical,
    SameUnitNumerical,
    SameUnitDiscrete,
    SameUnitCategorical,
    Text,
}

/// A test on a single peripheral column, evaluated per match (spec §4.8
/// "Conditions are tested per match").
#[derive(Clone, Debug)]
pub struct Condition {
    pub column_name: String,
    pub categorical_equals: Option<i32>,
    pub numerical_less_than: Option<f64>,
}

impl Condition {
    fn is_satisfied(&self, peripheral: &DataFrame, ix_input: u32) -> bool {
        let Ok(col) = peripheral.column(&self.column_name) else {
            return false;
        };
        let row = ix_input as usize;
        if let Some(category) = self.categorical_equals {
            return col.data.as_category(row) == Some(category);
        }
        if let Some(critical) = self.numerical_less_than {
            return col.data.as_f64(row).map(|v| v < critical).unwrap_or(false);
        }
        true
    }
}

/// One feature in the fixed, non-learned catalog (spec §4.8 "Contract").
#[derive(Clone, Debug)]
pub struct AbstractFeature {
    pub aggregation: AggKind,
    pub data_used: DataUsed,
    pub input_column: String,
    /// The peripheral column the feature is paired against for same-unit
    /// aggregations (`SameUnit*`) — ignored otherwise.
    pub paired_column: Option<String>,
    /// The vocabulary word id this feature counts occurrences of, for
    /// `DataUsed::Text`.
    pub text_word_id: Option<i32>,
    pub conditions: Vec<Condition>,
}

/// Maps each distinct lowercased, alphanumeric-delimited token in a
/// `StringBag` column to a stable integer id, mirroring
/// `textmining::WordIndex`.
#[derive(Clone, Debug, Default)]
pub struct Vocabulary {
    word_to_id: HashMap<String, i32>,
}

pub(crate) fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
}

impl Vocabulary {
    pub fn build(column: &Column) -> Self {
        let mut word_to_id = HashMap::new();
        if let ColumnData::StringBag(texts) = &column.data {
            for text in texts {
                for word in tokenize(text) {
                    let next_id = word_to_id.len() as i32;
                    word_to_id.entry(word).or_insert(next_id);
                }
            }
        }
        Self { word_to_id }
    }

    pub fn id_of(&self, word: &str) -> Option<i32> {
        self.word_to_id.get(&word.to_lowercase()).copied()
    }

    fn contains(&self, text: &str, word_id: i32) -> bool {
        tokenize(text).any(|w| self.word_to_id.get(&w) == Some(&word_id))
    }
}

/// Memoizes the `(output_row -> extracted items)` table for a given
/// `(data_used, input_column, conditions)` key, so that consecutive
/// features in the catalog sharing that prefix skip re-extracting the raw
/// values from `matches` (spec §4.8 "memoization cache keyed by the
/// current feature's identifying fields").
#[derive(Default)]
struct Memoization {
    cache: HashMap<String, Vec<Vec<Item>>>,
}

fn condition_fingerprint(conditions: &[Condition]) -> String {
    conditions
        .iter()
        .map(|c| format!("{}:{:?}:{:?}", c.column_name, c.categorical_equals, c.numerical_less_than))
        .collect::<Vec<_>>()
        .join("|")
}

fn feature_key(feature: &AbstractFeature) -> String {
    format!(
        "{:?}:{}:{:?}:{}",
        feature.data_used,
        feature.input_column,
        feature.paired_column,
        condition_fingerprint(&feature.conditions)
    )
}

impl Memoization {
    fn extract<'a>(
        &'a mut self,
        population: &DataFrame,
        peripheral: &DataFrame,
        matches_by_output: &HashMap<u32, Vec<Match>>,
        num_outputs: usize,
        feature: &AbstractFeature,
    ) -> &'a [Vec<Item>] {
        let key = feature_key(feature);
        self.cache.entry(key).or_insert_with(|| {
            build_items_table(population, peripheral, matches_by_output, num_outputs, feature)
        })
    }
}

fn rebase_timestamp(population: &DataFrame, peripheral: &DataFrame, out: u32, ix_input: u32) -> f64 {
    let pop_ts = population
        .columns_with_role(ColumnRole::TimeStamp)
        .next()
        .and_then(|c| c.data.as_f64(out as usize));
    let per_ts = peripheral
        .columns_with_role(ColumnRole::TimeStamp)
        .next()
        .and_then(|c| c.data.as_f64(ix_input as usize));
    match (pop_ts, per_ts) {
        (Some(po), Some(pi)) => po - pi,
        _ => f64::NAN,
    }
}

fn build_items_table(
    population: &DataFrame,
    peripheral: &DataFrame,
    matches_by_output: &HashMap<u32, Vec<Match>>,
    num_outputs: usize,
    feature: &AbstractFeature,
) -> Vec<Vec<Item>> {
    let first_last = feature.aggregation.is_first_last_family();
    let mut table = vec![Vec::new(); num_outputs];

    let column = peripheral.column(&feature.input_column).ok();
    let text_column = if feature.data_used == DataUsed::Text { column } else { None };
    let vocab = text_column.map(Vocabulary::build);

    for out in 0..num_outputs as u32 {
        let Some(row_matches) = matches_by_output.get(&out) else { continue };
        for m in row_matches {
            if !feature.conditions.iter().all(|c| c.is_satisfied(peripheral, m.ix_input)) {
                continue;
            }
            let row = m.ix_input as usize;
            let value: Option<f64> = match feature.data_used {
                DataUsed::NotApplicable => Some(1.0),
                DataUsed::Text => {
                    let (Some(col), Some(vocab), Some(word_id)) = (&text_column, &vocab, feature.text_word_id) else {
                        continue;
                    };
                    let ColumnData::StringBag(texts) = &col.data else { continue };
                    Some(if vocab.contains(&texts[row], word_id) { 1.0 } else { 0.0 })
                }
                DataUsed::Categorical | DataUsed::SameUnitCategorical => {
                    column.as_ref().and_then(|c| c.data.as_category(row)).map(|v| v as f64)
                }
                DataUsed::SameUnitNumerical => column.as_ref().and_then(|c| c.data.as_f64(row)).map(|peripheral_value| {
                    let population_value = feature
                        .paired_column
                        .as_ref()
                        .and_then(|name| population.column(name).ok())
                        .and_then(|c| c.data.as_f64(out as usize))
                        .unwrap_or(f64::NAN);
                    population_value - peripheral_value
                }),
                DataUsed::Numerical | DataUsed::Discrete | DataUsed::SameUnitDiscrete => {
                    column.as_ref().and_then(|c| c.data.as_f64(row))
                }
            };
            let Some(value) = value else { continue };
            if !value.is_finite() {
                continue;
            }
            let timestamp = if first_last {
                rebase_timestamp(population, peripheral, out, m.ix_input)
            } else {
                f64::NAN
            };
            table[out as usize].push((timestamp, value));
        }
    }
    table
}

fn group_matches_by_output(matches: &[Match]) -> HashMap<u32, Vec<Match>> {
    let mut grouped: HashMap<u32, Vec<Match>> = HashMap::new();
    for &m in matches {
        grouped.entry(m.ix_output).or_default().push(m);
    }
    grouped
}

/// Evaluates every feature in `catalog` across `matches`, returning one
/// `Float64` column per feature, each `population.nrows()` long (spec
/// §4.8 "Contract").
pub fn evaluate(
    population: &DataFrame,
    peripheral: &DataFrame,
    matches: &[Match],
    catalog: &[AbstractFeature],
) -> Result<Vec<Vec<f64>>> {
    let num_outputs = population.nrows();
    let matches_by_output = group_matches_by_output(matches);
    let mut memo = Memoization::default();

    let mut columns = Vec::with_capacity(catalog.len());
    for feature in catalog {
        let items_table = memo.extract(population, peripheral, &matches_by_output, num_outputs, feature);
        let column: Vec<f64> = items_table.iter().map(|items| finalize(feature.aggregation, items)).collect();
        columns.push(column);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relboost_common::{Column, ColumnData, ColumnRole};

    fn frames() -> (DataFrame, DataFrame) {
        let mut population = DataFrame::new("population");
        population.add_float_column("id", ColumnRole::Numerical, vec![0.0, 1.0]).unwrap();
        let mut peripheral = DataFrame::new("peripheral");
        peripheral.add_float_column("amount", ColumnRole::Numerical, vec![1.0, 2.0, 3.0]).unwrap();
        (population, peripheral)
    }

    fn matches_for(pairs: &[(u32, u32)]) -> Vec<Match> {
        pairs
            .iter()
            .map(|&(out, input)| Match { ix_output: out, ix_input: input, sample_weight: 1.0, active: false })
            .collect()
    }

    #[test]
    fn count_feature_counts_matches_per_row() {
        let (population, peripheral) = frames();
        let matches = matches_for(&[(0, 0), (0, 1), (1, 2)]);
        let catalog = vec![AbstractFeature {
            aggregation: AggKind::Count,
            data_used: DataUsed::NotApplicable,
            input_column: String::new(),
            paired_column: None,
            text_word_id: None,
            conditions: Vec::new(),
        }];
        let columns = evaluate(&population, &peripheral, &matches, &catalog).unwrap();
        assert_eq!(columns[0], vec![2.0, 1.0]);
    }

    #[test]
    fn sum_feature_respects_conditions() {
        let (population, peripheral) = frames();
        let matches = matches_for(&[(0, 0), (0, 1)]);
        let catalog = vec![AbstractFeature {
            aggregation: AggKind::Sum,
            data_used: DataUsed::Numerical,
            input_column: "amount".to_owned(),
            paired_column: None,
            text_word_id: None,
            conditions: vec![Condition {
                column_name: "amount".to_owned(),
                categorical_equals: None,
                numerical_less_than: Some(2.0),
            }],
        }];
        let columns = evaluate(&population, &peripheral, &matches, &catalog).unwrap();
        assert_eq!(columns[0], vec![1.0, 0.0]);
    }

    #[test]
    fn text_feature_counts_word_occurrences() {
        let mut population = DataFrame::new("population");
        population.add_float_column("id", ColumnRole::Numerical, vec![0.0]).unwrap();
        let mut peripheral = DataFrame::new("peripheral");
        peripheral
            .add_column(Column::new(
                "notes",
                ColumnRole::Text,
                ColumnData::StringBag(vec!["urgent request".to_owned(), "routine update".to_owned()]),
            ))
            .unwrap();
        let matches = matches_for(&[(0, 0), (0, 1)]);
        let vocab = Vocabulary::build(peripheral.column("notes").unwrap());
        let word_id = vocab.id_of("urgent").unwrap();
        let catalog = vec![AbstractFeature {
            aggregation: AggKind::Sum,
            data_used: DataUsed::Text,
            input_column: "notes".to_owned(),
            paired_column: None,
            text_word_id: Some(word_id),
            conditions: Vec::new(),
        }];
        let columns = evaluate(&population, &peripheral, &matches, &catalog).unwrap();
        assert_eq!(columns[0], vec![1.0]);
    }
}
