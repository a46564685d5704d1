//! Decision-tree node: split search and recursion (spec §4.5).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relboost_common::{Column, ColumnData, ColumnRole, DataFrame, Hyperparameters};
use serde::{Deserialize, Serialize};

use crate::agg::AggEngine;
use crate::criterion::OptimizationCriterion;
use crate::matches::Match;

use super::split::{self, DataUsed, Membership, SplitCandidate};

/// Internal constant: spec §6 enumerates the full hyperparameter surface
/// and `min_loss_reduction` is not in it, so unlike `reg_lambda` /
/// `share_conditions` it is fixed here rather than user-tunable (see
/// DESIGN.md).
pub const MIN_LOSS_REDUCTION: f64 = 1e-7;

/// One committed split, retained so `transform` can replay the same
/// partition — and the same weight contribution — on fresh data without
/// re-running the split search (spec §4.5 point 4).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CommittedSplit {
    pub column_name: String,
    pub data_used: DataUsed,
    pub critical_value: f64,
    pub categories_in: Vec<i32>,
    /// The population-side column paired with `column_name`, for
    /// `SameUnitNumerical`/`TimeStampWindow` splits only.
    pub population_column: Option<String>,
    /// The word tested for containment, for `Text` splits only.
    pub text_word: Option<String>,
    pub weight1: f64,
    pub weight2: f64,
}

/// A node in the fitted tree, in arena form (design notes §9: "Replace
/// with an arena: nodes are indices into a `Vec<Node>`").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf,
    Split {
        split: CommittedSplit,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// Builds the grid of eligible source columns for a node's split search:
/// every numerical/discrete column paired with `DataUsed::Numerical`, every
/// categorical column paired with `DataUsed::Categorical`.
fn eligible_columns(peripheral: &DataFrame) -> Vec<(&Column, DataUsed)> {
    let mut columns = Vec::new();
    for col in peripheral.columns_with_role(ColumnRole::Numerical) {
        columns.push((col, DataUsed::Numerical));
    }
    for col in peripheral.columns_with_role(ColumnRole::Discrete) {
        columns.push((col, DataUsed::Discrete));
    }
    for col in peripheral.columns_with_role(ColumnRole::Categorical) {
        columns.push((col, DataUsed::Categorical));
    }
    columns
}

/// Same-unit column pairs (spec §4.5 "same-unit pairs"): a peripheral
/// numerical column and a population numerical column that share a common,
/// non-empty `Column::unit` tag — the critical value is tested against
/// `population_value - peripheral_value`.
fn eligible_same_unit_pairs<'a>(peripheral: &'a DataFrame, population: &'a DataFrame) -> Vec<(&'a Column, &'a Column)> {
    let mut pairs = Vec::new();
    for per_col in peripheral.columns_with_role(ColumnRole::Numerical) {
        if per_col.unit.is_empty() {
            continue;
        }
        for pop_col in population.columns_with_role(ColumnRole::Numerical) {
            if pop_col.unit == per_col.unit {
                pairs.push((per_col, pop_col));
            }
        }
    }
    pairs
}

/// Time-stamp window pairs (spec §4.5 "time-stamp windows"): every
/// peripheral time-stamp column against every population time-stamp
/// column, tested as `population_ts - peripheral_ts < critical`.
fn eligible_timestamp_pairs<'a>(peripheral: &'a DataFrame, population: &'a DataFrame) -> Vec<(&'a Column, &'a Column)> {
    let mut pairs = Vec::new();
    for per_col in peripheral.columns_with_role(ColumnRole::TimeStamp) {
        for pop_col in population.columns_with_role(ColumnRole::TimeStamp) {
            pairs.push((per_col, pop_col));
        }
    }
    pairs
}

/// Deterministic per-(node, column) inclusion probability seeded by
/// `tree_seed XOR depth XOR column_id` (spec §4.5 "Random column
/// subsampling").
fn column_is_shared(tree_seed: u32, depth: u8, column_name: &str, share_conditions: f64) -> bool {
    if share_conditions >= 1.0 {
        return true;
    }
    let mut hasher = DefaultHasher::new();
    column_name.hash(&mut hasher);
    let column_id = hasher.finish() as u32;
    let seed = (tree_seed ^ depth as u32 ^ column_id) as u64;
    let mut rng = StdRng::seed_from_u64(seed);
    rng.gen::<f64>() < share_conditions
}

fn numeric_values(column: &Column) -> Vec<f64> {
    (0..column.data.len())
        .map(|row| column.data.as_f64(row).unwrap_or(f64::NAN))
        .collect()
}

fn peripheral_category_column(column: &Column) -> Vec<i32> {
    (0..column.data.len())
        .map(|row| column.data.as_category(row).unwrap_or(-1))
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn consider(
    best: &mut Option<SplitCandidate>,
    column_used: usize,
    column_name: &str,
    data_used: DataUsed,
    critical_value: f64,
    categories_in: Vec<i32>,
    population_column: Option<String>,
    text_word: Option<String>,
    loss_reduction: f64,
    weight1: f64,
    weight2: f64,
) {
    let candidate = SplitCandidate {
        column_used,
        column_name: column_name.to_owned(),
        data_used,
        critical_value,
        categories_in,
        population_column,
        text_word,
        loss_reduction,
        weight1,
        weight2,
    };
    let better = match best {
        None => true,
        Some(current) => {
            candidate.loss_reduction > current.loss_reduction
                || (candidate.loss_reduction == current.loss_reduction
                    && (candidate.column_used, data_used_rank(&candidate.data_used))
                        < (current.column_used, data_used_rank(&current.data_used)))
        }
    };
    if better {
        *best = Some(candidate);
    }
}

fn data_used_rank(data_used: &DataUsed) -> u8 {
    match data_used {
        DataUsed::Numerical => 0,
        DataUsed::Discrete => 1,
        DataUsed::Categorical => 2,
        DataUsed::SameUnitNumerical => 3,
        DataUsed::TimeStampWindow => 4,
        DataUsed::Text => 5,
    }
}

/// Finds the best-scoring candidate split over every eligible column,
/// breaking ties on lower column index then lower `data_used` (spec §4.5
/// point 3). `values`/`timestamps` are the aggregation's own target column
/// (e.g. the column being summed or averaged) — independent of whichever
/// column a candidate tests membership against.
#[allow(clippy::too_many_arguments)]
fn propose_split(
    agg: &mut AggEngine,
    criterion: &OptimizationCriterion,
    sample_weights: &[f32],
    matches: &[Match],
    population: &DataFrame,
    peripheral: &DataFrame,
    values: &[f64],
    timestamps: Option<&[f64]>,
    hyperparameters: &Hyperparameters,
    tree_seed: u32,
    depth: u8,
) -> Option<SplitCandidate> {
    let _span = tracing::trace_span!("propose_split", depth, num_matches = matches.len()).entered();
    let mut best: Option<SplitCandidate> = None;
    let mut column_index = 0;

    for (column, data_used) in eligible_columns(peripheral) {
        column_index += 1;
        if !column_is_shared(tree_seed, depth, &column.name, hyperparameters.share_conditions) {
            continue;
        }

        match data_used {
            DataUsed::Categorical => {
                let categories = split::categorical_candidates(column, matches, hyperparameters.min_df);
                let split_column = peripheral_category_column(column);
                for category in categories {
                    let membership = Membership::InSet {
                        categories: &split_column,
                        set: std::slice::from_ref(&category),
                    };
                    let (gain, w1, w2) = split::evaluate(
                        agg,
                        criterion,
                        sample_weights,
                        matches,
                        &membership,
                        values,
                        timestamps,
                        hyperparameters.reg_lambda,
                    );
                    consider(
                        &mut best,
                        column_index,
                        &column.name,
                        DataUsed::Categorical,
                        0.0,
                        vec![category],
                        None,
                        None,
                        gain,
                        w1,
                        w2,
                    );
                }
            }
            DataUsed::Numerical | DataUsed::Discrete => {
                let critical_values = split::numerical_candidates(column, matches, hyperparameters.grid_factor);
                let split_column = numeric_values(column);
                for critical in critical_values {
                    let membership = Membership::LessThan {
                        values: &split_column,
                        critical,
                    };
                    let (gain, w1, w2) = split::evaluate(
                        agg,
                        criterion,
                        sample_weights,
                        matches,
                        &membership,
                        values,
                        timestamps,
                        hyperparameters.reg_lambda,
                    );
                    consider(
                        &mut best,
                        column_index,
                        &column.name,
                        data_used.clone(),
                        critical,
                        Vec::new(),
                        None,
                        None,
                        gain,
                        w1,
                        w2,
                    );
                }
            }
            DataUsed::SameUnitNumerical | DataUsed::TimeStampWindow | DataUsed::Text => unreachable!(
                "eligible_columns never emits SameUnitNumerical/TimeStampWindow/Text; those come from their own eligible_* helpers below"
            ),
        }
    }

    for (per_col, pop_col) in eligible_same_unit_pairs(peripheral, population) {
        column_index += 1;
        if !column_is_shared(tree_seed, depth, &per_col.name, hyperparameters.share_conditions) {
            continue;
        }
        let population_values = numeric_values(pop_col);
        let peripheral_values = numeric_values(per_col);
        let critical_values = split::difference_candidates(pop_col, per_col, matches, hyperparameters.grid_factor);
        for critical in critical_values {
            let membership = Membership::DifferenceLessThan {
                population: &population_values,
                peripheral: &peripheral_values,
                critical,
            };
            let (gain, w1, w2) = split::evaluate(
                agg,
                criterion,
                sample_weights,
                matches,
                &membership,
                values,
                timestamps,
                hyperparameters.reg_lambda,
            );
            consider(
                &mut best,
                column_index,
                &per_col.name,
                DataUsed::SameUnitNumerical,
                critical,
                Vec::new(),
                Some(pop_col.name.clone()),
                None,
                gain,
                w1,
                w2,
            );
        }
    }

    for (per_col, pop_col) in eligible_timestamp_pairs(peripheral, population) {
        column_index += 1;
        if !column_is_shared(tree_seed, depth, &per_col.name, hyperparameters.share_conditions) {
            continue;
        }
        let population_values = numeric_values(pop_col);
        let peripheral_values = numeric_values(per_col);
        let critical_values = split::difference_candidates(pop_col, per_col, matches, hyperparameters.grid_factor);
        for critical in critical_values {
            let membership = Membership::DifferenceLessThan {
                population: &population_values,
                peripheral: &peripheral_values,
                critical,
            };
            let (gain, w1, w2) = split::evaluate(
                agg,
                criterion,
                sample_weights,
                matches,
                &membership,
                values,
                timestamps,
                hyperparameters.reg_lambda,
            );
            consider(
                &mut best,
                column_index,
                &per_col.name,
                DataUsed::TimeStampWindow,
                critical,
                Vec::new(),
                Some(pop_col.name.clone()),
                None,
                gain,
                w1,
                w2,
            );
        }
    }

    for column in peripheral.columns_with_role(ColumnRole::Text) {
        column_index += 1;
        if !column_is_shared(tree_seed, depth, &column.name, hyperparameters.share_conditions) {
            continue;
        }
        let words = split::text_candidates(column, matches, hyperparameters.min_df);
        for word in words {
            let flags = split::text_contains_flags(column, &word);
            let membership = Membership::Contains { flags: &flags };
            let (gain, w1, w2) = split::evaluate(
                agg,
                criterion,
                sample_weights,
                matches,
                &membership,
                values,
                timestamps,
                hyperparameters.reg_lambda,
            );
            consider(
                &mut best,
                column_index,
                &column.name,
                DataUsed::Text,
                0.0,
                Vec::new(),
                None,
                Some(word),
                gain,
                w1,
                w2,
            );
        }
    }

    if let Some(candidate) = &best {
        tracing::debug!(
            column = %candidate.column_name,
            data_used = ?candidate.data_used,
            loss_reduction = candidate.loss_reduction,
            "selected split candidate"
        );
    }

    best
}

/// Reconstructs a committed split's membership test against fresh data,
/// mirroring `propose_split`'s per-`DataUsed` dispatch exactly so replay at
/// transform time agrees with the candidate that was scored at fit time.
/// `population` is needed only for `SameUnitNumerical`/`TimeStampWindow`,
/// whose paired population-side column lives there rather than in
/// `peripheral`.
#[allow(clippy::too_many_arguments)]
fn membership_for<'a>(
    split: &'a CommittedSplit,
    population: &DataFrame,
    column: &Column,
    cache: &'a mut Option<Vec<f64>>,
    cat_cache: &'a mut Option<Vec<i32>>,
    pop_cache: &'a mut Option<Vec<f64>>,
    flag_cache: &'a mut Option<Vec<bool>>,
) -> Membership<'a> {
    match split.data_used {
        DataUsed::Categorical => {
            *cat_cache = Some(peripheral_category_column(column));
            Membership::InSet {
                categories: cat_cache.as_ref().unwrap(),
                set: &split.categories_in,
            }
        }
        DataUsed::SameUnitNumerical | DataUsed::TimeStampWindow => {
            let pop_column_name = split
                .population_column
                .as_deref()
                .expect("SameUnitNumerical/TimeStampWindow split must carry a population_column");
            let pop_column = population
                .column(pop_column_name)
                .expect("committed split's population column must exist");
            *pop_cache = Some(numeric_values(pop_column));
            *cache = Some(numeric_values(column));
            Membership::DifferenceLessThan {
                population: pop_cache.as_ref().unwrap(),
                peripheral: cache.as_ref().unwrap(),
                critical: split.critical_value,
            }
        }
        DataUsed::Text => {
            let word = split.text_word.as_deref().expect("Text split must carry a text_word");
            *flag_cache = Some(split::text_contains_flags(column, word));
            Membership::Contains {
                flags: flag_cache.as_ref().unwrap(),
            }
        }
        DataUsed::Numerical | DataUsed::Discrete => {
            *cache = Some(numeric_values(column));
            Membership::LessThan {
                values: cache.as_ref().unwrap(),
                critical: split.critical_value,
            }
        }
    }
}

/// Recursively fits one node over `matches`, returning the built subtree.
#[allow(clippy::too_many_arguments)]
pub fn fit(
    agg: &mut AggEngine,
    criterion: &OptimizationCriterion,
    sample_weights: &[f32],
    matches: Vec<Match>,
    population: &DataFrame,
    peripheral: &DataFrame,
    values: &[f64],
    timestamps: Option<&[f64]>,
    hyperparameters: &Hyperparameters,
    tree_seed: u32,
    depth: u8,
    weights_out: &mut [f64],
) -> Node {
    let _span = tracing::debug_span!("fit_node", depth, num_matches = matches.len()).entered();
    if depth >= hyperparameters.max_depth || matches.len() < hyperparameters.min_num_samples as usize {
        return Node::Leaf;
    }

    let proposal = propose_split(
        agg,
        criterion,
        sample_weights,
        &matches,
        population,
        peripheral,
        values,
        timestamps,
        hyperparameters,
        tree_seed,
        depth,
    );

    let Some(candidate) = proposal else {
        return Node::Leaf;
    };
    if candidate.loss_reduction <= MIN_LOSS_REDUCTION {
        return Node::Leaf;
    }

    let split = CommittedSplit {
        column_name: candidate.column_name,
        data_used: candidate.data_used,
        critical_value: candidate.critical_value,
        categories_in: candidate.categories_in,
        population_column: candidate.population_column,
        text_word: candidate.text_word,
        weight1: candidate.weight1,
        weight2: candidate.weight2,
    };

    let column = peripheral
        .column(&split.column_name)
        .expect("committed split column must exist");
    let mut num_cache = None;
    let mut cat_cache = None;
    let mut pop_cache = None;
    let mut flag_cache = None;
    let membership = membership_for(&split, population, column, &mut num_cache, &mut cat_cache, &mut pop_cache, &mut flag_cache);
    let (left_matches, right_matches) = split::commit(
        agg,
        &matches,
        &membership,
        values,
        timestamps,
        weights_out,
        split.weight1,
        split.weight2,
    );

    let left = fit(
        agg,
        criterion,
        sample_weights,
        left_matches,
        population,
        peripheral,
        values,
        timestamps,
        hyperparameters,
        tree_seed,
        depth + 1,
        weights_out,
    );
    let right = fit(
        agg,
        criterion,
        sample_weights,
        right_matches,
        population,
        peripheral,
        values,
        timestamps,
        hyperparameters,
        tree_seed,
        depth + 1,
        weights_out,
    );

    Node::Split {
        split,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Replays the committed split structure over a fresh `(population,
/// peripheral)` pair's matches, accumulating each touched output row's
/// contribution into `weights_out` without re-running the split search
/// (spec §4.5 point 4: "applies the committed split without touching
/// aggregation state"). `agg` is a scratch engine scoped to this call
/// (freshly constructed and `init_count_committed`-ed by the caller over
/// this same match set) so that transform never mutates state a later fit
/// would rely on.
pub fn transform(
    node: &Node,
    agg: &mut AggEngine,
    matches: Vec<Match>,
    population: &DataFrame,
    peripheral: &DataFrame,
    values: &[f64],
    timestamps: Option<&[f64]>,
    weights_out: &mut [f64],
) {
    match node {
        Node::Leaf => {}
        Node::Split { split, left, right } => {
            let column = peripheral
                .column(&split.column_name)
                .expect("committed split column must exist");
            let mut num_cache = None;
            let mut cat_cache = None;
            let mut pop_cache = None;
            let mut flag_cache = None;
            let membership = membership_for(split, population, column, &mut num_cache, &mut cat_cache, &mut pop_cache, &mut flag_cache);
            let (left_matches, right_matches) = split::commit(
                agg,
                &matches,
                &membership,
                values,
                timestamps,
                weights_out,
                split.weight1,
                split.weight2,
            );
            transform(left, agg, left_matches, population, peripheral, values, timestamps, weights_out);
            transform(right, agg, right_matches, population, peripheral, values, timestamps, weights_out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relboost_common::{AggKind, Column, ColumnData, LossFunction};

    fn matches_for(n: u32) -> Vec<Match> {
        (0..n)
            .map(|i| Match {
                ix_output: 0,
                ix_input: i,
                sample_weight: 1.0,
                active: false,
            })
            .collect()
    }

    #[test]
    fn leaf_returned_below_min_samples() {
        let mut population = DataFrame::new("population");
        population.add_float_column("id", ColumnRole::Numerical, vec![0.0]).unwrap();
        let mut peripheral = DataFrame::new("peripheral");
        peripheral
            .add_float_column("x", ColumnRole::Numerical, vec![1.0, 2.0, 3.0])
            .unwrap();
        let mut agg = AggEngine::new(AggKind::Sum, 1);
        let matches = matches_for(3);
        agg.init_count_committed(&matches);
        let criterion = OptimizationCriterion::init(vec![1.0], LossFunction::SquaredError).unwrap();
        let values = vec![1.0, 2.0, 3.0];
        let sw = [1.0];
        let mut weights_out = vec![0.0];
        let hp = Hyperparameters {
            min_num_samples: 10,
            ..Hyperparameters::default()
        };
        let node = fit(
            &mut agg,
            &criterion,
            &sw,
            matches,
            &population,
            &peripheral,
            &values,
            None,
            &hp,
            1,
            0,
            &mut weights_out,
        );
        assert!(matches!(node, Node::Leaf));
        let _ = Column::new("unused", ColumnRole::Numerical, ColumnData::Float64(vec![]));
    }
}
