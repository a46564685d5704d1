//! Tree-ensemble driver: the gradient-boosting outer loop and the
//! snowflake sub-ensemble recursion (spec §4.6).

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relboost_common::{
    AggKind, Column, ColumnData, ColumnRole, DataFrame, EwmaHorizon, Hyperparameters,
    RelboostError, Result,
};
use serde::{Deserialize, Serialize};

use crate::agg::AggEngine;
use crate::criterion::OptimizationCriterion;
use crate::matches::{make_matches, Match};
use crate::placeholder::Placeholder;
use crate::tree::node;

/// Size of the per-feature candidate-tree tournament (spec §4.6 point 3,
/// "a small `num_candidates` pool"). Not in §6's enumerated hyperparameter
/// surface, so it is a fixed constant like `tree::split::MAX_STEP` (see
/// DESIGN.md).
const NUM_CANDIDATES: u32 = 4;

/// One committed tree plus the column it was grown against, so `transform`
/// can rebuild the same `AggEngine` over fresh data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedTree {
    pub agg_kind: AggKind,
    pub value_column: String,
    pub timestamp_column: Option<String>,
    pub tree_seed: u32,
    pub root: node::Node,
}

impl FittedTree {
    fn column_values(&self, peripheral: &DataFrame) -> (Vec<f64>, Option<Vec<f64>>) {
        let values = numeric_column_or_zeros(peripheral, &self.value_column);
        let timestamps = self
            .timestamp_column
            .as_ref()
            .map(|name| numeric_column_or_zeros(peripheral, name));
        (values, timestamps)
    }

    /// Replays this tree over `matches` (spec §4.5 point 4), returning one
    /// Float64 output column indexed by population row.
    fn transform(&self, population: &DataFrame, peripheral: &DataFrame, matches: &[Match], num_outputs: usize) -> Vec<f64> {
        let (values, timestamps) = self.column_values(peripheral);
        let mut agg = AggEngine::new(self.agg_kind, num_outputs);
        agg.init_count_committed(matches);
        let mut weights_out = vec![0.0; num_outputs];
        node::transform(
            &self.root,
            &mut agg,
            matches.to_vec(),
            population,
            peripheral,
            &values,
            timestamps.as_deref(),
            &mut weights_out,
        );
        weights_out
    }
}

/// Two inner ensembles for a snowflake peripheral (spec §4.6 "Snowflake
/// subfeatures"): one restricted to shape/location aggregations ("avg"
/// family), one restricted to scale/count aggregations ("sum" family).
/// Each fits at the child peripheral's own row granularity — its `transform`
/// output is already at the parent peripheral's row granularity, needing no
/// further reduction before being appended as an `x_subfeature` column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnowflakeSubensembles {
    pub avg: Box<FittedEnsemble>,
    pub sum: Box<FittedEnsemble>,
}

/// Vector of decision trees plus per-peripheral optional sub-ensembles,
/// the placeholder, and the target's loss function — immutable once
/// built, `Sync` since nothing here uses interior mutability (spec §4.6
/// "FittedEnsemble").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedEnsemble {
    pub hyperparameters: Hyperparameters,
    pub placeholder: Placeholder,
    pub trees: Vec<FittedTree>,
    pub subensembles: HashMap<String, SnowflakeSubensembles>,
}

fn numeric_column_or_zeros(frame: &DataFrame, name: &str) -> Vec<f64> {
    match frame.column(name) {
        Ok(col) => (0..col.len()).map(|row| col.data.as_f64(row).unwrap_or(f64::NAN)).collect(),
        Err(_) => vec![0.0; frame.nrows()],
    }
}

fn eligible_value_columns(peripheral: &DataFrame) -> Vec<String> {
    peripheral
        .columns_with_role(ColumnRole::Numerical)
        .chain(peripheral.columns_with_role(ColumnRole::Discrete))
        .map(|c| c.name.clone())
        .collect()
}

fn timestamp_column_name(peripheral: &DataFrame) -> Option<String> {
    peripheral.columns_with_role(ColumnRole::TimeStamp).next().map(|c| c.name.clone())
}

/// Aggregation kinds grouped by family: shape/location kinds feed the
/// "avg" snowflake sub-ensemble, scale/count kinds feed the "sum"
/// sub-ensemble (spec §4.6; the split itself is this crate's own
/// resolution of an Open Question — see DESIGN.md).
fn avg_family_kinds() -> Vec<AggKind> {
    vec![
        AggKind::Avg,
        AggKind::AvgTimeBetween,
        AggKind::Min,
        AggKind::Max,
        AggKind::Median,
        AggKind::Mode,
        AggKind::NumMax,
        AggKind::NumMin,
        AggKind::First,
        AggKind::Last,
        AggKind::Ewma(EwmaHorizon::OneDay),
        AggKind::EwmaTrend(EwmaHorizon::OneDay),
        AggKind::Trend,
        AggKind::TimeSinceFirstMinimum,
        AggKind::TimeSinceFirstMaximum,
        AggKind::TimeSinceLastMinimum,
        AggKind::TimeSinceLastMaximum,
    ]
}

fn sum_family_kinds() -> Vec<AggKind> {
    vec![
        AggKind::Count,
        AggKind::CountDistinct,
        AggKind::CountMinusCountDistinct,
        AggKind::Sum,
        AggKind::Stddev,
        AggKind::Var,
        AggKind::VariationCoefficient,
        AggKind::Skew,
        AggKind::Kurtosis,
    ]
}

fn full_catalog() -> Vec<AggKind> {
    let mut all = avg_family_kinds();
    all.extend(sum_family_kinds());
    all
}

/// Picks one random `(AggKind, value_column, timestamp_column)` combination
/// from `catalog`, skipping first/last-family kinds when the peripheral
/// carries no time-stamp column (spec §4.4: those kinds need `(timestamp,
/// value)` pairs).
fn pick_candidate_target(
    peripheral: &DataFrame,
    catalog: &[AggKind],
    rng: &mut StdRng,
) -> (AggKind, String, Option<String>) {
    let value_columns = eligible_value_columns(peripheral);
    let ts_column = timestamp_column_name(peripheral);

    let usable: Vec<AggKind> = catalog
        .iter()
        .copied()
        .filter(|k| !k.is_first_last_family() || ts_column.is_some())
        .collect();
    let kinds = if usable.is_empty() { vec![AggKind::Count] } else { usable };

    let kind = kinds[rng.gen_range(0..kinds.len())];
    let value_column = if value_columns.is_empty() {
        String::new()
    } else {
        value_columns[rng.gen_range(0..value_columns.len())].clone()
    };
    let timestamp = if kind.is_first_last_family() { ts_column } else { None };
    (kind, value_column, timestamp)
}

/// Per-peripheral-row synthetic regression target for a snowflake
/// sub-ensemble: the sample-weighted average, over every population row
/// reaching this peripheral row, of that row's own target. Grounded in the
/// stacked-boosting intuition that an intermediate node's assigned label is
/// the expectation of its downstream targets (see DESIGN.md — the source's
/// own multi-level target propagation was not reconstructable from the
/// retrieved pack, so this is this crate's own, documented resolution).
fn synthesize_child_targets(matches: &[Match], targets: &[f64], num_peripheral_rows: usize) -> Vec<f64> {
    let mut sum = vec![0.0; num_peripheral_rows];
    let mut weight = vec![0.0; num_peripheral_rows];
    for m in matches {
        let ix = m.ix_input as usize;
        let w = m.sample_weight as f64;
        sum[ix] += w * targets[m.ix_output as usize];
        weight[ix] += w;
    }
    (0..num_peripheral_rows)
        .map(|i| if weight[i] > 0.0 { sum[i] / weight[i] } else { 0.0 })
        .collect()
}

fn shrink_hyperparameters(hyperparameters: &Hyperparameters) -> Hyperparameters {
    let mut inner = hyperparameters.clone();
    inner.max_depth = hyperparameters.max_depth.saturating_sub(1).max(1);
    inner.num_features = hyperparameters.num_features.saturating_sub(1).max(1);
    inner.loss_function = relboost_common::LossFunction::SquaredError;
    inner
}

/// Fits one tree-ensemble `fit()` call against `placeholder`'s own table
/// (looked up by name in `tables`), recursing bottom-up into snowflake
/// children first so their subfeature columns are available to this
/// level's split proposer (spec §4.6 "Outer loop" + "Snowflake
/// subfeatures"). `population` is the frame whose rows `targets` index —
/// the top-level population for the outermost call, or a parent
/// peripheral's own table when called recursively for a snowflake child.
pub fn fit(
    population: &DataFrame,
    tables: &HashMap<String, DataFrame>,
    placeholder: &Placeholder,
    targets: &[f64],
    hyperparameters: &Hyperparameters,
) -> Result<FittedEnsemble> {
    let _span = tracing::info_span!("ensemble_fit", placeholder = %placeholder.name, num_rows = population.nrows()).entered();
    hyperparameters.validate()?;
    placeholder.check_acyclic()?;

    let table = tables
        .get(&placeholder.name)
        .ok_or_else(|| RelboostError::not_found("table", &placeholder.name))?;
    let mut peripheral = table.clone_as(&placeholder.name);
    peripheral.create_indices();

    let matches = make_matches(population, &peripheral, placeholder, None)?;
    tracing::debug!(num_matches = matches.matches.len(), "joined population against peripheral");

    let mut subensembles = HashMap::new();
    if placeholder.is_snowflake() {
        let synthetic_targets = synthesize_child_targets(&matches.matches, targets, peripheral.nrows());
        let inner_hp = shrink_hyperparameters(hyperparameters);
        for child in &placeholder.children {
            if subensembles.contains_key(&child.name) {
                return Err(RelboostError::AlreadyFit(child.name.clone()));
            }
            let avg_ens = fit(&peripheral, tables, child, &synthetic_targets, &inner_hp)?;
            let sum_ens = fit(&peripheral, tables, child, &synthetic_targets, &inner_hp)?;
            let avg_cols = transform(&avg_ens, &peripheral, tables)?;
            let sum_cols = transform(&sum_ens, &peripheral, tables)?;
            for (i, col) in avg_cols.into_iter().enumerate() {
                peripheral.add_float_column(format!("subfeature_avg_{}_{}", child.name, i), ColumnRole::Numerical, col)?;
            }
            for (i, col) in sum_cols.into_iter().enumerate() {
                peripheral.add_float_column(format!("subfeature_sum_{}_{}", child.name, i), ColumnRole::Numerical, col)?;
            }
            subensembles.insert(
                child.name.clone(),
                SnowflakeSubensembles { avg: Box::new(avg_ens), sum: Box::new(sum_ens) },
            );
        }
    }

    let catalog = full_catalog();
    let mut criterion = OptimizationCriterion::init(targets.to_vec(), hyperparameters.loss_function)?;
    let mut trees = Vec::with_capacity(hyperparameters.num_features as usize);
    let seed = hyperparameters.seed as u64;

    for i in 0..hyperparameters.num_features {
        let _tree_span = tracing::debug_span!("grow_tree", tree_index = i).entered();
        criterion.calc_residuals();
        let sample_weights = criterion.make_sample_weights(hyperparameters.sampling_factor, seed ^ i as u64);

        let mut best: Option<(FittedTree, f64, Vec<f64>)> = None;
        for c in 0..NUM_CANDIDATES {
            let candidate_seed = (seed ^ ((i as u64) << 32) ^ c as u64) as u32;
            let mut pick_rng = StdRng::seed_from_u64(candidate_seed as u64);
            let (agg_kind, value_column, timestamp_column) =
                pick_candidate_target(&peripheral, &catalog, &mut pick_rng);
            let values = numeric_column_or_zeros(&peripheral, &value_column);
            let timestamps = timestamp_column.as_ref().map(|c| numeric_column_or_zeros(&peripheral, c));

            let mut agg = AggEngine::new(agg_kind, population.nrows());
            agg.init_count_committed(&matches.matches);
            let mut weights_out = vec![0.0; population.nrows()];
            let root = node::fit(
                &mut agg,
                &criterion,
                &sample_weights,
                matches.matches.clone(),
                population,
                &peripheral,
                &values,
                timestamps.as_deref(),
                hyperparameters,
                candidate_seed,
                0,
                &mut weights_out,
            );

            let reduction = criterion.projected_reduction(&sample_weights, &weights_out);
            let better = match &best {
                None => true,
                Some((_, best_reduction, _)) => reduction > *best_reduction,
            };
            if better {
                best = Some((
                    FittedTree {
                        agg_kind,
                        value_column,
                        timestamp_column,
                        tree_seed: candidate_seed,
                        root,
                    },
                    reduction,
                    weights_out,
                ));
            }
        }

        let (tree, reduction, weights_out) = best.expect("NUM_CANDIDATES >= 1");
        tracing::info!(tree_index = i, agg_kind = ?tree.agg_kind, value_column = %tree.value_column, loss_reduction = reduction, "committed tree");
        trees.push(tree);
        if hyperparameters.shrinkage > 0.0 {
            let scaled: Vec<f64> = weights_out.iter().map(|w| w * hyperparameters.shrinkage).collect();
            criterion.update_yhat_old(&sample_weights, &scaled);
        }
    }

    Ok(FittedEnsemble {
        hyperparameters: hyperparameters.clone(),
        placeholder: placeholder.clone(),
        trees,
        subensembles,
    })
}

/// Builds matches, builds subfeatures bottom-up, then replays every tree
/// over a fresh `(population, tables)` pair, returning one `Vec<f64>` per
/// tree (column-major; `num_features` columns each of `population.nrows()`
/// length) — spec §4.6 "Transform".
pub fn transform(
    ensemble: &FittedEnsemble,
    population: &DataFrame,
    tables: &HashMap<String, DataFrame>,
) -> Result<Vec<Vec<f64>>> {
    let _span = tracing::info_span!("ensemble_transform", placeholder = %ensemble.placeholder.name, num_rows = population.nrows()).entered();
    let table = tables
        .get(&ensemble.placeholder.name)
        .ok_or_else(|| RelboostError::not_found("table", &ensemble.placeholder.name))?;
    let mut peripheral = table.clone_as(&ensemble.placeholder.name);
    peripheral.create_indices();

    for child in &ensemble.placeholder.children {
        let Some(sub) = ensemble.subensembles.get(&child.name) else {
            continue;
        };
        let avg_cols = transform(&sub.avg, &peripheral, tables)?;
        let sum_cols = transform(&sub.sum, &peripheral, tables)?;
        for (i, col) in avg_cols.into_iter().enumerate() {
            peripheral.add_float_column(format!("subfeature_avg_{}_{}", child.name, i), ColumnRole::Numerical, col)?;
        }
        for (i, col) in sum_cols.into_iter().enumerate() {
            peripheral.add_float_column(format!("subfeature_sum_{}_{}", child.name, i), ColumnRole::Numerical, col)?;
        }
    }

    let matches = make_matches(population, &peripheral, &ensemble.placeholder, None)?;
    Ok(ensemble
        .trees
        .iter()
        .map(|tree| tree.transform(population, &peripheral, &matches.matches, population.nrows()))
        .collect())
}

/// Assembles a transform's column-major output into a dense `[nrows ×
/// num_features]` `DataFrame`, one `Numerical` column per tree, named
/// `feature_{i}` (spec §4.6 "assembled into a dense feature matrix").
pub fn feature_matrix(ensemble: &FittedEnsemble, columns: Vec<Vec<f64>>) -> Result<DataFrame> {
    let mut frame = DataFrame::new(format!("{}_features", ensemble.placeholder.name));
    for (i, col) in columns.into_iter().enumerate() {
        frame.add_column(Column::new(format!("feature_{}", i), ColumnRole::Numerical, ColumnData::Float64(col)))?;
    }
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relboost_common::{ColumnData, ColumnRole, EncodingHandle, LossFunction};

    fn build_tables() -> (DataFrame, HashMap<String, DataFrame>, Placeholder) {
        let enc = EncodingHandle::new();
        let mut population = DataFrame::new("population");
        let pop_keys: Vec<Option<String>> =
            vec!["a", "b", "a", "c"].into_iter().map(|s| Some(s.to_owned())).collect();
        population
            .add_column(Column::from_strings("jk", ColumnRole::JoinKey, &pop_keys, enc.clone()))
            .unwrap();

        let mut peripheral = DataFrame::new("peripheral");
        let per_keys: Vec<Option<String>> =
            vec!["a", "a", "b", "c", "a"].into_iter().map(|s| Some(s.to_owned())).collect();
        peripheral
            .add_column(Column::from_strings("jk", ColumnRole::JoinKey, &per_keys, enc))
            .unwrap();
        peripheral
            .add_float_column("amount", ColumnRole::Numerical, vec![1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();
        peripheral.create_indices();

        let placeholder = Placeholder::new("peripheral").with_join_key("jk", "jk");
        let mut tables = HashMap::new();
        tables.insert("peripheral".to_owned(), peripheral);
        (population, tables, placeholder)
    }

    #[test]
    fn fit_builds_num_features_trees() {
        let (population, tables, placeholder) = build_tables();
        let hp = Hyperparameters {
            num_features: 2,
            max_depth: 2,
            min_num_samples: 1,
            loss_function: LossFunction::SquaredError,
            ..Hyperparameters::default()
        };
        let targets = vec![1.0, 0.0, 2.0, -1.0];
        let ensemble = fit(&population, &tables, &placeholder, &targets, &hp).unwrap();
        assert_eq!(ensemble.trees.len(), 2);

        let columns = transform(&ensemble, &population, &tables).unwrap();
        assert_eq!(columns.len(), 2);
        for col in &columns {
            assert_eq!(col.len(), population.nrows());
        }
    }

    #[test]
    fn duplicate_snowflake_children_are_rejected() {
        let (population, mut tables, _) = build_tables();

        let enc = EncodingHandle::new();
        let grandchild_keys: Vec<Option<String>> = vec!["a", "a", "b", "c", "a"].into_iter().map(|s| Some(s.to_owned())).collect();
        let mut grandchild_table = DataFrame::new("grandchild");
        grandchild_table
            .add_column(Column::from_strings("jk", ColumnRole::JoinKey, &grandchild_keys, enc))
            .unwrap();
        grandchild_table
            .add_float_column("amount", ColumnRole::Numerical, vec![1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap();
        tables.insert("grandchild".to_owned(), grandchild_table);

        let grandchild = Placeholder::new("grandchild").with_join_key("jk", "jk");
        let placeholder = Placeholder::new("peripheral")
            .with_join_key("jk", "jk")
            .with_child(grandchild.clone())
            .with_child(grandchild);

        let hp = Hyperparameters {
            num_features: 1,
            max_depth: 1,
            min_num_samples: 1,
            loss_function: LossFunction::SquaredError,
            ..Hyperparameters::default()
        };
        let targets = vec![1.0, 0.0, 2.0, -1.0];
        let err = fit(&population, &tables, &placeholder, &targets, &hp).unwrap_err();
        assert_eq!(err.tag(), "AlreadyFit");
    }

    #[test]
    fn invalid_hyperparameters_are_rejected() {
        let (population, tables, placeholder) = build_tables();
        let mut hp = Hyperparameters::default();
        hp.seed = -1;
        let targets = vec![1.0, 0.0, 2.0, -1.0];
        let err = fit(&population, &tables, &placeholder, &targets, &hp).unwrap_err();
        assert_eq!(err.tag(), "InvalidInput");
    }
}

/// Property-based test for spec §8 invariant 5 ("serialization round-trip":
/// `from_json(to_json(ensemble)) ≡ ensemble"). Fits a real ensemble off
/// randomly generated targets and hyperparameters rather than deriving
/// `Arbitrary` for the whole `FittedEnsemble` tree, since a ensemble built by
/// `fit` is guaranteed well-formed (acyclic placeholder, in-range
/// hyperparameters) in a way an arbitrary struct wouldn't be.
#[cfg(test)]
mod proptests {
    use std::collections::HashMap;

    use proptest::prelude::*;
    use relboost_common::{Column, ColumnRole, EncodingHandle, Hyperparameters, LossFunction};

    use super::fit;
    use crate::placeholder::Placeholder;

    fn build_tables(amounts: &[f64]) -> (relboost_common::DataFrame, HashMap<String, relboost_common::DataFrame>, Placeholder) {
        let enc = EncodingHandle::new();
        let pop_keys: Vec<Option<String>> = (0..amounts.len()).map(|i| Some(["a", "b", "c"][i % 3].to_owned())).collect();
        let mut population = relboost_common::DataFrame::new("population");
        population.add_column(Column::from_strings("jk", ColumnRole::JoinKey, &pop_keys, enc.clone())).unwrap();

        let per_keys: Vec<Option<String>> = pop_keys.clone();
        let mut peripheral = relboost_common::DataFrame::new("peripheral");
        peripheral.add_column(Column::from_strings("jk", ColumnRole::JoinKey, &per_keys, enc)).unwrap();
        peripheral.add_float_column("amount", ColumnRole::Numerical, amounts.to_vec()).unwrap();
        peripheral.create_indices();

        let placeholder = Placeholder::new("peripheral").with_join_key("jk", "jk");
        let mut tables = HashMap::new();
        tables.insert("peripheral".to_owned(), peripheral);
        (population, tables, placeholder)
    }

    proptest! {
        #[test]
        fn json_round_trip_preserves_fitted_ensemble(
            amounts in proptest::collection::vec(-50.0f64..50.0, 3..12),
            targets in proptest::collection::vec(-5.0f64..5.0, 3..12),
            num_features in 1u32..4,
            max_depth in 1u8..4,
            seed in 0i64..1000,
        ) {
            let n = amounts.len().min(targets.len());
            let (population, tables, placeholder) = build_tables(&amounts[..n]);
            let targets = &targets[..n];

            let hp = Hyperparameters {
                num_features,
                max_depth,
                min_num_samples: 1,
                loss_function: LossFunction::SquaredError,
                seed,
                ..Hyperparameters::default()
            };

            let fitted = fit(&population, &tables, &placeholder, targets, &hp).unwrap();
            let json = serde_json::to_string(&fitted).unwrap();
            let restored: super::FittedEnsemble = serde_json::from_str(&json).unwrap();

            prop_assert_eq!(fitted, restored);
        }
    }
}
