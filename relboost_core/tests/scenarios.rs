//! End-to-end scenarios S1-S6 (spec §8 "Testable properties").

use std::collections::HashMap;

use relboost_common::{AggKind, Column, ColumnRole, EncodingHandle, Hyperparameters, LossFunction};
use relboost_core::agg::{AggEngine, Side};
use relboost_core::fastprop::{self, AbstractFeature, DataUsed};
use relboost_core::matches::{make_matches, Match};
use relboost_core::{ensemble, Placeholder};

fn same_key_frame(name: &str, enc: EncodingHandle, n: usize) -> relboost_common::DataFrame {
    let mut frame = relboost_common::DataFrame::new(name);
    let keys: Vec<Option<String>> = (0..n).map(|_| Some("k".to_owned())).collect();
    frame.add_column(Column::from_strings("jk", ColumnRole::JoinKey, &keys, enc)).unwrap();
    frame
}

/// S1 — Count matches: population `[a,b,a]`, peripheral `[a,a,b,a,c]`,
/// COUNT feature with no conditions → `[3,1,3]`.
#[test]
fn s1_count_matches() {
    let enc = EncodingHandle::new();
    let mut population = relboost_common::DataFrame::new("population");
    let pop_keys: Vec<Option<String>> = vec!["a", "b", "a"].into_iter().map(|s| Some(s.to_owned())).collect();
    population.add_column(Column::from_strings("jk", ColumnRole::JoinKey, &pop_keys, enc.clone())).unwrap();

    let mut peripheral = relboost_common::DataFrame::new("peripheral");
    let per_keys: Vec<Option<String>> =
        vec!["a", "a", "b", "a", "c"].into_iter().map(|s| Some(s.to_owned())).collect();
    peripheral.add_column(Column::from_strings("jk", ColumnRole::JoinKey, &per_keys, enc)).unwrap();
    peripheral.create_indices();

    let placeholder = Placeholder::new("peripheral").with_join_key("jk", "jk");
    let matches = make_matches(&population, &peripheral, &placeholder, None).unwrap();

    let catalog = vec![AbstractFeature {
        aggregation: AggKind::Count,
        data_used: DataUsed::NotApplicable,
        input_column: String::new(),
        paired_column: None,
        text_word_id: None,
        conditions: Vec::new(),
    }];
    let columns = fastprop::evaluate(&population, &peripheral, &matches.matches, &catalog).unwrap();
    assert_eq!(columns[0], vec![3.0, 1.0, 3.0]);
}

/// S2 — Time-window AVG: peripheral rows with `ts < population.ts`
/// averaged → `[3, 5]`.
#[test]
fn s2_time_window_avg() {
    let enc = EncodingHandle::new();
    let mut population = same_key_frame("population", enc.clone(), 2);
    population.add_timestamp_column("ts", vec![10.0, 20.0]).unwrap();

    let mut peripheral = same_key_frame("peripheral", enc, 5);
    peripheral.add_timestamp_column("ts", vec![5.0, 9.0, 11.0, 15.0, 19.0]).unwrap();
    peripheral.add_float_column("value", ColumnRole::Numerical, vec![2.0, 4.0, 6.0, 8.0, 10.0]).unwrap();
    peripheral.create_indices();

    let placeholder = Placeholder::new("peripheral").with_join_key("jk", "jk").with_time_stamp("ts", "ts");
    let matches = make_matches(&population, &peripheral, &placeholder, None).unwrap();

    let catalog = vec![AbstractFeature {
        aggregation: AggKind::Avg,
        data_used: DataUsed::Numerical,
        input_column: "value".to_owned(),
        paired_column: None,
        text_word_id: None,
        conditions: Vec::new(),
    }];
    let columns = fastprop::evaluate(&population, &peripheral, &matches.matches, &catalog).unwrap();
    assert_eq!(columns[0], vec![3.0, 5.0]);
}

/// S3 — Two-step boosting: predictions after two shrunk trees are
/// monotone-ordered the same way the targets are.
#[test]
fn s3_two_step_boosting_is_monotone() {
    let enc = EncodingHandle::new();
    let mut population = same_key_frame("population", enc.clone(), 6);
    let targets = vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0];
    let mut peripheral = same_key_frame("peripheral", enc, 6);
    peripheral.add_float_column("x", ColumnRole::Numerical, vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0]).unwrap();
    peripheral.create_indices();
    population.create_indices();

    let placeholder = Placeholder::new("peripheral").with_join_key("jk", "jk");
    let hyperparameters = Hyperparameters {
        num_features: 2,
        max_depth: 1,
        shrinkage: 0.5,
        sampling_factor: 0.0,
        loss_function: LossFunction::SquaredError,
        seed: 7,
        ..Hyperparameters::default()
    };

    let mut tables = HashMap::new();
    tables.insert("peripheral".to_owned(), peripheral.clone());

    let fitted = ensemble::fit(&population, &tables, &placeholder, &targets, &hyperparameters).unwrap();
    let columns = ensemble::transform(&fitted, &population, &tables).unwrap();

    let predictions: Vec<f64> = (0..population.nrows())
        .map(|row| columns.iter().map(|c| c[row]).sum())
        .collect();

    assert!(predictions[0] >= predictions[3]);
    assert!(predictions[3] >= predictions[4]);
}

/// S4 — Revert identity: `calc_diff` then `revert` restores the engine's
/// feature values bit-identically.
#[test]
fn s4_revert_identity() {
    let matches: Vec<Match> =
        (0..4).map(|i| Match { ix_output: 0, ix_input: i, sample_weight: 1.0, active: false }).collect();
    let values = vec![1.0, 2.0, 3.0, 4.0];

    let mut engine = AggEngine::new(AggKind::Sum, 1);
    engine.init_count_committed(&matches);
    let baseline = engine.feature_value(0, Side::One);

    engine.calc_diff(0.0, &matches, &values, None, 0, 2);
    assert_ne!(engine.feature_value(0, Side::One), baseline);

    engine.revert(0.0);
    assert_eq!(engine.feature_value(0, Side::One), baseline);
}

/// S6 — Cancellation: a checkpoint flipped to `false` on any thread
/// propagates `Interrupted` to every other thread waiting on the same
/// communicator (the barrier/communicator primitives this would sit on
/// top of in a wired-up cancellable `fit` — see DESIGN.md for the scope
/// note on why `fit` itself does not yet poll a communicator).
#[test]
fn s6_cancellation_propagates_through_communicator() {
    use relboost_core::concurrency::Communicator;
    use std::sync::Arc;
    use std::thread;

    let comm = Arc::new(Communicator::new(2));
    let worker = {
        let comm = comm.clone();
        thread::spawn(move || comm.checkpoint(true))
    };
    let result = comm.checkpoint(false);
    assert!(result.is_err());
    assert!(worker.join().unwrap().is_err());
}
