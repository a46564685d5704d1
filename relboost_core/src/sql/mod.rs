//! SQL emitter (spec §4.9): translates a fitted ensemble back into
//! dialect-specific staging tables, join indexes, and feature CTEs.

pub mod dialect;

use std::collections::HashMap;

use relboost_common::{AggKind, ColumnData, ColumnRole, DataFrame, RelboostError, Result};

use crate::ensemble::FittedEnsemble;
use crate::placeholder::Placeholder;
use crate::tree::node::{CommittedSplit, Node};
use crate::tree::split::DataUsed;

pub use dialect::Dialect;

/// Names, keyed by category id, used to render `categories_in` lists as
/// `IN (…)` literals instead of opaque integers (spec §4.9 `categories`
/// argument — the shared `Encoding` dictionary's reverse lookup).
pub type CategoryNames = HashMap<i32, String>;

/// The SQL aggregate functions with a direct, dialect-portable
/// translation. Kinds outside this set (EWMA, trend, quantiles, skew,
/// kurtosis, median, mode, variation coefficient, time-since-extremum)
/// have no native SQL equivalent; `to_sql` rejects ensembles containing
/// them with `InvalidInput` rather than emitting silently wrong numbers
/// (see DESIGN.md).
fn sql_aggregate(kind: AggKind) -> Option<&'static str> {
    match kind {
        AggKind::Count => Some("COUNT(*)"),
        AggKind::CountDistinct => Some("COUNT(DISTINCT v.value)"),
        AggKind::Sum => Some("SUM(v.value)"),
        AggKind::Avg => Some("AVG(v.value)"),
        AggKind::Min => Some("MIN(v.value)"),
        AggKind::Max => Some("MAX(v.value)"),
        AggKind::Stddev => Some("STDDEV(v.value)"),
        AggKind::Var => Some("VARIANCE(v.value)"),
        _ => None,
    }
}

/// Same coverage as `sql_aggregate`, but folds `guard` into the aggregate
/// itself via `CASE WHEN` instead of a `FILTER (WHERE …)` clause, since
/// `FILTER` isn't valid syntax on the Oracle/SQL Server targets `Dialect`
/// names. Plain `CASE WHEN` is ANSI and portable to all three. `value`
/// is the peripheral-row expression being aggregated (e.g. `p."amount"`).
fn conditional_aggregate(kind: AggKind, guard: &str, value: &str) -> Option<String> {
    Some(match kind {
        AggKind::Count => format!("SUM(CASE WHEN {guard} THEN 1 ELSE 0 END)"),
        AggKind::CountDistinct => format!("COUNT(DISTINCT CASE WHEN {guard} THEN {value} END)"),
        AggKind::Sum => format!("SUM(CASE WHEN {guard} THEN {value} ELSE 0 END)"),
        AggKind::Avg => format!("AVG(CASE WHEN {guard} THEN {value} END)"),
        AggKind::Min => format!("MIN(CASE WHEN {guard} THEN {value} END)"),
        AggKind::Max => format!("MAX(CASE WHEN {guard} THEN {value} END)"),
        AggKind::Stddev => format!("STDDEV(CASE WHEN {guard} THEN {value} END)"),
        AggKind::Var => format!("VARIANCE(CASE WHEN {guard} THEN {value} END)"),
        _ => return None,
    })
}

fn staging_table_name(placeholder_name: &str) -> String {
    format!("staging_{}", placeholder_name)
}

fn emit_staging_table(dialect: Dialect, name: &str, frame: &DataFrame) -> String {
    let table = dialect.quote_ident(&staging_table_name(name));
    let columns: Vec<String> = frame
        .columns()
        .iter()
        .map(|c| {
            let ident = dialect.quote_ident(&c.name);
            match &c.data {
                ColumnData::TimeStampFloat(_) => format!("{} AS {}", dialect.epoch_seconds(&ident), ident),
                _ => ident,
            }
        })
        .collect();
    format!(
        "CREATE TABLE {} AS SELECT {} FROM {}",
        table,
        columns.join(", "),
        dialect.quote_ident(name)
    )
}

fn emit_join_key_indexes(dialect: Dialect, placeholder: &Placeholder) -> Vec<String> {
    placeholder
        .join_keys_used
        .iter()
        .map(|jk| {
            format!(
                "CREATE INDEX {} ON {} ({})",
                dialect.quote_ident(&format!("ix_{}_{}", placeholder.name, jk.peripheral_column)),
                dialect.quote_ident(&staging_table_name(&placeholder.name)),
                dialect.quote_ident(&jk.peripheral_column)
            )
        })
        .collect()
}

/// Renders a `CommittedSplit`'s test as a boolean SQL predicate on the
/// peripheral alias `p`.
fn predicate_sql(dialect: Dialect, split: &CommittedSplit, category_names: &CategoryNames, apply_from_above: bool) -> String {
    let column = format!("p.{}", dialect.quote_ident(&split.column_name));
    match split.data_used {
        DataUsed::Categorical => {
            let names: Vec<String> = split
                .categories_in
                .iter()
                .map(|id| {
                    let label = category_names.get(id).cloned().unwrap_or_else(|| id.to_string());
                    format!("'{}'", label.replace('\'', "''"))
                })
                .collect();
            if apply_from_above {
                format!("{} NOT IN ({})", column, names.join(", "))
            } else {
                format!("{} IN ({})", column, names.join(", "))
            }
        }
        DataUsed::Numerical | DataUsed::Discrete => {
            if apply_from_above {
                format!("{} > {}", column, split.critical_value)
            } else {
                format!("{} <= {}", column, split.critical_value)
            }
        }
        DataUsed::SameUnitNumerical | DataUsed::TimeStampWindow => {
            let population_column = split
                .population_column
                .as_deref()
                .expect("SameUnitNumerical/TimeStampWindow split must carry a population_column");
            let pop_column = format!("pop.{}", dialect.quote_ident(population_column));
            let diff = format!("({} - {})", pop_column, column);
            if apply_from_above {
                format!("{} > {}", diff, split.critical_value)
            } else {
                format!("{} <= {}", diff, split.critical_value)
            }
        }
        DataUsed::Text => {
            let word = split.text_word.as_deref().expect("Text split must carry a text_word");
            let predicate = dialect.contains(&column, word);
            if apply_from_above {
                format!("NOT ({})", predicate)
            } else {
                predicate
            }
        }
    }
}

/// Walks the committed tree, collecting every root-to-leaf path as a list
/// of `(predicate, weight)` pairs — each split node contributes its
/// weight to every row on its side regardless of depth (spec §4.5
/// "weights accumulate along the path", mirrored from `tree::node::transform`).
fn collect_path_weights(dialect: Dialect, node: &Node, category_names: &CategoryNames, path: &mut Vec<String>, out: &mut Vec<(Vec<String>, f64)>) {
    match node {
        Node::Leaf => {}
        Node::Split { split, left, right } => {
            path.push(predicate_sql(dialect, split, category_names, false));
            out.push((path.clone(), split.weight1));
            collect_path_weights(dialect, left, category_names, path, out);
            path.pop();

            path.push(predicate_sql(dialect, split, category_names, true));
            out.push((path.clone(), split.weight2));
            collect_path_weights(dialect, right, category_names, path, out);
            path.pop();
        }
    }
}

fn feature_cte(
    dialect: Dialect,
    tree_index: usize,
    ensemble: &FittedEnsemble,
    tree: &crate::ensemble::FittedTree,
    category_names: &CategoryNames,
) -> Result<String> {
    if sql_aggregate(tree.agg_kind).is_none() {
        return Err(RelboostError::invalid(format!(
            "aggregation kind {:?} has no native SQL translation",
            tree.agg_kind
        )));
    }

    let mut path = Vec::new();
    let mut contributions = Vec::new();
    collect_path_weights(dialect, &tree.root, category_names, &mut path, &mut contributions);

    let peripheral_table = dialect.quote_ident(&staging_table_name(&ensemble.placeholder.name));
    let value_expr = if tree.value_column.is_empty() {
        "1".to_owned()
    } else {
        format!("p.{}", dialect.quote_ident(&tree.value_column))
    };

    let join_predicate = ensemble
        .placeholder
        .join_keys_used
        .iter()
        .map(|jk| {
            format!(
                "pop.{} = p.{}",
                dialect.quote_ident(&jk.population_column),
                dialect.quote_ident(&jk.peripheral_column)
            )
        })
        .collect::<Vec<_>>()
        .join(" AND ");

    let time_window = ensemble
        .placeholder
        .time_stamps_used
        .as_ref()
        .map(|bound| {
            format!(
                " AND p.{} <= pop.{}",
                dialect.quote_ident(&bound.peripheral_column),
                dialect.quote_ident(&bound.population_column)
            )
        })
        .unwrap_or_default();

    let contribution_terms: Vec<String> = contributions
        .iter()
        .map(|(predicates, weight)| {
            let guard = predicates.join(" AND ");
            let agg_expr = conditional_aggregate(tree.agg_kind, &guard, &value_expr).expect("checked above");
            format!(
                "(SELECT {weight} * COALESCE({agg_expr}, 0.0) FROM {table} p WHERE {join}{window})",
                weight = weight,
                agg_expr = agg_expr,
                table = peripheral_table,
                join = join_predicate,
                window = time_window,
            )
        })
        .collect();

    let body = if contribution_terms.is_empty() {
        "0.0".to_owned()
    } else {
        contribution_terms.join(" + ")
    };

    Ok(format!(
        "feature_{i} AS (SELECT pop.rowid AS rowid, ({body}) AS {col} FROM {pop} pop)",
        i = tree_index,
        body = body,
        col = dialect.quote_ident(&format!("feature_{}", tree_index)),
        pop = dialect.quote_ident(&staging_table_name("population")),
    ))
}

fn final_features_table(dialect: Dialect, ensemble: &FittedEnsemble) -> String {
    let table = dialect.quote_ident("FEATURES");
    if ensemble.trees.is_empty() {
        return format!(
            "CREATE TABLE {} AS SELECT rowid FROM {}",
            table,
            dialect.quote_ident(&staging_table_name("population"))
        );
    }
    let selects: Vec<String> = (0..ensemble.trees.len())
        .map(|i| format!("feature_{i}.{col}", i = i, col = dialect.quote_ident(&format!("feature_{}", i))))
        .collect();
    let joins: Vec<String> = (1..ensemble.trees.len())
        .map(|i| format!("JOIN feature_{i} ON feature_{i}.rowid = feature_0.rowid", i = i))
        .collect();
    format!(
        "CREATE TABLE {table} AS SELECT feature_0.rowid, {cols} FROM feature_0 {joins}",
        table = table,
        cols = selects.join(", "),
        joins = joins.join(" "),
    )
}

/// Emits the full sequence of statements for `ensemble` under `dialect`
/// (spec §4.9 "Contract"): staging tables per peripheral (recursing into
/// snowflake children), join-key indexes, one feature CTE per tree, and a
/// final `FEATURES` table. `peripheral_map` supplies the raw tables named
/// by the placeholder tree; `category_names` resolves categorical split
/// values back to their dictionary labels.
pub fn to_sql(
    ensemble: &FittedEnsemble,
    dialect: Dialect,
    category_names: &CategoryNames,
    peripheral_map: &HashMap<String, DataFrame>,
) -> Result<Vec<String>> {
    let mut statements = Vec::new();

    let Some(population) = peripheral_map.get("population") else {
        return Err(RelboostError::not_found("table", "population"));
    };
    statements.push(emit_staging_table(dialect, "population", population));

    let peripheral = peripheral_map
        .get(&ensemble.placeholder.name)
        .ok_or_else(|| RelboostError::not_found("table", &ensemble.placeholder.name))?;
    statements.push(emit_staging_table(dialect, &ensemble.placeholder.name, peripheral));
    statements.extend(emit_join_key_indexes(dialect, &ensemble.placeholder));

    for (_, sub) in &ensemble.subensembles {
        statements.extend(to_sql(&sub.avg, dialect, category_names, peripheral_map)?);
        statements.extend(to_sql(&sub.sum, dialect, category_names, peripheral_map)?);
    }

    let ctes: Vec<String> = ensemble
        .trees
        .iter()
        .enumerate()
        .map(|(i, tree)| feature_cte(dialect, i, ensemble, tree, category_names))
        .collect::<Result<_>>()?;
    if !ctes.is_empty() {
        statements.push(format!("WITH {}", ctes.join(", ")));
    }
    statements.push(final_features_table(dialect, ensemble));

    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::FittedTree;
    use relboost_common::{Hyperparameters, LossFunction};

    fn trivial_ensemble() -> FittedEnsemble {
        let placeholder = Placeholder::new("orders").with_join_key("customer_id", "customer_id");
        FittedEnsemble {
            hyperparameters: Hyperparameters { loss_function: LossFunction::SquaredError, ..Hyperparameters::default() },
            placeholder,
            trees: vec![FittedTree {
                agg_kind: AggKind::Count,
                value_column: String::new(),
                timestamp_column: None,
                tree_seed: 1,
                root: Node::Leaf,
            }],
            subensembles: HashMap::new(),
        }
    }

    fn tables() -> HashMap<String, DataFrame> {
        let mut map = HashMap::new();
        let mut population = DataFrame::new("population");
        population.add_float_column("customer_id", ColumnRole::JoinKey, vec![1.0]).unwrap();
        map.insert("population".to_owned(), population);
        let mut orders = DataFrame::new("orders");
        orders.add_float_column("customer_id", ColumnRole::JoinKey, vec![1.0]).unwrap();
        map.insert("orders".to_owned(), orders);
        map
    }

    #[test]
    fn to_sql_emits_staging_tables_and_features_table() {
        let ensemble = trivial_ensemble();
        let statements = to_sql(&ensemble, Dialect::Ansi, &CategoryNames::new(), &tables()).unwrap();
        assert!(statements.iter().any(|s| s.contains("staging_population")));
        assert!(statements.iter().any(|s| s.contains("staging_orders")));
        assert!(statements.last().unwrap().contains("FEATURES"));
    }

    fn split_with(data_used: DataUsed, population_column: Option<&str>, text_word: Option<&str>) -> CommittedSplit {
        CommittedSplit {
            column_name: "amount".to_owned(),
            data_used,
            critical_value: 10.0,
            categories_in: Vec::new(),
            population_column: population_column.map(|s| s.to_owned()),
            text_word: text_word.map(|s| s.to_owned()),
            weight1: 0.0,
            weight2: 0.0,
        }
    }

    #[test]
    fn predicate_sql_renders_same_unit_difference() {
        let split = split_with(DataUsed::SameUnitNumerical, Some("income"), None);
        let names = CategoryNames::new();
        assert_eq!(
            predicate_sql(Dialect::Ansi, &split, &names, false),
            "(pop.\"income\" - p.\"amount\") <= 10"
        );
        assert_eq!(
            predicate_sql(Dialect::Ansi, &split, &names, true),
            "(pop.\"income\" - p.\"amount\") > 10"
        );
    }

    #[test]
    fn predicate_sql_renders_text_containment() {
        let split = split_with(DataUsed::Text, None, Some("urgent"));
        let names = CategoryNames::new();
        assert_eq!(
            predicate_sql(Dialect::Ansi, &split, &names, false),
            "p.\"amount\" LIKE '%urgent%'"
        );
        assert_eq!(
            predicate_sql(Dialect::Ansi, &split, &names, true),
            "NOT (p.\"amount\" LIKE '%urgent%')"
        );
    }

    #[test]
    fn to_sql_rejects_unsupported_aggregation_kinds() {
        let mut ensemble = trivial_ensemble();
        ensemble.trees[0].agg_kind = AggKind::Trend;
        let err = to_sql(&ensemble, Dialect::Ansi, &CategoryNames::new(), &tables()).unwrap_err();
        assert_eq!(err.tag(), "InvalidInput");
    }
}
