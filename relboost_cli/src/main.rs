//! Local driver for `relboost_core`'s `Fit`/`Transform`/`ToSQL` operations
//! against column-store files on disk (spec §6 "Control surface" — the
//! socket/session/RPC layers are out of scope; this talks to
//! `relboost_core` in-process).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::Table;
use relboost_common::{ColumnRole, DataFrame, Hyperparameters};
use relboost_core::ensemble::{self, FittedEnsemble};
use relboost_core::sql::{self, CategoryNames, Dialect};
use relboost_core::Placeholder;

#[derive(Parser)]
#[command(name = "relboost")]
#[command(author)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Fit and apply relboost feature ensembles against column-store directories")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// `name=path` pairs naming every table the placeholder tree references.
#[derive(Clone, Debug)]
struct TableArg {
    name: String,
    path: PathBuf,
}

impl std::str::FromStr for TableArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (name, path) = s
            .split_once('=')
            .with_context(|| format!("expected NAME=PATH, got {s:?}"))?;
        Ok(Self { name: name.to_owned(), path: PathBuf::from(path) })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fit a tree ensemble against a population and its peripheral tables.
    Fit {
        /// Column-store directory for the population table.
        #[arg(long)]
        population: PathBuf,

        /// One `name=path` column-store directory per peripheral table.
        #[arg(long = "table", value_name = "NAME=PATH")]
        tables: Vec<TableArg>,

        /// Placeholder tree (join keys, time-stamp bounds, children), JSON.
        #[arg(long)]
        placeholder: PathBuf,

        /// Hyperparameters JSON; falls back to `Hyperparameters::default()`.
        #[arg(long)]
        hyperparameters: Option<PathBuf>,

        /// Where to write the fitted ensemble's JSON.
        #[arg(long)]
        output: PathBuf,
    },

    /// Apply a fitted ensemble to fresh tables, printing the feature matrix.
    Transform {
        /// Fitted ensemble JSON, as produced by `fit`.
        #[arg(long)]
        ensemble: PathBuf,

        /// Column-store directory for the population table.
        #[arg(long)]
        population: PathBuf,

        /// One `name=path` column-store directory per peripheral table.
        #[arg(long = "table", value_name = "NAME=PATH")]
        tables: Vec<TableArg>,

        /// Only print the first N rows (0 = all).
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Emit a fitted ensemble as SQL staging tables and feature CTEs.
    ToSql {
        /// Fitted ensemble JSON, as produced by `fit`.
        #[arg(long)]
        ensemble: PathBuf,

        /// One `name=path` column-store directory per referenced table,
        /// including `population`.
        #[arg(long = "table", value_name = "NAME=PATH")]
        tables: Vec<TableArg>,

        /// Target SQL dialect.
        #[arg(long, value_enum, default_value = "ansi")]
        dialect: DialectArg,

        /// Optional `{category_id: label}` JSON map for rendering
        /// categorical split predicates as readable `IN (...)` literals.
        #[arg(long)]
        categories: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum DialectArg {
    Ansi,
    Oracle,
    SqlServer,
}

impl From<DialectArg> for Dialect {
    fn from(value: DialectArg) -> Self {
        match value {
            DialectArg::Ansi => Dialect::Ansi,
            DialectArg::Oracle => Dialect::Oracle,
            DialectArg::SqlServer => Dialect::SqlServer,
        }
    }
}

fn load_table(path: &Path, name: &str) -> Result<DataFrame> {
    let mut frame = relboost_common::persist::load(path, name)
        .with_context(|| format!("loading table {name:?} from {path:?}"))?;
    frame.create_indices();
    Ok(frame)
}

fn load_tables(args: &[TableArg]) -> Result<HashMap<String, DataFrame>> {
    args.iter()
        .map(|arg| Ok((arg.name.clone(), load_table(&arg.path, &arg.name)?)))
        .collect()
}

fn targets_from(population: &DataFrame) -> Result<Vec<f64>> {
    let target_column = population
        .columns_with_role(ColumnRole::Target)
        .next()
        .context("population table has no Target-role column")?;
    Ok((0..population.nrows())
        .map(|row| target_column.data.as_f64(row).unwrap_or(f64::NAN))
        .collect())
}

fn print_feature_matrix(columns: &[Vec<f64>], limit: usize) {
    let mut table = Table::new();
    table.set_header((0..columns.len()).map(|i| format!("feature_{i}")));
    let nrows = columns.first().map(|c| c.len()).unwrap_or(0);
    let shown = if limit == 0 { nrows } else { nrows.min(limit) };
    for row in 0..shown {
        table.add_row(columns.iter().map(|c| format!("{:.6}", c[row])));
    }
    println!("{table}");
    if shown < nrows {
        println!("... ({} more rows)", nrows - shown);
    }
}

fn run() -> Result<()> {
    match Cli::parse().command {
        Commands::Fit { population, tables, placeholder, hyperparameters, output } => {
            let population_frame = load_table(&population, "population")?;
            let table_frames = load_tables(&tables)?;
            let placeholder: Placeholder = serde_json::from_str(
                &fs::read_to_string(&placeholder).with_context(|| format!("reading {placeholder:?}"))?,
            )?;
            let hyperparameters = match hyperparameters {
                Some(path) => serde_json::from_str(&fs::read_to_string(&path)?)?,
                None => Hyperparameters::default(),
            };
            let targets = targets_from(&population_frame)?;

            tracing::info!(num_features = hyperparameters.num_features as u64, "fitting ensemble");
            let fitted = ensemble::fit(&population_frame, &table_frames, &placeholder, &targets, &hyperparameters)?;
            fs::write(&output, serde_json::to_string_pretty(&fitted)?)
                .with_context(|| format!("writing {output:?}"))?;
            println!("wrote fitted ensemble with {} trees to {:?}", fitted.trees.len(), output);
            Ok(())
        }

        Commands::Transform { ensemble, population, tables, limit } => {
            let fitted: FittedEnsemble = serde_json::from_str(&fs::read_to_string(&ensemble)?)?;
            let population_frame = load_table(&population, "population")?;
            let table_frames = load_tables(&tables)?;

            tracing::info!(trees = fitted.trees.len(), "transforming");
            let columns = ensemble::transform(&fitted, &population_frame, &table_frames)?;
            print_feature_matrix(&columns, limit);
            Ok(())
        }

        Commands::ToSql { ensemble, tables, dialect, categories } => {
            let fitted: FittedEnsemble = serde_json::from_str(&fs::read_to_string(&ensemble)?)?;
            let table_frames = load_tables(&tables)?;
            let category_names: CategoryNames = match categories {
                Some(path) => serde_json::from_str(&fs::read_to_string(&path)?)?,
                None => CategoryNames::new(),
            };

            let statements = sql::to_sql(&fitted, dialect.into(), &category_names, &table_frames)?;
            for statement in statements {
                println!("{statement};");
            }
            Ok(())
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    run()
}
