//! sheetcalc CLI - formula evaluation and snapshot recalculation tool

mod input;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sheetcalc::prelude::*;
use sheetcalc::{FunctionRegistry, SystemClock};
use sheetcalc_formula::{evaluate_formula, parse_formula, tokenize, Clock, EvaluationContext};
use tracing_subscriber::EnvFilter;

use crate::input::{locate, parse_assignment, CellInput, SnapshotFile};

#[derive(Parser)]
#[command(name = "sheetcalc")]
#[command(author, version, about = "Spreadsheet formula evaluation and recalculation tool")]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the tokens of a formula
    Tokens {
        /// Formula text, e.g. "=SUM(A1:A3)*2"
        formula: String,
    },

    /// Print the syntax tree of a formula
    Parse {
        formula: String,
    },

    /// Evaluate a formula against a scratch sheet
    Eval {
        formula: String,

        /// Seed a cell of the scratch sheet (repeatable), e.g. --cell A1=10
        #[arg(short, long = "cell", value_name = "REF=VALUE")]
        cells: Vec<String>,

        /// Cell the formula is evaluated in
        #[arg(long, default_value = "Z1")]
        at: String,

        /// Date TODAY() and NOW() report (YYYY-MM-DD)
        #[arg(long, value_name = "DATE")]
        today: Option<String>,

        /// Use the 1904 date system
        #[arg(long)]
        date_1904: bool,
    },

    /// Recalculate a JSON snapshot, then apply edits and recalculate again
    Recalc {
        /// Snapshot file
        snapshot: PathBuf,

        /// Formulas evaluated per step
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Edit applied after the first recalculation (repeatable), e.g. --set Sheet1!A1=5
        #[arg(short, long = "set", value_name = "REF=VALUE")]
        sets: Vec<String>,

        /// Print the calculation statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the function catalogue
    Functions {
        /// Only functions of this category (math, text, lookup, ...)
        #[arg(short, long)]
        category: Option<String>,

        /// Locale for help text
        #[arg(short, long, default_value = "en")]
        locale: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Tokens { formula } => print_tokens(&formula),
        Commands::Parse { formula } => print_tree(&formula),
        Commands::Eval {
            formula,
            cells,
            at,
            today,
            date_1904,
        } => eval(&formula, &cells, &at, today.as_deref(), date_1904),
        Commands::Recalc {
            snapshot,
            chunk_size,
            sets,
            json,
        } => recalc(&snapshot, chunk_size, &sets, json),
        Commands::Functions { category, locale } => list_functions(category.as_deref(), &locale),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn print_tokens(formula: &str) -> Result<()> {
    let tokens = tokenize(formula).context("Failed to tokenize formula")?;
    for token in tokens {
        println!("{}", token);
    }
    Ok(())
}

fn print_tree(formula: &str) -> Result<()> {
    let expr = parse_formula(formula).context("Failed to parse formula")?;
    println!("{:#?}", expr);
    Ok(())
}

fn eval(
    formula: &str,
    cells: &[String],
    at: &str,
    today: Option<&str>,
    date_1904: bool,
) -> Result<()> {
    let mut book = Workbook::new("scratch");
    book.settings_mut().date_1904 = date_1904;
    let sheet = book
        .worksheet_mut(0)
        .ok_or_else(|| anyhow!("Scratch workbook has no sheet"))?;
    for cell in cells {
        let (address, input) = parse_assignment(cell)?;
        match input {
            CellInput::Formula(text) => {
                anyhow::bail!("--cell {} holds formula '{}'; use recalc for formulas", address, text)
            }
            CellInput::Value(value) => sheet
                .set_value(&address, value)
                .with_context(|| format!("Invalid cell '{}'", address))?,
        }
    }
    let mut snapshot = Snapshot::new();
    snapshot.add_unit(book)?;

    let clock: Box<dyn Clock> = match today {
        Some(date) => {
            let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .with_context(|| format!("Invalid --today '{}', expected YYYY-MM-DD", date))?;
            let at = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| anyhow!("Invalid --today '{}'", date))?;
            Box::new(FixedClock::new(at))
        }
        None => Box::new(SystemClock),
    };
    let location = snapshot.locate("scratch", "Sheet1", at)?;
    let registry = FunctionRegistry::builtin();
    let ctx = EvaluationContext::new(&snapshot, registry, location).with_clock(clock.as_ref());
    let value = evaluate_formula(formula, &ctx).context("Failed to evaluate formula")?;
    println!("{}", value);
    Ok(())
}

fn recalc(path: &Path, chunk_size: Option<usize>, sets: &[String], json: bool) -> Result<()> {
    let file = SnapshotFile::read(path)?;
    let mut options = file.options.clone().unwrap_or_default();
    if let Some(size) = chunk_size {
        options = options.with_chunk_size(size);
    }
    let snapshot = file.into_snapshot()?;

    let mut engine = Engine::new(options);
    let formulas = engine.load(snapshot);
    tracing::info!(formulas, path = %path.display(), "snapshot loaded");

    let stats = run(&mut engine)?;
    report(&stats, json)?;

    if sets.is_empty() {
        return Ok(());
    }
    for set in sets {
        let (reference, input) = parse_assignment(set)?;
        let location = locate(engine.snapshot(), &reference)?;
        let mutation = match input {
            CellInput::Formula(text) => Mutation::set_formula(location, text),
            CellInput::Value(CellValue::Empty) => Mutation::clear(location),
            CellInput::Value(value) => Mutation::set_value(location, value),
        };
        engine
            .apply(mutation)
            .with_context(|| format!("Failed to apply --set {}", set))?;
    }
    println!();
    let stats = run(&mut engine)?;
    report(&stats, json)
}

/// Drive a batch step by step, printing what each step produced
fn run(engine: &mut Engine) -> Result<CalculationStats> {
    let mut batch = engine.begin_recalculation();
    loop {
        let mut events: Vec<CalculationEvent> = Vec::new();
        let outcome = engine.step(&mut batch, &mut events)?;
        for event in &events {
            print_event(engine, event);
        }
        match outcome {
            StepOutcome::Yielded { completed, remaining } => {
                tracing::debug!(completed, remaining, "step yielded");
            }
            StepOutcome::Complete(stats) => return Ok(stats),
        }
    }
}

fn print_event(engine: &Engine, event: &CalculationEvent) {
    match event {
        CalculationEvent::DirtyRanges(ranges) => {
            for dirty in ranges {
                tracing::info!(
                    unit = %dirty.unit_id,
                    sheet = %dirty.sheet_id,
                    range = %dirty.range,
                    "dirty"
                );
            }
        }
        CalculationEvent::ValuesUpdated(updates) => {
            for update in updates {
                let shown = update
                    .display_error
                    .clone()
                    .unwrap_or_else(|| display(&update.value));
                println!("{}\t{}", engine.snapshot().describe(update.location), shown);
                for target in &update.spill {
                    println!(
                        "{}\t{}\t(spill)",
                        engine.snapshot().describe(target.location),
                        display(&target.value)
                    );
                }
            }
        }
    }
}

fn report(stats: &CalculationStats, json: bool) -> Result<()> {
    if json {
        let text = serde_json::to_string_pretty(stats).context("Failed to serialize stats")?;
        println!("{}", text);
    } else {
        eprintln!(
            "Calculated {} formulas in {} pass(es) ({} errors, {} circular, {} spills)",
            stats.cells_calculated,
            stats.passes,
            stats.errors,
            stats.circular_references,
            stats.spills
        );
    }
    Ok(())
}

/// Render a value the way a cell shows it
fn display(value: &CellValue) -> String {
    match value {
        CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
        CellValue::String(s) => format!("\"{}\"", s.as_str()),
        other => other.to_string(),
    }
}

fn list_functions(category: Option<&str>, locale: &str) -> Result<()> {
    let wanted = match category {
        Some(name) => Some(
            FunctionCategory::parse(name).ok_or_else(|| anyhow!("Unknown category '{}'", name))?,
        ),
        None => None,
    };
    let registry = FunctionRegistry::builtin();
    for function in registry.descriptors() {
        if wanted.map_or(false, |c| c != function.category()) {
            continue;
        }
        println!(
            "{:<14} {:<12} {:<6} {}{}",
            function.name(),
            function.category(),
            function.arity_label(),
            if function.is_volatile() { "[volatile] " } else { "" },
            function.help(locale).unwrap_or_default()
        );
    }
    Ok(())
}
