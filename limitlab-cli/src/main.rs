//! LimitLab CLI — store setup, fetch pipelines, compute runs and reports.
//!
//! Commands:
//! - `init-db` — create (or reset) the SQLite store and apply pruning
//! - `import` — load `stock_meta.csv` + `daily.csv` from a directory
//! - `fetch backfill|daily|mvp|resume|tasks` — provider-backed pipelines
//! - `compute` — incremental, full or recompute-from runs
//! - `verify` / `quality` — consistency and data-quality reports
//! - `query ...` — read-only views over the results
//! - `export ...` — sample CSV, summary JSON, daily increment files
//! - `classify` — classify a single hand-entered bar

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use limitlab_core::data::{
    CircuitBreaker, CsvProvider, DataProvider, SyntheticConfig, SyntheticProvider, TushareProvider,
};
use limitlab_core::dates::parse_date;
use limitlab_core::domain::{DailyBar, LimitStatus, SymbolMeta};
use limitlab_runner::config::DEFAULT_CONFIG_PATH;
use limitlab_runner::export::{export_sample_csv, summary_json};
use limitlab_runner::increments::{self, IncrementFile};
use limitlab_runner::{
    data_quality, verify, BackfillReport, ComputeEngine, ComputeMode, ComputeReport, DailyReport,
    LimitLabConfig, LimitRow, Pipeline, QueryApi, Store,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "limitlab",
    about = "LimitLab CLI — A-share limit-up and chain height analysis"
)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Use the seeded synthetic provider instead of Tushare.
    #[arg(long, global = true, default_value_t = false)]
    synthetic: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema; optionally wipe it first.
    InitDb {
        /// Drop every table before recreating the schema.
        #[arg(long, default_value_t = false)]
        reset: bool,
    },
    /// Import stock_meta.csv and daily.csv from a directory, then compute.
    Import {
        #[arg(long)]
        dir: PathBuf,
    },
    /// Fetch market data from the provider.
    Fetch {
        #[command(subcommand)]
        action: FetchAction,
    },
    /// Classify stored bars. Incremental unless --full or --from is given.
    Compute {
        /// Recompute every symbol from scratch.
        #[arg(long, default_value_t = false, conflicts_with = "from")]
        full: bool,

        /// Recompute forward from this date (YYYYMMDD or YYYY-MM-DD).
        #[arg(long, value_parser = parse_date, requires = "codes")]
        from: Option<NaiveDate>,

        /// Codes for --from.
        #[arg(long, num_args = 1..)]
        codes: Vec<String>,
    },
    /// Recompute from scratch and diff against stored results.
    Verify {
        /// Restrict to these codes. Defaults to every stored symbol.
        #[arg(long, num_args = 1..)]
        codes: Vec<String>,
    },
    /// Report missing fields, abnormal moves and chain distribution.
    Quality,
    /// Read-only views over the stored results.
    Query {
        #[command(subcommand)]
        action: QueryAction,
    },
    /// Export reports and increment files.
    Export {
        #[command(subcommand)]
        action: ExportAction,
    },
    /// Classify one bar without touching the store.
    Classify {
        /// Code, used to derive board and limit ratio.
        #[arg(long, default_value = "600000")]
        code: String,

        /// Display name; names containing "ST" take the ST band.
        #[arg(long, default_value = "")]
        name: String,

        #[arg(long)]
        pre_close: Option<f64>,

        #[arg(long)]
        open: f64,

        #[arg(long)]
        high: f64,

        #[arg(long)]
        low: f64,

        #[arg(long)]
        close: f64,

        /// Override the derived limit ratio (e.g. 0.2).
        #[arg(long)]
        ratio: Option<f64>,

        /// Treat the day as suspended.
        #[arg(long, default_value_t = false)]
        suspended: bool,
    },
}

#[derive(Subcommand)]
enum FetchAction {
    /// Fetch a date range for every listed symbol as a resumable task.
    Backfill {
        /// Defaults to [fetch] history_start.
        #[arg(long, value_parser = parse_date)]
        start: Option<NaiveDate>,

        /// Defaults to today.
        #[arg(long, value_parser = parse_date)]
        end: Option<NaiveDate>,

        /// Only the first N symbols in code order.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Fetch one trading date for the whole market and compute incrementally.
    Daily {
        /// Defaults to today.
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Skip writing the increment file.
        #[arg(long, default_value_t = false)]
        no_increment: bool,
    },
    /// Backfill the most recent days for a quick look, then print a summary.
    Mvp {
        /// Calendar days. Defaults to [fetch] recent_days.
        #[arg(long)]
        days: Option<u32>,

        /// Only the first N symbols in code order.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Continue a rate-limited, interrupted or failed task.
    Resume { task_id: String },
    /// List fetch tasks.
    Tasks,
}

#[derive(Subcommand)]
enum QueryAction {
    /// Symbols at or above a chain height on a date.
    High {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        #[arg(long, default_value_t = 2)]
        min: u32,
    },
    /// One symbol's classification history.
    History {
        code: String,

        #[arg(long, value_parser = parse_date)]
        start: Option<NaiveDate>,

        #[arg(long, value_parser = parse_date)]
        end: Option<NaiveDate>,
    },
    /// Highest chain a symbol ever reached.
    Max { code: String },
    /// Market-wide counts for a date.
    Summary {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Limit-up symbols on a date.
    Limit {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Include broken boards.
        #[arg(long, default_value_t = false)]
        include_fried: bool,
    },
    /// Broken boards on a date.
    Fried {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Chains at or above a height within the last N calendar days.
    Recent {
        #[arg(long, default_value_t = 5)]
        days: u32,

        #[arg(long, default_value_t = 2)]
        min: u32,
    },
    /// Find symbols by name fragment or code prefix.
    Search { keyword: String },
}

#[derive(Subcommand)]
enum ExportAction {
    /// Chains of two or more and broken boards, newest first.
    Sample {
        #[arg(long, default_value = "data/limit_sample.csv")]
        output: PathBuf,
    },
    /// Write the increment file for a date.
    Increment {
        /// Defaults to the latest stored date.
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Defaults to [output] increments_dir.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Merge increment files into the store, then compute incrementally.
    Merge {
        /// Files to merge. Defaults to every file in the increments dir.
        files: Vec<PathBuf>,
    },
    /// Summarise the increments dir.
    Summary {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Delete increment files dated before a date.
    Cleanup {
        #[arg(long, value_parser = parse_date)]
        before: NaiveDate,

        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = LimitLabConfig::load(&cli.config)?;

    match cli.command {
        Commands::InitDb { reset } => run_init_db(&config, reset),
        Commands::Import { dir } => run_import(&config, &dir),
        Commands::Fetch { action } => run_fetch(&config, cli.synthetic, action),
        Commands::Compute { full, from, codes } => {
            let mode = match from {
                Some(date) => ComputeMode::From { date, codes },
                None if full => ComputeMode::Full,
                None => ComputeMode::Incremental,
            };
            run_compute(&config, &mode)
        }
        Commands::Verify { codes } => run_verify(&config, &codes),
        Commands::Quality => run_quality(&config),
        Commands::Query { action } => run_query(&config, action),
        Commands::Export { action } => run_export(&config, action),
        Commands::Classify {
            code,
            name,
            pre_close,
            open,
            high,
            low,
            close,
            ratio,
            suspended,
        } => {
            let mut meta = SymbolMeta::derive(&code, &name, &config.limits.ratios);
            if let Some(ratio) = ratio {
                meta.limit_ratio = ratio;
            }
            let bar = DailyBar {
                date: Local::now().date_naive(),
                code,
                open,
                high,
                low,
                close,
                pre_close,
                volume: 1.0,
                amount: close,
            };
            run_classify(&config, &meta, &bar, suspended)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "limitlab=debug" } else { "limitlab=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &LimitLabConfig) -> Result<Store> {
    let path = &config.database.path;
    Store::open(path).with_context(|| format!("failed to open database {}", path.display()))
}

fn open_provider(config: &LimitLabConfig, synthetic: bool) -> Result<Box<dyn DataProvider>> {
    if synthetic {
        return Ok(Box::new(SyntheticProvider::new(SyntheticConfig::default())));
    }
    let breaker = Arc::new(CircuitBreaker::default_provider());
    let provider = TushareProvider::new(config.fetch.tushare(), breaker).context(
        "Tushare needs a token: set [fetch] tushare_token or LIMITLAB_TUSHARE_TOKEN, or pass --synthetic",
    )?;
    Ok(Box::new(provider))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn run_init_db(config: &LimitLabConfig, reset: bool) -> Result<()> {
    let mut store = open_store(config)?;
    if reset {
        store.reset()?;
        println!("Database reset: {}", config.database.path.display());
    }
    if let Some(cutoff) = config.database.prune_before {
        let (bars, results) = store.prune_before(cutoff)?;
        println!("Pruned before {cutoff}: {bars} bars, {results} results");
    }
    println!("Database ready: {}", config.database.path.display());
    println!(
        "Symbols: {}  Bars: {}  Results: {}",
        store.meta_count()?,
        store.bar_count()?,
        store.result_count()?
    );
    Ok(())
}

fn run_import(config: &LimitLabConfig, dir: &Path) -> Result<()> {
    let csv = CsvProvider::open(dir)?;
    let bars: Vec<DailyBar> = csv.all_bars().cloned().collect();
    let engine = ComputeEngine::from_config(config)?;
    let mut store = open_store(config)?;

    let report = Pipeline::new(&mut store, &csv, config, &engine).import(&bars)?;
    println!("Imported {} bars from {}", report.bars, dir.display());
    print_daily(&report);
    Ok(())
}

fn run_fetch(config: &LimitLabConfig, synthetic: bool, action: FetchAction) -> Result<()> {
    let mut store = open_store(config)?;

    if let FetchAction::Tasks = action {
        return print_tasks(&store);
    }

    let provider = open_provider(config, synthetic)?;
    let engine = ComputeEngine::from_config(config)?;
    let mut pipeline = Pipeline::new(&mut store, provider.as_ref(), config, &engine);

    match action {
        FetchAction::Backfill { start, end, limit } => {
            let start = start.unwrap_or(config.fetch.history_start);
            let end = end.unwrap_or_else(today);
            if start > end {
                bail!("start {start} is after end {end}");
            }
            let report = pipeline.backfill(start, end, limit)?;
            print_backfill(&report);
        }
        FetchAction::Daily { date, no_increment } => {
            let date = date.unwrap_or_else(today);
            let report = pipeline.daily(date)?;
            print_daily(&report);
            drop(pipeline);
            if !no_increment && report.bars > 0 {
                let path = IncrementFile::build(&store, date)?.save(&config.output.increments_dir)?;
                println!("Increment: {}", path.display());
            }
        }
        FetchAction::Mvp { days, limit } => {
            let days = days.unwrap_or(config.fetch.recent_days);
            let report = pipeline.mvp(today(), days, limit)?;
            print_backfill(&report);
            drop(pipeline);
            if report.compute.is_some() {
                let summary = QueryApi::new(store.connection()).daily_summary(None)?;
                println!();
                println!("{}", summary_json(&summary)?);
            }
        }
        FetchAction::Resume { task_id } => {
            let report = pipeline.resume(&task_id)?;
            print_backfill(&report);
        }
        FetchAction::Tasks => {}
    }
    Ok(())
}

fn run_compute(config: &LimitLabConfig, mode: &ComputeMode) -> Result<()> {
    let engine = ComputeEngine::from_config(config)?;
    let mut store = open_store(config)?;
    let report = engine.run(&mut store, mode)?;
    print_compute(&report);
    Ok(())
}

fn run_verify(config: &LimitLabConfig, codes: &[String]) -> Result<()> {
    let engine = ComputeEngine::from_config(config)?;
    let store = open_store(config)?;
    let codes = (!codes.is_empty()).then_some(codes);
    let report = verify(&store, &engine, codes)?;

    println!("{:<10} {:>8} {:<18} {:<18}", "Code", "Diffs", "Stored", "Expected");
    println!("{}", "-".repeat(58));
    for s in report.symbols.iter().filter(|s| !s.is_consistent()) {
        println!(
            "{:<10} {:>8} {:<18} {:<18}",
            s.code,
            s.mismatches.len(),
            s.stored.short(),
            s.expected.short()
        );
    }
    for failure in &report.failures {
        println!("FAILED: {failure}");
    }
    println!();
    println!(
        "Verified {} symbols: {} mismatched rows, {} failures",
        report.symbols.len(),
        report.mismatch_count(),
        report.failures.len()
    );

    if report.mismatch_count() > 0 {
        eprintln!("Stored results are stale; run `limitlab compute --full`.");
    }
    if !report.failures.is_empty() {
        eprintln!("Some symbols could not be recomputed; check their metadata and bars.");
    }
    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_quality(config: &LimitLabConfig) -> Result<()> {
    let store = open_store(config)?;
    let q = data_quality(&store)?;

    println!("=== Data Quality ===");
    println!("Symbols:           {}", q.symbols);
    println!("Bars:              {}", q.bars);
    println!("Results:           {}", q.results);
    println!("Latest bar:        {}", fmt_date(q.latest_bar_date));
    println!("Latest result:     {}", fmt_date(q.latest_result_date));
    println!("Missing pre_close: {}", q.missing_pre_close);
    println!("Zero volume:       {}", q.zero_volume);
    println!("Missing meta:      {}", q.missing_meta.len());
    println!("Pending recompute: {}", q.pending_recomputes);

    if !q.abnormal_moves.is_empty() {
        println!();
        println!("--- Abnormal moves ---");
        for m in &q.abnormal_moves {
            println!("{:<10} {} {:>8.2}%", m.code, m.date, m.change_pct);
        }
    }
    println!();
    println!("--- Chain distribution ---");
    for (height, count) in &q.chain_distribution {
        println!("{height:>3}: {count}");
    }
    if !q.top_chains.is_empty() {
        println!();
        println!("--- Top chains ---");
        for c in &q.top_chains {
            println!("{:<10} {:<12} {:>3}", c.code, c.name, c.max_chain);
        }
    }
    Ok(())
}

fn run_query(config: &LimitLabConfig, action: QueryAction) -> Result<()> {
    let store = open_store(config)?;
    let api = QueryApi::new(store.connection());

    match action {
        QueryAction::High { date, min } => print_rows(&api.high_chain(date, min)?),
        QueryAction::History { code, start, end } => {
            print_rows(&api.chain_history(&code, start, end)?)
        }
        QueryAction::Max { code } => match api.max_chain(&code)? {
            Some((height, date)) => println!("{code}: max chain {height} on {date}"),
            None => println!("{code}: no limit-up days stored"),
        },
        QueryAction::Summary { date, json } => {
            let s = api.daily_summary(date)?;
            if json {
                println!("{}", summary_json(&s)?);
            } else {
                println!("Date:      {}", fmt_date(s.date));
                println!("Symbols:   {}", s.symbols);
                println!("Limit up:  {}", s.limit_up);
                println!("Yizi:      {}", s.yizi);
                println!("Fried:     {}", s.fried);
                println!("Suspended: {}", s.suspended);
                println!("Max chain: {}", s.max_chain);
                for (height, count) in &s.chain_distribution {
                    println!("  {height:>3}: {count}");
                }
            }
        }
        QueryAction::Limit {
            date,
            include_fried,
        } => print_rows(&api.limit_stocks(date, include_fried)?),
        QueryAction::Fried { date } => print_rows(&api.fried_stocks(date)?),
        QueryAction::Recent { days, min } => print_rows(&api.recent_limits(days, min)?),
        QueryAction::Search { keyword } => {
            let found = api.search_by_name(&keyword)?;
            println!("{:<10} {:<12} {:<6} {:<3}", "Code", "Name", "Board", "ST");
            println!("{}", "-".repeat(36));
            for m in &found {
                println!(
                    "{:<10} {:<12} {:<6} {:<3}",
                    m.code,
                    m.name,
                    m.board_type,
                    if m.is_st { "yes" } else { "" }
                );
            }
            println!("{} match(es)", found.len());
        }
    }
    Ok(())
}

fn run_export(config: &LimitLabConfig, action: ExportAction) -> Result<()> {
    let increments_dir =
        |dir: Option<PathBuf>| dir.unwrap_or_else(|| config.output.increments_dir.clone());

    match action {
        ExportAction::Sample { output } => {
            let store = open_store(config)?;
            let rows = export_sample_csv(&store, &output)?;
            println!("Wrote {rows} rows to {}", output.display());
        }
        ExportAction::Increment { date, dir } => {
            let store = open_store(config)?;
            let date = match date {
                Some(date) => date,
                None => match store.latest_bar_date()? {
                    Some(date) => date,
                    None => bail!("no bars stored"),
                },
            };
            let path = IncrementFile::build(&store, date)?.save(&increments_dir(dir))?;
            println!("Increment: {}", path.display());
        }
        ExportAction::Merge { files } => {
            let files = if files.is_empty() {
                increments::list(&config.output.increments_dir)?
                    .into_iter()
                    .map(|(_, path)| path)
                    .collect()
            } else {
                files
            };
            if files.is_empty() {
                println!("No increment files to merge.");
                return Ok(());
            }
            let mut store = open_store(config)?;
            let merged = increments::merge(&mut store, &files)?;
            println!(
                "Merged {} files: {} bars, {} corrections queued",
                merged.files, merged.bars, merged.corrections
            );
            let engine = ComputeEngine::from_config(config)?;
            print_compute(&engine.run(&mut store, &ComputeMode::Incremental)?);
        }
        ExportAction::Summary { dir } => {
            let dir = increments_dir(dir);
            let s = increments::summary(&dir)?;
            println!("Increments: {}", dir.display());
            println!("Files:      {}", s.files);
            println!("Range:      {} .. {}", fmt_date(s.first), fmt_date(s.last));
            println!("Bars:       {}", s.market_rows);
            println!("Results:    {}", s.limit_rows);
            println!("Limit up:   {}", s.limit_up_count);
        }
        ExportAction::Cleanup { before, dir } => {
            let removed = increments::cleanup_before(&increments_dir(dir), before)?;
            println!("Removed {removed} increment file(s) before {before}");
        }
    }
    Ok(())
}

fn run_classify(
    config: &LimitLabConfig,
    meta: &SymbolMeta,
    bar: &DailyBar,
    suspended: bool,
) -> Result<()> {
    let engine = ComputeEngine::from_config(config)?;
    let c = engine.classifier().classify_day(bar, meta, suspended)?;

    println!(
        "Code:        {} ({}, {})",
        meta.code,
        meta.board_type,
        if meta.is_st { "ST" } else { "non-ST" }
    );
    println!("Limit ratio: {:.2}%", meta.limit_ratio * 100.0);
    match c.limit_price {
        Some(price) => println!("Limit price: {price:.2}"),
        None => println!("Limit price: -"),
    }
    println!("Status:      {}", status_label(c.limit_status));
    println!("Board:       {}", c.board_type);
    println!("Fried:       {}", c.is_fried);
    Ok(())
}

fn status_label(status: LimitStatus) -> &'static str {
    match status {
        LimitStatus::Up => "limit up",
        LimitStatus::NotUp => "not up",
        LimitStatus::Undefined => "undefined",
    }
}

fn fmt_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.to_string()).unwrap_or_else(|| "-".into())
}

fn fmt_price(price: Option<f64>) -> String {
    price.map(|p| format!("{p:.2}")).unwrap_or_else(|| "-".into())
}

fn print_rows(rows: &[LimitRow]) {
    println!(
        "{:<10} {:<10} {:<12} {:<9} {:>5} {:<7} {:>8} {:>8}",
        "Date", "Code", "Name", "Status", "Chain", "Board", "Close", "Chg%"
    );
    println!("{}", "-".repeat(76));
    for r in rows {
        println!(
            "{:<10} {:<10} {:<12} {:<9} {:>5} {:<7} {:>8} {:>8}",
            r.date,
            r.code,
            r.name,
            status_label(r.limit_status),
            r.chain_height,
            r.board_type,
            fmt_price(r.close),
            fmt_price(r.change_pct())
        );
    }
    println!("{} row(s)", rows.len());
}

fn print_compute(report: &ComputeReport) {
    println!(
        "Computed {} symbols, {} rows written, {} corrections drained",
        report.symbols,
        report.rows_written,
        report.corrections.len()
    );
    for issue in &report.issues {
        println!("SKIPPED ROW: {} {}: {}", issue.code, issue.date, issue.error);
    }
    for failure in &report.failures {
        println!("FAILED: {failure}");
    }
}

fn print_daily(report: &DailyReport) {
    println!(
        "Date {}: {} bars saved, {} history corrections",
        report.date, report.bars, report.corrections
    );
    print_compute(&report.compute);
}

fn print_backfill(report: &BackfillReport) {
    let task = &report.task;
    println!();
    println!("=== Task {} ===", task.task_id);
    println!("Range:    {} .. {}", task.start_date, task.end_date);
    println!("Status:   {}", task.status);
    println!(
        "Progress: {}/{} ({:.1}%)",
        task.codes_done,
        task.codes_total,
        task.progress_pct()
    );
    println!("Bars:     {}", report.bars);
    if !report.failed_codes.is_empty() {
        println!("Failed:   {}", report.failed_codes.join(", "));
    }
    match &report.compute {
        Some(compute) => print_compute(compute),
        None => println!("Stopped early; continue with `limitlab fetch resume {}`", task.task_id),
    }
}

fn print_tasks(store: &Store) -> Result<()> {
    let tasks = store.list_tasks()?;
    if tasks.is_empty() {
        println!("No fetch tasks.");
        return Ok(());
    }
    println!(
        "{:<36} {:<13} {:<23} {:>12} {:<19}",
        "Task", "Status", "Range", "Progress", "Updated"
    );
    println!("{}", "-".repeat(106));
    for t in &tasks {
        println!(
            "{:<36} {:<13} {:<23} {:>12} {:<19}",
            t.task_id,
            t.status,
            format!("{}..{}", t.start_date, t.end_date),
            format!("{}/{}", t.codes_done, t.codes_total),
            t.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(error) = &t.error {
            println!("    {error}");
        }
    }
    Ok(())
}
