use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use dealer_recon::aggregate::{high_value_buckets, monthly_kpis, Metrics};
use dealer_recon::ingest::{application_rows, funded_rows};
use dealer_recon::{
    load_rows, rebuild_year, ColumnMapping, DealerRegistry, FactStore, FundedColumnMapping,
    ReconConfig, SessionState, SqliteStore, UploadSession, CanonicalDealer,
};

const DEFAULT_CONFIG: &str = "dealer_recon.toml";

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");
    let rest = &args[args.len().min(2)..];

    match command {
        "import-registry" => run_import_registry(rest)?,
        "reconcile" => run_reconcile(rest)?,
        "rebuild" => run_rebuild(rest)?,
        "summary" => run_summary(rest)?,
        _ => print_usage(),
    }

    Ok(())
}

fn print_usage() {
    println!("dealer-recon {}", dealer_recon::VERSION);
    println!();
    println!("USAGE:");
    println!("  dealer-recon import-registry <dealers.csv> [--config <toml>]");
    println!("  dealer-recon reconcile --apps <csv> [--funded <csv>] --year Y --month M");
    println!("               [--decisions <json>] [--config <toml>] [--accept-suggestions]");
    println!("  dealer-recon rebuild --year Y [--config <toml>]");
    println!("  dealer-recon summary --year Y [--config <toml>]");
    println!();
    println!("Set RUST_LOG=debug for per-record decisions.");
}

// ============================================================================
// Argument helpers
// ============================================================================

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

fn required<'a>(args: &'a [String], name: &str) -> Result<&'a str> {
    flag(args, name).with_context(|| format!("missing required argument {}", name))
}

fn parse_flag<T: std::str::FromStr>(args: &[String], name: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    required(args, name)?
        .parse()
        .with_context(|| format!("invalid value for {}", name))
}

/// --config if given, else ./dealer_recon.toml if present, else defaults
fn load_config(args: &[String]) -> Result<ReconConfig> {
    if let Some(path) = flag(args, "--config") {
        return ReconConfig::load(Path::new(path))
            .with_context(|| format!("failed to load config {}", path));
    }
    let default_path = Path::new(DEFAULT_CONFIG);
    if default_path.exists() {
        return ReconConfig::load(default_path)
            .with_context(|| format!("failed to load config {}", DEFAULT_CONFIG));
    }
    Ok(ReconConfig::default())
}

fn open_store(config: &ReconConfig) -> Result<SqliteStore> {
    let path = PathBuf::from(&config.database.path);
    let store = SqliteStore::open(&path)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    println!("✓ Database opened: {} (WAL mode)", path.display());
    Ok(store)
}

// ============================================================================
// import-registry
// ============================================================================

fn run_import_registry(args: &[String]) -> Result<()> {
    println!("🏪 Dealer Registry Import");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let csv_path = args
        .first()
        .filter(|a| !a.starts_with("--"))
        .context("usage: dealer-recon import-registry <dealers.csv>")?;
    let config = load_config(args)?;
    let store = open_store(&config)?;

    println!("\n📂 Loading {}...", csv_path);
    let table = load_rows(Path::new(csv_path)).with_context(|| format!("failed to read {}", csv_path))?;
    let mapping = ColumnMapping::guess(&table.headers);
    if mapping.dealer.is_none() {
        bail!("no dealer column found in {}", csv_path);
    }

    let mut imported = 0;
    let mut skipped = 0;
    for row in application_rows(&table, &mapping) {
        if row.dealer == dealer_recon::ingest::UNKNOWN_DEALER {
            skipped += 1;
            continue;
        }
        store.insert(&CanonicalDealer::new(&row.dealer, &row.state, row.financing_type))?;
        imported += 1;
    }

    let total = store.list_dealers()?.len();
    println!("✓ Upserted {} dealers ({} blank rows skipped)", imported, skipped);
    println!("✓ Registry now holds {} dealers", total);
    Ok(())
}

// ============================================================================
// reconcile
// ============================================================================

fn run_reconcile(args: &[String]) -> Result<()> {
    println!("🔗 Dealer Reconciliation");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let apps_path = required(args, "--apps")?;
    let year: i32 = parse_flag(args, "--year")?;
    let month: u32 = parse_flag(args, "--month")?;
    let mut config = load_config(args)?;
    if has_flag(args, "--accept-suggestions") {
        config.auto_approve.accept_suggestions = true;
    }
    let store = open_store(&config)?;

    // 1. Applications
    println!("\n📂 Loading applications...");
    let table = load_rows(Path::new(apps_path)).with_context(|| format!("failed to read {}", apps_path))?;
    let mapping = ColumnMapping::guess(&table.headers);
    println!("✓ {} rows, {} of 8 columns mapped", table.rows.len(), mapping.mapped_count());
    let applications = application_rows(&table, &mapping);

    // 2. Funded extract (optional)
    let funded = match flag(args, "--funded") {
        Some(path) => {
            println!("\n📂 Loading funded extract...");
            let table = load_rows(Path::new(path)).with_context(|| format!("failed to read {}", path))?;
            let rows = funded_rows(&table, &FundedColumnMapping::guess(&table.headers));
            println!("✓ {} funded rows", rows.len());
            Some(rows)
        }
        None => None,
    };

    // 3. Draft + validate
    let mut session = UploadSession::draft(year, month, &applications, funded, config)?;
    println!("\n🔍 Validating {}-{:02} against registry...", year, month);
    let state = session.validate(&store)?;
    for warning in session.warnings() {
        println!("⚠️  {}", warning);
    }

    let report = session.match_report();
    println!(
        "✓ Funded matching: {} exact, {} high, {} review, {} unmatched ({} missing fields)",
        report.exact, report.high_confidence, report.needs_review, report.unmatched, report.missing_fields
    );
    for row in session.preflight().iter().filter(|r| r.flagged) {
        println!(
            "   ⚑ {:<32} → {:<32} {:.2}{}",
            row.funded_name,
            row.suggested.as_deref().unwrap_or("-"),
            row.score,
            if row.branch_like { "  (branch?)" } else { "" }
        );
    }

    // 4. Review
    if state == SessionState::UnderReview {
        if let Some(path) = flag(args, "--decisions") {
            let json = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
            let applied = session.apply_decisions_json(&json)?;
            println!("✓ Applied {} decisions from {}", applied, path);
        }

        let pending = session.review().unresolved();
        if !pending.is_empty() {
            println!("\n📝 {} review item(s) need a decision:", pending.len());
            for item in &pending {
                let hint = item
                    .suggested
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "decision required".to_string());
                let rows = item.funded_rows().len();
                if rows > 0 {
                    println!("   • {}  [{:?}]  {} funded row(s)  suggested: {}", item.id, item.kind, rows, hint);
                } else {
                    println!("   • {}  [{:?}]  suggested: {}", item.id, item.kind, hint);
                }
            }
            println!("\n❌ Nothing committed. Re-run with --decisions <json> or --accept-suggestions.");
            session.cancel()?;
            return Ok(());
        }
        session.resolve()?;
    }

    // 5. Commit
    println!("\n💾 Committing...");
    let commit = session.commit(&store, &store)?;

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✅ {}-{:02} committed in {} attempt(s)", commit.year, commit.month, commit.attempts);
    println!("✓ {} dealer facts, {} funded records", commit.facts, commit.funded_records);
    println!("✓ {} funded rows merged, {} skipped", commit.merged_rows, commit.skipped_rows);
    println!(
        "✓ Registry: {} inserted, {} updated",
        commit.registry.inserted, commit.registry.updated
    );
    println!("✓ Rollup digest {}", &commit.rollup_digest[..12]);
    Ok(())
}

// ============================================================================
// rebuild / summary
// ============================================================================

fn run_rebuild(args: &[String]) -> Result<()> {
    let year: i32 = parse_flag(args, "--year")?;
    let config = load_config(args)?;
    let store = open_store(&config)?;

    println!("\n🔁 Rebuilding {} rollups...", year);
    let rollups = rebuild_year(&store, year)?;
    println!(
        "✓ {} dealer rows, {} state-months, {} FI groups",
        rollups.dealers.len(),
        rollups.state_months.len(),
        rollups.financing_types.len()
    );
    println!("✓ Digest {}", rollups.digest()?);
    Ok(())
}

fn run_summary(args: &[String]) -> Result<()> {
    let year: i32 = parse_flag(args, "--year")?;
    let config = load_config(args)?;
    let store = open_store(&config)?;

    let rollups = store.query_rollups(year)?;
    if rollups.is_empty() {
        println!("❌ No rollups for {} (years with data: {:?})", year, store.list_years()?);
        return Ok(());
    }

    let totals = Metrics::from(rollups.totals());
    println!("\n📊 {} Summary", year);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "Apps {}  Approved {}  Counter {}  Funded {}  (${:.2})",
        totals.counts.total_apps,
        totals.counts.approved,
        totals.counts.counter,
        totals.counts.funded,
        totals.counts.funded_amount
    );
    println!(
        "LTA {:.1}%  LTB {:.1}%",
        totals.approval_plus_counter_rate * 100.0,
        totals.funded_rate * 100.0
    );

    println!("\n🗺️  By state (YTD)");
    for state in rollups.state_ytd() {
        println!(
            "   {:<4} apps {:>6}  funded {:>5}  LTA {:>5.1}%  LTB {:>5.1}%",
            state.state,
            state.ytd.total_apps,
            state.ytd.funded,
            state.metrics.approval_plus_counter_rate * 100.0,
            state.metrics.funded_rate * 100.0
        );
    }

    println!("\n🏷️  By financing type");
    for fi in &rollups.financing_types {
        let m = Metrics::from(fi.counts);
        println!(
            "   {:<12} apps {:>6}  funded {:>5}  LTB {:>5.1}%",
            fi.financing_type.as_str(),
            fi.counts.total_apps,
            fi.counts.funded,
            m.funded_rate * 100.0
        );
    }

    println!("\n📅 Funded by month");
    let series = rollups.funded_by_month();
    for (i, (deals, amount)) in series.deals.iter().zip(series.amounts.iter()).enumerate() {
        if *deals == 0 {
            continue;
        }
        let month = i as u32 + 1;
        let records = store.query_month(year, month)?;
        let kpis = monthly_kpis(&records.funded, &records.approved);
        let high = high_value_buckets(&records.funded);
        println!(
            "   {:02}  {:>5} deals  ${:>14.2}  avg APR {}  ≥18k {}",
            month,
            deals,
            amount,
            kpis.avg_apr_funded.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "-".into()),
            high.first().map(|b| b.count).unwrap_or(0)
        );
    }

    Ok(())
}
