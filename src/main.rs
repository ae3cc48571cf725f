use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

use dumpsift::utils::{self, format_duration};
use dumpsift::{Pipeline, RunContext, RunSummary, SiftConfig, SortBackend};

#[derive(Parser)]
#[command(name = "dumpsift")]
#[command(about = "Splits a text dump into email tokens and leftover lines, deduplicates both, and counts tokens per domain")]
#[command(version)]
struct Args {
    #[arg(short, long, default_value = ".", help = "Target path; must contain a 'data' directory")]
    path: PathBuf,

    #[arg(short, long, help = "Concurrent partitioner workers (default: CPU count - 1)")]
    cores: Option<usize>,

    #[arg(short, long, help = "Merge memory budget as a percentage of available memory (default: 10)")]
    memory_percent: Option<f64>,

    #[arg(long, help = "Configuration file; a default one is written if it does not exist")]
    config: Option<PathBuf>,

    #[arg(long, help = "Sort backend: builtin or system")]
    backend: Option<SortBackend>,

    #[arg(long, help = "Skip partitioning and merge the partitions already in temp_out/")]
    merge_only: bool,

    #[arg(long, help = "Keep temp_out/ and mad_out.txt after a successful run")]
    keep_intermediate: bool,

    #[arg(long, help = "Print the run summary as JSON")]
    json: bool,

    #[arg(short, long, help = "Verbose output")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dumpsift: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) if path.exists() => SiftConfig::load(path).await?,
        Some(path) => {
            println!("📄 Config file not found, creating default: {}", path.display());
            let default_config = SiftConfig::default();
            default_config.save(path).await?;
            default_config
        }
        None => SiftConfig::default(),
    };

    if let Some(cores) = args.cores {
        config.concurrency = cores;
    }
    if let Some(percent) = args.memory_percent {
        config.memory_budget_percent = percent;
    }
    if let Some(backend) = args.backend {
        config.sort_backend = backend;
    }
    if args.keep_intermediate {
        config.keep_intermediate = true;
    }
    if args.verbose {
        config.verbosity = "verbose".to_string();
    }
    config.validate()?;

    utils::setup_logging(&config.verbosity)?;

    info!("Starting dumpsift in {}", args.path.display());
    let ctx = RunContext::new(&args.path, &config);
    let pipeline = Pipeline::new(ctx);

    let summary = if args.merge_only {
        pipeline.merge_only().await?
    } else {
        pipeline.run().await?
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&pipeline, &summary);
    }

    Ok(())
}

fn print_summary(pipeline: &Pipeline, summary: &RunSummary) {
    let ctx = pipeline.context();

    println!("\n🎉 Run completed");
    println!("=======================================");
    if let Some(schedule) = &summary.schedule {
        println!(
            "📁 Files partitioned: {}/{} ({} failed)",
            schedule.files_completed,
            schedule.files_total,
            schedule.failures.len()
        );
        for failure in &schedule.failures {
            println!("   ⚠️ {}: {}", failure.path.display(), failure.error);
        }
        println!("📊 Lines read: {}", schedule.totals.lines_read);
    }
    println!(
        "✨ Unique tokens: {}",
        summary.merge.conforming.sort.records_out
    );
    println!(
        "🗑️ Unique non-conforming lines: {} -> {}",
        summary.merge.non_conforming.sort.records_out,
        ctx.non_conforming_master.display()
    );
    println!(
        "🌐 Domains: {} -> {}",
        summary.aggregate.domains,
        ctx.domain_summary.display()
    );
    println!("⏱️ Total time: {}", format_duration(Duration::from_millis(summary.elapsed_ms)));
}
