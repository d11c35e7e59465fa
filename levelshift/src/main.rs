use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use levelshift_convert::{AnvilProvider, CancelToken, MigrationOptions, MigrationReport, World, WorldMigrator};
use levelshift_metrics::MigrationMetrics;

#[derive(Parser)]
#[command(name = "levelshift", about = "Moves a world's chunks from the 256-tall to the 384-tall height range")]
pub struct Args {
    /// World folder name, looked up as <data-path>/worlds/<world>
    #[arg(required_unless_present = "world_dir")]
    pub world: Option<String>,

    /// Server data directory
    #[arg(long, env = "LEVELSHIFT_DATA_PATH", default_value = ".")]
    pub data_path: PathBuf,

    /// Use this world folder directly instead of resolving it from the data path
    #[arg(long, conflicts_with = "world")]
    pub world_dir: Option<PathBuf>,

    /// Name shown in log messages (defaults to the folder name)
    #[arg(long)]
    pub name: Option<String>,

    /// Worker threads (defaults to the available parallelism)
    #[arg(short, long, env = "LEVELSHIFT_THREADS")]
    pub threads: Option<usize>,

    /// Write the final report as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl Args {
    fn world(&self) -> World {
        let world = match (&self.world_dir, &self.world) {
            (Some(dir), _) => {
                let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or("world");
                World::new(name, dir.clone())
            }
            (None, Some(folder)) => World::from_data_path(&self.data_path, folder),
            // clap guarantees one of the two
            (None, None) => World::from_data_path(&self.data_path, "world"),
        };
        match &self.name {
            Some(name) => World::new(name.clone(), world.folder()),
            None => world,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let world = args.world();
    if !world.folder().is_dir() {
        anyhow::bail!("World folder {} does not exist", world.folder().display());
    }
    println!("Migrating world '{}' at {:?}", world.name(), world.folder());

    let cancel = CancelToken::new();
    let options = MigrationOptions { threads: args.threads, cancel: cancel.clone() };
    let metrics = Arc::new(MigrationMetrics::new());

    // The migration blocks on disk IO and rayon workers, keep it off the async runtime
    let task = {
        let world = world.clone();
        let metrics = Arc::clone(&metrics);
        tokio::task::spawn_blocking(move || {
            WorldMigrator::new(AnvilProvider::for_world(&world))
                .with_options(options)
                .run_with_metrics(&world, &metrics)
        })
    };
    tokio::pin!(task);

    let report = tokio::select! {
        result = &mut task => result.context("migration task panicked")??,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Ctrl+C received, stopping after the chunks in flight...");
            cancel.cancel();
            task.await.context("migration task panicked")??
        }
    };

    println!("{}", metrics.generate_report());
    summarize(&report);

    if let Some(path) = &args.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write report to {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    if report.cancelled {
        anyhow::bail!("Migration of '{}' was cancelled", report.world);
    }
    Ok(())
}

fn summarize(report: &MigrationReport) {
    if report.failed_regions.is_empty() && report.chunks_failed == 0 {
        return;
    }
    eprintln!(
        "{} region(s) and {} chunk(s) could not be migrated, see the log above",
        report.regions_failed, report.chunks_failed
    );
    for region in &report.failed_regions {
        eprintln!("  region {}", region);
    }
}
