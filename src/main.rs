use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use wpg::catalog::CatalogStore;
use wpg::config::Config;
use wpg::remote::HttpRemoteStore;

#[derive(Parser)]
#[command(name = "wpg")]
#[command(about = "Wallpaper generator with dataset sync", long_about = None)]
struct Cli {
    /// Topic to generate wallpapers for, or `sync` to sync with the remote dataset
    target: Option<String>,

    /// Number of wallpapers to generate
    #[arg(long, default_value_t = 10)]
    num: usize,

    /// JSON config file; environment variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    wpg::logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.target.as_deref() {
        Some("sync") => sync(&config, cli.json),
        Some(topic) => generate(&config, topic, cli.num, cli.json),
        None => summary(&config, cli.json),
    }
}

fn sync(config: &Config, json: bool) -> Result<()> {
    let repo_id = config.remote.require_repo_id()?;
    let remote = HttpRemoteStore::new(&config.remote)?;

    let report = match wpg::sync::run(&config.data, &remote, repo_id) {
        Ok(report) => report,
        Err(failure) => {
            if let Some(backup) = &failure.retained_backup {
                eprintln!(
                    "local changes are kept in {}; run sync again to fold them back in",
                    backup.display()
                );
            }
            return Err(failure.into());
        }
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize sync report")?
        );
    } else {
        println!(
            "Synced {} as {}: merged {} rows, extracted {} files, uploaded {} parts",
            repo_id,
            report.identity,
            report.merged_rows,
            report.extracted_files,
            report.uploaded_parts.len()
        );
        if report.missing_blobs > 0 {
            println!("{} catalog rows have no blob file", report.missing_blobs);
        }
    }
    Ok(())
}

fn generate(config: &Config, topic: &str, num: usize, json: bool) -> Result<()> {
    let catalog = CatalogStore::open(&config.data.catalog_path())?;
    let report = wpg::generate::run(config, &catalog, topic, num)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("serialize generation report")?
        );
    } else {
        println!(
            "Generated {}/{} wallpapers for {}",
            report.generated, report.prompts, report.topic
        );
        println!("Run `wpg sync` to upload changes.");
    }
    Ok(())
}

fn summary(config: &Config, json: bool) -> Result<()> {
    let catalog = CatalogStore::open(&config.data.catalog_path())?;
    let summary = catalog.summary()?;
    let topics = catalog.topic_page(1, 50)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "summary": summary,
                "topics": topics,
            }))
            .context("serialize summary")?
        );
        return Ok(());
    }

    println!("{} topics, {} images", summary.topics, summary.images);
    for topic in &topics.items {
        let images = catalog.images_for_topic(topic.id, 1, 1)?;
        println!("{:>6}  {}", images.total, topic.name);
    }
    if topics.total_pages > 1 {
        println!("... {} more topics", topics.total - topics.items.len() as u64);
    }
    Ok(())
}
