mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use attest_cli::{DeadLetterSummary, EvaluationHandler, RunReport};
use attest_connector::{load_sources, Collector};
use attest_core::config::load_dotenv;
use attest_core::{Config, EvidenceEvent};
use attest_notify::FindingPublisher;
use attest_queue::{DeadLetterFilter, EvidencePipeline, PipelineOptions};
use attest_rules::{compile, AttributeCatalog, LoadStatus, RuleCache, RuleDefinition, RuleLoader};

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let args = CliArgs::parse();
    let config = Config::from_env();

    match args.command {
        Command::Validate { files, catalog } => {
            let catalog = catalog.unwrap_or_else(|| config.rules.catalog_path.clone());
            validate(&files, &catalog)
        }
        Command::Run {
            rules_dir,
            catalog,
            sources,
            max_concurrency,
            json,
        } => {
            let mut config = config;
            if let Some(dir) = rules_dir {
                config.rules.rules_dir = dir;
            }
            if let Some(path) = catalog {
                config.rules.catalog_path = path;
            }
            if let Some(path) = sources {
                config.adapters.sources_file = path;
            }
            if let Some(n) = max_concurrency {
                config.adapters.max_concurrency = n.max(1);
            }
            run(config, json).await
        }
    }
}

fn load_catalog(path: &Path) -> Result<AttributeCatalog> {
    AttributeCatalog::load(path).with_context(|| format!("failed to load attribute catalog {}", path.display()))
}

fn validate(files: &[PathBuf], catalog_path: &Path) -> Result<()> {
    let catalog = load_catalog(catalog_path)?;
    let mut failed = 0;

    for file in files {
        let outcome = std::fs::read_to_string(file)
            .map_err(|e| e.to_string())
            .and_then(|yaml| RuleDefinition::from_yaml(&yaml).map_err(|e| format!("YAML parse error: {e}")));

        let definition = match outcome {
            Ok(definition) => definition,
            Err(reason) => {
                println!("{}: {reason}", file.display());
                failed += 1;
                continue;
            }
        };

        match compile(&definition, &catalog) {
            Ok(rule) => println!(
                "{}: ok ({} v{}, reads {})",
                file.display(),
                rule.id,
                rule.version,
                rule.dependencies.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
            Err(e) => {
                failed += 1;
                println!("{}: rule '{}' rejected", file.display(), e.rule_id);
                for issue in &e.issues {
                    println!("  {issue}");
                }
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} rule file(s) failed validation", files.len());
    }
    Ok(())
}

async fn run(config: Config, json: bool) -> Result<()> {
    config.log_summary();

    let catalog = load_catalog(&config.rules.catalog_path)?;
    let cache = Arc::new(RuleCache::new(catalog));
    let loader = RuleLoader::new(config.rules.rules_dir.clone(), Arc::clone(&cache));
    let results = loader.load_all().context("failed to scan rules directory")?;
    for result in &results {
        if let LoadStatus::Failed { error } = &result.status {
            warn!(path = %result.path.display(), error = %error, "rule not loaded");
        }
    }
    let active = cache.snapshot().len();
    if active == 0 {
        bail!("no rules loaded from {}", config.rules.rules_dir.display());
    }
    info!(rules = active, "rules loaded");

    let publisher = FindingPublisher::from_config(&config.sink).context("failed to configure finding sink")?;
    let handler = Arc::new(EvaluationHandler::new(cache, Arc::new(publisher)));
    let pipeline = EvidencePipeline::new(handler, PipelineOptions::from(&config.pipeline));

    let sources = load_sources(&config.adapters.sources_file)
        .with_context(|| format!("failed to load sources from {}", config.adapters.sources_file.display()))?;
    let collector = Collector::from_configs(sources, config.adapters.max_concurrency)
        .context("failed to build evidence sources")?;

    let cancel = collector.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling collection");
            cancel.cancel();
        }
    });

    let mut ingest_rejected = 0;
    let summaries = collector
        .collect_all(|record| {
            if let Err(e) = pipeline.ingest(EvidenceEvent::from_record(record, None)) {
                error!(error = %e, "evidence rejected at ingest");
                ingest_rejected += 1;
            }
        })
        .await;

    pipeline.wait_idle().await;

    let dead_letters = pipeline
        .dead_letters(&DeadLetterFilter::All)
        .await
        .context("failed to list dead letters")?;
    let report = RunReport {
        sources: summaries,
        ingest_rejected,
        pipeline: pipeline.stats(),
        dead_letters: dead_letters.iter().map(DeadLetterSummary::from).collect(),
    };

    if json {
        eprintln!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        eprint!("{}", report.render_text());
    }

    if report.problems() > 0 {
        warn!(problems = report.problems(), "run finished with problems");
    } else {
        info!("run finished");
    }
    Ok(())
}
