use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use launchpad::cli::{Cli, Commands, ConfigAction};
use launchpad::config::Config;
use launchpad::embedding::provider_from_config;
use launchpad::error::{LaunchpadError, Result};
use launchpad::indexing::BulkIndexer;
use launchpad::migration::{CheckpointStore, MigrationOptions, Migrator, PostgresSource, TableReport};
use launchpad::retrieval::{Retrieval, Retriever};
use launchpad::signals::InterruptFlag;
use launchpad::store::{
    collection_name, LocalVectorStore, MetadataFilter, StoreError, StoreKind, VectorStore,
    WeaviateClient, WeaviateStore,
};

/// Conventional status for a run stopped by SIGINT
const EXIT_INTERRUPTED: u8 = 130;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_logging(cli.verbose);

    let interrupt = InterruptFlag::new();
    match run(cli, &interrupt) {
        Ok(()) if interrupt.is_set() => ExitCode::from(EXIT_INTERRUPTED),
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_interrupted() => {
            eprintln!("{}", e);
            ExitCode::from(EXIT_INTERRUPTED)
        }
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, interrupt: &InterruptFlag) -> Result<()> {
    let config_path = cli.config;
    let profile = cli.profile;

    match cli.command {
        Commands::Retrieve {
            category,
            query,
            top_k,
            filters,
            json,
        } => {
            let config = load_config(config_path, profile)?;
            cmd_retrieve(&config, &category, &query, top_k, &filters, json)?;
        }
        Commands::Count { category } => {
            let config = load_config(config_path, profile)?;
            cmd_count(&config, &category)?;
        }
        Commands::Index {
            categories,
            parallel,
        } => {
            let config = load_config(config_path, profile)?;
            interrupt.watch_signals()?;
            cmd_index(&config, categories, parallel, interrupt.clone())?;
        }
        Commands::Migrate {
            tables,
            no_resume,
            chunk_size,
            json,
        } => {
            let config = load_config(config_path, profile)?;
            interrupt.watch_signals()?;
            cmd_migrate(&config, &tables, !no_resume, chunk_size, json, interrupt.clone())?;
        }
        Commands::Config { action } => {
            cmd_config(config_path, profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "launchpad=debug"
    } else {
        "launchpad=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_retrieve(
    config: &Config,
    category: &str,
    query: &str,
    top_k: Option<usize>,
    filters: &[String],
    json: bool,
) -> Result<()> {
    let filter = MetadataFilter::from_pairs(filters.iter().map(String::as_str))
        .map_err(LaunchpadError::Config)?;
    let top_k = top_k.unwrap_or(config.retrieval.top_k);

    let retriever = Retriever::from_config(config)?;
    let filter = (!filter.is_empty()).then_some(&filter);
    let retrieval = retriever.retrieve(category, query, top_k, filter)?;

    if json {
        let out = serde_json::to_string_pretty(&retrieval).map_err(|e| LaunchpadError::Json {
            source: e,
            context: "Failed to serialize retrieval".to_string(),
        })?;
        println!("{}", out);
    } else {
        print_retrieval(category, &retrieval);
    }
    Ok(())
}

fn print_retrieval(category: &str, retrieval: &Retrieval) {
    if let Some(answer) = &retrieval.answer {
        println!("Answer:\n  {}\n", answer);
    }
    if retrieval.is_empty() {
        println!("No context found for category '{}'", category);
        return;
    }

    println!("Found {} documents:\n", retrieval.documents.len());
    for (i, doc) in retrieval.documents.iter().enumerate() {
        let source = doc
            .metadata
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        println!(
            "{}. [{}] relevance {:.3} (distance {:.4}) source: {}",
            i + 1,
            doc.id,
            doc.relevance,
            doc.distance,
            source
        );
        let preview: String = doc.text.chars().take(200).collect();
        println!("   {}", preview.replace('\n', " "));
        if doc.text.chars().count() > 200 {
            println!("   ...");
        }
        println!();
    }
}

fn cmd_count(config: &Config, category: &str) -> Result<()> {
    let count = match config.retrieval.store {
        // The agent reads Weaviate collections; count them directly
        StoreKind::QueryAgent => {
            let client = WeaviateClient::from_config(&config.weaviate)?;
            client.count(&collection_name(category)?)?
        }
        _ => Retriever::from_config(config)?.count(category)?,
    };
    println!("{}: {} documents", category, count);
    Ok(())
}

fn cmd_index(
    config: &Config,
    categories: Vec<String>,
    parallel: bool,
    interrupt: InterruptFlag,
) -> Result<()> {
    let categories = if categories.is_empty() {
        config.retrieval.categories.clone()
    } else {
        categories
    };
    let provider = provider_from_config(&config.embedding)?;
    let corpus_dir = Config::expand_path(&config.indexing.corpus_dir)?;
    let indexer = BulkIndexer::new(
        provider,
        corpus_dir,
        config.embedding.batch_size,
        config.indexing.max_workers,
    )
    .with_interrupt(interrupt);

    let dimension = config.embedding.dimension;
    let parallel = parallel || config.indexing.parallel;

    let reports = match config.retrieval.store {
        StoreKind::Local => {
            let index_dir = Config::expand_path(&config.storage.index_dir)?;
            let open = |category: &str| -> std::result::Result<Arc<dyn VectorStore>, StoreError> {
                Ok(Arc::new(LocalVectorStore::open(&index_dir, category, dimension)?))
            };
            indexer.run(&categories, parallel, &open)?
        }
        StoreKind::Weaviate | StoreKind::QueryAgent => {
            let client = WeaviateClient::from_config(&config.weaviate)?;
            let open = |category: &str| -> std::result::Result<Arc<dyn VectorStore>, StoreError> {
                Ok(Arc::new(WeaviateStore::new(client.clone(), category, dimension)?))
            };
            indexer.run(&categories, parallel, &open)?
        }
    };

    for report in &reports {
        println!(
            "✓ {}: {} indexed, {} skipped, {} failed ({}ms)",
            report.category, report.indexed, report.skipped, report.failed, report.duration_ms
        );
    }
    Ok(())
}

fn cmd_migrate(
    config: &Config,
    tables: &[String],
    resume: bool,
    chunk_size: Option<usize>,
    json: bool,
    interrupt: InterruptFlag,
) -> Result<()> {
    let mut options = MigrationOptions::from_config(&config.migration);
    options.resume = resume;
    options.expected_dimension = Some(config.embedding.dimension);
    if let Some(size) = chunk_size {
        options.chunk_size = size;
    }

    let target = WeaviateClient::from_config(&config.weaviate)?;
    let source =
        PostgresSource::from_env(&config.migration.database_url_env, &config.migration.schema)?;
    let checkpoints = CheckpointStore::new(Config::expand_path(&config.storage.checkpoint_dir)?)?;

    tracing::info!(
        "Migrating into {} (chunk size {}, resume {})",
        target.url(),
        options.chunk_size,
        options.resume
    );
    let mut migrator = Migrator::new(source, target, checkpoints, options, interrupt);
    let reports = migrator.run(tables)?;

    if json {
        let out = serde_json::to_string_pretty(&reports).map_err(|e| LaunchpadError::Json {
            source: e,
            context: "Failed to serialize migration report".to_string(),
        })?;
        println!("{}", out);
    } else {
        print_migration(&reports);
    }
    Ok(())
}

fn print_migration(reports: &[TableReport]) {
    if reports.is_empty() {
        println!("No *_corpus tables found");
        return;
    }
    for report in reports {
        let count = report
            .destination_count
            .map_or_else(|| "unknown".to_string(), |c| c.to_string());
        println!(
            "{} {} -> {}: {} read, {} inserted, {} skipped, {} failed, destination count {}",
            if report.verified { "✓" } else { "!" },
            report.table,
            report.collection,
            report.rows_read,
            report.inserted,
            report.skipped,
            report.failed,
            count
        );
    }
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config).map_err(|e| LaunchpadError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let value = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    LaunchpadError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };
            let json = serde_json::to_string_pretty(&value).map_err(|e| LaunchpadError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = match profile {
                Some(profile) => Config::load_with_profile(&path, &profile)?,
                None => Config::load(&path)?,
            };
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
            println!("  Retrieval store: {:?}", config.retrieval.store);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| LaunchpadError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'launchpad config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}
