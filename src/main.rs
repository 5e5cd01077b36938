use std::{collections::HashMap, io::Write, path::Path, sync::Arc};

use clap::Parser;
use docshelf::{
    ContentTransport,
    DataDir,
    Docset,
    DocsetRegistry,
    Outcome,
    Reranker,
    TransportConfig,
    bundle,
    docset::DocsetMeta,
    error::{self, Error},
    search::{self, SearchParams},
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    CacheAction,
    Cli,
    Command,
    DocsetAction,
    RanksAction,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSHELF_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> error::Result<()> {
    let cli = Cli::parse();

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;

    match cli.command {
        Command::Docset { action } => {
            let registry = DocsetRegistry::open(data_dir)?;
            docset_command(&registry, action)?;
        }
        Command::Cache { action } => match action {
            CacheAction::Clean => {
                let registry = DocsetRegistry::open(data_dir)?;
                let removed = registry.remove_cached_downloads()?;
                println!("Removed {removed} cached download(s)");
            }
        },
        Command::Search(args) => {
            let registry = DocsetRegistry::open(data_dir.clone())?;
            let reranker = Reranker::open(&data_dir.ranks_db())?;
            let params = SearchParams {
                query: args.query.clone(),
                limit: args.count,
                docset: args.docset.clone(),
                platform: args.platform.clone(),
                min_score: args.min_score,
            };

            let results =
                search::execute_search(&registry, &reranker, &params)?;

            if args.json {
                search::format_json(&results, &args.query)?;
            } else {
                search::format_human(&results);
            }
        }
        Command::Choose(args) => {
            let reranker = Reranker::open(&data_dir.ranks_db())?;
            let rank = reranker.increase_rank(&args.identity)?;
            println!("{}: {rank}", args.identity);
        }
        Command::Ranks { action } => {
            let reranker = Reranker::open(&data_dir.ranks_db())?;
            ranks_command(&reranker, action)?;
        }
        Command::Fetch(args) => {
            cmd_fetch(data_dir, &args)?;
        }
        Command::Status(args) => {
            let registry = DocsetRegistry::open(data_dir.clone())?;
            let reranker = Reranker::open(&data_dir.ranks_db())?;
            cmd_status(&registry, &reranker, args.json)?;
        }
        Command::Completions(_) => {}
    }

    Ok(())
}

fn docset_command(
    registry: &DocsetRegistry,
    action: DocsetAction,
) -> error::Result<()> {
    match action {
        DocsetAction::Import { path, replace } => {
            let docset = registry.import_docset(&path, replace)?;
            println!(
                "Imported '{}' -> {}",
                docset.name,
                registry.absolute_path(&docset).display()
            );
        }
        DocsetAction::Add { path, replace } => {
            let path = canonical(&path)?;
            let docset = registry.describe_bundle(&path)?;
            let docset = registry.add_docset(docset, replace)?;
            println!("Added '{}' -> {}", docset.name, docset.relative_path);
        }
        DocsetAction::List { pattern, json } => {
            docset_list(registry, pattern.as_deref(), json)?;
        }
        DocsetAction::Enable { name } => {
            let docset = find_docset(registry, &name)?;
            if registry.set_enabled(&docset, true)? {
                println!("Enabled '{}'", docset.name);
            } else {
                println!("'{}' is already enabled", docset.name);
            }
        }
        DocsetAction::Disable { name } => {
            let docset = find_docset(registry, &name)?;
            if registry.set_enabled(&docset, false)? {
                println!("Disabled '{}'", docset.name);
            } else {
                println!("'{}' is already disabled", docset.name);
            }
        }
        DocsetAction::Move { from, to } => {
            registry.move_docset(from, to)?;
            println!("Moved docset {from} -> {to}");
        }
        DocsetAction::Remove { name } => {
            let docset = find_docset(registry, &name)?;
            registry.remove_docset(&docset)?;
            println!("Removed '{}'", docset.name);
        }
        DocsetAction::RemoveFolder { path } => {
            let path = canonical(&path)?;
            let removed = registry.remove_docsets_in_folder(&path)?;
            for docset in &removed {
                println!("Removed '{}'", docset.name);
            }
            println!("{} docset(s) removed", removed.len());
        }
        DocsetAction::Build(args) => {
            let meta = DocsetMeta {
                name: args.name.clone(),
                identifier: args.identifier.clone(),
                platform: args.platform.clone(),
                version: args.version.clone(),
            };
            std::fs::create_dir_all(&args.out)?;
            let summary = bundle::build_docset(&args.source, &meta, &args.out)?;
            println!(
                "Built {} ({} pages, {} entries)",
                summary.bundle.display(),
                summary.pages,
                summary.entries
            );
            if args.import {
                let docset = registry.import_docset(&summary.bundle, true)?;
                println!("Imported '{}'", docset.name);
            }
        }
    }
    Ok(())
}

fn docset_list(
    registry: &DocsetRegistry,
    pattern: Option<&str>,
    json: bool,
) -> error::Result<()> {
    let matcher = pattern
        .map(|p| {
            globset::Glob::new(p)
                .map(|g| g.compile_matcher())
                .map_err(|e| {
                    Error::Config(format!("invalid glob pattern: {e}"))
                })
        })
        .transpose()?;

    let docsets = registry.docsets();
    let listed: Vec<(usize, &Docset)> = docsets
        .iter()
        .enumerate()
        .filter(|(_, d)| matcher.as_ref().is_none_or(|m| m.is_match(&d.name)))
        .collect();

    if json {
        let out: Vec<_> = listed
            .iter()
            .map(|(position, d)| {
                serde_json::json!({
                    "position": position,
                    "name": d.name,
                    "identifier": d.identifier,
                    "platform": d.platform,
                    "path": d.relative_path,
                    "enabled": d.enabled,
                })
            })
            .collect();
        println!("{}", serde_json::to_string(&out)?);
    } else if listed.is_empty() {
        println!("No docsets installed.");
    } else {
        for (position, d) in listed {
            let state = if d.enabled { "enabled" } else { "disabled" };
            println!("{position}\t{}\t{state}\t{}", d.name, d.relative_path);
        }
    }
    Ok(())
}

fn ranks_command(
    reranker: &Reranker,
    action: RanksAction,
) -> error::Result<()> {
    match action {
        RanksAction::Show { count, json } => {
            let snapshot = reranker.snapshot();
            let mut entries = snapshot.sorted();
            if let Some(count) = count {
                entries.truncate(count);
            }
            if json {
                let out: serde_json::Map<String, serde_json::Value> = entries
                    .iter()
                    .map(|(id, rank)| (id.to_string(), (*rank).into()))
                    .collect();
                println!("{}", serde_json::to_string(&out)?);
            } else if entries.is_empty() {
                println!("No ranks recorded.");
            } else {
                for (identity, rank) in entries {
                    println!("{rank:>6}  {identity}");
                }
            }
        }
        RanksAction::Seed { file } => {
            let raw = std::fs::read(&file)?;
            let entries: HashMap<String, u64> = serde_json::from_slice(&raw)?;
            let written = reranker.save_defaults(entries)?;
            println!("Seeded {written} rank(s)");
        }
        RanksAction::Reset => {
            reranker.reset()?;
            println!("Rank table reset");
        }
    }
    Ok(())
}

fn cmd_fetch(data_dir: DataDir, args: &cli::FetchArgs) -> error::Result<()> {
    let registry = Arc::new(DocsetRegistry::open(data_dir.clone())?);
    let reranker = Arc::new(Reranker::open(&data_dir.ranks_db())?);
    let config = TransportConfig {
        timeout: std::time::Duration::from_secs(args.timeout),
        workers: args.workers,
        ..TransportConfig::default()
    };
    let transport = ContentTransport::new(registry, reranker, config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    let outcome = runtime.block_on(async {
        transport.request(&args.url, &args.identifier).outcome().await
    });

    if args.info
        && let Some(info) = transport.last_response_info(&args.identifier)
    {
        println!("{}", serde_json::to_string_pretty(&info)?);
    }

    match outcome {
        Outcome::Delivered(response) => {
            if !args.info {
                std::io::stdout().write_all(&response.data)?;
            }
            Ok(())
        }
        Outcome::TimedOut => Err(Error::Config(format!(
            "request timed out after {}s: {}",
            args.timeout, args.url
        ))),
        Outcome::Failed(e) => Err(e),
    }
}

fn cmd_status(
    registry: &DocsetRegistry,
    reranker: &Reranker,
    json: bool,
) -> error::Result<()> {
    let docsets = registry.docsets();
    let enabled = registry.enabled_docsets().len();
    let ranks = reranker.snapshot().len();
    let root = registry.data_dir().root();

    if json {
        let out = serde_json::json!({
            "data_dir": root.display().to_string(),
            "docsets": docsets.len(),
            "enabled": enabled,
            "ranks": ranks,
        });
        println!("{}", serde_json::to_string(&out)?);
    } else {
        println!("Data directory: {}", root.display());
        println!("Docsets: {} ({enabled} enabled)", docsets.len());
        for d in docsets.iter() {
            let entries = registry
                .store_for(d)
                .and_then(|s| s.num_entries())
                .map_or_else(|_| "unavailable".to_string(), |n| n.to_string());
            println!("  {}: {} entries", d.name, entries);
        }
        println!("Ranked results: {ranks}");
    }
    Ok(())
}

fn find_docset(registry: &DocsetRegistry, name: &str) -> error::Result<Docset> {
    registry.docset_named(name).ok_or_else(|| Error::NotFound {
        kind: "docset",
        name: name.to_string(),
    })
}

fn canonical(path: &Path) -> error::Result<std::path::PathBuf> {
    path.canonicalize().map_err(|e| {
        Error::Config(format!("cannot resolve path {}: {e}", path.display()))
    })
}
