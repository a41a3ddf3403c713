use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::{Path, PathBuf};

use epub_catalog_core::batch::{
    import, resync, ImportOutcome, ImportReport, ReplaceStrategy, ResyncOutcome, ResyncReport,
};
use epub_catalog_core::catalog::{Book, BookOrder, Catalog, ListOptions};
use epub_catalog_core::config::{config_path, load_config, read_options_from_config, AppConfig};
use epub_catalog_core::ingest::{parse_epub, resolve_language};
use epub_catalog_core::language::LanguageTag;
use epub_catalog_core::library::Library;
use epub_catalog_core::normalize::{authors_from_creators, normalize_publishers, normalize_tags};
use epub_catalog_core::package::PackageMetadata;
use epub_catalog_core::progress::{ProgressEvent, ProgressHandler};
use epub_catalog_core::storage::StorageStrategy;

type CliResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "epub-catalog")]
#[command(about = "Import EPUB files into a catalog and keep it in sync")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Import EPUB files from the local file system into the catalog
    Import {
        /// A .epub file or a directory (traversed recursively)
        #[arg(required = true)]
        item: Vec<PathBuf>,

        /// Use symbolic links instead of copying the files
        #[arg(short, long)]
        link: bool,

        /// Also consider files already recorded as an import source
        #[arg(long)]
        include_imported: bool,
    },

    /// Point existing books at moved files, matched by content
    Resync {
        /// A .epub file or a directory (traversed recursively)
        #[arg(required = true)]
        item: Vec<PathBuf>,

        /// original (keep what the book uses), always-link or always-copy
        #[arg(short, long, default_value = "original")]
        replace_strategy: ReplaceStrategy,
    },

    /// Show what an import would read from an EPUB
    Inspect {
        /// Input file
        #[arg(required = true)]
        input: PathBuf,
    },

    /// List cataloged books, every status included
    List {
        /// Match titles and author names
        #[arg(long)]
        query: Option<String>,

        /// Only books with this tag
        #[arg(long)]
        tag: Option<String>,

        /// Page number, starting at 1
        #[arg(long, default_value = "1")]
        page: usize,

        /// latest, title, author or popular
        #[arg(long, default_value = "latest")]
        sort: BookOrder,
    },

    /// Remove a book and its stored files
    Remove {
        /// Book id
        id: i64,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Initialize default config file
    Init,
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Key (dot-separated path)
        key: String,
        /// Value
        value: String,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Import {
            item,
            link,
            include_imported,
        } => run_import(item, *link, *include_imported, cli.json),
        Commands::Resync {
            item,
            replace_strategy,
        } => run_resync(item, *replace_strategy, cli.json),
        Commands::Inspect { input } => run_inspect(input, cli.json),
        Commands::List {
            query,
            tag,
            page,
            sort,
        } => run_list(query.clone(), tag.clone(), *page, *sort, cli.json),
        Commands::Remove { id } => run_remove(*id, cli.json),
        Commands::Config { action } => run_config(action, cli.json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Drives an `indicatif` bar from batch progress events.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(json: bool) -> Self {
        let bar = if json {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        if let Ok(style) =
            ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("##-"));
        }
        Self { bar }
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl ProgressHandler for BarProgress {
    fn on_progress(&self, event: ProgressEvent) {
        self.bar.set_length(event.total);
        self.bar.set_position(event.current);
        let name = event
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match event.message {
            Some(msg) => self.bar.set_message(format!("{} {}: {}", event.operation, name, msg)),
            None => self.bar.set_message(format!("{} {}", event.operation, name)),
        }
    }
}

fn run_import(items: &[PathBuf], link: bool, include_imported: bool, json: bool) -> CliResult {
    let mut cfg = load_config();
    if include_imported {
        cfg.import.skip_imported = false;
    }
    let strategy = if link || cfg.import.use_symlinks {
        StorageStrategy::Link
    } else {
        StorageStrategy::Copy
    };
    let mut library = Library::open(&cfg)?;

    let progress = BarProgress::new(json);
    let report = import(&mut library, items, strategy, Some(&progress));
    progress.finish();
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_import(&report);
    }
    Ok(())
}

fn print_import(report: &ImportReport) {
    let total = report.entries.len();
    let width = total.to_string().len();
    println!("Importing {} items ...", total);
    for (i, entry) in report.entries.iter().enumerate() {
        println!("[{:>width$}/{}] {}", i + 1, total, entry.path.display());
        match &entry.outcome {
            ImportOutcome::Imported { id, title } => println!("File imported as book #{} ({})", id, title),
            ImportOutcome::Duplicate { existing } => match existing {
                Some(id) => println!("File NOT imported: already on the database as book #{}", id),
                None => println!("File NOT imported: already on the database"),
            },
            ImportOutcome::Failed { error } => println!("File NOT imported: {}", error),
        }
    }
    println!();
    println!("{}", report.summary());
}

fn run_resync(items: &[PathBuf], strategy: ReplaceStrategy, json: bool) -> CliResult {
    let cfg = load_config();
    let mut library = Library::open(&cfg)?;

    let progress = BarProgress::new(json);
    let report = resync(&mut library, items, strategy, Some(&progress));
    progress.finish();
    let report = report?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_resync(&report);
    }
    Ok(())
}

fn print_resync(report: &ResyncReport) {
    let total = report.entries.len();
    let width = total.to_string().len();
    println!("Resyncing {} items ...", total);
    for (i, entry) in report.entries.iter().enumerate() {
        println!("[{:>width$}/{}] {}", i + 1, total, entry.path.display());
        match &entry.outcome {
            ResyncOutcome::Matched {
                id,
                original_path,
                linked,
            } => {
                let kind = if *linked { "link" } else { "copy" };
                println!("Book #{} modified ({}, {}).", id, original_path, kind);
            }
            ResyncOutcome::AlreadyMatched { id } => {
                println!("Book #{} NOT modified: already matched in this run.", id)
            }
            ResyncOutcome::Unmatched => println!("No match found."),
            ResyncOutcome::Failed { error } => println!("NOT modified: {}", error),
        }
    }
    println!();
    println!("{}", report.summary());
}

/// What `inspect` reports: the package as read and the values an import would store.
#[derive(Serialize)]
struct Inspection {
    opf_path: String,
    ncx_path: Option<String>,
    mimetype: String,
    metadata: PackageMetadata,
    title: Option<String>,
    authors: Vec<String>,
    publishers: Vec<String>,
    tags: Vec<String>,
    language: Option<LanguageTag>,
    cover: Option<String>,
}

fn run_inspect(input: &Path, json: bool) -> CliResult {
    let cfg = load_config();
    let parsed = parse_epub(input, &read_options_from_config(&cfg))?;
    let meta = &parsed.metadata;
    let inspection = Inspection {
        opf_path: parsed.opf_path.clone(),
        ncx_path: parsed.ncx_path.clone(),
        mimetype: parsed.mimetype.clone(),
        title: meta.title.clone(),
        authors: authors_from_creators(&meta.creators),
        publishers: normalize_publishers(&meta.publishers),
        tags: normalize_tags(&meta.subjects, cfg.import.max_subject_length),
        language: resolve_language(meta.language.as_deref()),
        cover: parsed
            .cover
            .as_ref()
            .map(|c| format!("{} ({})", meta.cover_href.as_deref().unwrap_or("?"), c.extension())),
        metadata: meta.clone(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&inspection)?);
        return Ok(());
    }
    println!("Package: {}", inspection.opf_path);
    if let Some(ncx) = &inspection.ncx_path {
        println!("NCX: {}", ncx);
    }
    println!("Title: {}", inspection.title.as_deref().unwrap_or("(none)"));
    if !inspection.authors.is_empty() {
        println!("Authors: {}", inspection.authors.join("; "));
    }
    if !inspection.publishers.is_empty() {
        println!("Publishers: {}", inspection.publishers.join("; "));
    }
    if let Some(lang) = &inspection.language {
        println!("Language: {} [{}]", lang.long_name, lang.code);
    }
    if let Some(id) = &meta.identifier {
        println!("Identifier: {}", id.value);
    }
    if let Some(date) = &meta.date {
        println!("Date: {}", date);
    }
    if !inspection.tags.is_empty() {
        println!("Tags: {}", inspection.tags.join(", "));
    }
    println!("Cover: {}", inspection.cover.as_deref().unwrap_or("(none)"));
    Ok(())
}

fn run_list(
    query: Option<String>,
    tag: Option<String>,
    page: usize,
    order: BookOrder,
    json: bool,
) -> CliResult {
    let cfg = load_config();
    let library = Library::open(&cfg)?;
    let per_page = cfg.catalog.books_per_page.max(1);
    let opts = ListOptions {
        offset: page.saturating_sub(1).saturating_mul(per_page),
        limit: per_page,
        query,
        tag,
        order,
        ..ListOptions::default()
    };
    let result = library.catalog().list(&opts)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    for book in &result.entries {
        println!("{}", describe_book(book));
    }
    let pages = result.total.div_ceil(per_page).max(1);
    println!("Page {} of {} ({} books)", page.max(1), pages, result.total);
    Ok(())
}

fn describe_book(book: &Book) -> String {
    let authors: Vec<&str> = book.authors.iter().map(|a| a.name.as_str()).collect();
    if authors.is_empty() {
        format!("#{} {}", book.id, book.title)
    } else {
        format!("#{} {} by {}", book.id, book.title, authors.join(", "))
    }
}

fn run_remove(id: i64, json: bool) -> CliResult {
    let cfg = load_config();
    let mut library = Library::open(&cfg)?;
    let removed = library
        .remove(id)?
        .ok_or_else(|| format!("Book #{} not found", id))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&removed)?);
    } else {
        println!("Removed {}", describe_book(&removed));
    }
    Ok(())
}

fn run_config(action: &ConfigAction, json: bool) -> CliResult {
    match action {
        ConfigAction::Init => {
            let path = config_path().ok_or("Could not determine config directory")?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let default_cfg = AppConfig::default();
            let toml = toml::to_string_pretty(&default_cfg)?;
            std::fs::write(&path, toml)?;
            println!("Wrote default config to {}", path.display());
        }
        ConfigAction::Show => {
            let cfg = load_config();
            if json {
                println!("{}", serde_json::to_string_pretty(&cfg)?);
            } else {
                println!("{}", toml::to_string_pretty(&cfg)?);
            }
        }
        ConfigAction::Set { key, value } => {
            let path = config_path().ok_or("Could not determine config directory")?;
            let mut cfg: AppConfig = if path.exists() {
                let s = std::fs::read_to_string(&path)?;
                toml::from_str(&s).unwrap_or_default()
            } else {
                AppConfig::default()
            };

            set_config_key(&mut cfg, key, value)?;

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml = toml::to_string_pretty(&cfg)?;
            std::fs::write(&path, toml)?;
            if !json {
                println!("Updated {}", key);
            }
        }
    }
    Ok(())
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", key, value))
}

fn set_config_key(cfg: &mut AppConfig, key: &str, value: &str) -> CliResult {
    let parts: Vec<&str> = key.splitn(2, '.').collect();
    match parts.as_slice() {
        ["library", sub] => match *sub {
            "media_root" => cfg.library.media_root = PathBuf::from(value),
            "database" => cfg.library.database = Some(PathBuf::from(value)),
            "scratch_dir" => cfg.library.scratch_dir = Some(PathBuf::from(value)),
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        ["import", sub] => match *sub {
            "default_status" => cfg.import.default_status = value.to_string(),
            "use_symlinks" => cfg.import.use_symlinks = parse_value(key, value)?,
            "skip_imported" => cfg.import.skip_imported = parse_value(key, value)?,
            "max_subject_length" => cfg.import.max_subject_length = parse_value(key, value)?,
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        ["catalog", sub] => match *sub {
            "books_per_page" => cfg.catalog.books_per_page = parse_value(key, value)?,
            "allow_public_browse" => cfg.catalog.allow_public_browse = parse_value(key, value)?,
            "allow_public_upload" => cfg.catalog.allow_public_upload = parse_value(key, value)?,
            "allow_public_edit" => cfg.catalog.allow_public_edit = parse_value(key, value)?,
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        ["security", sub] => match *sub {
            "max_file_count" => cfg.security.max_file_count = Some(parse_value(key, value)?),
            "max_resource_size_mb" => {
                cfg.security.max_resource_size_mb = Some(parse_value(key, value)?)
            }
            "max_compression_ratio" => {
                cfg.security.max_compression_ratio = Some(parse_value(key, value)?)
            }
            _ => return Err(format!("Unknown key: {}", key).into()),
        },
        _ => return Err(format!("Unknown key: {}", key).into()),
    }
    Ok(())
}
