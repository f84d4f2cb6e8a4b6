use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

use forum_corpus::archive::{ShardReader, ShardWriter};
use forum_corpus::{DatasetConfig, ForumEngine, SelectorOverrides};

#[derive(Parser)]
#[command(
    name = "forum-corpus",
    version,
    about = "Polite, resumable forum scraper emitting a compressed corpus and manifest"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel {
    Info,
    Debug,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl a forum and scrape every topic into the dataset workspace
    RunScraper {
        /// Base forum URL, with scheme, e.g. https://forum.example.pl
        #[arg(long)]
        dataset_url: String,

        /// Forum software family
        #[arg(long, default_value = "other")]
        forum_engine: String,

        /// Dataset category used in derived names and the manifest
        #[arg(long, default_value = "Forum")]
        dataset_category: String,

        /// Dataset name; derived as <category>_<host>_corpus when omitted
        #[arg(long, default_value = "")]
        dataset_name: String,

        /// Dataset description for the manifest; derived when omitted
        #[arg(long)]
        dataset_description: Option<String>,

        /// Dataset license for the manifest; derived when omitted
        #[arg(long)]
        dataset_license: Option<String>,

        /// Number of parallel scraping workers
        #[arg(long, default_value = "2")]
        processes: usize,

        /// Seconds to sleep between requests (per worker)
        #[arg(long, default_value = "0.5")]
        time_sleep: f64,

        /// Checkpoint interval: flush state every N processed topics
        #[arg(long, default_value = "100")]
        save_state: usize,

        /// Minimum character count for a document to be kept
        #[arg(long, default_value = "20")]
        min_len_txt: usize,

        /// Sitemap URL(s) overriding robots.txt hints
        #[arg(long, num_args = 0..)]
        sitemaps: Vec<String>,

        /// Log verbosity
        #[arg(long, value_enum, ignore_case = true, default_value = "info")]
        log_level: LogLevel,

        /// Crawl even when robots.txt denies or cannot be read
        #[arg(long)]
        force_crawl: bool,

        /// Decode pages with this encoding instead of the advertised one
        #[arg(long, default_value = "")]
        web_encoding: String,

        /// Extra thread selectors, `tag >> attr :: value` form
        #[arg(long, num_args = 0..)]
        threads_class: Vec<String>,

        /// Substrings a thread URL must contain
        #[arg(long, num_args = 0..)]
        threads_whitelist: Vec<String>,

        /// Substrings that reject a thread URL
        #[arg(long, num_args = 0..)]
        threads_blacklist: Vec<String>,

        /// Extra topic selectors
        #[arg(long, num_args = 0..)]
        topics_class: Vec<String>,

        /// Substrings a topic URL must contain
        #[arg(long, num_args = 0..)]
        topics_whitelist: Vec<String>,

        /// Substrings that reject a topic URL
        #[arg(long, num_args = 0..)]
        topics_blacklist: Vec<String>,

        /// Extra pagination selectors
        #[arg(long, num_args = 0..)]
        pagination: Vec<String>,

        /// Extra topic title selectors
        #[arg(long, num_args = 0..)]
        topic_title_class: Vec<String>,

        /// Extra post body selectors
        #[arg(long, num_args = 0..)]
        content_class: Vec<String>,
    },

    /// Print the first records of a merged corpus
    PreviewData {
        /// Path to a *.jsonl.zst corpus
        #[arg(long)]
        file: PathBuf,

        /// How many records to show
        #[arg(long, default_value = "5")]
        count: usize,

        /// Characters of text to show per record
        #[arg(long, default_value = "300")]
        width: usize,
    },

    /// Emit the records of a corpus whose URLs are absent from a reference corpus
    TurnToDelta {
        /// Path to the newer *.jsonl.zst corpus
        #[arg(long)]
        file: PathBuf,

        /// Path to the reference corpus to subtract
        #[arg(long)]
        against: PathBuf,

        /// Where to write the delta corpus
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::RunScraper {
            dataset_url,
            forum_engine,
            dataset_category,
            dataset_name,
            dataset_description,
            dataset_license,
            processes,
            time_sleep,
            save_state,
            min_len_txt,
            sitemaps,
            log_level,
            force_crawl,
            web_encoding,
            threads_class,
            threads_whitelist,
            threads_blacklist,
            topics_class,
            topics_whitelist,
            topics_blacklist,
            pagination,
            topic_title_class,
            content_class,
        } => {
            let engine: ForumEngine = forum_engine.parse()?;
            let mut builder = DatasetConfig::builder(dataset_url)
                .engine(engine)
                .category(dataset_category)
                .name(dataset_name);
            if let Some(description) = dataset_description {
                builder = builder.description(description);
            }
            if let Some(license) = dataset_license {
                builder = builder.license(license);
            }
            let config = builder
                .workers(processes)
                .delay_secs(time_sleep)
                .checkpoint_interval(save_state)
                .min_text_len(min_len_txt)
                .sitemaps(sitemaps)
                .force_crawl(force_crawl)
                .forced_encoding(web_encoding)
                .overrides(SelectorOverrides {
                    threads_class,
                    threads_whitelist,
                    threads_blacklist,
                    topics_class,
                    topics_whitelist,
                    topics_blacklist,
                    pagination,
                    topic_title_class,
                    content_class,
                })
                .build()?;

            let _guard = init_logging(&config, log_level)?;

            let runtime = tokio::runtime::Runtime::new()?;
            let summary = runtime.block_on(forum_corpus::run(config))?;

            println!("Dataset: {}", summary.dataset);
            println!(
                "Topics: {} | added this run: {} | skipped this run: {}",
                summary.topics, summary.added_this_run, summary.skipped_this_run
            );
            match (&summary.archive_path, &summary.manifest_path) {
                (Some(archive), Some(manifest)) => {
                    println!(
                        "Corpus: {} ({} documents, {} characters)",
                        archive.display(),
                        summary.documents,
                        summary.characters
                    );
                    println!("Manifest: {}", manifest.display());
                }
                _ => println!("No documents produced; corpus not written."),
            }
            Ok(())
        }

        Commands::PreviewData { file, count, width } => {
            init_plain_logging();
            preview_data(&file, count, width)
        }

        Commands::TurnToDelta {
            file,
            against,
            output,
        } => {
            init_plain_logging();
            turn_to_delta(&file, &against, &output)
        }
    }
}

/// Log to stderr and to `logs_<timestamp>.log` inside the dataset
/// directory. The guard must stay alive for the run.
fn init_logging(
    config: &DatasetConfig,
    level: LogLevel,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let dir = config.dataset_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating workspace {}", dir.display()))?;

    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let file_appender = tracing_appender::rolling::never(&dir, format!("logs_{stamp}.log"));
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let directive = match level {
        LogLevel::Info => "forum_corpus=info",
        LogLevel::Debug => "forum_corpus=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file_writer.and(std::io::stderr))
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn init_plain_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("forum_corpus=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn preview_data(file: &PathBuf, count: usize, width: usize) -> Result<()> {
    let reader = ShardReader::open(file).with_context(|| format!("opening {}", file.display()))?;
    let mut shown = 0usize;
    for document in reader {
        if shown >= count {
            break;
        }
        let document = document?;
        shown += 1;
        println!("--- record {shown} ---");
        println!("url:        {}", document.meta.url);
        println!("title:      {}", document.meta.topic_title);
        println!("characters: {}", document.meta.characters);
        let preview: String = document.text.chars().take(width).collect();
        println!("{preview}");
        if document.text.chars().count() > width {
            println!("[...]");
        }
        println!();
    }
    if shown == 0 {
        println!("Corpus is empty.");
    }
    Ok(())
}

fn turn_to_delta(file: &PathBuf, against: &PathBuf, output: &PathBuf) -> Result<()> {
    let mut known = HashSet::new();
    for document in
        ShardReader::open(against).with_context(|| format!("opening {}", against.display()))?
    {
        known.insert(document?.meta.url);
    }

    let mut writer = ShardWriter::create(output)?;
    let mut kept = 0u64;
    let mut dropped = 0u64;
    for document in
        ShardReader::open(file).with_context(|| format!("opening {}", file.display()))?
    {
        let document = document?;
        if known.contains(&document.meta.url) {
            dropped += 1;
            continue;
        }
        writer.write(&document)?;
        kept += 1;
    }
    let (path, _) = writer.finish()?;

    println!(
        "Delta corpus: {} ({kept} new record(s), {dropped} already present)",
        path.display()
    );
    Ok(())
}
