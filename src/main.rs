use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracksync::catalog::http::HttpCatalog;
use tracksync::config::{AppConfig, DataPaths};
use tracksync::jobs::progress::JobState;
use tracksync::jobs::{CancelToken, JobClass, JobContext, JobQueueEntry, Orchestrator};
use tracksync::library::{self, JsonExportSource};
use tracksync::matcher::index::ReconciliationIndex;
use tracksync::matcher::match_track;
use tracksync::models::TaggedTrack;
use tracksync::scanner::cache;
use tracksync::scanner::metadata::LoftyTags;
use tracksync::store::StatusStore;
use tracksync::store::mutation_log::MutationLog;
use tracksync::store::skiplist::SkipList;

#[derive(Parser)]
#[command(name = "tracksync", version, about = "Reconcile tagged tracks with a local music collection")]
struct Cli {
    /// Directory holding the JSON documents
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a fingerprint-history JSON export into the library
    Import {
        /// JSON array of {artist, title, tagged_at?}
        file: PathBuf,
    },

    /// Scan music folders and refresh the scan cache
    Scan {
        /// Folders to scan (defaults to config file music_dirs)
        paths: Vec<PathBuf>,

        /// Rescan even if the cache is still valid
        #[arg(long)]
        force: bool,
    },

    /// Compare the library against the local collection
    Compare {
        /// Ignore the scan cache
        #[arg(long)]
        rescan: bool,
    },

    /// Show how one track matches the local collection
    Match { artist: String, title: String },

    /// Search the catalog for one track, or every missing track with --all
    Search {
        #[arg(long, conflicts_with_all = ["artist", "title"])]
        all: bool,
        #[arg(required_unless_present = "all")]
        artist: Option<String>,
        #[arg(required_unless_present = "all")]
        title: Option<String>,
    },

    /// Favorite a track in the catalog
    Star { artist: String, title: String },

    /// Remove a track from catalog favorites
    Unstar { artist: String, title: String },

    /// Favorite every found, not yet starred track
    StarAll,

    /// Download a track into the download folder
    Download {
        artist: String,
        title: String,

        /// Catalog track url (defaults to the one found by search)
        #[arg(long)]
        url: Option<String>,
    },

    /// Never offer a track for download again
    Skip { artist: String, title: String },

    /// Undo skip
    Unskip { artist: String, title: String },

    /// Show compare status
    Status {
        /// List tracks still to download
        #[arg(long)]
        list: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let mut config = AppConfig::load();
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir;
    }

    let data_dir = config.resolve_data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;
    log::info!("Data dir: {}", data_dir.display());
    let paths = DataPaths::new(&data_dir);

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.resolve_workers())
        .build_global()
        .context("Failed to build thread pool")?;

    match cli.command {
        Commands::Import { file } => {
            let result = library::import(&paths.library, &mut JsonExportSource::new(&file))
                .context("Import failed")?;
            println!(
                "Import complete: {} added, {} updated, {} unchanged",
                result.added, result.updated, result.unchanged
            );
        }

        Commands::Scan { paths: scan_paths, force } => {
            // Resolve scan paths: CLI args > config music_dirs
            let folders = if !scan_paths.is_empty() {
                scan_paths
            } else if !config.music_dirs.is_empty() {
                config.music_dirs.clone()
            } else {
                anyhow::bail!(
                    "No folders to scan. Pass paths as arguments or set music_dirs in config."
                );
            };

            let pb = ProgressBar::new(0);
            pb.set_style(
                ProgressStyle::with_template(
                    "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}) ({eta}) {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
            );
            pb.set_message("Scanning...");

            let scan = cache::load_or_scan(
                &paths.scan_cache,
                &folders,
                &LoftyTags,
                &CancelToken::new(),
                force,
                |done, total, _| {
                    pb.set_length(total);
                    pb.set_position(done);
                },
            )
            .context("Scan failed")?;
            pb.finish_and_clear();

            println!("{:<50} {:>7} {:>9} {:>6} {:>9}", "Folder", "Files", "Filename", "Tags", "Unparsed");
            println!("{}", "-".repeat(85));
            for stat in &scan.folder_stats {
                println!(
                    "{:<50} {:>7} {:>9} {:>6} {:>9}",
                    truncate(&stat.folder.display().to_string(), 50),
                    stat.files,
                    stat.from_filename,
                    stat.from_tags,
                    stat.unparsed
                );
            }
            println!();
            println!("Scan complete: {} tracks identified", scan.tracks.len());
        }

        Commands::Match { artist, title } => {
            let scan = cache::load(&paths.scan_cache)
                .context("No scan cache. Run `tracksync scan` first.")?;
            let index = ReconciliationIndex::build(scan.tracks);
            let result = match_track(&TaggedTrack::new(&artist, &title), &index);
            match (&result.local, result.stage) {
                (Some(local), Some(stage)) => {
                    println!("Match ({:?}, score {:.2}):", stage, result.score);
                    println!("  {} - {}", local.artist, local.title);
                    println!("  {}", local.file_path.display());
                }
                _ => println!("No local match for \"{} - {}\".", artist, title),
            }
        }

        Commands::Skip { artist, title } => {
            let key = tracksync::canonical::status_key(&artist, &title);
            let mut skip = SkipList::load(&paths.skip_list);
            skip.add(&key);
            skip.save(&paths.skip_list).context("Failed to save skip list")?;
            let store = StatusStore::open(&paths.status, config.store.max_outcomes);
            store.skip_track(&key).context("Failed to update status")?;
            println!("Skipped {}", key);
        }

        Commands::Unskip { artist, title } => {
            let key = tracksync::canonical::status_key(&artist, &title);
            let mut skip = SkipList::load(&paths.skip_list);
            if !skip.remove(&key) {
                println!("{} was not skipped.", key);
                return Ok(());
            }
            skip.save(&paths.skip_list).context("Failed to save skip list")?;
            let store = StatusStore::open(&paths.status, config.store.max_outcomes);
            store.unskip_track(&key).context("Failed to update status")?;
            println!("Unskipped {}", key);
        }

        Commands::Status { list } => {
            let store = StatusStore::open(&paths.status, config.store.max_outcomes);
            let mut status = store.snapshot();
            SkipList::load(&paths.skip_list).apply(&mut status);
            let summary = status.summary();

            println!("Compare Status");
            println!("==============");
            match summary.updated_at {
                Some(t) => println!("Updated:          {}", t.format("%Y-%m-%d %H:%M")),
                None => println!("Updated:          never"),
            }
            println!("Have locally:     {}", summary.have_locally);
            println!("To download:      {}", summary.to_download);
            println!("  found:          {}", summary.found);
            println!("  not found:      {}", summary.not_found);
            println!("  starred:        {}", summary.starred);
            println!("Skipped:          {}", summary.skipped);
            println!("Search outcomes:  {}", summary.outcomes);

            if list && !status.to_download.is_empty() {
                println!();
                for track in &status.to_download {
                    let state = match (status.url_for(&track.key), status.is_not_found(&track.key)) {
                        (Some(_), _) if status.is_starred(&track.key) => "starred",
                        (Some(_), _) => "found",
                        (None, true) => "not found",
                        (None, false) => "-",
                    };
                    println!("  {:<10} {}", state, track.key);
                }
            }
        }

        job => {
            let orchestrator = build_orchestrator(&config, &paths);
            let class = submit(&orchestrator, job)?;
            watch(&orchestrator, class);
        }
    }

    Ok(())
}

fn build_orchestrator(config: &AppConfig, paths: &DataPaths) -> Orchestrator {
    let catalog = HttpCatalog::new(
        &config.catalog.base_url,
        config.catalog.token.clone(),
        Duration::from_secs(config.catalog.timeout_secs),
    );
    Orchestrator::new(JobContext {
        store: Arc::new(StatusStore::open(&paths.status, config.store.max_outcomes)),
        catalog: Arc::new(catalog),
        mutations: Arc::new(MutationLog::new(&paths.mutation_log)),
        tags: Arc::new(LoftyTags),
        paths: paths.clone(),
        music_dirs: config.music_dirs.clone(),
        download_dir: config.resolve_download_dir(),
    })
}

/// Hand a job-backed command to the orchestrator.
fn submit(orchestrator: &Orchestrator, command: Commands) -> Result<JobClass> {
    let (class, entry) = match command {
        Commands::Compare { rescan } => {
            orchestrator.start_compare(rescan)?;
            return Ok(JobClass::Compare);
        }
        Commands::StarAll => {
            orchestrator.start_star_batch()?;
            return Ok(JobClass::StarBatch);
        }
        Commands::Search { all: true, .. } => {
            orchestrator.start_global_search()?;
            return Ok(JobClass::GlobalSearch);
        }
        Commands::Search { artist, title, .. } => (
            JobClass::SingleSearch,
            JobQueueEntry::new(&artist.unwrap_or_default(), &title.unwrap_or_default()),
        ),
        Commands::Star { artist, title } => (JobClass::SingleStar, JobQueueEntry::new(&artist, &title)),
        Commands::Unstar { artist, title } => (JobClass::SingleUnstar, JobQueueEntry::new(&artist, &title)),
        Commands::Download { artist, title, url } => {
            let entry = JobQueueEntry::new(&artist, &title);
            let entry = match url {
                Some(url) => entry.with_url(url),
                None => entry,
            };
            (JobClass::Download, entry)
        }
        _ => anyhow::bail!("Not a job command"),
    };
    orchestrator.enqueue(class, entry)?;
    Ok(class)
}

/// Render the job's progress until the orchestrator is idle.
fn watch(orchestrator: &Orchestrator, class: JobClass) {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );

    loop {
        let p = orchestrator.progress(class);
        pb.set_length(p.total);
        pb.set_position(p.done);
        if let Some(msg) = p.current.or(p.message) {
            pb.set_message(truncate(&msg, 60));
        }
        if orchestrator.wait_idle(Duration::from_millis(100)) {
            break;
        }
    }
    pb.finish_and_clear();

    let p = orchestrator.progress(class);
    let label = match p.state {
        JobState::Completed => "Done",
        JobState::Cancelled => "Cancelled",
        JobState::Failed => "Failed",
        JobState::Idle | JobState::Running => "Stopped",
    };
    println!("{}: {}", label, p.message.unwrap_or_default());
    if p.failed > 0 {
        println!("{} item(s) failed:", p.failed);
        for failure in &p.failures {
            println!("  {:<50} {}", truncate(&failure.key, 50), failure.reason);
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    } else {
        s.to_string()
    }
}
