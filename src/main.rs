use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use redorecv::common::types::{SpaceId, DEFAULT_PAGE_SIZE};
use redorecv::recovery::{self, FileOpObserver, RecoveryConfig, RecvSys};
use redorecv::redo::checkpoint::{select_checkpoint, Checkpoint, CheckpointField};
use redorecv::redo::files::LogFiles;
use redorecv::redo::format::LOG_BLOCK_SIZE;
use redorecv::storage::buffer::BufferPoolManager;
use redorecv::storage::disk::DiskManager;

/// Pages staged per doublewrite batch
const DOUBLEWRITE_PAGES: usize = 64;

#[derive(Parser)]
#[command(author, version, about = "redorecv - redo log crash recovery for paged tablespaces")]
struct Cli {
    /// Directory holding the tablespace files
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Redo log directory
    #[arg(short, long, default_value = "logs")]
    log_dir: PathBuf,

    /// Base name of the redo log files
    #[arg(long, default_value = "redo")]
    log_base_name: String,

    /// Page size in bytes
    #[arg(short, long, default_value_t = DEFAULT_PAGE_SIZE)]
    page_size: usize,

    /// Buffer pool size (number of pages)
    #[arg(short, long, default_value_t = 1000)]
    buffer_size: usize,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show both checkpoint slots and the one recovery would use
    Checkpoint,

    /// Parse the log from the checkpoint to its end without applying it
    Scan,

    /// Recover the data directory from the redo log
    Recover {
        /// Permit discarding corrupted pages and a corrupted log tail
        #[arg(long, default_value_t = 0)]
        force_recovery: u8,

        /// Threads applying records to pages
        #[arg(long, default_value_t = 4)]
        threads: usize,

        /// Highest LSN known to be flushed to the data files (0 = unknown)
        #[arg(long, default_value_t = 0)]
        flush_lsn: u64,

        /// Cap on page-sized blocks used to buffer log records
        #[arg(long)]
        max_log_blocks: Option<usize>,
    },
}

/// Prints tablespace file operations found in the log
struct PrintFileOps;

impl FileOpObserver for PrintFileOps {
    fn log_file_op(&self, space_id: SpaceId, create: bool, name: &[u8], new_name: Option<&[u8]>) {
        let name = String::from_utf8_lossy(name);
        match new_name {
            Some(new_name) => println!(
                "  rename space {}: {} -> {}",
                space_id,
                name,
                String::from_utf8_lossy(new_name)
            ),
            None if create => println!("  create space {}: {}", space_id, name),
            None => println!("  delete space {}: {}", space_id, name),
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Checkpoint => show_checkpoints(&cli),
        Commands::Scan => scan(&cli),
        Commands::Recover {
            force_recovery,
            threads,
            flush_lsn,
            max_log_blocks,
        } => {
            let config = RecoveryConfig {
                force_recovery: *force_recovery,
                apply_threads: *threads,
                max_log_blocks: *max_log_blocks,
                ..base_config(&cli)
            };
            recover(&cli, config, *flush_lsn)
        }
    }
}

fn base_config(cli: &Cli) -> RecoveryConfig {
    RecoveryConfig {
        log_dir: cli.log_dir.clone(),
        log_file_base_name: cli.log_base_name.clone(),
        page_size: cli.page_size,
        ..RecoveryConfig::default()
    }
}

fn open_storage(cli: &Cli) -> Result<(Arc<DiskManager>, Arc<BufferPoolManager>)> {
    let disk = Arc::new(
        DiskManager::new(&cli.data_dir, cli.page_size)
            .and_then(|dm| dm.with_doublewrite(DOUBLEWRITE_PAGES))
            .with_context(|| format!("opening data directory {}", cli.data_dir.display()))?,
    );
    let pool = Arc::new(BufferPoolManager::new(cli.buffer_size, disk.clone())?);
    Ok((disk, pool))
}

fn show_checkpoints(cli: &Cli) -> Result<()> {
    let files = LogFiles::open(&cli.log_dir, &cli.log_base_name)
        .with_context(|| format!("opening redo log in {}", cli.log_dir.display()))?;
    let header = files.read_header()?;
    println!(
        "Log: {} file(s) of {} bytes, magic {}, version {}",
        files.n_files(),
        files.file_size(),
        hex::encode(header.magic.to_be_bytes()),
        header.version
    );

    let area = files.read_header_area()?;
    for field in CheckpointField::ALL {
        let slot = &area[field.offset()..field.offset() + LOG_BLOCK_SIZE];
        match Checkpoint::decode(field, slot) {
            Some(cp) => println!(
                "{:?}: checkpoint {} at LSN {} (log end {})",
                field, cp.no, cp.lsn, cp.end_lsn
            ),
            None => println!("{:?}: invalid [{}...]", field, hex::encode(&slot[..24])),
        }
    }
    match select_checkpoint(&area) {
        Some(cp) => println!("Recovery starts from {:?} at LSN {}", cp.field, cp.lsn),
        None => println!("No valid checkpoint"),
    }
    Ok(())
}

fn scan(cli: &Cli) -> Result<()> {
    let (disk, pool) = open_storage(cli)?;
    let observer: Arc<dyn FileOpObserver> = Arc::new(PrintFileOps);
    let recv_sys = RecvSys::create(base_config(cli), pool, disk, Some(observer))?;
    let (checkpoint_lsn, end_lsn) = recv_sys.scan_only()?;
    let stats = recv_sys.stats();
    println!("Checkpoint LSN: {}", checkpoint_lsn);
    println!("Log end LSN:    {}", end_lsn);
    println!("Mini-transactions after the checkpoint: {}", stats.n_mtrs);
    if recv_sys.found_corrupt_log() {
        println!("The log is corrupted after LSN {}", end_lsn);
    }
    recv_sys.close();
    Ok(())
}

fn recover(cli: &Cli, config: RecoveryConfig, flush_lsn: u64) -> Result<()> {
    let (disk, pool) = open_storage(cli)?;
    let doublewrite = match disk.doublewrite() {
        Some(area) => area.load().context("reading the doublewrite area")?,
        None => Vec::new(),
    };
    info!("Recovering {} from {}", cli.data_dir.display(), cli.log_dir.display());

    let stats = recovery::recover(
        config,
        pool,
        disk,
        Some(Arc::new(PrintFileOps) as Arc<dyn FileOpObserver>),
        doublewrite,
        flush_lsn,
    )
    .context("crash recovery failed")?;

    println!("Checkpoint LSN:   {}", stats.checkpoint_lsn);
    println!("Log end LSN:      {}", stats.end_lsn);
    println!("Mini-transactions: {}", stats.n_mtrs);
    println!("Records applied:  {}", stats.n_records_applied);
    println!("Pages written:    {}", stats.n_pages_applied);
    println!("Apply batches:    {}", stats.n_batches);
    Ok(())
}
