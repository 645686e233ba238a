use clap::{Args, Parser, Subcommand};
use copykeep_core::storage::models::{ItemStatus, MediaKind, OperationKind, OperationStatus, RuleKind};
use copykeep_core::Throttle;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "copykeep")]
#[command(about = "Catalog, deduplicate and safely copy a media library across drives", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Register, list and remove drives
    #[command(subcommand)]
    Drive(DriveCommand),
    /// Manage the folders scanned on each drive
    #[command(subcommand)]
    Root(RootCommand),
    /// Walk the active roots and update the catalog
    Scan {
        /// Only scan roots on this drive
        #[arg(long)]
        drive: Option<i64>,
        /// low, normal or fast
        #[arg(long, default_value = "normal")]
        throttle: Throttle,
    },
    /// Show the most recent scan runs
    ScanRuns {
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },
    /// Fingerprint pending files, or only the given ids
    Hash {
        #[arg(long = "file")]
        files: Vec<i64>,
    },
    /// Inspect catalogued files
    #[command(subcommand)]
    Files(FilesCommand),
    /// Group, inspect and correct media items
    #[command(subcommand)]
    Items(ItemsCommand),
    /// Recommend which surplus copies could go
    Cleanup {
        #[arg(long, default_value_t = 2)]
        min_copies: i64,
    },
    /// Move files aside into a dated quarantine folder
    Quarantine {
        #[arg(required = true)]
        file_ids: Vec<i64>,
        /// Quarantine under this folder instead of each drive's .quarantine
        #[arg(long)]
        base: Option<PathBuf>,
    },
    /// Put quarantined files back where they were catalogued
    Restore {
        #[arg(required = true)]
        file_ids: Vec<i64>,
    },
    /// Queue a copy of one file
    Copy(TransferArgs),
    /// Queue a move of one file
    Move(TransferArgs),
    /// Queue deletion of one file
    Delete { file_id: i64 },
    /// Queue one copy of every file of an item to the best destination
    BatchCopy {
        item_id: i64,
        #[arg(long)]
        no_verify: bool,
    },
    /// Rank the drives a file could be copied to
    Destinations { file_id: i64 },
    /// Inspect and control queued operations
    #[command(subcommand)]
    Ops(OpsCommand),
    /// Run or inspect the operations queue
    #[command(subcommand)]
    Queue(QueueCommand),
    /// Drive preference and deny rules
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Read or write a stored setting
    #[command(subcommand)]
    Setting(SettingCommand),
    /// Print whether mutations are allowed
    Mode,
    /// Print configuration values
    PrintConfig,
    /// Truncate all database tables
    TruncateDb,
}

#[derive(Debug, Subcommand)]
pub enum DriveCommand {
    Add { mount_path: String },
    List,
    Remove { drive_id: i64 },
}

#[derive(Debug, Subcommand)]
pub enum RootCommand {
    Add {
        drive_id: i64,
        path: String,
        #[arg(long)]
        excluded: bool,
    },
    List {
        #[arg(long)]
        drive: Option<i64>,
    },
    /// Exclude a root from scanning, or include it again with --include
    Exclude {
        root_id: i64,
        #[arg(long)]
        include: bool,
    },
    Remove { root_id: i64 },
}

#[derive(Debug, Subcommand)]
pub enum FilesCommand {
    List {
        #[arg(long)]
        root: Option<i64>,
        #[arg(long)]
        ext: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        missing: bool,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    Show { file_id: i64 },
    Stats,
    /// Delete records flagged missing by the last scan
    Prune {
        #[arg(long)]
        root: Option<i64>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ItemsCommand {
    /// Match unlinked files into items
    Process,
    List {
        #[arg(long)]
        kind: Option<MediaKind>,
        #[arg(long)]
        status: Option<ItemStatus>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        min_copies: Option<i64>,
        #[arg(long)]
        max_copies: Option<i64>,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    Show { item_id: i64 },
    Stats,
    Merge {
        target_id: i64,
        #[arg(required = true)]
        source_ids: Vec<i64>,
    },
    Split { file_id: i64 },
    Update(ItemUpdateArgs),
}

#[derive(Debug, Args)]
pub struct ItemUpdateArgs {
    pub item_id: i64,
    #[arg(long)]
    pub kind: Option<MediaKind>,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub year: Option<i32>,
    #[arg(long)]
    pub season: Option<i32>,
    #[arg(long)]
    pub episode: Option<i32>,
    #[arg(long)]
    pub status: Option<ItemStatus>,
}

#[derive(Debug, Args)]
pub struct TransferArgs {
    pub file_id: i64,
    /// Destination drive; the best ranked drive when omitted
    #[arg(long)]
    pub drive: Option<i64>,
    /// Destination path, absolute or relative to the destination mount
    #[arg(long)]
    pub dest: Option<String>,
    #[arg(long)]
    pub no_verify: bool,
}

#[derive(Debug, Subcommand)]
pub enum OpsCommand {
    List {
        #[arg(long)]
        status: Option<OperationStatus>,
        #[arg(long)]
        kind: Option<OperationKind>,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    Show { op_id: i64 },
    Pause { op_id: i64 },
    Resume { op_id: i64 },
    Cancel { op_id: i64 },
    /// Remove completed, failed and cancelled operations
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    /// Dispatch pending operations until none are left
    Run {
        #[arg(long)]
        concurrency: Option<usize>,
    },
    Status,
}

#[derive(Debug, Subcommand)]
pub enum RulesCommand {
    List,
    /// deny, prefer_movie, prefer_tv or prefer_all
    Add {
        kind: RuleKind,
        drive_id: i64,
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    Remove { rule_id: i64 },
}

#[derive(Debug, Subcommand)]
pub enum SettingCommand {
    Get { key: String },
    Set { key: String, value: String },
}

