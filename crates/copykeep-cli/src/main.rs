mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::process;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use colored::*;
use commands::*;
use copykeep_core::storage::files::FileQuery;
use copykeep_core::storage::items::{ItemQuery, ItemUpdate};
use copykeep_core::storage::operations::OperationQuery;
use copykeep_core::{CopyRequest, HashState, ScanState, Service};
use dotenv::dotenv;
use serde::Serialize;
use tracing::{error, info};

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match copykeep_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    let Some(command) = args.command else {
        let _ = Cli::command().print_long_help();
        return;
    };

    if let Commands::PrintConfig = command {
        println!("Configuration: {:#?}", config);
        return;
    }

    let service = match Service::open(config) {
        Ok(service) => service,
        Err(err) => {
            error!("Error opening catalog: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = run(&service, command) {
        error!("Error: {:#}", err);
        process::exit(1);
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(service: &Service, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Drive(cmd) => match cmd {
            DriveCommand::Add { mount_path } => print_json(&service.register_drive(&mount_path)?),
            DriveCommand::List => print_json(&service.list_drives()?),
            DriveCommand::Remove { drive_id } => {
                service.delete_drive(drive_id)?;
                println!("Drive {} removed", drive_id);
                Ok(())
            }
        },
        Commands::Root(cmd) => match cmd {
            RootCommand::Add {
                drive_id,
                path,
                excluded,
            } => print_json(&service.create_root(drive_id, &path, excluded)?),
            RootCommand::List { drive } => print_json(&service.list_roots(drive)?),
            RootCommand::Exclude { root_id, include } => {
                print_json(&service.set_root_excluded(root_id, !include)?)
            }
            RootCommand::Remove { root_id } => {
                service.delete_root(root_id)?;
                println!("Root {} removed", root_id);
                Ok(())
            }
        },
        Commands::Scan { drive, throttle } => run_scan(service, drive, throttle),
        Commands::ScanRuns { limit } => print_json(&service.scan_runs(limit)?),
        Commands::Hash { files } => run_hash(service, files),
        Commands::Files(cmd) => match cmd {
            FilesCommand::List {
                root,
                ext,
                search,
                missing,
                offset,
                limit,
            } => print_json(&service.list_files(&FileQuery {
                root_id: root,
                ext,
                path_contains: search,
                missing: missing.then_some(true),
                offset,
                limit,
                ..FileQuery::default()
            })?),
            FilesCommand::Show { file_id } => print_json(&service.get_file(file_id)?),
            FilesCommand::Stats => print_json(&service.file_stats()?),
            FilesCommand::Prune { root } => {
                let pruned = service.prune_missing(root)?;
                info!("{} missing records pruned", format!("{}", pruned).yellow());
                Ok(())
            }
        },
        Commands::Items(cmd) => run_items(service, cmd),
        Commands::Cleanup { min_copies } => {
            let report = service.cleanup_recommendations(min_copies)?;
            print_json(&report)?;
            info!(
                "{} items, {} files could go, {} bytes reclaimable",
                format!("{}", report.total_items).cyan(),
                format!("{}", report.total_files_to_delete).red(),
                format!("{}", report.total_reclaimable_bytes).red(),
            );
            Ok(())
        }
        Commands::Quarantine { file_ids, base } => {
            print_json(&service.quarantine_files(&file_ids, base.as_deref())?)
        }
        Commands::Restore { file_ids } => print_json(&service.restore_files(&file_ids)?),
        Commands::Copy(args) => print_json(&service.enqueue_copy(&transfer_request(args))?),
        Commands::Move(args) => print_json(&service.enqueue_move(&transfer_request(args))?),
        Commands::Delete { file_id } => print_json(&service.enqueue_delete(file_id)?),
        Commands::BatchCopy { item_id, no_verify } => {
            print_json(&service.enqueue_batch_copy(item_id, !no_verify)?)
        }
        Commands::Destinations { file_id } => print_json(&service.destinations(file_id)?),
        Commands::Ops(cmd) => run_ops(service, cmd),
        Commands::Queue(cmd) => match cmd {
            QueueCommand::Run { concurrency } => run_queue(service, concurrency),
            QueueCommand::Status => print_json(&service.queue_status()?),
        },
        Commands::Rules(cmd) => match cmd {
            RulesCommand::List => print_json(&service.list_rules()?),
            RulesCommand::Add {
                kind,
                drive_id,
                priority,
            } => print_json(&service.add_rule(kind, drive_id, priority)?),
            RulesCommand::Remove { rule_id } => {
                service.delete_rule(rule_id)?;
                println!("Rule {} removed", rule_id);
                Ok(())
            }
        },
        Commands::Setting(cmd) => match cmd {
            SettingCommand::Get { key } => {
                match service.get_setting(&key)? {
                    Some(value) => println!("{}", value),
                    None => println!("{} is not set", key),
                }
                Ok(())
            }
            SettingCommand::Set { key, value } => {
                service.set_setting(&key, &value)?;
                Ok(())
            }
        },
        Commands::Mode => {
            println!("{}", service.mode());
            Ok(())
        }
        Commands::PrintConfig => {
            println!("Configuration: {:#?}", service.config());
            Ok(())
        }
        Commands::TruncateDb => {
            let confirmed = prompt_confirm(
                "Are you SURE you want to COMPLETELY DELETE the catalog?",
                Some(false),
            )
            .context("reading confirmation")?;
            if confirmed {
                service.truncate_catalog()?;
                println!("All tables truncated");
            }
            Ok(())
        }
    }
}

fn run_scan(
    service: &Service,
    drive: Option<i64>,
    throttle: copykeep_core::Throttle,
) -> anyhow::Result<()> {
    service.start_scan(drive, throttle)?;
    let status = progress::watch_scan(service);

    let state = match status.state {
        ScanState::Completed => "completed".green(),
        other => format!("{:?}", other).to_lowercase().red(),
    };
    info!(
        "Scan {}: {} files, {} new, {} updated, {} missing, {} errors",
        state,
        status.files_scanned,
        format!("{}", status.files_new).green(),
        format!("{}", status.files_updated).cyan(),
        format!("{}", status.files_missing).yellow(),
        format!("{}", status.errors).red(),
    );
    if let Some(err) = status.error {
        anyhow::bail!("scan stopped: {}", err);
    }
    Ok(())
}

fn run_hash(service: &Service, files: Vec<i64>) -> anyhow::Result<()> {
    let ids = if files.is_empty() { None } else { Some(files) };
    service.compute_hashes(ids)?;
    let status = progress::watch_hashing(service);

    let state = match status.state {
        HashState::Complete => "complete".green(),
        other => format!("{:?}", other).to_lowercase().yellow(),
    };
    info!(
        "Hashing {}: {} of {} files, {} failed",
        state,
        format!("{}", status.files_processed).green(),
        status.files_total,
        format!("{}", status.files_failed).red(),
    );
    Ok(())
}

fn run_items(service: &Service, cmd: ItemsCommand) -> anyhow::Result<()> {
    match cmd {
        ItemsCommand::Process => {
            let report = service.process_items()?;
            print_json(&report)
        }
        ItemsCommand::List {
            kind,
            status,
            search,
            min_copies,
            max_copies,
            offset,
            limit,
        } => print_json(&service.list_items(&ItemQuery {
            kind,
            status,
            search,
            min_copies,
            max_copies,
            offset,
            limit,
        })?),
        ItemsCommand::Show { item_id } => print_json(&service.get_item(item_id)?),
        ItemsCommand::Stats => print_json(&service.item_stats()?),
        ItemsCommand::Merge {
            target_id,
            source_ids,
        } => print_json(&service.merge_items(target_id, &source_ids)?),
        ItemsCommand::Split { file_id } => print_json(&service.split_file(file_id)?),
        ItemsCommand::Update(args) => {
            let update = ItemUpdate {
                kind: args.kind,
                title: args.title,
                year: args.year,
                season: args.season,
                episode: args.episode,
                status: args.status,
            };
            print_json(&service.update_item(args.item_id, &update)?)
        }
    }
}

fn run_ops(service: &Service, cmd: OpsCommand) -> anyhow::Result<()> {
    match cmd {
        OpsCommand::List {
            status,
            kind,
            offset,
            limit,
        } => print_json(&service.list_operations(&OperationQuery {
            status,
            kind,
            offset,
            limit,
        })?),
        OpsCommand::Show { op_id } => print_json(&service.get_operation(op_id)?),
        OpsCommand::Pause { op_id } => print_json(&service.pause_operation(op_id)?),
        OpsCommand::Resume { op_id } => print_json(&service.resume_operation(op_id)?),
        OpsCommand::Cancel { op_id } => print_json(&service.cancel_operation(op_id)?),
        OpsCommand::Clear => {
            let cleared = service.clear_finished_operations()?;
            println!("{} finished operations cleared", cleared);
            Ok(())
        }
    }
}

/// Drain the queue in the foreground. Operations only move while this process runs.
fn run_queue(service: &Service, concurrency: Option<usize>) -> anyhow::Result<()> {
    if let Some(limit) = concurrency {
        let status = service.set_concurrency(limit)?;
        info!("Concurrency set to {}", status.concurrency);
    }
    service.start_queue()?;
    let watched = progress::watch_queue(service);
    service.shutdown_queue();
    let status = watched?;

    info!(
        "Queue drained: {} completed, {} failed, {} cancelled, {} paused",
        format!("{}", status.counts.completed).green(),
        format!("{}", status.counts.failed).red(),
        status.counts.cancelled,
        format!("{}", status.counts.paused).yellow(),
    );
    Ok(())
}

fn transfer_request(args: TransferArgs) -> CopyRequest {
    CopyRequest {
        source_file_id: args.file_id,
        dest_drive_id: args.drive,
        dest_path: args.dest,
        verify_hash: !args.no_verify,
    }
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
