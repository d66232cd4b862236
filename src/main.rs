//! Refinery - Merge queue processor for rig work branches
//!
//! Main entry point for the refinery CLI.

use clap::{Parser, Subcommand};
use refinery::{Manager, QueueItem, Refinery, RefineryState, Rig};
use std::path::PathBuf;
use std::process;
use std::time::Duration;

/// Refinery - serialized integration of worker branches for one rig
#[derive(Parser, Debug)]
#[command(name = "refinery")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the rig checkout (default: current directory)
    #[arg(short, long, env = "REFINERY_RIG")]
    rig: Option<PathBuf>,

    /// Rig name (default: derived from the path)
    #[arg(short, long)]
    name: Option<String>,

    /// Git remote workers push to
    #[arg(long, default_value = "origin")]
    remote: String,

    /// Branch namespace workers push under
    #[arg(long, default_value = "polecat")]
    prefix: String,

    /// Branch merge requests are integrated into
    #[arg(long, default_value = "main")]
    target: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the refinery's current state and statistics
    Status {
        /// Emit the raw record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Start the refinery
    Start {
        /// Run the processing loop in this process
        #[arg(short, long)]
        foreground: bool,

        /// Seconds between poll cycles
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
        interval: u64,

        /// Command to run per merge attempt, invoked as
        /// `<command> <branch> <target>` in the rig checkout
        #[arg(long, env = "REFINERY_MERGE_CMD")]
        merge_cmd: Option<String>,
    },

    /// Stop the refinery
    Stop,

    /// Pause queue processing without stopping the process
    Pause,

    /// Resume a paused refinery
    Resume,

    /// Show the merge queue
    Queue {
        /// Emit the queue as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    // Initialize logging
    if let Err(e) = refinery::logging::init() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> refinery::Result<()> {
    let path = match cli.rig {
        Some(path) => path,
        None => std::env::current_dir()?,
    };

    let mut builder = Rig::builder()
        .path(path)
        .remote(cli.remote)
        .worker_prefix(cli.prefix)
        .integration_branch(cli.target);
    if let Some(name) = cli.name {
        builder = builder.name(name);
    }
    let rig = builder.build()?;

    match cli.command {
        Commands::Status { json } => {
            let manager = Manager::new(rig);
            let record = manager.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                print_status(&record);
            }
        }
        Commands::Start {
            foreground,
            interval,
            merge_cmd,
        } => {
            let mut manager =
                Manager::new(rig.clone()).with_poll_interval(Duration::from_secs(interval));
            if let Some(command) = merge_cmd {
                manager = manager.with_driver(refinery::CommandDriver::new(&command, &rig.path)?);
            }

            // No banner before start(): it can still fail with AlreadyRunning
            tokio::runtime::Runtime::new()?.block_on(manager.start(foreground))?;
            if foreground {
                println!("Refinery for rig '{}' stopped", rig.name);
            } else {
                println!("Refinery for rig '{}' marked running", rig.name);
            }
        }
        Commands::Stop => {
            Manager::new(rig.clone()).stop()?;
            println!("Refinery for rig '{}' stopped", rig.name);
        }
        Commands::Pause => {
            Manager::new(rig.clone()).pause()?;
            println!("Refinery for rig '{}' paused", rig.name);
        }
        Commands::Resume => {
            Manager::new(rig.clone()).resume()?;
            println!("Refinery for rig '{}' resumed", rig.name);
        }
        Commands::Queue { json } => {
            let manager = Manager::new(rig);
            let queue = manager.queue()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&queue)?);
            } else {
                print_queue(&queue);
            }
        }
    }

    Ok(())
}

fn print_status(record: &Refinery) {
    use refinery::style;

    println!(
        "{} {}",
        style::header(&format!("Refinery [{}]:", record.rig_name)),
        style::state_style(&record.state.to_string())
    );

    if let Some(pid) = record.pid {
        println!("  PID:        {}", pid);
    }
    if let Some(started_at) = record.started_at {
        println!(
            "  Started:    {} ({})",
            started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            style::format_age(started_at)
        );
    }
    if let Some(ref mr) = record.current_mr {
        println!(
            "  Working on: {} ({})",
            style::branch(&mr.branch),
            style::format_age(mr.created_at)
        );
    }
    if let Some(last_merge_at) = record.last_merge_at {
        println!("  Last merge: {}", style::format_age(last_merge_at));
    }

    println!();
    println!("{}", style::header("Statistics:"));
    println!(
        "  Merged:  {} total, {} today",
        style::count_merged(record.stats.total_merged),
        style::count_merged(record.stats.today_merged)
    );
    println!(
        "  Failed:  {} total, {} today",
        style::count_failed(record.stats.total_failed),
        style::count_failed(record.stats.today_failed)
    );
    println!("  Skipped: {} total", record.stats.total_skipped);

    if record.state == RefineryState::Stopped {
        println!();
        println!("{}", style::dim("Run 'refinery start' to begin processing"));
    }
}

fn print_queue(queue: &[QueueItem]) {
    use refinery::style;

    if queue.is_empty() {
        println!("Merge queue is empty");
        return;
    }

    println!("{}", style::header(&format!("Merge queue ({}):", queue.len())));
    for item in queue {
        let status = item.mr.status.to_string();
        let issue = if item.mr.issue_id.is_empty() {
            String::new()
        } else {
            format!(" [{}]", item.mr.issue_id)
        };
        println!(
            "  {} {} {} {}{} {}",
            item.position,
            style::mr_status_indicator(&status),
            style::branch(&item.mr.branch),
            style::dim(&format!("({})", item.mr.worker)),
            issue,
            style::dim(&item.age)
        );
        if let Some(ref error) = item.mr.error {
            println!("       {}", style::error(error));
        }
    }
}
