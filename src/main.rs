use std::io;
use std::io::Write as _;
use std::process::Command;

use taskgauge::config::SupervisorConfig;
use taskgauge::external::{
    NoHistoricalLookup, RealCloudMetadataProbe, RealPricingLookup, RealServerInventory,
};
use taskgauge::interrupt;
use taskgauge::log;
use taskgauge::select;
use taskgauge::supervisor::Supervisor;

const USAGE_ERROR: i32 = 2;

enum Commands {
    Run {
        step_name: String,
        interval: f64,
        artifact_name: String,
        create_card: bool,
        task: Vec<String>,
    },
    SamplePid {
        pid: usize,
        interval: f64,
        output_path: String,
    },
    SampleHost {
        disk_space_anchor: String,
        interval: f64,
        output_path: String,
    },
    Version,
}

fn main() {
    log::init();
    interrupt::handle_interruptions();

    match command_line() {
        Commands::Run {
            step_name,
            interval,
            artifact_name,
            create_card,
            task,
        } => run_command(&step_name, interval, &artifact_name, create_card, task),
        Commands::SamplePid {
            pid,
            interval,
            output_path,
        } => sample_pid_command(pid, interval, &output_path),
        Commands::SampleHost {
            disk_space_anchor,
            interval,
            output_path,
        } => sample_host_command(&disk_space_anchor, interval, &output_path),
        Commands::Version => show_version(&mut io::stdout()),
    }
}

fn run_command(step_name: &str, interval: f64, artifact_name: &str, create_card: bool, task: Vec<String>) {
    if task.is_empty() {
        eprintln!("`run` needs a task command after --");
        std::process::exit(USAGE_ERROR);
    }
    let config = SupervisorConfig {
        interval,
        artifact_name: artifact_name.to_string(),
        create_card,
    };
    let mut command = Command::new(&task[0]);
    command.args(&task[1..]);

    log::verbose(&format!("starting step '{step_name}' (interval {interval}s)"));

    let cloud_probe = RealCloudMetadataProbe;
    let server_inventory = RealServerInventory;
    let pricing_lookup = RealPricingLookup;
    let historical_lookup = NoHistoricalLookup;
    let supervisor = Supervisor {
        config,
        cloud_probe: &cloud_probe,
        server_inventory: &server_inventory,
        pricing_lookup: &pricing_lookup,
        historical_lookup: &historical_lookup,
    };

    let artifact = supervisor.run_task(step_name, command);
    match artifact {
        taskgauge::artifact::Artifact::Error { error } => {
            log::error(&format!("{}: {}", error.error_type, error.error_message));
            std::process::exit(1);
        }
        taskgauge::artifact::Artifact::Ok { .. } => {
            log::info("measurement complete");
        }
    }
}

fn sample_pid_command(pid: usize, interval: f64, output_path: &str) {
    let source = match select::select_counter_source() {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = taskgauge::sampler::run_pid_loop(source.as_ref(), pid, interval, std::path::Path::new(output_path)) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn sample_host_command(disk_space_anchor: &str, interval: f64, output_path: &str) {
    let source = match select::select_counter_source() {
        Ok(source) => source,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    let result = taskgauge::sampler::run_host_loop(
        source.as_ref(),
        disk_space_anchor,
        interval,
        std::path::Path::new(output_path),
        interrupt::is_interrupted,
    );
    if let Err(e) = result {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

// For the sake of simplicity:
//  - allow repeated options to overwrite earlier values
//  - all error reporting is via a generic "usage" message, without specificity as to what was wrong

fn command_line() -> Commands {
    let args: Vec<String> = std::env::args().collect();
    let mut next = 1;
    if next >= args.len() {
        usage(true);
    }
    let command = args[next].clone();
    next += 1;
    match command.as_str() {
        "run" => {
            if next >= args.len() || args[next] == "--" {
                usage(true);
            }
            let step_name = args[next].clone();
            next += 1;

            let mut interval = 1.0;
            let mut artifact_name = "resource_tracker_data".to_string();
            let mut create_card = true;
            while next < args.len() && args[next] != "--" {
                if let Some((new_next, value)) = numeric_arg::<f64>(&args[next], &args, next + 1, "--interval") {
                    next = new_next;
                    interval = value;
                } else if let Some((new_next, value)) = string_arg(&args[next], &args, next + 1, "--artifact-name") {
                    next = new_next;
                    artifact_name = value;
                } else if args[next] == "--no-card" {
                    next += 1;
                    create_card = false;
                } else {
                    usage(true);
                }
            }
            let task = if next < args.len() && args[next] == "--" {
                args[next + 1..].to_vec()
            } else {
                vec![]
            };
            Commands::Run {
                step_name,
                interval,
                artifact_name,
                create_card,
                task,
            }
        }
        "sample-pid" => {
            if next + 1 >= args.len() {
                usage(true);
            }
            let pid = args[next].parse().unwrap_or_else(|_| usage(true));
            let output_path = args[next + 1].clone();
            next += 2;
            let mut interval = 1.0;
            while next < args.len() {
                if let Some((new_next, value)) = numeric_arg::<f64>(&args[next], &args, next + 1, "--interval") {
                    next = new_next;
                    interval = value;
                } else {
                    usage(true);
                }
            }
            Commands::SamplePid {
                pid,
                interval,
                output_path,
            }
        }
        "sample-host" => {
            if next + 1 >= args.len() {
                usage(true);
            }
            let disk_space_anchor = args[next].clone();
            let output_path = args[next + 1].clone();
            next += 2;
            let mut interval = 1.0;
            while next < args.len() {
                if let Some((new_next, value)) = numeric_arg::<f64>(&args[next], &args, next + 1, "--interval") {
                    next = new_next;
                    interval = value;
                } else {
                    usage(true);
                }
            }
            Commands::SampleHost {
                disk_space_anchor,
                interval,
                output_path,
            }
        }
        "version" => Commands::Version,
        _ => usage(true),
    }
}

fn string_arg(arg: &str, args: &[String], next: usize, opt_name: &str) -> Option<(usize, String)> {
    if arg == opt_name {
        if next < args.len() {
            Some((next + 1, args[next].to_string()))
        } else {
            None
        }
    } else if let Some((first, rest)) = arg.split_once('=') {
        if first == opt_name {
            Some((next, rest.to_string()))
        } else {
            None
        }
    } else {
        None
    }
}

fn numeric_arg<T: std::str::FromStr>(arg: &str, args: &[String], next: usize, opt_name: &str) -> Option<(usize, T)> {
    if let Some((next, strval)) = string_arg(arg, args, next, opt_name) {
        match strval.parse::<T>() {
            Ok(value) => Some((next, value)),
            _ => usage(true),
        }
    } else {
        None
    }
}

fn usage(is_error: bool) -> ! {
    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();
    let out: &mut dyn std::io::Write = if is_error { &mut stderr } else { &mut stdout };
    show_version(out);
    let _ = out.write_all(
        b"\nUsage: taskgauge <COMMAND>\n\n\
Commands:\n\
  run <step-name> [--interval <seconds>] [--artifact-name <name>] [--no-card] -- <task...>\n\
  sample-pid <pid> <out-csv> [--interval <seconds>]\n\
  sample-host <disk-space-anchor> <out-csv> [--interval <seconds>]\n\
  version\n",
    );
    std::process::exit(if is_error { USAGE_ERROR } else { 0 });
}

fn show_version(out: &mut dyn std::io::Write) {
    let _ = out.write_all(b"taskgauge version ");
    let _ = out.write_all(env!("CARGO_PKG_VERSION").as_bytes());
    let _ = out.write_all(b"\n");
}
