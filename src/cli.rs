use anyhow::{Result, anyhow};
use pico_args::Arguments;
use std::{
    env, fs,
    io::{self, BufRead, BufReader},
    path::PathBuf,
    sync::{Arc, atomic::AtomicBool},
};

use posectl::classifier::{ManualClock, PoseClassifier};
use posectl::config::{Profile, ProfileStore};
use posectl::replay::{self, ReplayOptions};

pub fn run() -> Result<()> {
    let mut pargs = Arguments::from_env();

    if env::args().len() == 1 {
        print_help();
        return Ok(());
    }

    if pargs.contains("-h") || pargs.contains("--help") {
        print_help();
        return Ok(());
    }

    let subcmd: Option<String> = pargs.free_from_str().ok();

    match subcmd.as_deref() {
        Some("help") => {
            let topic: Option<String> = pargs.free_from_str().ok();
            if let Some(t) = topic {
                print_subcmd_help(&t);
            } else {
                print_help();
            }
            Ok(())
        }

        Some("classify") => {
            let profile_name: Option<String> = pargs.opt_value_from_str("--profile")?;
            let config_path: Option<PathBuf> = pargs.opt_value_from_str("--config")?;
            let debug = pargs.contains("--debug");
            let summary = pargs.contains("--summary");
            let input: Option<String> = pargs.opt_free_from_str()?;
            classify(profile_name, config_path, debug, summary, input)
        }

        Some("list") => {
            let store = ProfileStore::user()?;
            store.install_default()?;
            let active = store.active_name().unwrap_or_default();
            for name in store.list() {
                let mark = if name == active { "*" } else { " " };
                println!("{mark} {name}");
            }
            Ok(())
        }

        Some("use") => {
            let name: String = pargs
                .free_from_str()
                .map_err(|_| anyhow!("usage: posectl use <profile_name>"))?;
            let store = ProfileStore::user()?;
            store.install_default()?;
            let profile = store.set_active(&name)?;
            print_json(&serde_json::json!({
                "ok": true,
                "data": {"active_profile": name, "name": profile.display_name()}
            }));
            Ok(())
        }

        Some("show") => {
            let name: Option<String> = pargs.opt_free_from_str()?;
            let profile = resolve_profile(name, None)?;
            print_json(&serde_json::to_value(&profile)?);
            Ok(())
        }

        Some("doctor") => {
            let store = ProfileStore::user()?;
            print_json(&store.doctor_report());
            Ok(())
        }

        Some(other) => {
            eprintln!("unknown subcommand: {other}\n");
            print_help();
            Ok(())
        }

        None => {
            print_help();
            Ok(())
        }
    }
}

fn resolve_profile(name: Option<String>, path: Option<PathBuf>) -> Result<Profile> {
    if let Some(path) = path {
        return Profile::from_path(&path);
    }
    let store = ProfileStore::user()?;
    match name {
        Some(name) => {
            store.install_default()?;
            store.load(&name)
        }
        None => Ok(store.load_or_install_default()?.1),
    }
}

fn classify(
    profile_name: Option<String>,
    config_path: Option<PathBuf>,
    debug: bool,
    summary: bool,
    input: Option<String>,
) -> Result<()> {
    let profile = resolve_profile(profile_name, config_path)?;
    log::info!("classify: using profile '{}'", profile.display_name());

    let reader: Box<dyn BufRead> = match input.as_deref() {
        None | Some("-") => Box::new(io::stdin().lock()),
        Some(path) => Box::new(BufReader::new(
            fs::File::open(path).map_err(|e| anyhow!("failed to open {path}: {e}"))?,
        )),
    };

    // first signal stops between frames, a second one exits
    let stop = Arc::new(AtomicBool::new(false));
    for sig in signal_hook::consts::TERM_SIGNALS {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, Arc::clone(&stop))?;
        signal_hook::flag::register(*sig, Arc::clone(&stop))?;
    }

    let clock = ManualClock::default();
    let mut classifier = PoseClassifier::with_clock(profile.thresholds, clock.clone());
    let result = replay::run(
        &mut classifier,
        &clock,
        reader,
        io::stdout().lock(),
        ReplayOptions { debug },
        &stop,
    )?;

    if summary {
        eprintln!("{}", serde_json::to_string_pretty(&result)?);
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"posectl — gesture states from 2D pose keypoints

USAGE:
  posectl help [command]                  Show general or command-specific help
  posectl classify [OPTIONS] [FILE|-]     Classify JSON-lines frames (stdin by default)
  posectl list                            List profiles
  posectl use <name>                      Switch active profile
  posectl show [name]                     Print a profile's thresholds
  posectl doctor                          Check profile directory and active profile

CLASSIFY OPTIONS:
  --profile <name>                        Use a stored profile instead of the active one
  --config <path>                         Use a profile file from anywhere
  --debug                                 Attach intermediate measurements to each frame
  --summary                               Print per-state counts to stderr at the end

TIPS:
  - Profiles: ~/.config/posectl/profiles
  - Active profile pointer: ~/.config/posectl/active
  - RUST_LOG=debug shows transitions and recalibrations
"#
    );
}

fn print_subcmd_help(cmd: &str) {
    match cmd {
        "classify" => println!(
            r#"usage: posectl classify [--profile NAME | --config PATH] [--debug] [--summary] [FILE|-]
Reads one frame per line: a keypoint array, null,
{{"keypoints": [...], "timestamp_ms": n}}, or a control line
{{"op": "reset"}} / {{"op": "snapshot"}}. Writes one JSON result per line.
Entries that are not valid keypoints count as missing joints.
RUST_LOG=trace logs every intermediate measurement."#
        ),
        "list" => println!("usage: posectl list\nLists available profiles; marks active with '*'."),
        "use" => {
            println!("usage: posectl use <name>\nSwitches the active profile to <name>.")
        }
        "show" => println!(
            "usage: posectl show [name]\nPrints the named (or active) profile as JSON."
        ),
        "doctor" => println!(
            "usage: posectl doctor\nReports config paths and whether the active profile loads."
        ),
        _ => {
            eprintln!("unknown command: {cmd}\n");
            print_help();
        }
    }
}

fn print_json(v: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(v).unwrap_or_default());
}
