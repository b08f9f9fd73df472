//! `chartflow` command line: replay option changes against in-memory
//! collaborators and diff option files

use anyhow::{bail, Context, Result};
use chartflow_core::{
    ApplyOutcome, ChartHandle, ChartflowConfig, Collaborators, Registry, Size, Tree,
};
use chartflow_tree::{diff, PropertyPath};
use clap::{value_parser, Arg, ArgAction, Command};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
enum Step {
    Create { options: serde_json::Value },
    Patch { options: serde_json::Value },
    Delta { options: serde_json::Value },
    Resize { width: u32, height: u32 },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Patch { .. } => "patch",
            Self::Delta { .. } => "delta",
            Self::Resize { .. } => "resize",
        }
    }
}

fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path.display()))
}

fn removed_paths(tree: &Tree, at: &PropertyPath, out: &mut Vec<PropertyPath>) {
    match tree {
        Tree::Delete => out.push(at.clone()),
        Tree::Object(map) => {
            for (key, value) in map {
                removed_paths(value, &at.key(key.as_str()), out);
            }
        }
        Tree::Array(items) => {
            for (i, value) in items.iter().enumerate() {
                removed_paths(value, &at.index(i), out);
            }
        }
        _ => {}
    }
}

fn run_diff(a: &Path, b: &Path) -> Result<()> {
    let a = Tree::from(read_json(a)?);
    let b = Tree::from(read_json(b)?);
    let Some(patch) = diff(&a, &b) else {
        println!("no differences");
        return Ok(());
    };

    println!("{}", serde_json::to_string_pretty(&patch.to_json())?);
    let mut removed = Vec::new();
    removed_paths(&patch, &PropertyPath::root(), &mut removed);
    for path in removed {
        println!("removed: {path}");
    }
    Ok(())
}

async fn run_replay(file: &Path, config: ChartflowConfig, print_snapshot: bool) -> Result<()> {
    let steps: Vec<Step> = serde_json::from_value(read_json(file)?)
        .with_context(|| format!("{} is not a list of replay steps", file.display()))?;
    if steps.is_empty() {
        bail!("{} contains no steps", file.display());
    }

    let handle = ChartHandle::new(config, Registry::with_defaults(), Collaborators::in_memory());
    for (i, step) in steps.into_iter().enumerate() {
        let name = step.name();
        let outcome = match step {
            Step::Create { options } => handle.create_or_replace(Tree::from(options)).await,
            Step::Patch { options } => handle.apply_patch(&Tree::from(options)).await,
            Step::Delta { options } => handle.apply_user_delta(&Tree::from(options)).await,
            Step::Resize { width, height } => {
                handle.resize(Size::new(width, height));
                Ok(ApplyOutcome::Applied(chartflow_core::UpdateStatus::NoOp))
            }
        };
        handle.settle().await?;

        let status = match outcome {
            Ok(ApplyOutcome::Applied(status)) => format!("{status:?}"),
            Ok(other) => format!("{other:?}"),
            Err(err) => format!("rejected: {err}"),
        };
        let frame = handle.last_frame();
        println!(
            "step {:>3} {:<7} {:<24} series={} size={}",
            i + 1,
            name,
            status,
            handle.snapshot().series.len(),
            frame.map_or_else(|| "-".to_string(), |f| f.size.to_string()),
        );
    }

    if print_snapshot {
        println!("{}", serde_json::to_string_pretty(&handle.snapshot())?);
    }
    handle.destroy();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Command::new("chartflow")
        .version(chartflow_core::VERSION)
        .about("Replay chart configuration changes and inspect option diffs")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Runtime configuration file (.toml or .json)"),
        )
        .subcommand(
            Command::new("replay")
                .about("Apply a JSON list of {op, options} steps and report each result")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Replay file"),
                )
                .arg(
                    Arg::new("snapshot")
                        .long("snapshot")
                        .action(ArgAction::SetTrue)
                        .help("Print the final live graph as JSON"),
                ),
        )
        .subcommand(
            Command::new("diff")
                .about("Print the patch turning one options file into another")
                .arg(
                    Arg::new("from")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("to")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                ),
        );

    let matches = cli.get_matches();
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => ChartflowConfig::load(path)?,
        None => ChartflowConfig::default(),
    };

    match matches.subcommand() {
        Some(("replay", args)) => {
            let Some(file) = args.get_one::<PathBuf>("file") else {
                bail!("missing replay file");
            };
            run_replay(file, config, args.get_flag("snapshot")).await
        }
        Some(("diff", args)) => {
            let (Some(from), Some(to)) =
                (args.get_one::<PathBuf>("from"), args.get_one::<PathBuf>("to"))
            else {
                bail!("diff needs two files");
            };
            run_diff(from, to)
        }
        _ => bail!("unknown command"),
    }
}
