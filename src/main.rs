mod annotate;
mod composite;
mod config;
mod corpus;
mod error;
mod pgn;
mod pipeline;
mod renderer;
mod request;
#[cfg(test)]
mod testutil;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command, value_parser};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::renderer::HttpRenderer;
use crate::request::ColorTheme;

fn cli() -> Command {
    Command::new("board-synth")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Synthesizes a chessboard-detection dataset: rendered boards composited onto background photos")
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("JSON config file; flags below override its values")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("num")
                .long("num")
                .short('n')
                .value_name("N")
                .help("Number of images to generate [default: 1000]")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("image-output-dir")
                .long("image-output-dir")
                .value_name("DIR")
                .help("Output directory for images [default: output/images]")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("bbox-output-dir")
                .long("bbox-output-dir")
                .value_name("DIR")
                .help("Output directory for bounding boxes [default: output/bounding_boxes]")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("metadata-output-dir")
                .long("metadata-output-dir")
                .value_name("DIR")
                .help("Output directory for render metadata (FEN, last move, orientation, ...) [default: output/metadata]")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("positions")
                .long("positions")
                .value_name("FILE")
                .help("Position corpus JSON [default: fen_data_list.json]")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("backgrounds")
                .long("backgrounds")
                .value_name("DIR")
                .help("Directory of background images [default: resized_images]")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("renderer-url")
                .long("renderer-url")
                .value_name("URL")
                .help("Board rendering endpoint [default: http://127.0.0.1:8080/board.png]"),
        )
        .arg(
            Arg::new("board-size")
                .long("board-size")
                .value_name("PX")
                .help("Edge length requested from the renderer [default: 360]")
                .value_parser(value_parser!(u32)),
        )
        .arg(
            Arg::new("colors")
                .long("colors")
                .value_name("THEME")
                .help("Board color theme [default: random]")
                .value_parser(["wikipedia", "lichess-brown", "lichess-blue", "random"]),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .help("Base seed for reproducible placement and sampling")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("jobs")
                .long("jobs")
                .short('j')
                .value_name("N")
                .help("Items generated concurrently [default: 1]")
                .value_parser(value_parser!(usize)),
        )
        .subcommand(
            Command::new("build-corpus")
                .about("Sample positions from a PGN file into a position corpus")
                .arg(
                    Arg::new("pgn")
                        .long("pgn")
                        .value_name("FILE")
                        .required(true)
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_name("FILE")
                        .default_value("fens.json")
                        .value_parser(value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("max-games")
                        .long("max-games")
                        .default_value("5000")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("count")
                        .long("count")
                        .default_value("10000")
                        .value_parser(value_parser!(usize)),
                )
                .arg(Arg::new("seed").long("seed").value_parser(value_parser!(u64))),
        )
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Config file (if any) with command-line overrides applied.
fn resolve_config(matches: &ArgMatches) -> Result<Config> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(&num) = matches.get_one::<u32>("num") {
        config.num = num;
    }
    if let Some(dir) = matches.get_one::<PathBuf>("image-output-dir") {
        config.image_output_dir = dir.clone();
    }
    if let Some(dir) = matches.get_one::<PathBuf>("bbox-output-dir") {
        config.bbox_output_dir = dir.clone();
    }
    if let Some(dir) = matches.get_one::<PathBuf>("metadata-output-dir") {
        config.metadata_output_dir = dir.clone();
    }
    if let Some(path) = matches.get_one::<PathBuf>("positions") {
        config.positions = path.clone();
    }
    if let Some(dir) = matches.get_one::<PathBuf>("backgrounds") {
        config.backgrounds = dir.clone();
    }
    if let Some(url) = matches.get_one::<String>("renderer-url") {
        config.renderer.url = url.clone();
    }
    if let Some(&size) = matches.get_one::<u32>("board-size") {
        config.board_size = size;
    }
    if let Some(theme) = matches.get_one::<String>("colors") {
        config.color_theme = theme.parse::<ColorTheme>().map_err(anyhow::Error::msg)?;
    }
    if let Some(&seed) = matches.get_one::<u64>("seed") {
        config.seed = Some(seed);
    }
    if let Some(&jobs) = matches.get_one::<usize>("jobs") {
        config.jobs = jobs;
    }

    config.validate()?;
    Ok(config)
}

async fn generate(matches: &ArgMatches) -> Result<ExitCode> {
    let config = resolve_config(matches).context("Failed to resolve configuration")?;
    let renderer = HttpRenderer::new(config.renderer.clone())?;
    let pipeline =
        Pipeline::from_config(&config, renderer).context("Failed to prepare dataset generation")?;

    info!(
        num = config.num,
        jobs = config.jobs,
        renderer = %config.renderer.url,
        "generating synthetic dataset"
    );
    let summary = pipeline
        .run(config.num, config.jobs, config.progress_every)
        .await;
    pipeline::report(&summary);

    Ok(ExitCode::from(summary.exit_code()))
}

fn build_corpus(matches: &ArgMatches) -> Result<ExitCode> {
    let pgn_path = matches
        .get_one::<PathBuf>("pgn")
        .context("--pgn is required")?;
    let output = matches
        .get_one::<PathBuf>("output")
        .context("--output has a default")?;
    let options = pgn::BuildOptions {
        max_games: *matches.get_one::<usize>("max-games").unwrap_or(&5_000),
        count: *matches.get_one::<usize>("count").unwrap_or(&10_000),
        seed: matches.get_one::<u64>("seed").copied(),
    };

    pgn::build_corpus(pgn_path, output, &options)
        .with_context(|| format!("Failed to build position corpus from {}", pgn_path.display()))?;
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    init_logging();
    let matches = cli().get_matches();

    match matches.subcommand() {
        Some(("build-corpus", sub)) => build_corpus(sub),
        _ => generate(&matches).await,
    }
}
