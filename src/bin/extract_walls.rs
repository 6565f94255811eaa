//! Extract RANSAC walls from a scan file.
//!
//! Usage:
//!   extract_walls map.txt
//!   extract_walls map.txt --config rover.toml --vertical --merge

use anyhow::{Context, Result};
use clap::Parser;
use rover_core::config::RoverConfig;
use rover_core::perception::filters::{Filter, SegmentMerger};
use rover_core::perception::landmarks::corners_from_walls;
use rover_core::perception::sensors::read_scan_file;
use rover_core::perception::walls::WallExtractor;
use std::f64::consts::FRAC_PI_2;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scan file, one `x,y` point per line
    scan: String,

    /// TOML configuration; defaults are used when absent
    #[arg(short, long)]
    config: Option<String>,

    /// Also run a quarter-turn pass to pick up vertical walls
    #[arg(long)]
    vertical: bool,

    /// Merge duplicate and overlapping segments
    #[arg(long)]
    merge: bool,

    /// Print corner landmarks found between the walls
    #[arg(long)]
    corners: bool,

    /// Fixed RANSAC seed, overriding the config
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RoverConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => RoverConfig::default(),
    };
    if args.seed.is_some() {
        config.ransac.seed = args.seed;
    }

    let points = read_scan_file(&args.scan).with_context(|| format!("reading {}", args.scan))?;
    log::info!("{} scan points from {}", points.len(), args.scan);

    let extractor = WallExtractor::new(config.ransac.clone());
    let mut walls = extractor.extract(&points).context("extracting walls")?;
    if args.vertical {
        walls.extend(
            extractor
                .extract_rotated(&points, FRAC_PI_2)
                .context("extracting vertical walls")?,
        );
    }
    if args.merge {
        let before = walls.len();
        walls = SegmentMerger::default().filter(walls);
        log::info!("merged {} segments into {}", before, walls.len());
    }

    for wall in &walls {
        println!(
            "({:.2}, {:.2}) - ({:.2}, {:.2})  inliers={}",
            wall.start.x, wall.start.y, wall.end.x, wall.end.y, wall.inliers
        );
    }
    if args.corners {
        for corner in corners_from_walls(
            &walls,
            config.landmarks.min_corner_angle,
            config.landmarks.corner_margin,
        ) {
            println!("corner ({:.2}, {:.2})", corner.x, corner.y);
        }
    }
    log::info!("{} walls", walls.len());
    Ok(())
}
