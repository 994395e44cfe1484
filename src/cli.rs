use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::detection::DetectorParams;
use crate::geometry::{Point, Quadrilateral};
use crate::transform::{Interpolation, RectifyParams};

#[derive(Parser, Debug)]
#[command(name = "doc-rectify")]
#[command(version, about = "Find a photographed document's corners and flatten it into a scan")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// JSON file with "detector" and "rectify" settings
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Lower Canny threshold [default: 50]
    #[arg(long, global = true)]
    pub low: Option<f32>,

    /// Upper Canny threshold [default: 100]
    #[arg(long, global = true)]
    pub high: Option<f32>,

    /// Sampling used when warping [default: bilinear]
    #[arg(long, global = true, value_enum)]
    pub interpolation: Option<Interpolation>,

    /// Log more (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the detected document corners
    Detect {
        input: PathBuf,

        /// Print corners as JSON instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Warp the region inside four given corners onto a rectangle
    Rectify {
        input: PathBuf,

        /// Corners as "x,y x,y x,y x,y" (top-left, top-right, bottom-right, bottom-left)
        #[arg(long, value_parser = parse_corners)]
        corners: Quadrilateral,

        /// Output path [default: input_rectified.png]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Detect the document (falling back to an inset frame) and rectify it
    Scan {
        input: PathBuf,

        /// Output path [default: input_scan.png]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Inset of the fallback quadrilateral when no document is found
        #[arg(long, default_value = "10")]
        margin: f64,
    },

    /// Write the Canny edge map the detector works from
    Edges {
        input: PathBuf,

        /// Output path [default: input_edges.png]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write an Otsu-thresholded black/white version of the image
    Binarize {
        input: PathBuf,

        /// Output path [default: input_binarized.png]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

impl Command {
    pub fn input(&self) -> &Path {
        match self {
            Command::Detect { input, .. }
            | Command::Rectify { input, .. }
            | Command::Scan { input, .. }
            | Command::Edges { input, .. }
            | Command::Binarize { input, .. } => input,
        }
    }

    /// Where the command writes its image, if it writes one
    pub fn output_path(&self) -> Option<PathBuf> {
        let (output, suffix) = match self {
            Command::Detect { .. } => return None,
            Command::Rectify { output, .. } => (output, "rectified"),
            Command::Scan { output, .. } => (output, "scan"),
            Command::Edges { output, .. } => (output, "edges"),
            Command::Binarize { output, .. } => (output, "binarized"),
        };
        Some(output.clone().unwrap_or_else(|| {
            let input = self.input();
            let stem = input.file_stem().unwrap_or_default().to_string_lossy();
            let parent = input.parent().unwrap_or(Path::new("."));
            parent.join(format!("{}_{}.png", stem, suffix))
        }))
    }
}

/// Settings file contents; missing sections and fields take their defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub detector: DetectorParams,
    pub rectify: RectifyParams,
}

impl ScanConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

impl Cli {
    /// Config file (if any) with command-line overrides applied on top
    pub fn resolve_config(&self) -> Result<ScanConfig> {
        let mut config = match &self.config {
            Some(path) => ScanConfig::from_json_file(path)?,
            None => ScanConfig::default(),
        };
        if let Some(low) = self.low {
            config.detector.low_threshold = low;
        }
        if let Some(high) = self.high {
            config.detector.high_threshold = high;
        }
        if let Some(interpolation) = self.interpolation {
            config.rectify.interpolation = interpolation;
        }
        Ok(config)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

fn parse_corners(s: &str) -> Result<Quadrilateral, String> {
    let points = s
        .split_whitespace()
        .map(|pair| {
            let (x, y) = pair
                .split_once(',')
                .ok_or_else(|| format!("Invalid corner '{}', expected x,y", pair))?;
            let x: f64 = x
                .trim()
                .parse()
                .map_err(|_| format!("Invalid x coordinate: {}", x))?;
            let y: f64 = y
                .trim()
                .parse()
                .map_err(|_| format!("Invalid y coordinate: {}", y))?;
            Ok(Point::new(x, y))
        })
        .collect::<Result<Vec<_>, String>>()?;

    Quadrilateral::from_points(&points).map_err(|e| e.to_string())
}
