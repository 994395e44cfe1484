use anyhow::{Context, Result};
use clap::Parser;
use image::{DynamicImage, ImageReader};
use log::{debug, info, warn};
use std::path::Path;

use doc_rectify::{
    binarize, edge_map, rectify_perspective_with, Cli, Command, CornerDetector, Quadrilateral,
    ScanError,
};

fn init_logging(cli: &Cli) {
    let mut logger = env_logger::Builder::new();
    logger.filter_level(cli.log_level());
    if cli.verbose == 0 {
        logger.parse_default_env();
    }
    logger.format_timestamp(None).init();
}

fn load_image(path: &Path) -> Result<DynamicImage> {
    let img = ImageReader::open(path)
        .with_context(|| format!("Failed to open input file: {:?}", path))?
        .decode()
        .with_context(|| format!("Failed to decode image: {:?}", path))?;
    info!("Loaded image: {:?} ({}x{})", path, img.width(), img.height());
    Ok(img)
}

fn save_image(img: &DynamicImage, path: &Path) -> Result<()> {
    img.save(path)
        .with_context(|| format!("Failed to save output: {:?}", path))?;
    info!("Saved: {:?} ({}x{})", path, img.width(), img.height());
    Ok(())
}

fn describe(quad: &Quadrilateral) -> String {
    let names = ["top-left", "top-right", "bottom-right", "bottom-left"];
    names
        .iter()
        .zip(quad.corners())
        .map(|(name, p)| format!("{}: ({:.1}, {:.1})", name, p.x, p.y))
        .collect::<Vec<_>>()
        .join("\n")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = cli.resolve_config()?;
    debug!("Detector settings: {:?}", config.detector);
    debug!("Rectify settings: {:?}", config.rectify);

    let img = load_image(cli.command.input())?;
    let detector = CornerDetector::new(config.detector.clone());

    match &cli.command {
        Command::Detect { json, .. } => {
            let quad = detector
                .detect(&img)
                .context("Failed to detect document corners")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&quad)?);
            } else {
                println!("{}", describe(&quad));
            }
        }

        Command::Rectify { corners, .. } => {
            let rectified = rectify_perspective_with(&img, corners, &config.rectify)
                .context("Failed to rectify document")?;
            info!("Rectified to {}x{}", rectified.width, rectified.height);
            if let Some(path) = cli.command.output_path() {
                save_image(&rectified.image, &path)?;
            }
        }

        Command::Scan { margin, .. } => {
            let quad = match detector.detect(&img) {
                Ok(quad) => {
                    info!("Detected corners:\n{}", describe(&quad));
                    quad
                }
                Err(ScanError::NoDocumentFound) => {
                    warn!(
                        "No document found; falling back to the frame inset by {} px",
                        margin
                    );
                    Quadrilateral::inset(img.width(), img.height(), *margin)
                }
                Err(e) => return Err(e).context("Failed to detect document corners"),
            };

            let rectified = rectify_perspective_with(&img, &quad, &config.rectify)
                .context("Failed to rectify document")?;
            info!(
                "Dimensions: {}x{} -> {}x{}",
                img.width(),
                img.height(),
                rectified.width,
                rectified.height
            );
            if let Some(path) = cli.command.output_path() {
                save_image(&rectified.image, &path)?;
            }
        }

        Command::Edges { .. } => {
            let edges = edge_map(&img, &config.detector).context("Failed to compute edge map")?;
            if let Some(path) = cli.command.output_path() {
                save_image(&DynamicImage::ImageLuma8(edges), &path)?;
            }
        }

        Command::Binarize { .. } => {
            let bin = binarize(&img).context("Failed to binarize image")?;
            if let Some(path) = cli.command.output_path() {
                save_image(&DynamicImage::ImageLuma8(bin), &path)?;
            }
        }
    }

    Ok(())
}
