use std::path::PathBuf;

use anyhow::{Context, Result};
use brainseg::engine::{VOLUME_SLICES, VOLUME_START_AT};
use brainseg::{aggregate, class_map_for, summarize, SegmentationService, TumorClass};
use clap::Parser;
use ndarray::Axis;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the segmentation model (ONNX file)
    #[arg(long, default_value = "best_model.onnx")]
    model: PathBuf,

    /// FLAIR sequence volume (.nii or .nii.gz)
    #[arg(long)]
    flair: PathBuf,

    /// T1CE sequence volume (.nii or .nii.gz)
    #[arg(long)]
    t1ce: PathBuf,

    /// Slice index to segment in single-slice mode
    #[arg(long, default_value_t = 75)]
    slice: usize,

    /// Segment a slice range in one batched pass instead of a single slice
    #[arg(long)]
    volume: bool,

    /// First slice of the range in volume mode
    #[arg(long, default_value_t = VOLUME_START_AT)]
    start: usize,

    /// Number of slices in volume mode
    #[arg(long, default_value_t = VOLUME_SLICES)]
    count: usize,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("Loading segmentation model from {}", args.model.display());
    let service = SegmentationService::initialize(&args.model);

    if args.volume {
        run_volume(&service, &args)
    } else {
        run_slice(&service, &args)
    }
}

fn run_slice(service: &SegmentationService, args: &Args) -> Result<()> {
    tracing::info!(
        "Segmenting slice {} of {} / {}",
        args.slice,
        args.flair.display(),
        args.t1ce.display()
    );

    let prediction = service
        .infer_slice(&args.flair, &args.t1ce, args.slice)
        .context("Slice segmentation failed")?;

    let stats = aggregate(prediction.class_map.view());
    let summary = summarize(&stats);

    for (class, count) in stats.iter() {
        let label = TumorClass::from_id(class)
            .map(TumorClass::label)
            .unwrap_or("UNKNOWN");
        tracing::info!("Class {} ({}): {} pixels", class, label, count);
    }
    tracing::info!(
        "Tumor coverage: {:.2}% ({} of {} pixels)",
        summary.tumor_percentage,
        summary.tumor_pixels,
        summary.total_pixels
    );
    tracing::info!(
        "Tumor detected: {}",
        if summary.tumor_detected { "yes" } else { "no" }
    );
    tracing::info!("Assessment: {}", summary.assessment.label());

    Ok(())
}

fn run_volume(service: &SegmentationService, args: &Args) -> Result<()> {
    tracing::info!(
        "Segmenting {} slices starting at {} in one batched pass",
        args.count,
        args.start
    );

    let probabilities = service
        .infer_volume(&args.flair, &args.t1ce, args.start, args.count)
        .context("Volume segmentation failed")?;

    let mut slices_with_tumor = 0usize;
    for (offset, slice_probabilities) in probabilities.axis_iter(Axis(0)).enumerate() {
        let class_map = class_map_for(slice_probabilities);
        let summary = summarize(&aggregate(class_map.view()));
        if summary.tumor_detected {
            slices_with_tumor += 1;
        }
        tracing::debug!(
            "Slice {}: {:.2}% tumor coverage",
            args.start + offset,
            summary.tumor_percentage
        );
    }

    tracing::info!(
        "Evaluated {} slices; tumor detected on {}",
        args.count,
        slices_with_tumor
    );

    Ok(())
}
