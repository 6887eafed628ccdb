use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;

use specpink::app::run_viewer;
use specpink::data::loader::{
    load_frames, save_frame, save_master_frame, save_normalized_flat, save_preview_png,
    write_spectrum_csv,
};
use specpink::data::model::{Frame, FrameCategory};
use specpink::reduce::extract::FixedTracePoints;
use specpink::state::AppState;
use specpink::ui::picker::InteractiveTracePicker;
use specpink::{Pipeline, ReductionConfig, ReductionOutput};

/// Reduce long-slit spectra and browse the results
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build master frames, correct the science frame and extract its spectrum.
    Reduce {
        /// JSON reduction config. Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory with raw frames (overrides the config).
        #[arg(short, long)]
        input: Option<PathBuf>,
        /// Directory for masters and spectra (overrides the config).
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Pick the trace by clicking on the science frame.
        #[arg(long)]
        interactive: bool,
        /// Open the viewer on the extracted spectra when done.
        #[arg(long)]
        show: bool,
    },
    /// Plot one or more spectrum CSV files.
    View { files: Vec<PathBuf> },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Commands::Reduce {
            config,
            input,
            output,
            interactive,
            show,
        } => {
            let mut config = match &config {
                Some(path) => ReductionConfig::from_file(path)?,
                None => ReductionConfig::default(),
            };
            if let Some(input) = input {
                config.input_dir = input;
            }
            if let Some(output) = output {
                config.output_dir = output;
            }
            reduce(&config, interactive, show)
        }
        Commands::View { files } => {
            let mut state = AppState::default();
            for path in &files {
                state.load_file(path);
            }
            run_viewer(state).map_err(|e| anyhow!("viewer failed: {e}"))
        }
    }
}

fn reduce(config: &ReductionConfig, interactive: bool, show: bool) -> Result<()> {
    let frames = load_frames(&config.input_dir)?;
    let pipeline = Pipeline::new(config.clone())?;

    let output = if interactive {
        pipeline.run(frames, &mut InteractiveTracePicker::default())?
    } else {
        let trace = config
            .trace
            .context("config has no \"trace\"; add one or pass --interactive")?;
        pipeline.run(frames, &mut FixedTracePoints(trace))?
    };

    write_outputs(config, &output)?;
    info!("Reduction summary:\n{}", output.report);

    if show {
        let mut state = AppState::default();
        state.add_spectrum(output.science.clone(), "science");
        if let Some(lamp) = &output.lamp {
            state.add_spectrum(lamp.clone(), "lamp");
        }
        run_viewer(state).map_err(|e| anyhow!("viewer failed: {e}"))?;
    }
    Ok(())
}

fn write_outputs(config: &ReductionConfig, output: &ReductionOutput) -> Result<()> {
    let dir = config.output_dir.as_path();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory {}", dir.display()))?;

    for master in output.masters.masters() {
        save_master_frame(dir, master)?;
        if config.write_previews {
            preview(dir, &format!("master_{}", master.category()), master.frame())?;
        }
    }
    if let Some(flat) = output.masters.normalized_flat() {
        save_normalized_flat(dir, flat)?;
        if config.write_previews {
            preview(dir, "master_flat_normalized", flat)?;
        }
    }
    if let Some(science) = output.calibration.get(FrameCategory::Science) {
        save_frame(&dir.join("science_reduced.parquet"), science.frame())?;
        if config.write_previews {
            preview(dir, "science_reduced", science.frame())?;
        }
    }

    write_spectrum_csv(&dir.join("spectrum.csv"), &output.science)?;
    if let Some(lamp) = &output.lamp {
        write_spectrum_csv(&dir.join("lamp_spectrum.csv"), lamp)?;
    }
    info!("Wrote results to {}", dir.display());
    Ok(())
}

fn preview(dir: &Path, stem: &str, frame: &Frame) -> Result<()> {
    save_preview_png(&dir.join(format!("{stem}.png")), frame)
}
