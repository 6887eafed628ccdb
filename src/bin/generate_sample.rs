use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use ndarray::Array2;

use specpink::config::ReductionConfig;
use specpink::data::loader::save_frame;
use specpink::data::model::{Frame, Header, MetadataValue};
use specpink::reduce::correct::ZeroFlatPolicy;
use specpink::reduce::extract::{TraceEndpoints, TracePoint};
use specpink::reduce::wavecal::PolynomialDispersion;

const ROWS: usize = 64;
const COLS: usize = 240;
const BIAS_LEVEL: f64 = 100.0;
const READ_NOISE: f64 = 2.0;
const DARK_CURRENT: f64 = 6.0;
const LAMP_DARK_CURRENT: f64 = 3.0;

/// Write a synthetic raw frame set and a matching reduction.json
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    /// Output directory; frames go to `<output>/raw`.
    #[arg(short, long, default_value = "sample_data")]
    output: PathBuf,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Shared detector model: per-pixel response, slit illumination, trace.
struct Detector {
    response: Array2<f64>,
    trace: TraceEndpoints,
}

impl Detector {
    fn new(rng: &mut SimpleRng) -> Self {
        Self {
            response: Array2::from_shape_simple_fn((ROWS, COLS), || rng.gauss(1.0, 0.02)),
            trace: TraceEndpoints::new(TracePoint::new(12.0, 26.0), TracePoint::new(228.0, 38.0)),
        }
    }

    fn trace_row(&self, col: f64) -> f64 {
        let (a, b) = (self.trace.start, self.trace.end);
        a.y + (b.y - a.y) * (col - a.x) / (b.x - a.x)
    }

    /// Large-scale vignetting across the slit and along dispersion.
    fn illumination(r: usize, c: usize) -> f64 {
        let x = c as f64 / COLS as f64 - 0.5;
        let y = r as f64 / ROWS as f64 - 0.5;
        1.0 - 0.6 * x * x - 0.3 * y * y
    }

    fn expose(
        &self,
        rng: &mut SimpleRng,
        offset: f64,
        signal: impl Fn(usize, usize) -> f64,
    ) -> Array2<f64> {
        Array2::from_shape_fn((ROWS, COLS), |(r, c)| {
            BIAS_LEVEL + offset + signal(r, c) * self.response[[r, c]] + rng.gauss(0.0, READ_NOISE)
        })
    }
}

fn header(tag: &str, exptime: f64, index: usize) -> Header {
    let mut header = Header::new();
    header.insert("IMAGETYP".into(), MetadataValue::String(tag.into()));
    header.insert("EXPTIME".into(), MetadataValue::Float(exptime));
    header.insert("FRAMENO".into(), MetadataValue::Integer(index as i64));
    header.insert("DATE-OBS".into(), MetadataValue::Date("2025-03-14T21:05:00".into()));
    header
}

fn write(dir: &Path, name: &str, data: Array2<f64>, header: Header) -> Result<()> {
    let path = dir.join(format!("{name}.parquet"));
    save_frame(&path, &Frame::new(data, header))?;
    println!("  {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = SimpleRng::new(args.seed);
    let detector = Detector::new(&mut rng);

    let raw_dir = args.output.join("raw");
    std::fs::create_dir_all(&raw_dir)
        .with_context(|| format!("creating {}", raw_dir.display()))?;
    println!("Writing frames to {}", raw_dir.display());

    let mut index = 0;
    let mut next = || {
        index += 1;
        index
    };

    for i in 0..5 {
        let data = detector.expose(&mut rng, 0.0, |_, _| 0.0);
        write(&raw_dir, &format!("bias_{i:03}"), data, header("Bias", 0.0, next()))?;
    }
    for i in 0..3 {
        let data = detector.expose(&mut rng, 0.0, |_, _| DARK_CURRENT);
        write(&raw_dir, &format!("dark_{i:03}"), data, header("Dark", 600.0, next()))?;
    }
    for i in 0..3 {
        let data = detector.expose(&mut rng, 0.0, |_, _| LAMP_DARK_CURRENT);
        write(&raw_dir, &format!("lampdark_{i:03}"), data, header("Lamp Dark", 30.0, next()))?;
    }
    for i in 0..5 {
        let data = detector.expose(&mut rng, 0.0, |r, c| 8000.0 * Detector::illumination(r, c));
        write(&raw_dir, &format!("flat_{i:03}"), data, header("Flat Field", 5.0, next()))?;
    }

    // Arc lines fill the slit along the spatial axis.
    let lines = [(30.0, 1.4, 4000.0), (85.0, 1.4, 2500.0), (140.0, 1.4, 6000.0), (201.0, 1.4, 3000.0)];
    let data = detector.expose(&mut rng, LAMP_DARK_CURRENT, |r, c| {
        let arc: f64 = lines
            .iter()
            .map(|&(mu, sigma, amp)| gaussian(c as f64, mu, sigma, amp))
            .sum();
        (arc + 20.0) * Detector::illumination(r, c)
    });
    write(&raw_dir, "lamp_000", data, header("Lamp", 30.0, next()))?;

    // Continuum with two absorption features, spatial profile along the trace.
    let data = detector.expose(&mut rng, DARK_CURRENT, |r, c| {
        let col = c as f64;
        let continuum = 1500.0 - gaussian(col, 70.0, 3.0, 700.0) - gaussian(col, 165.0, 2.0, 500.0);
        let profile = gaussian(r as f64, detector.trace_row(col), 1.6, 1.0);
        continuum * profile * Detector::illumination(r, c)
    });
    write(&raw_dir, "science_000", data, header("Light", 600.0, next()))?;

    // Not a calibration role; the classifier drops it.
    let data = detector.expose(&mut rng, 0.0, |_, _| 50.0);
    write(&raw_dir, "focus_000", data, header("Focus", 1.0, next()))?;

    let config = ReductionConfig {
        trace: Some(detector.trace),
        dispersion: Some(PolynomialDispersion::new(vec![4000.0, 2.0, 1.5e-4], "Angstrom")),
        // The normalized flat is zero at its minimum pixel.
        zero_flat_policy: ZeroFlatPolicy::LeaveUncorrected,
        input_dir: raw_dir,
        output_dir: args.output.join("reduced"),
        write_previews: true,
        ..Default::default()
    };
    let config_path = args.output.join("reduction.json");
    config.to_file(&config_path)?;

    println!("Wrote config to {}", config_path.display());
    println!("Run: specpink reduce --config {}", config_path.display());
    Ok(())
}
