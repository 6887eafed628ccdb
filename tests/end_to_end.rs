use ndarray::Array2;

use specpink::data::loader::{load_frame, load_frames, save_frame, save_master_frame};
use specpink::data::model::{Frame, FrameCategory, Header, MasterFrame, MetadataValue};
use specpink::reduce::correct::ZeroFlatPolicy;
use specpink::reduce::extract::{FixedTracePoints, TraceEndpoints, TracePoint};
use specpink::reduce::flat::illumination_residual;
use specpink::{Pipeline, ReductionConfig, ReductionError, Stage};

const SHAPE: (usize, usize) = (40, 60);

fn frame(tag: &str, data: Array2<f64>) -> Frame {
    let mut header = Header::new();
    header.insert("IMAGETYP".into(), MetadataValue::String(tag.into()));
    Frame::new(data, header)
}

/// Deterministic per-pixel sensitivity pattern, a few counts peak to peak.
fn pixel_noise(r: usize, c: usize, seed: usize) -> f64 {
    (((r * 31 + c * 17 + seed * 7) % 13) as f64 - 6.0) * 0.5
}

fn scenario() -> Vec<Frame> {
    let mut frames = Vec::new();
    for _ in 0..3 {
        frames.push(frame("Bias", Array2::from_elem(SHAPE, 100.0)));
    }
    for seed in 0..3 {
        frames.push(frame(
            "Flat",
            Array2::from_shape_fn(SHAPE, |(r, c)| 500.0 + pixel_noise(r, c, seed)),
        ));
    }
    frames.push(frame("Science", Array2::from_elem(SHAPE, 1000.0)));
    frames
}

fn trace() -> FixedTracePoints {
    FixedTracePoints(TraceEndpoints::new(
        TracePoint::new(5.0, 18.0),
        TracePoint::new(54.0, 22.0),
    ))
}

#[test]
fn bias_only_reduction_gives_900() {
    let frames: Vec<Frame> = scenario()
        .into_iter()
        .filter(|f| f.type_tag("IMAGETYP").as_deref() != Some("flat"))
        .collect();
    let output = Pipeline::new(ReductionConfig::default())
        .unwrap()
        .run(frames, &mut trace())
        .unwrap();

    let science = output.calibration.get(FrameCategory::Science).unwrap();
    assert!(science.data().iter().all(|&v| v == 900.0));
    assert!(output.science.flux().iter().all(|&f| f == 900.0 * 11.0));
}

#[test]
fn zero_in_normalized_flat_fails_by_default() {
    let err = Pipeline::new(ReductionConfig::default())
        .unwrap()
        .run(scenario(), &mut trace())
        .unwrap_err();
    match err {
        ReductionError::DivisionSingularity { category, .. } => {
            assert_eq!(category, FrameCategory::Science);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn leave_uncorrected_policy_masks_and_reports() {
    let config = ReductionConfig {
        zero_flat_policy: ZeroFlatPolicy::LeaveUncorrected,
        ..Default::default()
    };
    let output = Pipeline::new(config).unwrap().run(scenario(), &mut trace()).unwrap();

    let flat = output.masters.normalized_flat().unwrap();
    let min = flat.data().iter().copied().fold(f64::INFINITY, f64::min);
    let max = flat.data().iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert_eq!((min, max), (0.0, 1.0));

    let science = output.calibration.get(FrameCategory::Science).unwrap().data();
    assert!(science.iter().all(|v| v.is_finite() && *v >= 900.0));
    for ((r, c), &f) in flat.data().indexed_iter() {
        if f == 0.0 {
            assert_eq!(science[[r, c]], 900.0);
        }
    }

    let report = &output.report;
    assert!(report.corrections.masked_pixels >= 1);
    assert!(report.corrections.applied.contains(&Stage::FlatFielding));
    assert_eq!(
        report.missing_masters,
        vec![FrameCategory::Dark, FrameCategory::LampDark, FrameCategory::Lamp]
    );
    assert!(output.lamp.is_none());
    assert!(output.science.flux().iter().all(|f| f.is_finite()));
}

#[test]
fn flat_residual_ignores_illumination_gradient() {
    let noise = Array2::from_shape_fn((80, 80), |(r, c)| pixel_noise(r, c, 0));
    let even = noise.mapv(|v| 500.0 + v);
    let graded = Array2::from_shape_fn((80, 80), |(r, c)| {
        500.0 + 2.0 * c as f64 - 0.75 * r as f64 + noise[[r, c]]
    });

    let a = illumination_residual(&even, 5.0);
    let b = illumination_residual(&graded, 5.0);
    // Away from the kernel-radius border the gradient drops out.
    for r in 20..60 {
        for c in 20..60 {
            assert!((a[[r, c]] - b[[r, c]]).abs() < 1e-8);
        }
    }
}

#[test]
fn master_frame_survives_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let data = Array2::from_shape_fn(SHAPE, |(r, c)| 100.0 + pixel_noise(r, c, 3));
    let master = MasterFrame::new(FrameCategory::Bias, frame("Bias", data), 3);

    let path = save_master_frame(dir.path(), &master).unwrap();
    let loaded = load_frame(&path).unwrap();

    assert_eq!(loaded.data(), master.data());
    assert_eq!(loaded.type_tag("IMAGETYP").as_deref(), Some("bias"));
}

#[test]
fn pipeline_runs_on_frames_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    for (i, f) in scenario().iter().enumerate() {
        let ext = if i % 2 == 0 { "parquet" } else { "json" };
        save_frame(&dir.path().join(format!("frame_{i:02}.{ext}")), f).unwrap();
    }

    let frames = load_frames(dir.path()).unwrap();
    assert_eq!(frames.len(), 7);

    let config = ReductionConfig {
        zero_flat_policy: ZeroFlatPolicy::LeaveUncorrected,
        ..Default::default()
    };
    let output = Pipeline::new(config).unwrap().run(frames, &mut trace()).unwrap();
    assert_eq!(output.science.len(), 50);
    assert_eq!(output.report.dropped_frames, 0);
}
