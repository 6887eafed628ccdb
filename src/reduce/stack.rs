//! Median combination of a category's frames into a master frame.

use log::{info, warn};
use ndarray::parallel::prelude::*;
use ndarray::{Array2, Axis};

use crate::data::model::{Frame, FrameCategory, FrameGroup, MasterFrame};
use crate::error::{ReductionError, Result, Stage};

/// Median of `values`, sorting them in place. Even counts average the two
/// middle values. `values` must not be empty.
pub(crate) fn median(values: &mut [f64]) -> f64 {
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        midpoint(values[mid - 1], values[mid])
    }
}

/// Mean of two values without overflowing near `f64::MAX`.
fn midpoint(a: f64, b: f64) -> f64 {
    if a == b {
        a
    } else {
        a / 2.0 + b / 2.0
    }
}

/// Combine `frames` by per-pixel median.
///
/// Returns `Ok(None)` for an empty group. The master's header is a copy of
/// the first frame's header.
pub fn median_combine(category: FrameCategory, frames: &[Frame]) -> Result<Option<MasterFrame>> {
    let Some(first) = frames.first() else {
        warn!("No {category} frames provided");
        return Ok(None);
    };

    let shape = first.shape();
    if let Some(bad) = frames.iter().find(|f| f.shape() != shape) {
        return Err(ReductionError::ShapeMismatch {
            stage: Stage::Stack,
            category,
            expected: shape,
            actual: bad.shape(),
        });
    }

    if frames.len() == 1 {
        info!("Created {category} master from 1 frame");
        return Ok(Some(MasterFrame::new(category, first.clone(), 1)));
    }

    let (_, cols) = shape;
    let mut combined = Array2::<f64>::zeros(shape);
    combined
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(r, mut row)| {
            let mut values = Vec::with_capacity(frames.len());
            for c in 0..cols {
                values.clear();
                values.extend(frames.iter().map(|f| f.data()[[r, c]]));
                row[c] = median(&mut values);
            }
        });

    info!("Created {category} master from {} frames", frames.len());
    Ok(Some(MasterFrame::new(
        category,
        first.with_data(combined),
        frames.len(),
    )))
}

/// Masters for every category of a group.
#[derive(Debug, Clone, Default)]
pub struct StackedMasters {
    pub masters: Vec<MasterFrame>,
    /// Categories with no frames, in category order.
    pub missing: Vec<FrameCategory>,
}

/// Stack every category of `group`.
pub fn stack_group(group: &FrameGroup) -> Result<StackedMasters> {
    let mut stacked = StackedMasters::default();
    for category in FrameCategory::ALL {
        match median_combine(category, group.frames(category))? {
            Some(master) => stacked.masters.push(master),
            None => stacked.missing.push(category),
        }
    }
    Ok(stacked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Header, MetadataValue};
    use ndarray::array;

    fn frame(data: Array2<f64>, exposure: i64) -> Frame {
        let mut header = Header::new();
        header.insert("IMAGETYP".into(), MetadataValue::String("dark".into()));
        header.insert("EXPTIME".into(), MetadataValue::Integer(exposure));
        Frame::new(data, header)
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&mut [5.0, 1.0, 3.0]), 3.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&mut [7.0]), 7.0);
    }

    #[test]
    fn identical_frames_give_that_frame_exactly() {
        let data = array![[0.1, 1e9, -3.25], [7.0, 0.3, 2.0 / 3.0]];
        for n in 1..=6 {
            let frames: Vec<Frame> = (0..n).map(|_| frame(data.clone(), 10)).collect();
            let master = median_combine(FrameCategory::Dark, &frames).unwrap().unwrap();
            assert_eq!(master.data(), &data, "n = {n}");
            assert_eq!(master.combined(), n);
        }

        for extreme in [f64::MAX, -f64::MAX] {
            let data = array![[extreme, 1.0]];
            let frames: Vec<Frame> = (0..2).map(|_| frame(data.clone(), 10)).collect();
            let master = median_combine(FrameCategory::Dark, &frames).unwrap().unwrap();
            assert_eq!(master.data(), &data);
        }
    }

    #[test]
    fn even_median_of_huge_values_stays_finite() {
        let mut values = [f64::MAX, -1.0, f64::MAX, f64::MAX];
        assert_eq!(median(&mut values), f64::MAX);
        let mut values = [f64::MAX, f64::MAX / 2.0];
        let m = median(&mut values);
        assert!(m.is_finite() && m > f64::MAX / 2.0 && m < f64::MAX);
    }

    #[test]
    fn outlier_does_not_move_the_median() {
        let base = [10.0, 11.0, 12.0];
        let mut results = Vec::new();
        for outlier in [1e3, 1e6, 1e12, f64::MAX] {
            let frames: Vec<Frame> = base
                .iter()
                .enumerate()
                .map(|(i, &v)| {
                    let mut data = Array2::from_elem((2, 2), v);
                    if i == 2 {
                        data[[1, 1]] = outlier;
                    }
                    frame(data, 1)
                })
                .collect();
            let master = median_combine(FrameCategory::Dark, &frames).unwrap().unwrap();
            results.push(master.data()[[1, 1]]);
        }
        // Bounded by the remaining values and independent of the outlier.
        assert!(results.iter().all(|&v| v == 11.0), "{results:?}");
    }

    #[test]
    fn header_comes_from_the_first_frame() {
        let frames = vec![
            frame(Array2::zeros((2, 2)), 30),
            frame(Array2::ones((2, 2)), 60),
            frame(Array2::ones((2, 2)), 90),
        ];
        let master = median_combine(FrameCategory::Dark, &frames).unwrap().unwrap();
        assert_eq!(master.header().get("EXPTIME"), Some(&MetadataValue::Integer(30)));
        assert_eq!(master.data(), &Array2::<f64>::ones((2, 2)));
    }

    #[test]
    fn empty_group_is_absent() {
        assert!(median_combine(FrameCategory::Flat, &[]).unwrap().is_none());
    }

    #[test]
    fn mismatched_shapes_fail() {
        let frames = vec![frame(Array2::zeros((2, 2)), 1), frame(Array2::zeros((3, 2)), 1)];
        let err = median_combine(FrameCategory::Bias, &frames).unwrap_err();
        assert!(matches!(
            err,
            ReductionError::ShapeMismatch {
                stage: Stage::Stack,
                category: FrameCategory::Bias,
                ..
            }
        ));
    }

    #[test]
    fn stack_group_reports_missing_categories() {
        let mut group = FrameGroup::new();
        group.push(FrameCategory::Bias, frame(Array2::zeros((2, 2)), 0)).unwrap();
        group.push(FrameCategory::Science, frame(Array2::ones((2, 2)), 0)).unwrap();

        let stacked = stack_group(&group).unwrap();
        let categories: Vec<_> = stacked.masters.iter().map(MasterFrame::category).collect();
        assert_eq!(categories, vec![FrameCategory::Bias, FrameCategory::Science]);
        assert_eq!(
            stacked.missing,
            vec![
                FrameCategory::Dark,
                FrameCategory::LampDark,
                FrameCategory::Flat,
                FrameCategory::Lamp
            ]
        );
    }
}
