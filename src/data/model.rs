use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use ndarray::Array2;

use crate::error::{ReductionError, Result, Stage};

// ---------------------------------------------------------------------------
// MetadataValue – a single header card value
// ---------------------------------------------------------------------------

/// A dynamically-typed header value.
/// Headers are `BTreeMap`s so `MetadataValue` must be `Ord`.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// ISO-8601 date string kept as text for simplicity.
    Date(String),
    Null,
}

// -- Manual Eq/Ord so we can put MetadataValue in BTreeSet --

impl Eq for MetadataValue {}

impl PartialOrd for MetadataValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MetadataValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use MetadataValue::*;
        fn discriminant(v: &MetadataValue) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Date(_) => 5,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) | (Date(a), Date(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v:.4}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Date(d) => write!(f, "{d}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl MetadataValue {
    /// Try to interpret the value as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Borrow the text of string-like values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::String(s) | MetadataValue::Date(s) => Some(s),
            _ => None,
        }
    }
}

/// Frame header: card name → value.
pub type Header = BTreeMap<String, MetadataValue>;

// ---------------------------------------------------------------------------
// FrameCategory
// ---------------------------------------------------------------------------

/// Calibration role of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameCategory {
    Bias,
    Dark,
    LampDark,
    Flat,
    Lamp,
    Science,
}

impl FrameCategory {
    pub const ALL: [FrameCategory; 6] = [
        FrameCategory::Bias,
        FrameCategory::Dark,
        FrameCategory::LampDark,
        FrameCategory::Flat,
        FrameCategory::Lamp,
        FrameCategory::Science,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FrameCategory::Bias => "bias",
            FrameCategory::Dark => "dark",
            FrameCategory::LampDark => "lamp_dark",
            FrameCategory::Flat => "flat",
            FrameCategory::Lamp => "lamp",
            FrameCategory::Science => "science",
        }
    }
}

impl fmt::Display for FrameCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Frame – one 2-D exposure with its header
// ---------------------------------------------------------------------------

/// A detector image, shape `(rows, cols)`, plus header.
///
/// Frames are never modified after construction; corrections build new ones
/// with [`Frame::with_data`].
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    data: Array2<f64>,
    header: Header,
}

impl Frame {
    pub fn new(data: Array2<f64>, header: Header) -> Self {
        Self { data, header }
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Look up a header card. Exact match first, then case-insensitive.
    pub fn header_value(&self, key: &str) -> Option<&MetadataValue> {
        self.header.get(key).or_else(|| {
            self.header
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v)
        })
    }

    /// The frame's type tag under `key`, trimmed and lower-cased.
    pub fn type_tag(&self, key: &str) -> Option<String> {
        let value = self.header_value(key)?;
        let text = match value {
            MetadataValue::Null => return None,
            other => other.as_str().map(str::to_owned).unwrap_or_else(|| other.to_string()),
        };
        Some(text.trim().to_lowercase())
    }

    /// A new frame with the same header and different pixels.
    pub fn with_data(&self, data: Array2<f64>) -> Frame {
        Frame {
            data,
            header: self.header.clone(),
        }
    }

    /// A new frame with the same pixels and an extra header card.
    pub fn with_header_value(&self, key: &str, value: MetadataValue) -> Frame {
        let mut header = self.header.clone();
        header.insert(key.to_string(), value);
        Frame {
            data: self.data.clone(),
            header,
        }
    }
}

// ---------------------------------------------------------------------------
// FrameGroup – classified frames, per category, in discovery order
// ---------------------------------------------------------------------------

/// Frames grouped by category. All frames of a category share one shape.
#[derive(Debug, Clone, Default)]
pub struct FrameGroup {
    groups: BTreeMap<FrameCategory, Vec<Frame>>,
}

impl FrameGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame, rejecting one whose shape differs from the group's.
    pub fn push(&mut self, category: FrameCategory, frame: Frame) -> Result<()> {
        let frames = self.groups.entry(category).or_default();
        if let Some(first) = frames.first() {
            if first.shape() != frame.shape() {
                return Err(ReductionError::ShapeMismatch {
                    stage: Stage::Classify,
                    category,
                    expected: first.shape(),
                    actual: frame.shape(),
                });
            }
        }
        frames.push(frame);
        Ok(())
    }

    pub fn frames(&self, category: FrameCategory) -> &[Frame] {
        self.groups
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total number of frames across categories.
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// MasterFrame – combined frame for one category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MasterFrame {
    category: FrameCategory,
    frame: Frame,
    combined: usize,
}

impl MasterFrame {
    pub fn new(category: FrameCategory, frame: Frame, combined: usize) -> Self {
        Self {
            category,
            frame,
            combined,
        }
    }

    pub fn category(&self) -> FrameCategory {
        self.category
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn data(&self) -> &Array2<f64> {
        self.frame.data()
    }

    pub fn header(&self) -> &Header {
        self.frame.header()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.frame.shape()
    }

    /// Number of raw frames that went into this master.
    pub fn combined(&self) -> usize {
        self.combined
    }

    /// Same category and header, new pixels.
    pub fn with_data(&self, data: Array2<f64>) -> MasterFrame {
        MasterFrame {
            category: self.category,
            frame: self.frame.with_data(data),
            combined: self.combined,
        }
    }
}

// ---------------------------------------------------------------------------
// CalibrationSet – masters passed between correction stages
// ---------------------------------------------------------------------------

/// All master frames of a run plus the normalized flat.
///
/// Updates return a new set; entries that did not change are shared.
#[derive(Debug, Clone, Default)]
pub struct CalibrationSet {
    masters: BTreeMap<FrameCategory, Arc<MasterFrame>>,
    normalized_flat: Option<Arc<Frame>>,
}

impl CalibrationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_masters(masters: impl IntoIterator<Item = MasterFrame>) -> Self {
        Self {
            masters: masters
                .into_iter()
                .map(|m| (m.category(), Arc::new(m)))
                .collect(),
            normalized_flat: None,
        }
    }

    pub fn get(&self, category: FrameCategory) -> Option<&MasterFrame> {
        self.masters.get(&category).map(Arc::as_ref)
    }

    pub fn contains(&self, category: FrameCategory) -> bool {
        self.masters.contains_key(&category)
    }

    pub fn normalized_flat(&self) -> Option<&Frame> {
        self.normalized_flat.as_deref()
    }

    /// Present masters in category order.
    pub fn masters(&self) -> impl Iterator<Item = &MasterFrame> {
        self.masters.values().map(Arc::as_ref)
    }

    /// A copy of this set with `master` replacing its category's entry.
    pub fn with_master(&self, master: MasterFrame) -> CalibrationSet {
        let mut next = self.clone();
        next.masters.insert(master.category(), Arc::new(master));
        next
    }

    pub fn with_normalized_flat(&self, flat: Frame) -> CalibrationSet {
        let mut next = self.clone();
        next.normalized_flat = Some(Arc::new(flat));
        next
    }

    /// Whether both sets hold the very same entry for `category`.
    pub fn shares_entry(&self, other: &CalibrationSet, category: FrameCategory) -> bool {
        match (self.masters.get(&category), other.masters.get(&category)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Spectrum – the extracted 1-D result
// ---------------------------------------------------------------------------

/// Physical meaning of a spectrum's wavelength axis.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum WavelengthScale {
    /// Column index placeholder, no dispersion solution applied.
    #[default]
    Pixel,
    Calibrated { unit: String },
}

impl WavelengthScale {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, WavelengthScale::Calibrated { .. })
    }

    pub fn axis_label(&self) -> String {
        match self {
            WavelengthScale::Pixel => "Pixel (uncalibrated)".to_string(),
            WavelengthScale::Calibrated { unit } => format!("Wavelength [{unit}]"),
        }
    }
}

impl fmt::Display for WavelengthScale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WavelengthScale::Pixel => write!(f, "pixel"),
            WavelengthScale::Calibrated { unit } => write!(f, "calibrated:{unit}"),
        }
    }
}

impl FromStr for WavelengthScale {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s == "pixel" {
            return Ok(WavelengthScale::Pixel);
        }
        match s.strip_prefix("calibrated:") {
            Some(unit) if !unit.trim().is_empty() => Ok(WavelengthScale::Calibrated {
                unit: unit.trim().to_string(),
            }),
            _ => Err(format!("unknown wavelength scale '{s}'")),
        }
    }
}

/// Wavelength, flux and optional error, all the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    wavelength: Vec<f64>,
    flux: Vec<f64>,
    error: Option<Vec<f64>>,
    scale: WavelengthScale,
    /// Free-form annotations (label, source category, ...).
    pub metadata: BTreeMap<String, MetadataValue>,
}

impl Spectrum {
    pub fn new(
        wavelength: Vec<f64>,
        flux: Vec<f64>,
        error: Option<Vec<f64>>,
        scale: WavelengthScale,
    ) -> Result<Self> {
        let error_len = error.as_ref().map(Vec::len);
        if wavelength.len() != flux.len() || error_len.is_some_and(|n| n != flux.len()) {
            return Err(ReductionError::SpectrumLength {
                wavelength: wavelength.len(),
                flux: flux.len(),
                error: error_len,
            });
        }
        Ok(Self {
            wavelength,
            flux,
            error,
            scale,
            metadata: BTreeMap::new(),
        })
    }

    pub fn wavelength(&self) -> &[f64] {
        &self.wavelength
    }

    pub fn flux(&self) -> &[f64] {
        &self.flux
    }

    pub fn error(&self) -> Option<&[f64]> {
        self.error.as_deref()
    }

    pub fn scale(&self) -> &WavelengthScale {
        &self.scale
    }

    pub fn len(&self) -> usize {
        self.flux.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flux.is_empty()
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.metadata
            .insert("label".to_string(), MetadataValue::String(label.to_string()));
        self
    }

    pub fn label(&self) -> Option<&str> {
        self.metadata.get("label").and_then(MetadataValue::as_str)
    }

    /// Replace the wavelength axis, keeping flux, error and metadata.
    pub fn with_wavelength(&self, wavelength: Vec<f64>, scale: WavelengthScale) -> Result<Self> {
        let mut next = Spectrum::new(wavelength, self.flux.clone(), self.error.clone(), scale)?;
        next.metadata = self.metadata.clone();
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn tagged(tag: &str, data: Array2<f64>) -> Frame {
        let mut header = Header::new();
        header.insert("IMAGETYP".into(), MetadataValue::String(tag.into()));
        Frame::new(data, header)
    }

    #[test]
    fn type_tag_is_trimmed_and_lowercased() {
        let frame = tagged("  Bias Frame ", array![[1.0]]);
        assert_eq!(frame.type_tag("IMAGETYP").as_deref(), Some("bias frame"));
        assert_eq!(frame.type_tag("imagetyp").as_deref(), Some("bias frame"));
        assert_eq!(frame.type_tag("OBJECT"), None);
    }

    #[test]
    fn frame_group_rejects_mismatched_shapes() {
        let mut group = FrameGroup::new();
        group
            .push(FrameCategory::Bias, tagged("bias", Array2::zeros((4, 5))))
            .unwrap();
        let err = group
            .push(FrameCategory::Bias, tagged("bias", Array2::zeros((4, 6))))
            .unwrap_err();
        match err {
            ReductionError::ShapeMismatch {
                category,
                expected,
                actual,
                ..
            } => {
                assert_eq!(category, FrameCategory::Bias);
                assert_eq!(expected, (4, 5));
                assert_eq!(actual, (4, 6));
            }
            other => panic!("unexpected error {other:?}"),
        }
        // Other categories may have their own shape.
        group
            .push(FrameCategory::Flat, tagged("flat", Array2::zeros((2, 2))))
            .unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.frames(FrameCategory::Dark).len(), 0);
    }

    #[test]
    fn with_data_copies_the_header() {
        let frame = tagged("flat", array![[1.0, 2.0]]);
        let derived = frame
            .with_data(array![[3.0, 4.0]])
            .with_header_value("IMAGETYP", MetadataValue::String("changed".into()));
        assert_eq!(frame.type_tag("IMAGETYP").as_deref(), Some("flat"));
        assert_eq!(derived.type_tag("IMAGETYP").as_deref(), Some("changed"));
        assert_eq!(frame.data(), &array![[1.0, 2.0]]);
    }

    #[test]
    fn calibration_set_updates_do_not_touch_the_input() {
        let bias = MasterFrame::new(FrameCategory::Bias, tagged("bias", array![[1.0]]), 1);
        let science = MasterFrame::new(FrameCategory::Science, tagged("light", array![[5.0]]), 1);
        let set = CalibrationSet::from_masters([bias, science.clone()]);

        let next = set.with_master(science.with_data(array![[4.0]]));

        assert_eq!(set.get(FrameCategory::Science).unwrap().data(), &array![[5.0]]);
        assert_eq!(next.get(FrameCategory::Science).unwrap().data(), &array![[4.0]]);
        assert!(next.shares_entry(&set, FrameCategory::Bias));
        assert!(!next.shares_entry(&set, FrameCategory::Science));
    }

    #[test]
    fn spectrum_rejects_length_mismatch() {
        assert!(Spectrum::new(vec![0.0, 1.0], vec![1.0, 2.0], None, WavelengthScale::Pixel).is_ok());
        assert!(matches!(
            Spectrum::new(vec![0.0], vec![1.0, 2.0], None, WavelengthScale::Pixel),
            Err(ReductionError::SpectrumLength { .. })
        ));
        assert!(matches!(
            Spectrum::new(vec![0.0, 1.0], vec![1.0, 2.0], Some(vec![0.1]), WavelengthScale::Pixel),
            Err(ReductionError::SpectrumLength { error: Some(1), .. })
        ));
    }

    #[test]
    fn wavelength_scale_round_trips_through_text() {
        for scale in [
            WavelengthScale::Pixel,
            WavelengthScale::Calibrated {
                unit: "Angstrom".into(),
            },
        ] {
            assert_eq!(scale.to_string().parse::<WavelengthScale>().unwrap(), scale);
        }
        assert!("calibrated:".parse::<WavelengthScale>().is_err());
    }

    #[test]
    fn metadata_values_order_by_kind_then_value() {
        let mut values = vec![
            MetadataValue::String("b".into()),
            MetadataValue::Integer(3),
            MetadataValue::Null,
            MetadataValue::String("a".into()),
        ];
        values.sort();
        assert_eq!(values[0], MetadataValue::Null);
        assert_eq!(values[1], MetadataValue::Integer(3));
        assert_eq!(values[2], MetadataValue::String("a".into()));
    }
}
