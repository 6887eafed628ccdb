use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, Float32Array, Float64Array, Float64Builder, LargeListArray, ListArray, ListBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::{debug, info};
use ndarray::Array2;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::{Map, Number, Value as JsonValue, json};

use super::model::{
    Frame, FrameCategory, Header, MasterFrame, MetadataValue, Spectrum, WavelengthScale,
};
use crate::color::gray_levels;

/// Arrow schema metadata key holding the frame header as a JSON object.
pub const HEADER_KEY: &str = "header";

const ROW_COLUMN: &str = "row";

/// File name of the normalized flat written next to the masters.
pub const NORMALIZED_FLAT_FILE: &str = "master_flat_normalized.parquet";

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn is_frame_file(path: &Path) -> bool {
    matches!(extension(path).as_str(), "parquet" | "pq" | "json")
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load one frame.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` / `.pq` – one `row` list column, header JSON in the schema metadata
/// * `.json`            – `{ "header": { ... }, "data": [[...], ...] }`
pub fn load_frame(path: &Path) -> Result<Frame> {
    let frame = match extension(path).as_str() {
        "parquet" | "pq" => load_parquet_frame(path),
        "json" => load_json_frame(path),
        other => bail!("Unsupported file extension: .{other}"),
    };
    frame.with_context(|| format!("loading frame {}", path.display()))
}

/// Frame files in `dir`, sorted by path.
pub fn discover_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("listing input directory {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.context("reading directory entry")?.path();
        if path.is_file() && is_frame_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load every frame file in `dir`, in sorted order.
pub fn load_frames(dir: &Path) -> Result<Vec<Frame>> {
    let paths = discover_frames(dir)?;
    if paths.is_empty() {
        bail!("No frame files (.parquet, .pq, .json) in {}", dir.display());
    }
    let frames = paths
        .iter()
        .map(|path| {
            debug!("Loading {}", path.display());
            load_frame(path)
        })
        .collect::<Result<Vec<_>>>()?;
    info!("Loaded {} frames from {}", frames.len(), dir.display());
    Ok(frames)
}

/// Write a frame.  Dispatch by extension, same formats as [`load_frame`].
pub fn save_frame(path: &Path, frame: &Frame) -> Result<()> {
    let written = match extension(path).as_str() {
        "parquet" | "pq" => save_parquet_frame(path, frame),
        "json" => save_json_frame(path, frame),
        other => bail!("Unsupported file extension: .{other}"),
    };
    written.with_context(|| format!("writing frame {}", path.display()))
}

pub fn master_file_name(category: FrameCategory) -> String {
    format!("master_{category}.parquet")
}

/// Write `master` as `dir/master_<category>.parquet`, recording the number
/// of combined frames in `NCOMBINE`.
pub fn save_master_frame(dir: &Path, master: &MasterFrame) -> Result<PathBuf> {
    let path = dir.join(master_file_name(master.category()));
    let frame = master.frame().with_header_value(
        "NCOMBINE",
        MetadataValue::Integer(master.combined() as i64),
    );
    save_frame(&path, &frame)?;
    info!("Saved {} master to {}", master.category(), path.display());
    Ok(path)
}

pub fn save_normalized_flat(dir: &Path, flat: &Frame) -> Result<PathBuf> {
    let path = dir.join(NORMALIZED_FLAT_FILE);
    save_frame(&path, flat)?;
    info!("Saved normalized flat to {}", path.display());
    Ok(path)
}

/// 8-bit grayscale quick-look, min/max stretched, row 0 at the bottom.
pub fn save_preview_png(path: &Path, frame: &Frame) -> Result<()> {
    let (rows, cols) = frame.shape();
    let pixels = gray_levels(frame.data(), true);
    let image = image::GrayImage::from_raw(cols as u32, rows as u32, pixels)
        .context("preview buffer does not match frame shape")?;
    image
        .save(path)
        .with_context(|| format!("writing preview {}", path.display()))
}

// ---------------------------------------------------------------------------
// Header <-> JSON
// ---------------------------------------------------------------------------

fn header_to_json(header: &Header) -> JsonValue {
    let map: Map<String, JsonValue> = header
        .iter()
        .map(|(key, value)| {
            let value = match value {
                MetadataValue::String(s) | MetadataValue::Date(s) => JsonValue::String(s.clone()),
                MetadataValue::Integer(i) => JsonValue::from(*i),
                MetadataValue::Float(f) => {
                    Number::from_f64(*f).map_or(JsonValue::Null, JsonValue::Number)
                }
                MetadataValue::Bool(b) => JsonValue::Bool(*b),
                MetadataValue::Null => JsonValue::Null,
            };
            (key.clone(), value)
        })
        .collect();
    JsonValue::Object(map)
}

fn header_from_json(val: &JsonValue) -> Result<Header> {
    let obj = val.as_object().context("header is not a JSON object")?;
    Ok(obj
        .iter()
        .map(|(key, val)| (key.clone(), json_to_metadata(val)))
        .collect())
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

/// Stack equal-length rows into a `(rows, cols)` array.
fn rows_to_array(rows: Vec<Vec<f64>>) -> Result<Array2<f64>> {
    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, Vec::len);
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_cols) {
        bail!("Row {i} has {} values, expected {n_cols}", row.len());
    }
    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n_rows, n_cols), flat).context("building frame array")
}

// ---------------------------------------------------------------------------
// JSON frames
// ---------------------------------------------------------------------------

/// ```json
/// {
///   "header": { "IMAGETYP": "Bias", "EXPTIME": 0.0 },
///   "data": [[100.2, 99.8, ...], ...]
/// }
/// ```
fn load_json_frame(path: &Path) -> Result<Frame> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;
    let obj = root.as_object().context("Expected top-level JSON object")?;

    let header = match obj.get(HEADER_KEY) {
        Some(val) => header_from_json(val)?,
        None => Header::new(),
    };

    let rows = obj
        .get("data")
        .and_then(|v| v.as_array())
        .context("missing or invalid 'data' array")?
        .iter()
        .enumerate()
        .map(|(i, row)| json_array_to_f64(row, i))
        .collect::<Result<Vec<_>>>()?;

    Ok(Frame::new(rows_to_array(rows)?, header))
}

fn json_array_to_f64(val: &JsonValue, row: usize) -> Result<Vec<f64>> {
    let arr = val
        .as_array()
        .with_context(|| format!("Row {row}: not an array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Row {row}, column {j}: not a number"))
        })
        .collect()
}

fn save_json_frame(path: &Path, frame: &Frame) -> Result<()> {
    let data: Vec<Vec<f64>> = frame.data().rows().into_iter().map(|r| r.to_vec()).collect();
    let root = json!({
        "header": header_to_json(frame.header()),
        "data": data,
    });
    let text = serde_json::to_string(&root).context("serializing frame")?;
    std::fs::write(path, text).context("writing JSON file")
}

// ---------------------------------------------------------------------------
// Parquet frames
// ---------------------------------------------------------------------------

/// Expected schema:
/// - `row`: List<Float64> or LargeList<Float64> – one record per detector row
/// - schema metadata `header`: JSON object with the header cards
fn load_parquet_frame(path: &Path) -> Result<Frame> {
    let file = File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;

    let header = match builder.schema().metadata().get(HEADER_KEY) {
        Some(text) => {
            let val: JsonValue = serde_json::from_str(text).context("parsing frame header")?;
            header_from_json(&val)?
        }
        None => Header::new(),
    };

    let reader = builder.build().context("building parquet reader")?;
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.context("reading record batch")?;
        let idx = batch
            .schema()
            .index_of(ROW_COLUMN)
            .context("Parquet file missing 'row' column")?;
        let col = batch.column(idx);
        for row in 0..batch.num_rows() {
            let values = extract_f64_list(col, row)
                .with_context(|| format!("Row {row}: failed to read values"))?;
            rows.push(values);
        }
    }

    Ok(Frame::new(rows_to_array(rows)?, header))
}

fn save_parquet_frame(path: &Path, frame: &Frame) -> Result<()> {
    let (rows, cols) = frame.shape();
    let mut builder = ListBuilder::new(Float64Builder::with_capacity(rows * cols));
    for row in frame.data().rows() {
        let values = builder.values();
        for &v in row {
            values.append_value(v);
        }
        builder.append(true);
    }
    let row_array = builder.finish();

    let header_json =
        serde_json::to_string(&header_to_json(frame.header())).context("serializing header")?;
    let schema = Arc::new(Schema::new_with_metadata(
        vec![Field::new(
            ROW_COLUMN,
            DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
            false,
        )],
        HashMap::from([(HEADER_KEY.to_string(), header_json)]),
    ));

    let batch = RecordBatch::try_new(schema.clone(), vec![Arc::new(row_array)])
        .context("building record batch")?;
    let file = File::create(path).context("creating parquet file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

// ---------------------------------------------------------------------------
// Spectrum CSV
// ---------------------------------------------------------------------------

/// CSV layout:
/// ```text
/// # scale=calibrated:Angstrom
/// # label=science
/// wavelength,flux,error
/// 4000.0,9900.0,31.4
/// ```
/// `# key=value` comment lines come first; `error` is optional.
pub fn write_spectrum_csv(path: &Path, spectrum: &Spectrum) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    writeln!(file, "# scale={}", spectrum.scale()).context("writing CSV preamble")?;
    if let Some(label) = spectrum.label() {
        writeln!(file, "# label={label}").context("writing CSV preamble")?;
    }

    let mut writer = csv::Writer::from_writer(file);
    let error = spectrum.error();
    if error.is_some() {
        writer.write_record(["wavelength", "flux", "error"])?;
    } else {
        writer.write_record(["wavelength", "flux"])?;
    }
    for (i, (w, f)) in spectrum.wavelength().iter().zip(spectrum.flux()).enumerate() {
        let mut record = vec![w.to_string(), f.to_string()];
        if let Some(err) = error {
            record.push(err[i].to_string());
        }
        writer.write_record(&record).context("writing CSV row")?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

/// Read a spectrum written by [`write_spectrum_csv`]. Without a `scale`
/// line the axis is taken as pixel-indexed.
pub fn load_spectrum_csv(path: &Path) -> Result<Spectrum> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;

    let mut scale = WavelengthScale::Pixel;
    let mut label = None;
    for line in text.lines().take_while(|l| l.starts_with('#')) {
        let Some((key, value)) = line.trim_start_matches('#').split_once('=') else {
            continue;
        };
        match key.trim() {
            "scale" => scale = value.parse().map_err(anyhow::Error::msg)?,
            "label" => label = Some(value.trim().to_string()),
            _ => {}
        }
    }

    let mut reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .from_reader(text.as_bytes());
    let headers = reader.headers().context("reading CSV headers")?.clone();
    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let w_idx = column("wavelength").context("CSV missing 'wavelength' column")?;
    let f_idx = column("flux").context("CSV missing 'flux' column")?;
    let e_idx = column("error");

    let mut wavelength = Vec::new();
    let mut flux = Vec::new();
    let mut error = e_idx.map(|_| Vec::new());

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let parse = |idx: usize, col: &str| -> Result<f64> {
            let tok = record.get(idx).unwrap_or("");
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row_no}, {col}: '{tok}' is not a number"))
        };
        wavelength.push(parse(w_idx, "wavelength")?);
        flux.push(parse(f_idx, "flux")?);
        if let (Some(idx), Some(values)) = (e_idx, error.as_mut()) {
            values.push(parse(idx, "error")?);
        }
    }

    let spectrum = Spectrum::new(wavelength, flux, error, scale)?;
    Ok(match label {
        Some(label) => spectrum.with_label(&label),
        None => spectrum,
    })
}
