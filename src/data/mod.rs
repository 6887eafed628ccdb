/// Data layer: core types, classification, and file I/O.
///
/// Architecture:
/// ```text
///  .parquet / .json frames
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Frame (pixels + header)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │ classify  │  header type tag → FrameCategory → FrameGroup
///   └──────────┘
///        │
///        ▼
///   reduce::*  →  MasterFrame / Spectrum  →  loader (parquet, csv, png)
/// ```

pub mod classify;
pub mod loader;
pub mod model;
