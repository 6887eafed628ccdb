/// Reduction core: from classified raw frames to a 1-D spectrum.
///
/// ```text
///   FrameGroup
///       │
///       ▼
///   ┌────────┐
///   │ stack  │  per-pixel median → MasterFrame per category
///   └────────┘
///       │
///       ▼
///   ┌────────┐
///   │  flat  │  high-pass + [0, 1] rescale of the master flat
///   └────────┘
///       │
///       ▼
///   ┌─────────┐
///   │ correct │  bias → dark → lamp-dark → flat, new CalibrationSet each stage
///   └─────────┘
///       │
///       ▼
///   ┌─────────┐
///   │ extract │  aperture sum along a linear trace → Spectrum (pixel axis)
///   └─────────┘
///       │
///       ▼
///   ┌─────────┐
///   │ wavecal │  apply a dispersion solution (optional)
///   └─────────┘
/// ```
///
/// [`pipeline::Pipeline`] runs the whole chain.
pub mod correct;
pub mod extract;
pub mod flat;
pub mod pipeline;
pub mod stack;
pub mod wavecal;
