pub mod panels;
pub mod picker;
pub mod plot;
