use log::{debug, warn};

use super::model::{Frame, FrameCategory, FrameGroup};
use crate::error::Result;

/// Default header card holding the frame type.
pub const DEFAULT_TAG_KEY: &str = "IMAGETYP";

/// Tokens in match priority. `lamp_dark` precedes `dark` and `lamp`,
/// otherwise lamp darks would be filed under one of those.
const CATEGORY_TOKENS: [(&str, FrameCategory); 7] = [
    ("lamp_dark", FrameCategory::LampDark),
    ("bias", FrameCategory::Bias),
    ("dark", FrameCategory::Dark),
    ("flat", FrameCategory::Flat),
    ("lamp", FrameCategory::Lamp),
    ("science", FrameCategory::Science),
    ("light", FrameCategory::Science),
];

/// Lower-case a tag and join its words with `_`, so `"Lamp Dark"`,
/// `"lamp-dark"` and `"LAMP_DARK"` all read `lamp_dark`.
pub fn normalize_tag(tag: &str) -> String {
    tag.split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Classify a type tag. `None` means unknown.
pub fn classify(tag: &str) -> Option<FrameCategory> {
    let tag = normalize_tag(tag);
    CATEGORY_TOKENS
        .iter()
        .find(|(token, _)| tag.contains(token))
        .map(|&(_, category)| category)
}

/// Classify a frame by the tag stored under `tag_key`.
pub fn classify_frame(frame: &Frame, tag_key: &str) -> Option<FrameCategory> {
    frame.type_tag(tag_key).as_deref().and_then(classify)
}

/// Result of sorting a batch of frames into categories.
#[derive(Debug, Clone, Default)]
pub struct Classified {
    pub group: FrameGroup,
    /// Frames whose tag matched no category (or had no tag).
    pub dropped: usize,
}

/// Sort frames into a [`FrameGroup`], keeping discovery order per category.
///
/// Unknown frames are dropped with a warning. A frame whose shape differs
/// from earlier frames of its category is a fatal error.
pub fn group_frames(frames: impl IntoIterator<Item = Frame>, tag_key: &str) -> Result<Classified> {
    let mut classified = Classified::default();

    for (index, frame) in frames.into_iter().enumerate() {
        match classify_frame(&frame, tag_key) {
            Some(category) => {
                debug!("Frame {index} classified as {category}");
                classified.group.push(category, frame)?;
            }
            None => {
                warn!(
                    "Frame {index} has unrecognised {tag_key} {:?}; dropping it",
                    frame.type_tag(tag_key)
                );
                classified.dropped += 1;
            }
        }
    }

    Ok(classified)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{Header, MetadataValue};
    use crate::error::ReductionError;
    use ndarray::Array2;

    fn frame(tag: Option<&str>, shape: (usize, usize)) -> Frame {
        let mut header = Header::new();
        if let Some(tag) = tag {
            header.insert(DEFAULT_TAG_KEY.into(), MetadataValue::String(tag.into()));
        }
        Frame::new(Array2::zeros(shape), header)
    }

    #[test]
    fn classifies_each_token() {
        assert_eq!(classify("Bias"), Some(FrameCategory::Bias));
        assert_eq!(classify("DARK"), Some(FrameCategory::Dark));
        assert_eq!(classify("flat field"), Some(FrameCategory::Flat));
        assert_eq!(classify("Lamp"), Some(FrameCategory::Lamp));
        assert_eq!(classify("science"), Some(FrameCategory::Science));
        assert_eq!(classify("Light Frame"), Some(FrameCategory::Science));
    }

    #[test]
    fn lamp_dark_wins_over_dark_and_lamp() {
        assert_eq!(classify("lamp_dark"), Some(FrameCategory::LampDark));
        assert_eq!(classify("  Lamp Dark "), Some(FrameCategory::LampDark));
        assert_eq!(classify("LAMP-DARK"), Some(FrameCategory::LampDark));
        // "dark lamp" is not the lamp-dark token, dark comes first.
        assert_eq!(classify("dark lamp"), Some(FrameCategory::Dark));
    }

    #[test]
    fn unknown_tags_are_none() {
        assert_eq!(classify("object"), None);
        assert_eq!(classify(""), None);
    }

    #[test]
    fn group_frames_drops_unknown_and_untagged() {
        let frames = vec![
            frame(Some("bias"), (3, 3)),
            frame(Some("focus"), (3, 3)),
            frame(None, (3, 3)),
            frame(Some("Bias"), (3, 3)),
            frame(Some("light"), (3, 3)),
        ];
        let classified = group_frames(frames, DEFAULT_TAG_KEY).unwrap();
        assert_eq!(classified.dropped, 2);
        assert_eq!(classified.group.frames(FrameCategory::Bias).len(), 2);
        assert_eq!(classified.group.frames(FrameCategory::Science).len(), 1);
        assert_eq!(classified.group.len(), 3);
    }

    #[test]
    fn group_frames_fails_on_shape_mismatch() {
        let frames = vec![frame(Some("flat"), (3, 3)), frame(Some("flat"), (3, 4))];
        let err = group_frames(frames, DEFAULT_TAG_KEY).unwrap_err();
        assert!(matches!(
            err,
            ReductionError::ShapeMismatch {
                category: FrameCategory::Flat,
                ..
            }
        ));
    }

    #[test]
    fn custom_tag_key_is_honoured() {
        let mut header = Header::new();
        header.insert("FRAMETYP".into(), MetadataValue::String("Dark".into()));
        let frame = Frame::new(Array2::zeros((1, 1)), header);
        assert_eq!(classify_frame(&frame, "FRAMETYP"), Some(FrameCategory::Dark));
        assert_eq!(classify_frame(&frame, DEFAULT_TAG_KEY), None);
    }
}
