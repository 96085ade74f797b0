//! Scripted detector for unit tests.
//!
//! Frames are tagged through the red channel of their first pixel; the
//! detector replies with whatever was scripted for that tag.

use crate::types::{DetectError, Detector, Face};
use image::{Rgb, RgbImage};
use std::collections::HashMap;

enum Script {
    Faces(Vec<Face>),
    Fail,
    Panic,
}

#[derive(Default)]
pub(crate) struct ScriptedDetector {
    scripts: HashMap<u8, Script>,
    pub(crate) calls: usize,
}

impl ScriptedDetector {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(mut self, tag: u8, faces: Vec<Face>) -> Self {
        self.scripts.insert(tag, Script::Faces(faces));
        self
    }

    pub(crate) fn failing_on(mut self, tag: u8) -> Self {
        self.scripts.insert(tag, Script::Fail);
        self
    }

    pub(crate) fn panicking_on(mut self, tag: u8) -> Self {
        self.scripts.insert(tag, Script::Panic);
        self
    }
}

impl Detector for ScriptedDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Face>, DetectError> {
        self.calls += 1;
        let tag = image.get_pixel(0, 0).0[0];
        match self.scripts.get(&tag) {
            Some(Script::Faces(faces)) => Ok(faces.clone()),
            Some(Script::Fail) => Err(DetectError::Inference(format!(
                "scripted failure for tag {tag}"
            ))),
            Some(Script::Panic) => panic!("scripted panic for tag {tag}"),
            None => Ok(Vec::new()),
        }
    }
}

/// Small uniform frame carrying `tag`.
pub(crate) fn frame_with_tag(tag: u8) -> RgbImage {
    RgbImage::from_pixel(8, 8, Rgb([tag, 0, 0]))
}
