//! Optional consumers of per-frame results.
//!
//! Observers see every sampled frame after classification. They are side
//! channels: the sampler logs their errors and keeps going.

use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};

use crate::detect::Detection;
use crate::frame::Frame;
use crate::grid::{frame_label, FrameResult};
use crate::labels::{label_file_name, write_label_file};

const DIRTY_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const CLEAN_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const OUTLINE_WIDTH: u32 = 2;

pub trait FrameObserver {
    fn name(&self) -> &'static str;

    fn on_frame(&mut self, frame: &Frame, detections: &[Detection], result: &FrameResult)
        -> Result<()>;
}

fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))
}

/// Writes `frame_<n>.png` with each evaluated cell outlined red (dirty) or
/// green (clean).
pub struct AnnotatedFrameWriter {
    dir: PathBuf,
}

impl AnnotatedFrameWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, frame_index: u64) -> PathBuf {
        self.dir.join(format!("{}.png", frame_label(frame_index)))
    }
}

impl FrameObserver for AnnotatedFrameWriter {
    fn name(&self) -> &'static str {
        "annotated-frames"
    }

    fn on_frame(&mut self, frame: &Frame, _detections: &[Detection], result: &FrameResult) -> Result<()> {
        let mut img = frame.to_rgb_image();
        for classification in &result.cell_classifications {
            let rect = classification.cell.rect;
            let color = if classification.is_dirty {
                DIRTY_COLOR
            } else {
                CLEAN_COLOR
            };
            draw_outline(
                &mut img,
                rect.x1 as u32,
                rect.y1 as u32,
                rect.x2 as u32,
                rect.y2 as u32,
                color,
            );
        }
        let path = self.path_for(frame.index);
        img.save(&path)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}

/// Outline `[x1, x2) x [y1, y2)` with a band `OUTLINE_WIDTH` pixels wide,
/// clipped to the image.
fn draw_outline(img: &mut RgbImage, x1: u32, y1: u32, x2: u32, y2: u32, color: Rgb<u8>) {
    let x2 = x2.min(img.width());
    let y2 = y2.min(img.height());
    if x1 >= x2 || y1 >= y2 {
        return;
    }
    for y in y1..y2 {
        for x in x1..x2 {
            let on_edge = x < x1 + OUTLINE_WIDTH
                || x + OUTLINE_WIDTH >= x2
                || y < y1 + OUTLINE_WIDTH
                || y + OUTLINE_WIDTH >= y2;
            if on_edge {
                img.put_pixel(x, y, color);
            }
        }
    }
}

/// Persists each sampled frame's detections as a label file so the run can be
/// replayed through `LabelFileBackend`.
pub struct LabelArchive {
    dir: PathBuf,
}

impl LabelArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;
        Ok(Self { dir })
    }
}

impl FrameObserver for LabelArchive {
    fn name(&self) -> &'static str {
        "label-archive"
    }

    fn on_frame(&mut self, frame: &Frame, detections: &[Detection], _result: &FrameResult) -> Result<()> {
        let path = self.dir.join(label_file_name(frame.index));
        write_label_file(&path, detections, frame.width, frame.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CenterBox;
    use crate::grid::GridClassifier;
    use crate::labels::read_label_file;
    use std::time::Duration;

    fn frame(index: u64, width: u32, height: u32) -> Frame {
        Frame::new(
            index,
            Duration::ZERO,
            width,
            height,
            vec![0; (width * height * 3) as usize],
        )
        .unwrap()
    }

    fn top_left_quadrant(width: u32, height: u32) -> Detection {
        Detection {
            bbox: CenterBox::pixels(
                width as f64 / 4.0,
                height as f64 / 4.0,
                width as f64 / 2.0,
                height as f64 / 2.0,
            ),
            confidence: 0.9,
            class_id: 0,
        }
    }

    #[test]
    fn annotated_frame_marks_dirty_and_clean_cells() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = AnnotatedFrameWriter::new(dir.path().join("annotated")).unwrap();
        let frame = frame(7, 40, 40);
        let detections = vec![top_left_quadrant(40, 40)];
        let classifier = GridClassifier::new(2, 2, 0.4, 0.4, &[]).unwrap();
        let result = classifier.classify(7, 40, 40, &detections).unwrap();

        writer.on_frame(&frame, &detections, &result).unwrap();

        let img = image::open(writer.path_for(7)).unwrap().into_rgb8();
        assert_eq!(img.get_pixel(0, 0), &DIRTY_COLOR);
        assert_eq!(img.get_pixel(39, 39), &CLEAN_COLOR);
        // Cell interiors keep the original pixels.
        assert_eq!(img.get_pixel(10, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn label_archive_round_trips_through_label_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = LabelArchive::new(dir.path()).unwrap();
        let frame = frame(3, 100, 50);
        let detections = vec![top_left_quadrant(100, 50)];
        let result = GridClassifier::new(2, 2, 0.4, 0.4, &[])
            .unwrap()
            .classify(3, 100, 50, &detections)
            .unwrap();

        archive.on_frame(&frame, &detections, &result).unwrap();

        let replayed = read_label_file(&dir.path().join("frame_3.txt")).unwrap();
        assert_eq!(replayed.len(), 1);
        let b = replayed[0].bbox;
        assert!((b.x - 0.25).abs() < 1e-6 && (b.width - 0.5).abs() < 1e-6);
    }
}
