//! Bounding-box label files.
//!
//! One file per frame, one box per line: `class x_center y_center width height`,
//! space separated, box values normalized to `[0, 1]`. Blank and malformed lines
//! are skipped with a warning.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::path::Path;

use crate::detect::Detection;
use crate::geometry::CenterBox;

/// Confidence assigned to boxes replayed from a label file.
pub const LABEL_CONFIDENCE: f32 = 1.0;

/// Parse label file contents. Never fails; bad lines are dropped.
pub fn parse_labels(contents: &str) -> Vec<Detection> {
    let mut detections = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_line(line) {
            Some(detection) => detections.push(detection),
            None => log::warn!("label line {} skipped: {:?}", lineno + 1, line),
        }
    }
    detections
}

fn parse_line(line: &str) -> Option<Detection> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 5 {
        return None;
    }
    let class_id: u32 = fields[0].parse().ok()?;
    let mut values = [0f64; 4];
    for (slot, raw) in values.iter_mut().zip(&fields[1..5]) {
        let value: f64 = raw.parse().ok()?;
        if !value.is_finite() {
            return None;
        }
        *slot = value;
    }
    Some(Detection {
        bbox: CenterBox::normalized(values[0], values[1], values[2], values[3]),
        confidence: LABEL_CONFIDENCE,
        class_id,
    })
}

/// Read and parse a label file from disk.
pub fn read_label_file(path: &Path) -> Result<Vec<Detection>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read label file {}", path.display()))?;
    Ok(parse_labels(&contents))
}

/// Render detections in label file format, normalizing pixel-space boxes
/// against the frame dimensions.
pub fn format_labels(detections: &[Detection], frame_width: u32, frame_height: u32) -> String {
    let mut out = String::new();
    for detection in detections {
        let b = detection.bbox.to_normalized(frame_width, frame_height);
        let _ = writeln!(
            out,
            "{} {:.6} {:.6} {:.6} {:.6}",
            detection.class_id, b.x, b.y, b.width, b.height
        );
    }
    out
}

pub fn write_label_file(
    path: &Path,
    detections: &[Detection],
    frame_width: u32,
    frame_height: u32,
) -> Result<()> {
    std::fs::write(path, format_labels(detections, frame_width, frame_height))
        .with_context(|| format!("failed to write label file {}", path.display()))
}

/// Label file name for a frame index, shared by the writer and the replay backend.
pub fn label_file_name(frame_index: u64) -> String {
    format!("frame_{frame_index}.txt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CoordinateSpace;

    #[test]
    fn parses_well_formed_lines() {
        let detections = parse_labels("0 0.5 0.5 0.25 0.1\n2 0.1 0.2 0.3 0.4\n");
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_id, 0);
        assert_eq!(detections[0].bbox.width, 0.25);
        assert_eq!(detections[0].bbox.space, CoordinateSpace::Normalized);
        assert_eq!(detections[1].class_id, 2);
        assert_eq!(detections[1].confidence, LABEL_CONFIDENCE);
    }

    #[test]
    fn skips_blank_and_malformed_lines() {
        let contents = "\n0 0.5 0.5\nx 0.1 0.1 0.1 0.1\n0 0.5 abc 0.1 0.1\n   \n1 0.4 0.4 0.2 0.2 extra\n";
        let detections = parse_labels(contents);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
    }

    #[test]
    fn writes_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(label_file_name(30));
        let detections = vec![Detection {
            bbox: CenterBox::pixels(320.0, 120.0, 64.0, 48.0),
            confidence: 0.9,
            class_id: 0,
        }];
        write_label_file(&path, &detections, 640, 480).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "0 0.500000 0.250000 0.100000 0.100000\n");

        let back = read_label_file(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].bbox, CenterBox::normalized(0.5, 0.25, 0.1, 0.1));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_label_file(&dir.path().join("nope.txt")).is_err());
    }
}
