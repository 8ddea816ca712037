//! Fixed-grid region classification.
//!
//! A frame is split into `rows x cols` equal segments (integer division, so the
//! right and bottom remainders are never evaluated). Each evaluated segment is
//! dirty when the detected boxes cover more than `overlap_threshold` of it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::PipelineConfig;
use crate::detect::Detection;
use crate::error::{PipelineError, Result};
use crate::geometry::{intersection_area, normalize, Rect};

/// Half-open rectangle of grid coordinates: rows `[rows[0], rows[1])`,
/// cols `[cols[0], cols[1])`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRegion {
    pub rows: [u32; 2],
    pub cols: [u32; 2],
}

impl ActiveRegion {
    pub fn new(rows: std::ops::Range<u32>, cols: std::ops::Range<u32>) -> Self {
        Self {
            rows: [rows.start, rows.end],
            cols: [cols.start, cols.end],
        }
    }

    fn validate(&self, grid_rows: u32, grid_cols: u32) -> Result<()> {
        let [r0, r1] = self.rows;
        let [c0, c1] = self.cols;
        if r0 >= r1 || c0 >= c1 {
            return Err(PipelineError::config(format!(
                "active region rows {r0}..{r1} cols {c0}..{c1} is empty"
            )));
        }
        if r1 > grid_rows || c1 > grid_cols {
            return Err(PipelineError::config(format!(
                "active region rows {r0}..{r1} cols {c0}..{c1} exceeds {grid_rows}x{grid_cols} grid"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub row: u32,
    pub col: u32,
    pub rect: Rect,
    pub area: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellClassification {
    pub cell: GridCell,
    /// Summed box overlap, clipped to the cell area.
    pub intersection_area: f64,
    pub is_dirty: bool,
}

/// Per-frame summary. Classifications are in row-major order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    pub frame_index: u64,
    pub dirty_count: u32,
    pub total_cells: u32,
    pub cell_classifications: Vec<CellClassification>,
}

impl FrameResult {
    /// Identifier used on the wire and in dashboards.
    pub fn frame_label(&self) -> String {
        frame_label(self.frame_index)
    }

    pub fn evaluated_cells(&self) -> usize {
        self.cell_classifications.len()
    }
}

pub fn frame_label(frame_index: u64) -> String {
    format!("frame_{frame_index}")
}

/// Cell geometry for one frame size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridLayout {
    pub rows: u32,
    pub cols: u32,
    pub segment_width: u32,
    pub segment_height: u32,
}

impl GridLayout {
    /// Fails with `Config` when the grid is degenerate for this frame size.
    pub fn new(frame_width: u32, frame_height: u32, rows: u32, cols: u32) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(PipelineError::config(format!(
                "grid must have at least one row and column, got {rows}x{cols}"
            )));
        }
        let segment_width = frame_width / cols;
        let segment_height = frame_height / rows;
        if segment_width == 0 || segment_height == 0 {
            return Err(PipelineError::config(format!(
                "{rows}x{cols} grid yields zero-area cells on a {frame_width}x{frame_height} frame"
            )));
        }
        Ok(Self {
            rows,
            cols,
            segment_width,
            segment_height,
        })
    }

    pub fn cell(&self, row: u32, col: u32) -> GridCell {
        let x1 = f64::from(col * self.segment_width);
        let y1 = f64::from(row * self.segment_height);
        let w = f64::from(self.segment_width);
        let h = f64::from(self.segment_height);
        GridCell {
            row,
            col,
            rect: Rect::new(x1, y1, x1 + w, y1 + h),
            area: w * h,
        }
    }
}

/// Classifies the grid cells of a frame against its detections.
#[derive(Clone, Debug)]
pub struct GridClassifier {
    rows: u32,
    cols: u32,
    overlap_threshold: f64,
    confidence_threshold: f32,
    /// Evaluated cells, row-major.
    active_cells: Vec<(u32, u32)>,
}

impl GridClassifier {
    pub fn new(
        rows: u32,
        cols: u32,
        overlap_threshold: f64,
        confidence_threshold: f32,
        regions: &[ActiveRegion],
    ) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(PipelineError::config(format!(
                "grid must have at least one row and column, got {rows}x{cols}"
            )));
        }
        if !(overlap_threshold > 0.0 && overlap_threshold <= 1.0) {
            return Err(PipelineError::config(format!(
                "overlap threshold must be in (0, 1], got {overlap_threshold}"
            )));
        }
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(PipelineError::config(format!(
                "confidence threshold must be in [0, 1], got {confidence_threshold}"
            )));
        }

        let active_cells = if regions.is_empty() {
            (0..rows)
                .flat_map(|row| (0..cols).map(move |col| (row, col)))
                .collect()
        } else {
            let mut cells = BTreeSet::new();
            for region in regions {
                region.validate(rows, cols)?;
                for row in region.rows[0]..region.rows[1] {
                    for col in region.cols[0]..region.cols[1] {
                        cells.insert((row, col));
                    }
                }
            }
            cells.into_iter().collect()
        };

        Ok(Self {
            rows,
            cols,
            overlap_threshold,
            confidence_threshold,
            active_cells,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Self::new(
            config.grid_rows,
            config.grid_cols,
            config.overlap_threshold,
            config.detector_confidence_threshold,
            &config.active_regions,
        )
    }

    pub fn layout(&self, frame_width: u32, frame_height: u32) -> Result<GridLayout> {
        GridLayout::new(frame_width, frame_height, self.rows, self.cols)
    }

    pub fn active_cells(&self) -> &[(u32, u32)] {
        &self.active_cells
    }

    pub fn total_cells(&self) -> u32 {
        self.rows * self.cols
    }

    /// Keep confident detections and convert them to absolute rectangles.
    /// Returns the rectangles and the number of boxes dropped as invalid.
    pub fn prepare_boxes(
        &self,
        detections: &[Detection],
        frame_width: u32,
        frame_height: u32,
    ) -> (Vec<Rect>, usize) {
        let mut rects = Vec::with_capacity(detections.len());
        let mut dropped = 0;
        for detection in detections {
            if detection.confidence < self.confidence_threshold {
                continue;
            }
            match normalize(&detection.bbox, frame_width, frame_height) {
                Ok(bbox) => rects.push(bbox.rect()),
                Err(err) => {
                    dropped += 1;
                    log::warn!("dropping detection: {}", err);
                }
            }
        }
        (rects, dropped)
    }

    /// Classify every active cell of one frame.
    ///
    /// Box overlaps with a cell are summed, not unioned, so boxes that overlap
    /// each other count their shared area twice. The threshold is applied to the
    /// raw sum; only the reported `intersection_area` is clipped to the cell area.
    pub fn classify(
        &self,
        frame_index: u64,
        frame_width: u32,
        frame_height: u32,
        detections: &[Detection],
    ) -> Result<FrameResult> {
        let layout = self.layout(frame_width, frame_height)?;
        let (boxes, _) = self.prepare_boxes(detections, frame_width, frame_height);
        Ok(self.classify_rects(frame_index, &layout, &boxes))
    }

    pub fn classify_rects(&self, frame_index: u64, layout: &GridLayout, boxes: &[Rect]) -> FrameResult {
        let mut cell_classifications = Vec::with_capacity(self.active_cells.len());
        let mut dirty_count = 0;
        for &(row, col) in &self.active_cells {
            let cell = layout.cell(row, col);
            let covered: f64 = boxes
                .iter()
                .map(|bbox| intersection_area(&cell.rect, bbox))
                .sum();
            let is_dirty = covered / cell.area > self.overlap_threshold;
            let intersection_area = covered.min(cell.area);
            if is_dirty {
                dirty_count += 1;
            }
            cell_classifications.push(CellClassification {
                cell,
                intersection_area,
                is_dirty,
            });
        }
        FrameResult {
            frame_index,
            dirty_count,
            total_cells: self.total_cells(),
            cell_classifications,
        }
    }
}
