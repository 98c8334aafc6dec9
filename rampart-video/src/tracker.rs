//! Normalised cross-correlation template tracker.
//!
//! The tracker is initialised from the acquisition box, localises the
//! template in a bounded search window each frame and blends the
//! template toward the new appearance after every valid localisation.
//! Its verdict mirrors the phases the state model expects: `New`
//! immediately after (re)initialisation, then `Tracked` or `Lost`.

use rampart_types::{PixelBox, TrackerRawState};

/// Search radius around the last centre, in pixels.
const SEARCH_RADIUS: i32 = 32;
/// Coarse scan stride; a fine scan of +/- the stride follows.
const COARSE_STEP: i32 = 4;
/// Minimum correlation score for a match.
const MATCH_FLOOR: f32 = 0.45;
/// Template adaptation rate per valid frame.
const TEMPLATE_BLEND: f32 = 0.15;

/// Result of one localisation cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerVerdict {
    pub raw_state: TrackerRawState,
    pub bbox: PixelBox,
    pub confidence: f32,
}

pub struct CorrelationTracker {
    template: Vec<f32>,
    tw: usize,
    th: usize,
    center: (f32, f32),
    initialized: bool,
    fresh: bool,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        CorrelationTracker {
            template: Vec::new(),
            tw: 0,
            th: 0,
            center: (0.0, 0.0),
            initialized: false,
            fresh: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Capture the template from `luma` under the acquisition box.
    /// Returns false when the box is degenerate or out of bounds.
    pub fn initialize(&mut self, luma: &[f32], width: u32, height: u32, target: PixelBox) -> bool {
        if !target.in_bounds(width, height) {
            return false;
        }
        let x0 = target.x as usize;
        let y0 = target.y as usize;
        let tw = target.w as usize;
        let th = target.h as usize;
        if tw < 4 || th < 4 {
            return false;
        }

        self.template.clear();
        self.template.reserve(tw * th);
        for y in y0..y0 + th {
            let row = y * width as usize;
            self.template
                .extend_from_slice(&luma[row + x0..row + x0 + tw]);
        }
        self.tw = tw;
        self.th = th;
        self.center = target.center();
        self.initialized = true;
        self.fresh = true;
        true
    }

    /// Drop all tracker state (phase left tracking, camera switched).
    pub fn reset(&mut self) {
        self.template.clear();
        self.initialized = false;
        self.fresh = false;
    }

    /// One localisation cycle over the new frame.
    pub fn localize(&mut self, luma: &[f32], width: u32, height: u32) -> TrackerVerdict {
        if !self.initialized {
            return TrackerVerdict {
                raw_state: TrackerRawState::Lost,
                bbox: PixelBox::default(),
                confidence: 0.0,
            };
        }

        // The first cycle after initialisation reports New: the model
        // keeps waiting in LockPending while the template settles.
        if self.fresh {
            self.fresh = false;
            return TrackerVerdict {
                raw_state: TrackerRawState::New,
                bbox: self.current_bbox(),
                confidence: 0.0,
            };
        }

        let (best_x, best_y, best_score) = self.search(luma, width, height);

        let bbox = PixelBox {
            x: best_x as f32,
            y: best_y as f32,
            w: self.tw as f32,
            h: self.th as f32,
        };

        if best_score < MATCH_FLOOR || !bbox.in_bounds(width, height) {
            return TrackerVerdict {
                raw_state: TrackerRawState::Lost,
                bbox,
                confidence: best_score,
            };
        }

        self.center = bbox.center();
        self.update_template(luma, width, best_x as usize, best_y as usize);
        TrackerVerdict {
            raw_state: TrackerRawState::Tracked,
            bbox,
            confidence: best_score,
        }
    }

    fn current_bbox(&self) -> PixelBox {
        PixelBox {
            x: self.center.0 - self.tw as f32 / 2.0,
            y: self.center.1 - self.th as f32 / 2.0,
            w: self.tw as f32,
            h: self.th as f32,
        }
    }

    /// Coarse-to-fine scan of the search window, returning the top-left
    /// corner and score of the best match.
    fn search(&self, luma: &[f32], width: u32, height: u32) -> (i32, i32, f32) {
        let base_x = (self.center.0 - self.tw as f32 / 2.0) as i32;
        let base_y = (self.center.1 - self.th as f32 / 2.0) as i32;

        let mut best = (base_x, base_y, f32::MIN);
        let mut consider = |x: i32, y: i32, best: &mut (i32, i32, f32)| {
            if x < 0
                || y < 0
                || x + self.tw as i32 > width as i32
                || y + self.th as i32 > height as i32
            {
                return;
            }
            let score = self.ncc_at(luma, width, x as usize, y as usize);
            if score > best.2 {
                *best = (x, y, score);
            }
        };

        let mut dy = -SEARCH_RADIUS;
        while dy <= SEARCH_RADIUS {
            let mut dx = -SEARCH_RADIUS;
            while dx <= SEARCH_RADIUS {
                consider(base_x + dx, base_y + dy, &mut best);
                dx += COARSE_STEP;
            }
            dy += COARSE_STEP;
        }

        let (cx, cy, _) = best;
        for dy in -COARSE_STEP..=COARSE_STEP {
            for dx in -COARSE_STEP..=COARSE_STEP {
                consider(cx + dx, cy + dy, &mut best);
            }
        }
        best
    }

    /// Zero-mean normalised cross-correlation of the template against
    /// the patch at (x0, y0).
    fn ncc_at(&self, luma: &[f32], width: u32, x0: usize, y0: usize) -> f32 {
        let n = (self.tw * self.th) as f32;

        let mut patch_sum = 0.0f32;
        for y in 0..self.th {
            let row = (y0 + y) * width as usize + x0;
            for x in 0..self.tw {
                patch_sum += luma[row + x];
            }
        }
        let patch_mean = patch_sum / n;
        let template_mean = self.template.iter().sum::<f32>() / n;

        let mut cross = 0.0f32;
        let mut patch_var = 0.0f32;
        let mut template_var = 0.0f32;
        for y in 0..self.th {
            let row = (y0 + y) * width as usize + x0;
            for x in 0..self.tw {
                let p = luma[row + x] - patch_mean;
                let t = self.template[y * self.tw + x] - template_mean;
                cross += p * t;
                patch_var += p * p;
                template_var += t * t;
            }
        }

        let denom = (patch_var * template_var).sqrt();
        if denom < 1e-6 {
            0.0
        } else {
            cross / denom
        }
    }

    fn update_template(&mut self, luma: &[f32], width: u32, x0: usize, y0: usize) {
        for y in 0..self.th {
            let row = (y0 + y) * width as usize + x0;
            for x in 0..self.tw {
                let slot = &mut self.template[y * self.tw + x];
                *slot = (1.0 - TEMPLATE_BLEND) * *slot + TEMPLATE_BLEND * luma[row + x];
            }
        }
    }
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SyntheticSource;

    fn luma_of(source: &SyntheticSource, pos: (u32, u32)) -> Vec<f32> {
        source.render(pos).to_luma()
    }

    #[test]
    fn tracks_a_moving_square() {
        let source = SyntheticSource::new(320, 240, 24, vec![]);
        let mut tracker = CorrelationTracker::new();

        let start = luma_of(&source, (100, 80));
        assert!(tracker.initialize(
            &start,
            320,
            240,
            PixelBox::new(100.0, 80.0, 24.0, 24.0)
        ));

        // First cycle after init reports New.
        let verdict = tracker.localize(&start, 320, 240);
        assert_eq!(verdict.raw_state, TrackerRawState::New);

        // Square drifts right and down a few pixels per frame.
        for (step, pos) in [(1u32, (105, 82)), (2, (110, 84)), (3, (115, 86))] {
            let frame = luma_of(&source, pos);
            let verdict = tracker.localize(&frame, 320, 240);
            assert_eq!(verdict.raw_state, TrackerRawState::Tracked, "step {step}");
            let (cx, cy) = verdict.bbox.center();
            approx::assert_relative_eq!(cx, pos.0 as f32 + 12.0, epsilon = 3.0);
            approx::assert_relative_eq!(cy, pos.1 as f32 + 12.0, epsilon = 3.0);
        }
    }

    #[test]
    fn loses_target_that_vanishes() {
        let source = SyntheticSource::new(320, 240, 24, vec![]);
        let mut tracker = CorrelationTracker::new();
        let start = luma_of(&source, (100, 80));
        tracker.initialize(&start, 320, 240, PixelBox::new(100.0, 80.0, 24.0, 24.0));
        tracker.localize(&start, 320, 240); // consume New

        // Flat frame: the square is gone.
        let empty = vec![40.0f32; 320 * 240];
        let verdict = tracker.localize(&empty, 320, 240);
        assert_eq!(verdict.raw_state, TrackerRawState::Lost);
    }

    #[test]
    fn rejects_degenerate_or_out_of_bounds_boxes() {
        let mut tracker = CorrelationTracker::new();
        let luma = vec![0.0f32; 64 * 64];
        assert!(!tracker.initialize(&luma, 64, 64, PixelBox::new(60.0, 60.0, 20.0, 20.0)));
        assert!(!tracker.initialize(&luma, 64, 64, PixelBox::new(10.0, 10.0, 2.0, 2.0)));
        assert!(!tracker.is_initialized());
    }

    #[test]
    fn reset_requires_reinitialisation() {
        let source = SyntheticSource::new(128, 128, 16, vec![]);
        let mut tracker = CorrelationTracker::new();
        let luma = luma_of(&source, (50, 50));
        tracker.initialize(&luma, 128, 128, PixelBox::new(50.0, 50.0, 16.0, 16.0));
        tracker.reset();
        let verdict = tracker.localize(&luma, 128, 128);
        assert_eq!(verdict.raw_state, TrackerRawState::Lost);
    }
}
