//! Frame sources feeding the pipeline.
//!
//! The capture hardware binding is an external collaborator; the
//! pipeline only needs this pull contract. The image-directory source
//! serves bench and offline use; the synthetic source drives tests.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// One decoded frame: tightly packed RGB8 plus a capture timestamp.
#[derive(Debug, Clone)]
pub struct Frame {
    pub rgb: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: Instant,
}

impl Frame {
    /// Luma plane as f32, ITU-R BT.601 weights.
    pub fn to_luma(&self) -> Vec<f32> {
        self.rgb
            .chunks_exact(3)
            .map(|px| 0.299 * px[0] as f32 + 0.587 * px[1] as f32 + 0.114 * px[2] as f32)
            .collect()
    }
}

/// Blocking pull contract. `Ok(None)` means no frame within the
/// timeout; the caller re-checks its abort flag and pulls again.
pub trait FrameSource: Send {
    fn next_frame(&mut self, timeout: Duration) -> Result<Option<Frame>>;
}

/// Reads an alphabetically ordered image sequence from a directory,
/// optionally looping forever.
pub struct ImageDirSource {
    files: Vec<PathBuf>,
    index: usize,
    looping: bool,
    frame_interval: Duration,
    last_emit: Option<Instant>,
}

impl ImageDirSource {
    pub fn new(dir: impl Into<PathBuf>, fps: f64, looping: bool) -> Result<Self> {
        let dir = dir.into();
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("png" | "jpg" | "jpeg" | "bmp")
                )
            })
            .collect();
        files.sort();
        Ok(ImageDirSource {
            files,
            index: 0,
            looping,
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1.0)),
            last_emit: None,
        })
    }
}

impl FrameSource for ImageDirSource {
    fn next_frame(&mut self, _timeout: Duration) -> Result<Option<Frame>> {
        if self.index >= self.files.len() {
            if self.looping && !self.files.is_empty() {
                self.index = 0;
            } else {
                return Err(Error::SourceExhausted);
            }
        }

        // Pace playback at the configured frame rate.
        if let Some(last) = self.last_emit {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                std::thread::sleep(self.frame_interval - elapsed);
            }
        }

        let path = &self.files[self.index];
        self.index += 1;
        let decoded = image::open(path)?.into_rgb8();
        self.last_emit = Some(Instant::now());
        Ok(Some(Frame {
            width: decoded.width(),
            height: decoded.height(),
            rgb: decoded.into_raw(),
            captured_at: Instant::now(),
        }))
    }
}

/// Deterministic generated frames: a flat grey field with one bright
/// square whose position is scripted per frame.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    square_size: u32,
    positions: Vec<(u32, u32)>,
    index: usize,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, square_size: u32, positions: Vec<(u32, u32)>) -> Self {
        SyntheticSource {
            width,
            height,
            square_size,
            positions,
            index: 0,
        }
    }

    /// Render the frame for a scripted position without consuming it.
    pub fn render(&self, position: (u32, u32)) -> Frame {
        let (sx, sy) = position;
        let mut rgb = vec![40u8; (self.width * self.height * 3) as usize];
        for y in sy..(sy + self.square_size).min(self.height) {
            for x in sx..(sx + self.square_size).min(self.width) {
                let base = ((y * self.width + x) * 3) as usize;
                // A gradient inside the square gives the correlator
                // structure to lock onto.
                let shade = 180 + ((x - sx) * 60 / self.square_size.max(1)) as u8;
                rgb[base] = shade;
                rgb[base + 1] = shade;
                rgb[base + 2] = 255 - shade / 2;
            }
        }
        Frame {
            rgb,
            width: self.width,
            height: self.height,
            captured_at: Instant::now(),
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self, _timeout: Duration) -> Result<Option<Frame>> {
        match self.positions.get(self.index) {
            Some(&pos) => {
                self.index += 1;
                Ok(Some(self.render(pos)))
            }
            None => Err(Error::SourceExhausted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_square_lands_where_scripted() {
        let source = SyntheticSource::new(64, 48, 8, vec![]);
        let frame = source.render((10, 20));
        let luma = frame.to_luma();
        let inside = luma[(25 * 64 + 14) as usize];
        let outside = luma[(5 * 64 + 5) as usize];
        assert!(inside > outside + 50.0);
    }

    #[test]
    fn synthetic_source_ends_after_script() {
        let mut source = SyntheticSource::new(32, 32, 4, vec![(0, 0), (1, 1)]);
        assert!(source.next_frame(Duration::from_millis(1)).unwrap().is_some());
        assert!(source.next_frame(Duration::from_millis(1)).unwrap().is_some());
        assert!(source.next_frame(Duration::from_millis(1)).is_err());
    }
}
