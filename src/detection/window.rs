//! Sliding keypoint window feeding the sequence classifier.
//!
//! Frames are stored oldest-first behind a mutex so the frame path can keep
//! appending while another task reads a tensor. A read never observes a
//! partially evicted window.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// 30 frames is roughly one second of camera input at 30 FPS.
pub const DEFAULT_WINDOW_FRAMES: usize = 30;
/// 17 COCO landmarks with a `[y, x]` pair each.
pub const DEFAULT_KEYPOINT_DIMS: usize = 34;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WindowError {
    #[error("keypoint frame must have {expected} values, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("window holds {frames} of {required} frames")]
    NotReady { frames: usize, required: usize },
}

/// How a window may be read before it has filled up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadMode {
    /// Reads fail with [`WindowError::NotReady`] until the window is full.
    #[default]
    Strict,
    /// Reads always succeed; missing leading frames are zero-filled.
    Tolerant,
}

impl ReadMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "strict" => Some(Self::Strict),
            "tolerant" | "padded" => Some(Self::Tolerant),
            _ => None,
        }
    }
}

/// Model input with shape `[1][frames][features]`, flattened row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowTensor {
    frames: usize,
    features: usize,
    data: Vec<f32>,
}

impl WindowTensor {
    pub fn shape(&self) -> [usize; 3] {
        [1, self.frames, self.features]
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn features(&self) -> usize {
        self.features
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn frame(&self, index: usize) -> Option<&[f32]> {
        if index >= self.frames {
            return None;
        }
        let start = index * self.features;
        Some(&self.data[start..start + self.features])
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.features.max(1))
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

pub struct KeypointWindow {
    capacity: usize,
    dims: usize,
    frames: Mutex<VecDeque<Box<[f32]>>>,
}

impl KeypointWindow {
    pub fn new(capacity: usize, dims: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            dims,
            frames: Mutex::new(VecDeque::with_capacity(capacity + 1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Appends a private copy of `frame`, evicting the oldest frame once full.
    ///
    /// A rejected frame leaves the window untouched.
    pub fn add(&self, frame: &[f32]) -> Result<(), WindowError> {
        if frame.len() != self.dims {
            return Err(WindowError::ShapeMismatch {
                expected: self.dims,
                actual: frame.len(),
            });
        }

        let mut frames = self.frames.lock();
        if frames.len() == self.capacity {
            frames.pop_front();
        }
        frames.push_back(frame.into());
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.frames.lock().len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.lock().is_empty()
    }

    pub fn fill_percentage(&self) -> u8 {
        let len = self.frames.lock().len();
        ((len * 100) / self.capacity) as u8
    }

    /// Chronological tensor, zero-padding the missing leading frames.
    pub fn to_tensor(&self) -> WindowTensor {
        let frames = self.frames.lock();
        let mut data = vec![0.0f32; self.capacity * self.dims];
        let offset = (self.capacity - frames.len()) * self.dims;
        for (i, frame) in frames.iter().enumerate() {
            let start = offset + i * self.dims;
            data[start..start + self.dims].copy_from_slice(frame);
        }
        WindowTensor {
            frames: self.capacity,
            features: self.dims,
            data,
        }
    }

    pub fn to_tensor_strict(&self) -> Result<WindowTensor, WindowError> {
        let frames = self.frames.lock();
        if frames.len() != self.capacity {
            return Err(WindowError::NotReady {
                frames: frames.len(),
                required: self.capacity,
            });
        }
        let mut data = Vec::with_capacity(self.capacity * self.dims);
        for frame in frames.iter() {
            data.extend_from_slice(frame);
        }
        Ok(WindowTensor {
            frames: self.capacity,
            features: self.dims,
            data,
        })
    }

    pub fn read(&self, mode: ReadMode) -> Result<WindowTensor, WindowError> {
        match mode {
            ReadMode::Strict => self.to_tensor_strict(),
            ReadMode::Tolerant => Ok(self.to_tensor()),
        }
    }

    pub fn latest_frame(&self) -> Option<Vec<f32>> {
        self.frames.lock().back().map(|f| f.to_vec())
    }

    pub fn oldest_frame(&self) -> Option<Vec<f32>> {
        self.frames.lock().front().map(|f| f.to_vec())
    }

    pub fn frames(&self) -> Vec<Vec<f32>> {
        self.frames.lock().iter().map(|f| f.to_vec()).collect()
    }

    pub fn clear(&self) {
        self.frames.lock().clear();
        debug!("keypoint window cleared");
    }
}

impl Default for KeypointWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_FRAMES, DEFAULT_KEYPOINT_DIMS)
    }
}

impl std::fmt::Debug for KeypointWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeypointWindow")
            .field("frames", &self.len())
            .field("capacity", &self.capacity)
            .field("dims", &self.dims)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: f32) -> Vec<f32> {
        vec![value; DEFAULT_KEYPOINT_DIMS]
    }

    #[test]
    fn rejects_wrong_length_without_touching_state() {
        let window = KeypointWindow::default();
        window.add(&frame(0.1)).unwrap();

        let err = window.add(&[0.5; 33]).unwrap_err();
        assert_eq!(
            err,
            WindowError::ShapeMismatch {
                expected: 34,
                actual: 33
            }
        );
        assert_eq!(window.len(), 1);
        assert_eq!(window.latest_frame(), Some(frame(0.1)));
    }

    #[test]
    fn ready_only_at_capacity() {
        let window = KeypointWindow::new(3, DEFAULT_KEYPOINT_DIMS);
        window.add(&frame(0.1)).unwrap();
        window.add(&frame(0.2)).unwrap();
        assert!(!window.is_ready());
        window.add(&frame(0.3)).unwrap();
        assert!(window.is_ready());
        window.add(&frame(0.4)).unwrap();
        assert!(window.is_ready());
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn evicts_oldest_first() {
        let window = KeypointWindow::new(3, DEFAULT_KEYPOINT_DIMS);
        for v in [0.1, 0.2, 0.3, 0.4] {
            window.add(&frame(v)).unwrap();
        }
        assert_eq!(window.oldest_frame(), Some(frame(0.2)));
        assert_eq!(window.latest_frame(), Some(frame(0.4)));

        let tensor = window.to_tensor_strict().unwrap();
        assert_eq!(tensor.shape(), [1, 3, 34]);
        assert_eq!(tensor.frame(0).unwrap()[0], 0.2);
        assert_eq!(tensor.frame(2).unwrap()[0], 0.4);
    }

    #[test]
    fn tolerant_read_zero_pads_leading_frames() {
        let window = KeypointWindow::new(4, 2);
        window.add(&[0.5, 0.6]).unwrap();
        window.add(&[0.7, 0.8]).unwrap();

        let tensor = window.read(ReadMode::Tolerant).unwrap();
        assert_eq!(
            tensor.as_slice(),
            &[0.0, 0.0, 0.0, 0.0, 0.5, 0.6, 0.7, 0.8]
        );
        assert_eq!(
            window.read(ReadMode::Strict).unwrap_err(),
            WindowError::NotReady {
                frames: 2,
                required: 4
            }
        );
    }

    #[test]
    fn stored_frames_are_copies() {
        let window = KeypointWindow::new(2, 2);
        let mut source = vec![0.1, 0.2];
        window.add(&source).unwrap();
        source[0] = 0.9;

        let mut out = window.latest_frame().unwrap();
        out[1] = 0.9;
        assert_eq!(window.latest_frame(), Some(vec![0.1, 0.2]));
    }

    #[test]
    fn clear_resets_fill() {
        let window = KeypointWindow::new(2, 2);
        window.add(&[0.1, 0.1]).unwrap();
        window.add(&[0.2, 0.2]).unwrap();
        assert_eq!(window.fill_percentage(), 100);

        window.clear();
        assert!(window.is_empty());
        assert!(!window.is_ready());
        assert_eq!(window.fill_percentage(), 0);
    }
}
