//! Range/track downsampling of acoustic lines
//!
//! Each line of `N` points is decimated by the range scale (every `Sr`
//! consecutive points averaged into one), and `St` consecutive lines are
//! summed before one averaged line is emitted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sonar_core::{DataSample, DataType};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransformError {
    #[error("Cannot downsample {0:?} data")]
    Unsupported(DataType),
    #[error("Payload of {len} bytes is not a whole number of {point_size}-byte points")]
    Malformed { len: usize, point_size: usize },
    #[error("Line of {points} points is shorter than the range scale {range_scale}")]
    TooShort { points: usize, range_scale: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleConfig {
    /// Points averaged into one output point
    pub range_scale: u32,
    /// Lines averaged into one output line
    pub track_scale: u32,
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            range_scale: 1,
            track_scale: 1,
        }
    }
}

impl ScaleConfig {
    pub fn new(range_scale: u32, track_scale: u32) -> Self {
        Self {
            range_scale: range_scale.max(1),
            track_scale: track_scale.max(1),
        }
    }

    pub fn is_identity(&self) -> bool {
        self.range_scale <= 1 && self.track_scale <= 1
    }
}

/// Accumulator of one source
///
/// `output` only ever grows; it is all zeros whenever `line_count` is 0.
#[derive(Debug, Default)]
pub struct ScaleBuffer {
    sample_count: usize,
    line_count: u32,
    time_accumulator: i64,
    output: Vec<f32>,
}

impl ScaleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line_count(&self) -> u32 {
        self.line_count
    }

    pub fn capacity(&self) -> usize {
        self.output.len()
    }

    /// Add one line; returns the averaged line once `track_scale` lines are in
    pub fn push(
        &mut self,
        config: ScaleConfig,
        sample: &DataSample,
    ) -> Result<Option<DataSample>, TransformError> {
        let points = decode_amplitude(sample)?;
        let range_scale = config.range_scale.max(1) as usize;
        let track_scale = config.track_scale.max(1);

        let count = points.len() / range_scale;
        if count == 0 {
            return Err(TransformError::TooShort {
                points: points.len(),
                range_scale: config.range_scale,
            });
        }

        if self.line_count > 0 && count != self.sample_count {
            debug!(
                id = sample.id,
                was = self.sample_count,
                now = count,
                "Line length changed, restarting accumulation"
            );
            self.reset();
        }

        if self.output.len() < count {
            self.output.resize(count, 0.0);
        }

        for (out, chunk) in self.output[..count]
            .iter_mut()
            .zip(points.chunks_exact(range_scale))
        {
            *out += chunk.iter().sum::<f32>() / range_scale as f32;
        }
        self.sample_count = count;
        self.time_accumulator += sample.time;
        self.line_count += 1;

        if self.line_count < track_scale {
            return Ok(None);
        }

        let divisor = track_scale as f32;
        let values: Vec<f32> = self.output[..count].iter().map(|v| v / divisor).collect();
        let time = self.time_accumulator / track_scale as i64;
        let rate = sample.rate / range_scale as f64;
        self.reset();

        Ok(Some(DataSample::from_f32(sample.id, time, rate, &values)))
    }

    fn reset(&mut self) {
        let used = self.sample_count.min(self.output.len());
        self.output[..used].fill(0.0);
        self.line_count = 0;
        self.time_accumulator = 0;
    }
}

/// Per-source downsampling with the identity fast path
#[derive(Debug, Default)]
pub struct Downsampler {
    config: ScaleConfig,
    buffers: HashMap<u32, ScaleBuffer>,
}

impl Downsampler {
    pub fn new(config: ScaleConfig) -> Self {
        Self {
            config,
            buffers: HashMap::new(),
        }
    }

    pub fn config(&self) -> ScaleConfig {
        self.config
    }

    /// Transform one sample, keyed by its id
    pub fn process(&mut self, sample: DataSample) -> Result<Option<DataSample>, TransformError> {
        if self.config.is_identity() {
            return Ok(Some(sample));
        }
        self.buffers
            .entry(sample.id)
            .or_default()
            .push(self.config, &sample)
    }
}

/// Decode a payload into amplitude values
///
/// Integer encodings are normalised to `0..=1` (`-1..=1` for signed).
pub fn decode_amplitude(sample: &DataSample) -> Result<Vec<f32>, TransformError> {
    let point_size = match sample.data_type {
        DataType::Float32Le => 4,
        DataType::Int16Le | DataType::Uint16Le => 2,
        DataType::Uint8 => 1,
        other => return Err(TransformError::Unsupported(other)),
    };

    let data = &sample.data;
    if data.len() % point_size != 0 {
        return Err(TransformError::Malformed {
            len: data.len(),
            point_size,
        });
    }

    let points = match sample.data_type {
        DataType::Float32Le => data
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
        DataType::Int16Le => data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect(),
        DataType::Uint16Le => data
            .chunks_exact(2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]) as f32 / 65535.0)
            .collect(),
        _ => data.iter().map(|&b| b as f32 / 255.0).collect(),
    };
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn floats(sample: &DataSample) -> Vec<f32> {
        decode_amplitude(sample).unwrap()
    }

    #[test]
    fn test_identity_forwards_sample_unchanged() {
        let mut ds = Downsampler::new(ScaleConfig::new(1, 1));
        let input = DataSample::new(
            5,
            1234,
            DataType::ComplexInt16Le,
            10_000.0,
            Bytes::from_static(&[1, 2, 3, 4]),
        );
        let output = ds.process(input.clone()).unwrap();
        assert_eq!(output, Some(input));
        assert!(ds.buffers.is_empty());
    }

    #[test]
    fn test_constant_lines_average_to_constant() {
        let mut ds = Downsampler::new(ScaleConfig::new(4, 4));
        let line = [4.0f32; 16];

        let mut emitted = Vec::new();
        for (i, time) in [100, 200, 300, 400].into_iter().enumerate() {
            let out = ds.process(DataSample::from_f32(1, time, 8000.0, &line)).unwrap();
            if i < 3 {
                assert!(out.is_none());
            }
            emitted.extend(out);
        }

        assert_eq!(emitted.len(), 1);
        let out = &emitted[0];
        assert_eq!(out.time, 250);
        assert_eq!(out.rate, 2000.0);
        assert_eq!(out.data_type, DataType::Float32Le);
        assert_eq!(floats(out), vec![4.0; 4]);
    }

    #[test]
    fn test_lines_average_across_track() {
        let mut ds = Downsampler::new(ScaleConfig::new(4, 4));
        let mut last = None;
        for (i, v) in [1.0f32, 2.0, 3.0, 6.0].into_iter().enumerate() {
            last = ds
                .process(DataSample::from_f32(1, i as i64 * 10, 8000.0, &[v; 16]))
                .unwrap();
        }
        assert_eq!(floats(&last.unwrap()), vec![3.0; 4]);
    }

    #[test]
    fn test_range_decimation_averages_groups() {
        let mut buffer = ScaleBuffer::new();
        let line: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let out = buffer
            .push(ScaleConfig::new(2, 1), &DataSample::from_f32(1, 0, 100.0, &line))
            .unwrap()
            .unwrap();
        assert_eq!(floats(&out), vec![0.5, 2.5, 4.5, 6.5]);
    }

    #[test]
    fn test_buffer_grows_but_never_shrinks() {
        let mut buffer = ScaleBuffer::new();
        let config = ScaleConfig::new(1, 2);

        buffer.push(config, &DataSample::from_f32(1, 0, 1.0, &[1.0; 8])).unwrap();
        buffer.push(config, &DataSample::from_f32(1, 0, 1.0, &[1.0; 8])).unwrap();
        assert_eq!(buffer.capacity(), 8);

        let out = buffer.push(config, &DataSample::from_f32(1, 0, 1.0, &[2.0; 4])).unwrap();
        assert!(out.is_none());
        assert_eq!(buffer.capacity(), 8);
        let out = buffer
            .push(config, &DataSample::from_f32(1, 0, 1.0, &[2.0; 4]))
            .unwrap()
            .unwrap();
        assert_eq!(floats(&out), vec![2.0; 4]);
    }

    #[test]
    fn test_length_change_restarts_accumulation() {
        let mut buffer = ScaleBuffer::new();
        let config = ScaleConfig::new(1, 2);

        buffer.push(config, &DataSample::from_f32(1, 0, 1.0, &[9.0; 8])).unwrap();
        assert_eq!(buffer.line_count(), 1);
        buffer.push(config, &DataSample::from_f32(1, 10, 1.0, &[1.0; 4])).unwrap();
        assert_eq!(buffer.line_count(), 1);
        let out = buffer
            .push(config, &DataSample::from_f32(1, 30, 1.0, &[3.0; 4]))
            .unwrap()
            .unwrap();
        assert_eq!(floats(&out), vec![2.0; 4]);
        assert_eq!(out.time, 20);
    }

    #[test]
    fn test_unsupported_encoding_is_error() {
        let mut ds = Downsampler::new(ScaleConfig::new(2, 1));
        let sample = DataSample::new(1, 0, DataType::ComplexFloat32Le, 1.0, Bytes::from_static(&[0; 16]));
        assert_eq!(
            ds.process(sample),
            Err(TransformError::Unsupported(DataType::ComplexFloat32Le))
        );
    }

    #[test]
    fn test_integer_encodings_normalised() {
        let sample = DataSample::new(1, 0, DataType::Uint8, 1.0, Bytes::from_static(&[0, 255]));
        assert_eq!(floats(&sample), vec![0.0, 1.0]);

        let sample = DataSample::new(1, 0, DataType::Int16Le, 1.0, Bytes::from_static(&[0x00, 0x80]));
        assert_eq!(floats(&sample), vec![-1.0]);
    }

    #[test]
    fn test_short_line_rejected() {
        let mut buffer = ScaleBuffer::new();
        let result = buffer.push(ScaleConfig::new(8, 1), &DataSample::from_f32(1, 0, 1.0, &[1.0; 4]));
        assert!(matches!(result, Err(TransformError::TooShort { .. })));
    }
}
