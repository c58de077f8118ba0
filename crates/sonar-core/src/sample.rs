//! Streaming sample types carried by the store's `sample` notification

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Encoding of the points in a sample payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Float32Le,
    Int16Le,
    Uint16Le,
    Uint8,
    ComplexFloat32Le,
    ComplexInt16Le,
    /// Text lines from sensor ports (NMEA sentences)
    String,
}

impl DataType {
    /// Bytes per point, `None` for variable-length text
    pub fn point_size(self) -> Option<usize> {
        match self {
            DataType::Float32Le => Some(4),
            DataType::Int16Le | DataType::Uint16Le => Some(2),
            DataType::Uint8 => Some(1),
            DataType::ComplexFloat32Le => Some(8),
            DataType::ComplexInt16Le => Some(4),
            DataType::String => None,
        }
    }
}

/// One sample (ping line or sensor message) tagged by numeric channel id
#[derive(Debug, Clone, PartialEq)]
pub struct DataSample {
    /// Numeric channel id from the schema
    pub id: u32,
    /// Capture time in microseconds since the Unix epoch
    pub time: i64,
    pub data_type: DataType,
    /// Points per second
    pub rate: f64,
    pub data: Bytes,
}

impl DataSample {
    pub fn new(id: u32, time: i64, data_type: DataType, rate: f64, data: Bytes) -> Self {
        Self {
            id,
            time,
            data_type,
            rate,
            data,
        }
    }

    /// Encode amplitudes as little-endian `f32`
    pub fn from_f32(id: u32, time: i64, rate: f64, points: &[f32]) -> Self {
        let mut buf = BytesMut::with_capacity(points.len() * 4);
        for p in points {
            buf.put_f32_le(*p);
        }
        Self::new(id, time, DataType::Float32Le, rate, buf.freeze())
    }

    /// A text sample such as an NMEA sentence
    pub fn from_text(id: u32, time: i64, text: &str) -> Self {
        Self::new(
            id,
            time,
            DataType::String,
            0.0,
            Bytes::copy_from_slice(text.as_bytes()),
        )
    }

    /// Number of whole points in the payload
    pub fn points(&self) -> usize {
        match self.data_type.point_size() {
            Some(size) => self.data.len() / size,
            None => self.data.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f32_encoding() {
        let sample = DataSample::from_f32(3, 100, 1000.0, &[1.0, -2.5]);
        assert_eq!(sample.data_type, DataType::Float32Le);
        assert_eq!(sample.points(), 2);
        assert_eq!(&sample.data[..4], &1.0f32.to_le_bytes());
        assert_eq!(&sample.data[4..], &(-2.5f32).to_le_bytes());
    }

    #[test]
    fn test_point_count_ignores_trailing_bytes() {
        let sample = DataSample::new(1, 0, DataType::Int16Le, 1.0, Bytes::from_static(&[0, 1, 2]));
        assert_eq!(sample.points(), 1);
    }
}
