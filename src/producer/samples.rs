//! Sensor sample types and their wire serialization

use bytes::Bytes;
use sensorlink_core_interface::{ProducerError, Reading, ReadingKind};
use serde::{Deserialize, Serialize};

/// A sample that knows how to serialize itself into a `Reading`
pub trait Sample: Clone + Send + Sync + 'static {
    /// Kind of reading this sample becomes
    const KIND: ReadingKind;

    /// Serialize into the wire payload
    fn encode(&self) -> Result<Bytes, ProducerError>;

    fn to_reading(&self) -> Result<Reading, ProducerError> {
        Reading::new(Self::KIND, self.encode()?)
    }
}

/// Geographic fix in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
}

impl LocationFix {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

impl Sample for LocationFix {
    const KIND: ReadingKind = ReadingKind::Location;

    /// Pretty-printed `{"latitude": .., "longitude": ..}`
    fn encode(&self) -> Result<Bytes, ProducerError> {
        if !(self.latitude.is_finite() && (-90.0..=90.0).contains(&self.latitude)) {
            return Err(ProducerError::InvalidData(format!(
                "latitude out of range: {}",
                self.latitude
            )));
        }
        if !(self.longitude.is_finite() && (-180.0..=180.0).contains(&self.longitude)) {
            return Err(ProducerError::InvalidData(format!(
                "longitude out of range: {}",
                self.longitude
            )));
        }
        Ok(serde_json::to_vec_pretty(self)?.into())
    }
}

/// Three-axis vector
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<[f64; 3]> for Vector3 {
    fn from(v: [f64; 3]) -> Self {
        Self::new(v[0], v[1], v[2])
    }
}

/// Device motion: user acceleration (g) and rotation rate (rad/s)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MotionSample {
    pub acceleration: Vector3,
    pub gyroscope: Vector3,
}

impl MotionSample {
    pub fn new(acceleration: impl Into<Vector3>, gyroscope: impl Into<Vector3>) -> Self {
        Self {
            acceleration: acceleration.into(),
            gyroscope: gyroscope.into(),
        }
    }
}

impl Sample for MotionSample {
    const KIND: ReadingKind = ReadingKind::Motion;

    fn encode(&self) -> Result<Bytes, ProducerError> {
        if !(self.acceleration.is_finite() && self.gyroscope.is_finite()) {
            return Err(ProducerError::InvalidData(
                "non-finite motion component".to_string(),
            ));
        }
        Ok(serde_json::to_vec_pretty(self)?.into())
    }
}

/// Depth map in meters, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    width: usize,
    height: usize,
    depths: Vec<f32>,
}

impl DepthMap {
    /// Build a map, checking that `depths` holds exactly `width * height` values
    pub fn new(width: usize, height: usize, depths: Vec<f32>) -> Result<Self, ProducerError> {
        if width == 0 || height == 0 {
            return Err(ProducerError::InvalidData(format!(
                "empty depth map ({}x{})",
                width, height
            )));
        }
        let expected = width
            .checked_mul(height)
            .ok_or_else(|| ProducerError::InvalidData("depth map too large".to_string()))?;
        if depths.len() != expected {
            return Err(ProducerError::InvalidData(format!(
                "depth map {}x{} needs {} values, got {}",
                width,
                height,
                expected,
                depths.len()
            )));
        }
        Ok(Self {
            width,
            height,
            depths,
        })
    }

    pub fn zeros(width: usize, height: usize) -> Result<Self, ProducerError> {
        Self::new(width, height, vec![0.0; width.saturating_mul(height)])
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn depths(&self) -> &[f32] {
        &self.depths
    }
}

impl Sample for DepthMap {
    const KIND: ReadingKind = ReadingKind::Ranging;

    /// Flat little-endian f32 array, `width * height * 4` bytes, no header
    fn encode(&self) -> Result<Bytes, ProducerError> {
        let mut out = Vec::with_capacity(self.depths.len() * std::mem::size_of::<f32>());
        for depth in &self.depths {
            out.extend_from_slice(&depth.to_le_bytes());
        }
        Ok(out.into())
    }
}

/// Encoded camera frame (JPEG)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageFrame {
    pub jpeg: Bytes,
}

impl ImageFrame {
    pub fn new(jpeg: impl Into<Bytes>) -> Self {
        Self { jpeg: jpeg.into() }
    }
}

impl Sample for ImageFrame {
    const KIND: ReadingKind = ReadingKind::Imagery;

    fn encode(&self) -> Result<Bytes, ProducerError> {
        Ok(self.jpeg.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_json_has_exactly_two_keys() {
        let reading = LocationFix::new(1.0, 2.0).to_reading().unwrap();
        assert_eq!(reading.kind(), ReadingKind::Location);

        let value: serde_json::Value = serde_json::from_slice(reading.payload()).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["latitude"], 1.0);
        assert_eq!(object["longitude"], 2.0);
    }

    #[test]
    fn test_location_out_of_range() {
        let err = LocationFix::new(91.0, 0.0).encode().unwrap_err();
        assert!(matches!(err, ProducerError::InvalidData(_)));
        assert!(LocationFix::new(0.0, f64::NAN).encode().is_err());
    }

    #[test]
    fn test_motion_json_shape() {
        let sample = MotionSample::new([0.1, -0.2, 0.3], [1.0, 2.0, 3.0]);
        let bytes = sample.encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["acceleration"]["y"], -0.2);
        assert_eq!(value["gyroscope"]["z"], 3.0);
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_motion_rejects_nan() {
        let sample = MotionSample::new([f64::NAN, 0.0, 0.0], [0.0, 0.0, 0.0]);
        assert!(sample.encode().is_err());
    }

    #[test]
    fn test_depth_map_layout() {
        let map = DepthMap::new(2, 1, vec![1.0, 0.5]).unwrap();
        let bytes = map.encode().unwrap();
        assert_eq!(bytes.len(), 2 * 1 * 4);
        assert_eq!(&bytes[..4], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[4..], &0.5f32.to_le_bytes());
    }

    #[test]
    fn test_zero_depth_map_is_sixteen_zero_bytes() {
        let reading = DepthMap::zeros(2, 2).unwrap().to_reading().unwrap();
        assert_eq!(reading.payload().as_ref(), &[0u8; 16]);
    }

    #[test]
    fn test_depth_map_dimension_checks() {
        assert!(DepthMap::new(0, 4, vec![]).is_err());
        assert!(DepthMap::new(2, 2, vec![0.0; 3]).is_err());
    }

    #[test]
    fn test_empty_image_rejected() {
        let err = ImageFrame::new(Bytes::new()).to_reading().unwrap_err();
        assert_eq!(err, ProducerError::EmptyPayload(ReadingKind::Imagery));
    }
}
