//! Point-cloud payload codec.
//!
//! LiDAR scans travel through the log as ROS1 `sensor_msgs/PointCloud2` messages. The
//! spoofing pipeline only cares about point positions, so decoding reduces every
//! `stride`-byte record to the three little-endian `f32` values at byte offsets 0, 4 and 8
//! (x, y, z). Encoding always produces the packed 12-byte `xyz` layout.
//!
//! Two levels are provided:
//! - [`decode`]/[`encode`] work on the raw point blob only.
//! - [`PointCloud2Message`] (de)serializes the full ROS1 message so that the header
//!   metadata (sequence number, stamp, frame id) can be carried over to the rewritten
//!   message.
use serde::{Deserialize, Serialize};

use crate::error::{Result, SpoofError};
use crate::wire::{self, Cursor};
use crate::wrap_to_360;

/// Bytes occupied by one encoded `xyz` point.
pub const POINT_STEP: usize = 12;
/// `sensor_msgs/PointField` datatype code for FLOAT32.
pub const FLOAT32: u8 = 7;
/// ROS1 type name of the LiDAR message.
pub const POINTCLOUD2_TYPE: &str = "sensor_msgs/PointCloud2";
/// ROS1 md5sum of `sensor_msgs/PointCloud2`.
pub const POINTCLOUD2_MD5: &str = "1158d486dd51d683ce2f1be655c3c181";
/// ROS1 type name of the inertial message.
pub const IMU_TYPE: &str = "sensor_msgs/Imu";
/// ROS1 md5sum of `sensor_msgs/Imu`.
pub const IMU_MD5: &str = "6a62c6daae103f4ff57a132d6f95cec2";

/// A single LiDAR return in the sensor frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Point { x, y, z }
    }

    /// Build a point from horizontal range, bearing (degrees) and height.
    pub fn from_polar(range: f64, bearing_deg: f64, z: f64) -> Self {
        let theta = bearing_deg.to_radians();
        Point {
            x: (range * theta.cos()) as f32,
            y: (range * theta.sin()) as f32,
            z: z as f32,
        }
    }

    /// Horizontal distance from the sensor origin.
    pub fn range_xy(&self) -> f64 {
        (self.x as f64).hypot(self.y as f64)
    }

    /// Horizontal bearing in degrees, normalized to `[0, 360)`.
    pub fn bearing_deg(&self) -> f64 {
        wrap_to_360((self.y as f64).atan2(self.x as f64).to_degrees())
    }
}

/// Decoded scan plus the header metadata it arrived with.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PointCloud {
    pub sequence_number: u32,
    pub timestamp_ns: u64,
    pub frame_id: String,
    pub points: Vec<Point>,
}

impl PointCloud {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Decode a packed point blob into points.
///
/// # Errors
/// `SpoofError::Format` if `stride` is smaller than one `xyz` triple or if `raw` is not a
/// whole number of records.
pub fn decode(raw: &[u8], stride: usize) -> Result<Vec<Point>> {
    if stride < POINT_STEP {
        return Err(SpoofError::Format(format!(
            "record stride {stride} is smaller than an xyz triple ({POINT_STEP} bytes)"
        )));
    }
    if raw.len() % stride != 0 {
        return Err(SpoofError::Format(format!(
            "payload of {} bytes is not a multiple of stride {stride}",
            raw.len()
        )));
    }
    let f = |b: &[u8], at: usize| f32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]]);
    Ok(raw
        .chunks_exact(stride)
        .map(|rec| Point::new(f(rec, 0), f(rec, 4), f(rec, 8)))
        .collect())
}

/// Encode points as packed little-endian `xyz` triples, preserving order.
pub fn encode(points: &[Point]) -> Vec<u8> {
    let mut out = Vec::with_capacity(points.len() * POINT_STEP);
    for p in points {
        out.extend_from_slice(&p.x.to_le_bytes());
        out.extend_from_slice(&p.y.to_le_bytes());
        out.extend_from_slice(&p.z.to_le_bytes());
    }
    out
}

/// `sensor_msgs/PointField`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointField {
    pub name: String,
    pub offset: u32,
    pub datatype: u8,
    pub count: u32,
}

impl PointField {
    fn float32(name: &str, offset: u32) -> Self {
        PointField {
            name: name.to_string(),
            offset,
            datatype: FLOAT32,
            count: 1,
        }
    }
}

/// ROS1 `sensor_msgs/PointCloud2` message.
#[derive(Clone, Debug, PartialEq)]
pub struct PointCloud2Message {
    pub seq: u32,
    pub stamp_ns: u64,
    pub frame_id: String,
    pub height: u32,
    pub width: u32,
    pub fields: Vec<PointField>,
    pub is_bigendian: bool,
    pub point_step: u32,
    pub row_step: u32,
    pub data: Vec<u8>,
    pub is_dense: bool,
}

impl PointCloud2Message {
    /// Deserialize a ROS1-encoded message.
    pub fn from_ros1(raw: &[u8]) -> Result<Self> {
        let mut cur = Cursor::new(raw);
        let seq = cur.read_u32()?;
        let stamp_ns = cur.read_time()?;
        let frame_id = cur.read_string()?;
        let height = cur.read_u32()?;
        let width = cur.read_u32()?;
        let n_fields = cur.read_u32()? as usize;
        let mut fields = Vec::with_capacity(n_fields.min(16));
        for _ in 0..n_fields {
            fields.push(PointField {
                name: cur.read_string()?,
                offset: cur.read_u32()?,
                datatype: cur.read_u8()?,
                count: cur.read_u32()?,
            });
        }
        let is_bigendian = cur.read_u8()? != 0;
        let point_step = cur.read_u32()?;
        let row_step = cur.read_u32()?;
        let data = cur.read_bytes()?.to_vec();
        let is_dense = cur.read_u8()? != 0;
        Ok(PointCloud2Message {
            seq,
            stamp_ns,
            frame_id,
            height,
            width,
            fields,
            is_bigendian,
            point_step,
            row_step,
            data,
            is_dense,
        })
    }

    /// Serialize to ROS1 wire format.
    pub fn to_ros1(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.frame_id.len() + self.data.len());
        wire::write_u32(&mut out, self.seq);
        wire::write_time(&mut out, self.stamp_ns);
        wire::write_string(&mut out, &self.frame_id);
        wire::write_u32(&mut out, self.height);
        wire::write_u32(&mut out, self.width);
        wire::write_u32(&mut out, self.fields.len() as u32);
        for field in &self.fields {
            wire::write_string(&mut out, &field.name);
            wire::write_u32(&mut out, field.offset);
            wire::write_u8(&mut out, field.datatype);
            wire::write_u32(&mut out, field.count);
        }
        wire::write_u8(&mut out, self.is_bigendian as u8);
        wire::write_u32(&mut out, self.point_step);
        wire::write_u32(&mut out, self.row_step);
        wire::write_bytes(&mut out, &self.data);
        wire::write_u8(&mut out, self.is_dense as u8);
        out
    }

    /// Packed `xyz` message carrying the cloud's metadata.
    pub fn from_cloud(cloud: &PointCloud) -> Self {
        let n = cloud.points.len() as u32;
        PointCloud2Message {
            seq: cloud.sequence_number,
            stamp_ns: cloud.timestamp_ns,
            frame_id: cloud.frame_id.clone(),
            height: 1,
            width: n,
            fields: vec![
                PointField::float32("x", 0),
                PointField::float32("y", 4),
                PointField::float32("z", 8),
            ],
            is_bigendian: false,
            point_step: POINT_STEP as u32,
            row_step: POINT_STEP as u32 * n,
            data: encode(&cloud.points),
            is_dense: true,
        }
    }

    /// Decode the payload with the given record stride.
    ///
    /// # Errors
    /// `SpoofError::Format` for big-endian clouds or a payload that does not match `stride`.
    pub fn to_cloud(&self, stride: usize) -> Result<PointCloud> {
        if self.is_bigendian {
            return Err(SpoofError::Format(format!(
                "big-endian point cloud in frame '{}' is not supported",
                self.frame_id
            )));
        }
        Ok(PointCloud {
            sequence_number: self.seq,
            timestamp_ns: self.stamp_ns,
            frame_id: self.frame_id.clone(),
            points: decode(&self.data, stride)?,
        })
    }
}

/// Stamp of the `std_msgs/Header` that starts a stamped ROS1 message.
///
/// Works for any message whose first field is a header (`PointCloud2`, `Imu`, ...), so
/// messages that are copied verbatim can still be written at their own stamp.
pub fn header_stamp_ns(raw: &[u8]) -> Result<u64> {
    let mut cur = Cursor::new(raw);
    let _seq = cur.read_u32()?;
    cur.read_time()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn sample_points() -> Vec<Point> {
        vec![
            Point::new(1.0, 2.0, 3.0),
            Point::new(-0.5, 1e-7, f32::MAX),
            Point::new(f32::MIN_POSITIVE, -4.25, 0.0),
        ]
    }

    #[test]
    fn encode_decode_is_bit_exact() {
        let points = sample_points();
        let raw = encode(&points);
        assert_eq!(raw.len(), points.len() * POINT_STEP);
        let back = decode(&raw, POINT_STEP).unwrap();
        for (a, b) in points.iter().zip(back.iter()) {
            assert_eq!(a.x.to_bits(), b.x.to_bits());
            assert_eq!(a.y.to_bits(), b.y.to_bits());
            assert_eq!(a.z.to_bits(), b.z.to_bits());
        }
    }

    #[test]
    fn decode_wider_stride_reads_leading_floats() {
        // x, y, z, intensity, ring padding => 22 bytes per record
        let stride = 22;
        let mut raw = Vec::new();
        for p in sample_points() {
            raw.extend_from_slice(&p.x.to_le_bytes());
            raw.extend_from_slice(&p.y.to_le_bytes());
            raw.extend_from_slice(&p.z.to_le_bytes());
            raw.extend_from_slice(&[0xAB; 10]);
        }
        assert_eq!(decode(&raw, stride).unwrap(), sample_points());
    }

    #[test]
    fn decode_rejects_partial_record() {
        let raw = vec![0u8; 25];
        assert!(matches!(decode(&raw, 12), Err(SpoofError::Format(_))));
    }

    #[test]
    fn decode_rejects_short_stride() {
        assert!(matches!(decode(&[0u8; 16], 8), Err(SpoofError::Format(_))));
    }

    #[test]
    fn decode_empty_payload() {
        assert!(decode(&[], 32).unwrap().is_empty());
    }

    #[test]
    fn polar_helpers() {
        let p = Point::from_polar(2.0, 90.0, 0.5);
        assert_approx_eq!(p.x as f64, 0.0, 1e-6);
        assert_approx_eq!(p.y as f64, 2.0, 1e-6);
        assert_approx_eq!(p.range_xy(), 2.0, 1e-6);
        assert_approx_eq!(p.bearing_deg(), 90.0, 1e-4);
        assert_approx_eq!(Point::new(0.0, -1.0, 0.0).bearing_deg(), 270.0, 1e-9);
    }

    #[test]
    fn message_fields_for_encoded_cloud() {
        let cloud = PointCloud {
            sequence_number: 3,
            timestamp_ns: 1_600_000_000_123_456_789,
            frame_id: "velodyne".into(),
            points: sample_points(),
        };
        let msg = PointCloud2Message::from_cloud(&cloud);
        assert_eq!(msg.point_step, 12);
        assert_eq!(msg.row_step, 36);
        assert_eq!(msg.height, 1);
        assert_eq!(msg.width, 3);
        assert!(msg.is_dense);
        assert!(!msg.is_bigendian);
        assert_eq!(msg.fields.len(), 3);
        assert_eq!(msg.fields[2].offset, 8);

        let parsed = PointCloud2Message::from_ros1(&msg.to_ros1()).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.to_cloud(12).unwrap(), cloud);
        assert_eq!(
            header_stamp_ns(&msg.to_ros1()).unwrap(),
            1_600_000_000_123_456_789
        );
    }

    #[test]
    fn big_endian_cloud_is_rejected() {
        let mut msg = PointCloud2Message::from_cloud(&PointCloud::default());
        msg.is_bigendian = true;
        assert!(matches!(msg.to_cloud(12), Err(SpoofError::Format(_))));
    }

    #[test]
    fn truncated_message_is_format_error() {
        let msg = PointCloud2Message::from_cloud(&PointCloud {
            points: sample_points(),
            ..Default::default()
        });
        let raw = msg.to_ros1();
        assert!(matches!(
            PointCloud2Message::from_ros1(&raw[..raw.len() - 5]),
            Err(SpoofError::Format(_))
        ));
    }
}
