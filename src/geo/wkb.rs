//! 地块两种几何（点、多边形）的 ISO WKB 编解码。
//!
//! 编码固定小端，解码接受两种字节序。轴顺序 `x = 经度`，`y = 纬度`。

use super::{Coordinate, GeoError, Polygon};

const WKB_POINT: u32 = 1;
const WKB_POLYGON: u32 = 3;

pub fn encode_point(point: Coordinate) -> Vec<u8> {
    let mut out = Vec::with_capacity(21);
    out.push(1);
    out.extend_from_slice(&WKB_POINT.to_le_bytes());
    out.extend_from_slice(&point.lng.to_le_bytes());
    out.extend_from_slice(&point.lat.to_le_bytes());
    out
}

pub fn encode_polygon(polygon: &Polygon) -> Vec<u8> {
    let ring = polygon.exterior();
    let mut out = Vec::with_capacity(13 + ring.len() * 16);
    out.push(1);
    out.extend_from_slice(&WKB_POLYGON.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(ring.len() as u32).to_le_bytes());
    for c in ring {
        out.extend_from_slice(&c.lng.to_le_bytes());
        out.extend_from_slice(&c.lat.to_le_bytes());
    }
    out
}

pub fn decode_point(bytes: &[u8]) -> Result<Coordinate, GeoError> {
    let mut r = Reader::new(bytes)?;
    r.expect_type(WKB_POINT)?;
    let lng = r.f64()?;
    let lat = r.f64()?;
    r.finish()?;
    Ok(Coordinate::new(lat, lng))
}

/// 解码多边形，只保留外环
pub fn decode_polygon(bytes: &[u8]) -> Result<Polygon, GeoError> {
    let mut r = Reader::new(bytes)?;
    r.expect_type(WKB_POLYGON)?;
    let rings = r.u32()?;
    if rings == 0 {
        return Err(GeoError::Wkb("polygon without rings".to_string()));
    }
    let mut exterior = Vec::new();
    for ring_idx in 0..rings {
        let points = r.u32()? as usize;
        if r.remaining() < points.saturating_mul(16) {
            return Err(GeoError::Wkb("ring longer than buffer".to_string()));
        }
        for _ in 0..points {
            let lng = r.f64()?;
            let lat = r.f64()?;
            if ring_idx == 0 {
                exterior.push(Coordinate::new(lat, lng));
            }
        }
    }
    r.finish()?;
    Ok(Polygon::from_closed_ring(exterior))
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Result<Self, GeoError> {
        let little_endian = match buf.first() {
            Some(1) => true,
            Some(0) => false,
            Some(b) => return Err(GeoError::Wkb(format!("unknown byte order {b}"))),
            None => return Err(GeoError::Wkb("empty buffer".to_string())),
        };
        Ok(Self {
            buf,
            pos: 1,
            little_endian,
        })
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], GeoError> {
        let end = self.pos + N;
        let slice = self
            .buf
            .get(self.pos..end)
            .ok_or_else(|| GeoError::Wkb("unexpected end of buffer".to_string()))?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u32(&mut self) -> Result<u32, GeoError> {
        let b = self.take::<4>()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(b)
        } else {
            u32::from_be_bytes(b)
        })
    }

    fn f64(&mut self) -> Result<f64, GeoError> {
        let b = self.take::<8>()?;
        Ok(if self.little_endian {
            f64::from_le_bytes(b)
        } else {
            f64::from_be_bytes(b)
        })
    }

    fn expect_type(&mut self, expected: u32) -> Result<(), GeoError> {
        let kind = self.u32()?;
        if kind != expected {
            return Err(GeoError::Wkb(format!(
                "geometry type {kind}, expected {expected}"
            )));
        }
        Ok(())
    }

    fn finish(&self) -> Result<(), GeoError> {
        if self.remaining() != 0 {
            return Err(GeoError::Wkb(format!(
                "{} trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}
