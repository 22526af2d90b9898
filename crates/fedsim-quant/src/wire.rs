// Wire format — in-memory serialization of transfer payloads
//
// Binary layout (all integers little-endian):
//
//   Header:
//     magic:      [u8; 4]  = b"FSIM"
//     version:    u32      = 1
//     scheme:     u8       (0 = full f32, 1 = f16, 2 = affine i8)
//     multiplier: f32      (affine i8 only)
//     count:      u32      = number of tensors
//
//   For each tensor:
//     key_len:  u32
//     key:      [u8; key_len]  (UTF-8)
//     ndim:     u32
//     dims:     [u32; ndim]
//     data_len: u64            (in bytes)
//     data:     [u8; data_len] (LE f32 / LE f16 / i8 by scheme)
//
// This is the exact representation a transfer would put on the wire, so
// measuring its length is measuring real transfer cost. Serialization is
// purely in-memory; the save/load pair adds durable persistence on top.

use std::fs;
use std::path::Path;

use half::f16;

use fedsim_core::{Error, ParamMap, ParamTensor, Result};

use crate::codec::{HalfTensor, Int8Tensor, Payload};

const MAGIC: &[u8; 4] = b"FSIM";
const VERSION: u32 = 1;

const SCHEME_FULL: u8 = 0;
const SCHEME_HALF: u8 = 1;
const SCHEME_INT8: u8 = 2;

/// Serialize a payload to its wire representation.
pub fn serialize_payload(payload: &Payload) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());

    match payload {
        Payload::Full(params) => {
            buf.push(SCHEME_FULL);
            buf.extend_from_slice(&(params.len() as u32).to_le_bytes());
            for (name, tensor) in params.iter() {
                let data: Vec<u8> = tensor
                    .data()
                    .iter()
                    .flat_map(|&v| v.to_le_bytes())
                    .collect();
                write_frame(&mut buf, name, tensor.shape(), &data);
            }
        }
        Payload::Half(tensors) => {
            buf.push(SCHEME_HALF);
            buf.extend_from_slice(&(tensors.len() as u32).to_le_bytes());
            for (name, tensor) in tensors {
                let data: Vec<u8> = tensor
                    .data
                    .iter()
                    .flat_map(|&v| v.to_le_bytes())
                    .collect();
                write_frame(&mut buf, name, &tensor.shape, &data);
            }
        }
        Payload::Int8 {
            tensors,
            multiplier,
        } => {
            buf.push(SCHEME_INT8);
            buf.extend_from_slice(&multiplier.to_le_bytes());
            buf.extend_from_slice(&(tensors.len() as u32).to_le_bytes());
            for (name, tensor) in tensors {
                let data: Vec<u8> = tensor.data.iter().map(|&q| q as u8).collect();
                write_frame(&mut buf, name, &tensor.shape, &data);
            }
        }
    }

    buf
}

fn write_frame(buf: &mut Vec<u8>, key: &str, shape: &[usize], data: &[u8]) {
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(&(shape.len() as u32).to_le_bytes());
    for &dim in shape {
        buf.extend_from_slice(&(dim as u32).to_le_bytes());
    }
    buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
    buf.extend_from_slice(data);
}

/// Parse a payload back from its wire representation.
pub fn deserialize_payload(bytes: &[u8]) -> Result<Payload> {
    let mut r = Reader { bytes, pos: 0 };

    let magic = r.take(4)?;
    if magic != MAGIC {
        return Err(Error::InvalidFormat(format!(
            "bad magic {magic:?}, expected {MAGIC:?}"
        )));
    }
    let version = r.u32()?;
    if version != VERSION {
        return Err(Error::InvalidFormat(format!(
            "unsupported version {version}, expected {VERSION}"
        )));
    }

    let scheme = r.u8()?;
    match scheme {
        SCHEME_FULL => {
            let count = r.u32()? as usize;
            let mut params = ParamMap::new();
            for _ in 0..count {
                let (key, shape, data) = r.frame()?;
                if data.len() % 4 != 0 {
                    return Err(Error::InvalidFormat(format!(
                        "f32 frame for {key:?} has {} bytes",
                        data.len()
                    )));
                }
                let values: Vec<f32> = data
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                params.insert(key, ParamTensor::new(values, shape)?);
            }
            Ok(Payload::Full(params))
        }
        SCHEME_HALF => {
            let count = r.u32()? as usize;
            let mut tensors = Vec::with_capacity(count);
            for _ in 0..count {
                let (key, shape, data) = r.frame()?;
                if data.len() % 2 != 0 {
                    return Err(Error::InvalidFormat(format!(
                        "f16 frame for {key:?} has {} bytes",
                        data.len()
                    )));
                }
                let values: Vec<f16> = data
                    .chunks_exact(2)
                    .map(|c| f16::from_le_bytes([c[0], c[1]]))
                    .collect();
                check_numel(&key, &shape, values.len())?;
                tensors.push((
                    key,
                    HalfTensor {
                        data: values,
                        shape,
                    },
                ));
            }
            Ok(Payload::Half(tensors))
        }
        SCHEME_INT8 => {
            let multiplier = r.f32()?;
            let count = r.u32()? as usize;
            let mut tensors = Vec::with_capacity(count);
            for _ in 0..count {
                let (key, shape, data) = r.frame()?;
                let values: Vec<i8> = data.iter().map(|&b| b as i8).collect();
                check_numel(&key, &shape, values.len())?;
                tensors.push((
                    key,
                    Int8Tensor {
                        data: values,
                        shape,
                    },
                ));
            }
            Ok(Payload::Int8 {
                tensors,
                multiplier,
            })
        }
        other => Err(Error::InvalidFormat(format!("unknown scheme tag {other}"))),
    }
}

fn check_numel(key: &str, shape: &[usize], got: usize) -> Result<()> {
    let expected: usize = shape.iter().product();
    if expected != got {
        return Err(Error::InvalidFormat(format!(
            "frame for {key:?}: shape {shape:?} implies {expected} values, got {got}"
        )));
    }
    Ok(())
}

/// Write a payload to a file (final model persistence).
pub fn save_payload(path: impl AsRef<Path>, payload: &Payload) -> Result<()> {
    fs::write(path, serialize_payload(payload))?;
    Ok(())
}

/// Read a payload back from a file.
pub fn load_payload(path: impl AsRef<Path>) -> Result<Payload> {
    let bytes = fs::read(path)?;
    deserialize_payload(&bytes)
}

// Cursor over the serialized buffer

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(Error::InvalidFormat(format!(
                "truncated payload: wanted {n} bytes at offset {}, have {}",
                self.pos,
                self.bytes.len() - self.pos
            )));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn f32(&mut self) -> Result<f32> {
        let b = self.take(4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn frame(&mut self) -> Result<(String, Vec<usize>, &'a [u8])> {
        let key_len = self.u32()? as usize;
        let key = String::from_utf8(self.take(key_len)?.to_vec())
            .map_err(|e| Error::InvalidFormat(format!("non-UTF-8 key: {e}")))?;
        let ndim = self.u32()? as usize;
        let mut shape = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            shape.push(self.u32()? as usize);
        }
        let data_len = self.u64()? as usize;
        let data = self.take(data_len)?;
        Ok((key, shape, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::QuantScheme;

    fn sample_map() -> ParamMap {
        let mut m = ParamMap::new();
        m.insert(
            "fc.weight",
            ParamTensor::new(vec![0.1, -0.2, 0.3, -0.4, 0.5, -0.6], vec![2, 3]).unwrap(),
        );
        m.insert("fc.bias", ParamTensor::new(vec![1.5, -2.5], vec![2]).unwrap());
        m
    }

    #[test]
    fn full_payload_round_trips() {
        let payload = Payload::Full(sample_map());
        let bytes = serialize_payload(&payload);
        let back = deserialize_payload(&bytes).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn half_payload_round_trips() {
        let payload = QuantScheme::HalfFloat.encode(&sample_map()).unwrap();
        let bytes = serialize_payload(&payload);
        assert_eq!(deserialize_payload(&bytes).unwrap(), payload);
    }

    #[test]
    fn int8_payload_round_trips_with_multiplier() {
        let payload = QuantScheme::AffineInt8.encode(&sample_map()).unwrap();
        let bytes = serialize_payload(&payload);
        let back = deserialize_payload(&bytes).unwrap();
        assert_eq!(back, payload);
        match back {
            Payload::Int8 { multiplier, .. } => assert_eq!(multiplier, 127.0 / 2.5),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn corrupted_magic_rejected() {
        let mut bytes = serialize_payload(&Payload::Full(sample_map()));
        bytes[0] = b'X';
        assert!(matches!(
            deserialize_payload(&bytes),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn truncated_buffer_rejected() {
        let bytes = serialize_payload(&Payload::Full(sample_map()));
        assert!(deserialize_payload(&bytes[..bytes.len() - 3]).is_err());
        assert!(deserialize_payload(&bytes[..6]).is_err());
    }

    #[test]
    fn unknown_scheme_tag_rejected() {
        let mut bytes = serialize_payload(&Payload::Full(sample_map()));
        bytes[8] = 9; // scheme byte follows magic + version
        assert!(matches!(
            deserialize_payload(&bytes),
            Err(Error::InvalidFormat(_))
        ));
    }
}
