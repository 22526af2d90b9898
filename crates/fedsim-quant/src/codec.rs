// Quantization codec — reduced-precision encodings for parameter transfer
//
// SUPPORTED SCHEMES:
//
//   - None:       identity; the payload carries full-precision f32
//   - HalfFloat:  elementwise cast to IEEE f16 (~2^-10 relative error);
//                 values beyond the f16 range saturate to ±inf
//   - AffineInt8: one scalar multiplier s = 127 / max|v| for the whole
//                 mapping; values encode as round(v * s) in i8 and decode
//                 as q / s
//
// Quantization applies to wire transfers only. Decoding is the inverse of
// encoding up to the scheme's declared precision loss, and the multiplier
// is recomputed from the current payload on every encode call — a stale
// multiplier against a different payload corrupts the decode.

use half::f16;

use fedsim_core::{Error, ParamMap, ParamTensor, Result};

/// Integer range for the affine scheme: symmetric signed 8-bit.
const INT8_QMAX: f32 = 127.0;

/// Which encoding a transfer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantScheme {
    /// No re-encoding; full-precision transfer.
    None,
    /// Reduced-precision float (f16).
    HalfFloat,
    /// Affine 8-bit integers with one scalar multiplier per payload.
    AffineInt8,
}

impl QuantScheme {
    /// Encode a parameter mapping for transfer.
    pub fn encode(&self, params: &ParamMap) -> Result<Payload> {
        match self {
            QuantScheme::None => Ok(Payload::Full(params.clone())),
            QuantScheme::HalfFloat => Ok(Payload::Half(
                params
                    .iter()
                    .map(|(name, t)| {
                        (
                            name.to_string(),
                            HalfTensor {
                                data: t.data().iter().map(|&v| f16::from_f32(v)).collect(),
                                shape: t.shape().to_vec(),
                            },
                        )
                    })
                    .collect(),
            )),
            QuantScheme::AffineInt8 => {
                let multiplier = int8_multiplier(params)?;
                let tensors = params
                    .iter()
                    .map(|(name, t)| {
                        (
                            name.to_string(),
                            Int8Tensor {
                                data: t
                                    .data()
                                    .iter()
                                    .map(|&v| {
                                        (v * multiplier).round().clamp(-INT8_QMAX, INT8_QMAX)
                                            as i8
                                    })
                                    .collect(),
                                shape: t.shape().to_vec(),
                            },
                        )
                    })
                    .collect();
                Ok(Payload::Int8 {
                    tensors,
                    multiplier,
                })
            }
        }
    }

    /// Short scheme name for logs and filenames.
    pub fn name(&self) -> &'static str {
        match self {
            QuantScheme::None => "none",
            QuantScheme::HalfFloat => "half",
            QuantScheme::AffineInt8 => "int8",
        }
    }
}

/// The whole-payload multiplier: 127 / max|v|, recomputed per encode call.
///
/// An all-zero payload would produce an infinite multiplier, so it clamps
/// to 1.0 (every value encodes as 0 either way). Non-finite values admit
/// no usable scale at all and are an error; `f32::max` would skip NaN, so
/// they are checked explicitly.
fn int8_multiplier(params: &ParamMap) -> Result<f32> {
    let mut amax = 0.0f32;
    for (name, tensor) in params.iter() {
        for &v in tensor.data() {
            if !v.is_finite() {
                return Err(Error::QuantizationRange(format!(
                    "parameter {name:?} contains the non-finite value {v}"
                )));
            }
            amax = amax.max(v.abs());
        }
    }
    if amax == 0.0 {
        return Ok(1.0);
    }
    Ok(INT8_QMAX / amax)
}

/// An f16-encoded tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct HalfTensor {
    pub data: Vec<f16>,
    pub shape: Vec<usize>,
}

/// An i8-encoded tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Int8Tensor {
    pub data: Vec<i8>,
    pub shape: Vec<usize>,
}

/// An encoded parameter mapping together with its side information.
///
/// A payload is only meaningful alongside [`Payload::decode`]; it carries
/// no semantic validity until decoded back to a [`ParamMap`].
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Full-precision f32 (scheme `None`).
    Full(ParamMap),
    /// f16 tensors (scheme `HalfFloat`).
    Half(Vec<(String, HalfTensor)>),
    /// i8 tensors plus the scalar multiplier (scheme `AffineInt8`).
    Int8 {
        tensors: Vec<(String, Int8Tensor)>,
        multiplier: f32,
    },
}

impl Payload {
    /// The scheme that produced this payload.
    pub fn scheme(&self) -> QuantScheme {
        match self {
            Payload::Full(_) => QuantScheme::None,
            Payload::Half(_) => QuantScheme::HalfFloat,
            Payload::Int8 { .. } => QuantScheme::AffineInt8,
        }
    }

    /// Decode back to a full-precision parameter mapping.
    pub fn decode(&self) -> Result<ParamMap> {
        match self {
            Payload::Full(params) => Ok(params.clone()),
            Payload::Half(tensors) => tensors
                .iter()
                .map(|(name, t)| {
                    let data = t.data.iter().map(|&v| v.to_f32()).collect();
                    Ok((name.clone(), ParamTensor::new(data, t.shape.clone())?))
                })
                .collect(),
            Payload::Int8 {
                tensors,
                multiplier,
            } => {
                if *multiplier == 0.0 || !multiplier.is_finite() {
                    return Err(Error::QuantizationRange(format!(
                        "multiplier {multiplier} cannot decode an int8 payload"
                    )));
                }
                tensors
                    .iter()
                    .map(|(name, t)| {
                        let data = t.data.iter().map(|&q| q as f32 / multiplier).collect();
                        Ok((name.clone(), ParamTensor::new(data, t.shape.clone())?))
                    })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(name: &str, vals: &[f32]) -> ParamMap {
        let mut m = ParamMap::new();
        m.insert(
            name,
            ParamTensor::new(vals.to_vec(), vec![vals.len()]).unwrap(),
        );
        m
    }

    #[test]
    fn known_int8_encoding() {
        // max|v| = 2.0 → multiplier 63.5; codes round to [64, -127, 32]
        let m = map_of("w", &[1.0, -2.0, 0.5]);
        let payload = QuantScheme::AffineInt8.encode(&m).unwrap();
        match &payload {
            Payload::Int8 {
                tensors,
                multiplier,
            } => {
                assert_eq!(*multiplier, 63.5);
                assert_eq!(tensors[0].1.data, vec![64, -127, 32]);
            }
            other => panic!("unexpected payload: {other:?}"),
        }

        let decoded = payload.decode().unwrap();
        let recovered = decoded.get("w").unwrap().data();
        for (orig, rec) in [1.0f32, -2.0, 0.5].iter().zip(recovered.iter()) {
            assert!(
                (orig - rec).abs() <= 1.0 / 63.5,
                "int8 round-trip: {orig} vs {rec}"
            );
        }
    }

    #[test]
    fn int8_error_bounded_by_range() {
        let vals: Vec<f32> = (0..64).map(|i| (i as f32 - 32.0) * 0.37).collect();
        let m = map_of("w", &vals);
        let amax = m.abs_max();

        let decoded = QuantScheme::AffineInt8.encode(&m).unwrap().decode().unwrap();
        for (orig, rec) in vals.iter().zip(decoded.get("w").unwrap().data()) {
            assert!(
                (orig - rec).abs() <= amax / 127.0,
                "int8 error bound: {orig} vs {rec}"
            );
        }
    }

    #[test]
    fn half_round_trip_near_machine_epsilon() {
        let vals = vec![0.0f32, 1.0, -1.5, 0.333, 100.25, -6.2e-3];
        let m = map_of("w", &vals);
        let decoded = QuantScheme::HalfFloat.encode(&m).unwrap().decode().unwrap();
        for (orig, rec) in vals.iter().zip(decoded.get("w").unwrap().data()) {
            let rel = if *orig == 0.0 {
                rec.abs()
            } else {
                ((orig - rec) / orig).abs()
            };
            assert!(rel < 1.0e-3, "f16 relative error too large: {orig} vs {rec}");
        }
    }

    #[test]
    fn half_saturates_out_of_range_values() {
        let m = map_of("w", &[1.0e30, -1.0e30]);
        let decoded = QuantScheme::HalfFloat.encode(&m).unwrap().decode().unwrap();
        let data = decoded.get("w").unwrap().data();
        assert!(data[0].is_infinite() && data[0] > 0.0);
        assert!(data[1].is_infinite() && data[1] < 0.0);
    }

    #[test]
    fn keys_and_shapes_survive_both_schemes() {
        let mut m = ParamMap::new();
        m.insert("a", ParamTensor::new(vec![1.0; 6], vec![2, 3]).unwrap());
        m.insert("b", ParamTensor::new(vec![-0.5; 4], vec![4]).unwrap());

        for scheme in [QuantScheme::HalfFloat, QuantScheme::AffineInt8] {
            let decoded = scheme.encode(&m).unwrap().decode().unwrap();
            assert!(m.check_compatible(&decoded).is_ok(), "{scheme:?}");
            let keys: Vec<&str> = decoded.keys().collect();
            assert_eq!(keys, vec!["a", "b"], "{scheme:?} key order");
        }
    }

    #[test]
    fn all_zero_payload_clamps_multiplier() {
        let m = map_of("w", &[0.0, 0.0, 0.0]);
        let payload = QuantScheme::AffineInt8.encode(&m).unwrap();
        match &payload {
            Payload::Int8 { multiplier, .. } => assert_eq!(*multiplier, 1.0),
            other => panic!("unexpected payload: {other:?}"),
        }
        let decoded = payload.decode().unwrap();
        assert!(decoded.get("w").unwrap().data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn non_finite_range_is_an_error() {
        for bad in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            let m = map_of("w", &[bad, 1.0]);
            let err = QuantScheme::AffineInt8.encode(&m).unwrap_err();
            assert!(matches!(err, Error::QuantizationRange(_)), "{bad}");
        }
    }

    #[test]
    fn multiplier_recomputed_per_encode() {
        let small = map_of("w", &[0.5, -0.25]);
        let large = map_of("w", &[8.0, -4.0]);
        let p1 = QuantScheme::AffineInt8.encode(&small).unwrap();
        let p2 = QuantScheme::AffineInt8.encode(&large).unwrap();
        match (&p1, &p2) {
            (
                Payload::Int8 { multiplier: m1, .. },
                Payload::Int8 { multiplier: m2, .. },
            ) => {
                assert_eq!(*m1, 127.0 / 0.5);
                assert_eq!(*m2, 127.0 / 8.0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn reencoding_a_decoded_payload_is_stable() {
        // The second encode/decode must not lose information beyond the
        // first one.
        let m = map_of("w", &[0.9, -0.1, 0.4, 0.77]);
        let once = QuantScheme::AffineInt8.encode(&m).unwrap().decode().unwrap();
        let twice = QuantScheme::AffineInt8
            .encode(&once)
            .unwrap()
            .decode()
            .unwrap();
        for (a, b) in once
            .get("w")
            .unwrap()
            .data()
            .iter()
            .zip(twice.get("w").unwrap().data())
        {
            assert!((a - b).abs() <= once.abs_max() / 127.0, "{a} vs {b}");
        }
    }

    #[test]
    fn none_scheme_is_identity() {
        let m = map_of("w", &[1.0, 2.0, 3.0]);
        let decoded = QuantScheme::None.encode(&m).unwrap().decode().unwrap();
        assert_eq!(decoded, m);
    }
}
