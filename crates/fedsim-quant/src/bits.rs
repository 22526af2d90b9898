// Bit accounting — transfer cost of the concrete wire representation
//
// Sizes are measured by serializing through the same representation a
// transfer would actually use, never computed from a formula, so they stay
// honest about codec framing overhead. Measurement is purely in-memory and
// leaves no artifact behind.

use fedsim_core::ParamMap;

use crate::codec::Payload;
use crate::wire::serialize_payload;

/// Size of a payload's wire representation, in bits.
pub fn payload_size_in_bits(payload: &Payload) -> u64 {
    serialize_payload(payload).len() as u64 * 8
}

/// Size of a full-precision parameter mapping's wire representation, in bits.
pub fn model_size_in_bits(params: &ParamMap) -> u64 {
    payload_size_in_bits(&Payload::Full(params.clone()))
}
