// Model aggregation — elementwise mean across client parameter mappings

use fedsim_core::{Error, ParamMap, ParamTensor, Result};

/// Average a non-empty sequence of pairwise-compatible parameter mappings.
///
/// For each parameter key the result is the elementwise arithmetic mean of
/// that key's tensors across all inputs. The mean is unweighted — every
/// client counts the same regardless of shard size — and accumulation runs
/// in f64 so the result is independent of input order up to floating-point
/// tolerance. The output preserves the first input's key order.
pub fn average_models(models: &[ParamMap]) -> Result<ParamMap> {
    let first = models.first().ok_or(Error::EmptyInput)?;
    for other in &models[1..] {
        first.check_compatible(other)?;
    }

    let n = models.len() as f64;
    let mut result = ParamMap::new();
    for (name, tensor) in first.iter() {
        let mut acc = vec![0.0f64; tensor.numel()];
        for model in models {
            // check_compatible guarantees the key and shape exist
            let t = model.get(name).expect("compatible mapping");
            for (a, &v) in acc.iter_mut().zip(t.data()) {
                *a += v as f64;
            }
        }
        let data: Vec<f32> = acc.into_iter().map(|a| (a / n) as f32).collect();
        result.insert(name, ParamTensor::new(data, tensor.shape().to_vec())?);
    }
    Ok(result)
}
