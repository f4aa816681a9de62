//! f32 vector helpers: normalization and little-endian blob encoding.

use docsage_core::{Error, Result};
use ndarray::{Array1, ArrayViewMut1};

/// Scale a vector to unit L2 norm in place. Near-zero vectors are left as is.
pub fn normalize_in_place(mut v: ArrayViewMut1<f32>) {
    let norm = v.dot(&v).sqrt();
    if norm > 1e-12 {
        v.mapv_inplace(|x| x / norm);
    }
}

/// Return a unit-norm copy of `v`.
pub fn normalized(v: &Array1<f32>) -> Array1<f32> {
    let mut out = v.clone();
    normalize_in_place(out.view_mut());
    out
}

/// Encode as packed little-endian f32.
pub fn encode_f32_blob<'a>(values: impl IntoIterator<Item = &'a f32>) -> Vec<u8> {
    values.into_iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode packed little-endian f32, requiring exactly `dimension` values.
pub fn decode_f32_blob(bytes: &[u8], dimension: usize) -> Result<Vec<f32>> {
    if bytes.len() != dimension * 4 {
        return Err(Error::CorruptIndex(format!(
            "embedding blob has {} bytes, expected {}",
            bytes.len(),
            dimension * 4
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}
