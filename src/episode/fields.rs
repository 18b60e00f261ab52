//! Serialized per-episode arrays and objects.
//!
//! A trajectory stores its robot state and policy outputs as serialized
//! containers (`obs_dict`, `policy_out`, `agent_data`): dictionaries of
//! numpy arrays, or lists of per-step dictionaries. They are all decoded into
//! one [`FieldValue`] tree so the normalizer can index them uniformly.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use ndarray::{ArrayD, Axis};
use ndarray_npy::ReadNpyExt;
use serde_json::Value as JsonValue;

use super::pickle;

const NPY_MAGIC: &[u8] = b"\x93NUMPY";

/// A decoded serialized value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// A dense numeric array, widened to `f64`.
    Array(ArrayD<f64>),
    List(Vec<FieldValue>),
    Dict(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Short name of the variant, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::List(_) => "list",
            Self::Dict(_) => "dict",
        }
    }

    /// Look up a key in a dictionary value.
    pub fn get(&self, key: &str) -> Result<&FieldValue> {
        match self {
            Self::Dict(map) => map
                .get(key)
                .ok_or_else(|| anyhow!("missing key `{key}`")),
            other => bail!("expected dict with key `{key}`, found {}", other.kind()),
        }
    }

    /// Number of entries along the leading axis.
    pub fn len(&self) -> Result<usize> {
        match self {
            Self::List(items) => Ok(items.len()),
            Self::Array(array) if array.ndim() > 0 => Ok(array.len_of(Axis(0))),
            other => bail!("expected a sequence, found {}", other.kind()),
        }
    }

    /// Entry `index` along the leading axis.
    pub fn row(&self, index: usize) -> Result<FieldValue> {
        let len = self.len()?;
        let out_of_bounds = || anyhow!("index {index} out of bounds for sequence of length {len}");
        match self {
            Self::List(items) => items.get(index).cloned().ok_or_else(out_of_bounds),
            Self::Array(array) if index < len => {
                Ok(Self::Array(array.index_axis(Axis(0), index).to_owned()))
            }
            Self::Array(_) => Err(out_of_bounds()),
            other => bail!("expected a sequence, found {}", other.kind()),
        }
    }

    /// Flatten a numeric value (scalar, array or nested list) in row-major order.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let mut out = Vec::new();
        self.flatten_into(&mut out)?;
        Ok(out)
    }

    fn flatten_into(&self, out: &mut Vec<f64>) -> Result<()> {
        match self {
            Self::Bool(b) => out.push(if *b { 1.0 } else { 0.0 }),
            Self::Int(i) => out.push(*i as f64),
            Self::Float(f) => out.push(*f),
            Self::Array(array) => out.extend(array.iter().copied()),
            Self::List(items) => {
                for item in items {
                    item.flatten_into(out)?;
                }
            }
            Self::None => bail!("expected numeric data, found none (unsupported pickled object?)"),
            other => bail!("expected numeric data, found {}", other.kind()),
        }
        Ok(())
    }

    /// A numeric value with exactly `N` elements.
    pub fn fixed<const N: usize>(&self) -> Result<[f64; N]> {
        let values = self.to_f64_vec()?;
        <[f64; N]>::try_from(values.as_slice())
            .map_err(|_| anyhow!("expected {N} values, found {}", values.len()))
    }

    /// A 4x4 matrix, row-major.
    pub fn matrix4(&self) -> Result<[[f64; 4]; 4]> {
        let flat: [f64; 16] = self.fixed()?;
        Ok(std::array::from_fn(|r| std::array::from_fn(|c| flat[r * 4 + c])))
    }

    /// A non-negative integral count.
    pub fn as_usize(&self) -> Result<usize> {
        let value = match self {
            Self::Int(i) => *i as f64,
            Self::Float(f) => *f,
            Self::Array(array) if array.len() == 1 => array.iter().copied().next().unwrap_or(f64::NAN),
            other => bail!("expected an integer, found {}", other.kind()),
        };
        if value < 0.0 || value.fract() != 0.0 || !value.is_finite() {
            bail!("expected a non-negative integer, found {value}");
        }
        Ok(value as usize)
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a serialized file, choosing the decoder from its extension.
pub fn load_field(path: &Path) -> Result<FieldValue> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;

    let value = match ext.as_str() {
        "npy" => decode_npy(&bytes),
        "pkl" | "pickle" => decode_pickle(&bytes),
        "json" => decode_json(&bytes),
        _ => Err(anyhow!("unsupported serialized format `{ext}`")),
    };
    value.with_context(|| format!("Failed to decode {}", path.display()))
}

/// Decode a `.npy` file. Numeric and boolean dtypes are widened to `f64`;
/// object arrays (`np.save` of a dict or list) decode their pickled payload.
pub fn decode_npy(bytes: &[u8]) -> Result<FieldValue> {
    let (header, data_start) = npy_header(bytes)?;
    if header.contains("'|O'") {
        return pickle::decode(&bytes[data_start..]).context("Failed to decode object array");
    }
    if let Ok(array) = ArrayD::<f64>::read_npy(bytes) {
        return Ok(FieldValue::Array(array));
    }
    if let Ok(array) = ArrayD::<f32>::read_npy(bytes) {
        return Ok(FieldValue::Array(array.mapv(f64::from)));
    }
    if let Ok(array) = ArrayD::<i64>::read_npy(bytes) {
        return Ok(FieldValue::Array(array.mapv(|v| v as f64)));
    }
    if let Ok(array) = ArrayD::<i32>::read_npy(bytes) {
        return Ok(FieldValue::Array(array.mapv(f64::from)));
    }
    if let Ok(array) = ArrayD::<u8>::read_npy(bytes) {
        return Ok(FieldValue::Array(array.mapv(f64::from)));
    }
    let array = ArrayD::<bool>::read_npy(bytes)
        .context("npy dtype is not one of f64, f32, i64, i32, u8, bool")?;
    Ok(FieldValue::Array(array.mapv(|v| if v { 1.0 } else { 0.0 })))
}

/// Decode a pickle stream, rebuilding numpy arrays and scalars.
pub fn decode_pickle(bytes: &[u8]) -> Result<FieldValue> {
    pickle::decode(bytes)
}

/// The header dict of a `.npy` file and the offset where its data starts.
fn npy_header(bytes: &[u8]) -> Result<(&str, usize)> {
    if !bytes.starts_with(NPY_MAGIC) || bytes.len() < 10 {
        bail!("missing npy magic");
    }
    let (len, start) = match bytes[6] {
        1 => (usize::from(u16::from_le_bytes([bytes[8], bytes[9]])), 10),
        2 | 3 => {
            let raw = bytes.get(8..12).context("truncated npy header")?;
            (usize::try_from(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))?, 12)
        }
        version => bail!("unsupported npy version {version}"),
    };
    let header = bytes
        .get(start..start + len)
        .context("truncated npy header")?;
    Ok((std::str::from_utf8(header)?, start + len))
}

/// Decode a JSON document.
pub fn decode_json(bytes: &[u8]) -> Result<FieldValue> {
    let value: JsonValue = serde_json::from_slice(bytes)?;
    Ok(from_json(value))
}

fn from_json(value: JsonValue) -> FieldValue {
    match value {
        JsonValue::Null => FieldValue::None,
        JsonValue::Bool(b) => FieldValue::Bool(b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Int(i),
            None => n.as_f64().map(FieldValue::Float).unwrap_or(FieldValue::None),
        },
        JsonValue::String(s) => FieldValue::Text(s),
        JsonValue::Array(items) => FieldValue::List(items.into_iter().map(from_json).collect()),
        JsonValue::Object(map) => {
            FieldValue::Dict(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}
