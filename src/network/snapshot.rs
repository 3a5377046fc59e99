//! Network serialization and persistence.
//!
//! Two encodings of the same content (topology, learning rate, every weight
//! matrix row-major):
//! - JSON via serde, for inspection and hand edits;
//! - a compact little-endian binary file (`NEVO` magic, version, learning
//!   rate, topology, raw `f32` cells).
//! Both round-trip bit-exactly, so a reloaded network answers queries
//! identically.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{Network, NetworkError};
use crate::matrix::Matrix;

const MAGIC: &[u8; 4] = b"NEVO";
const VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed weight file: {0}")]
    Format(String),
    #[error("snapshot does not describe a valid network: {0}")]
    Network(#[from] NetworkError),
}

/// Serde representation of a [`Network`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub topology: Vec<usize>,
    pub learning_rate: f32,
    /// One entry per weight matrix, row-major.
    pub layers: Vec<Vec<f32>>,
}

impl From<&Network> for NetworkSnapshot {
    fn from(network: &Network) -> Self {
        Self {
            topology: network.topology.clone(),
            learning_rate: network.learning_rate,
            layers: network
                .weights
                .iter()
                .map(|w| w.as_slice().to_vec())
                .collect(),
        }
    }
}

impl From<Network> for NetworkSnapshot {
    fn from(network: Network) -> Self {
        Self::from(&network)
    }
}

impl TryFrom<NetworkSnapshot> for Network {
    type Error = NetworkError;

    fn try_from(snapshot: NetworkSnapshot) -> Result<Self, NetworkError> {
        super::validate_topology(&snapshot.topology)?;
        if snapshot.layers.len() != snapshot.topology.len() - 1 {
            return Err(NetworkError::ShapeMismatch {
                what: "layer list",
                expected: snapshot.topology.len() - 1,
                actual: snapshot.layers.len(),
            });
        }
        let mut weights = Vec::with_capacity(snapshot.layers.len());
        for (layer, (cells, pair)) in snapshot
            .layers
            .into_iter()
            .zip(snapshot.topology.windows(2))
            .enumerate()
        {
            let (rows, cols) = (pair[1], pair[0]);
            let actual = cells.len();
            let matrix = Matrix::from_row_major(rows, cols, cells).map_err(|_| {
                NetworkError::LayerShape {
                    layer,
                    expected: (rows, cols),
                    actual: (actual, 1),
                }
            })?;
            weights.push(matrix);
        }
        Network::from_parts(snapshot.learning_rate, snapshot.topology, weights)
    }
}

pub fn to_json(network: &Network) -> Result<String, SnapshotError> {
    Ok(serde_json::to_string_pretty(network)?)
}

pub fn from_json(text: &str) -> Result<Network, SnapshotError> {
    let snapshot: NetworkSnapshot = serde_json::from_str(text)?;
    Ok(Network::try_from(snapshot)?)
}

/// Serialize to the binary weight format.
pub fn encode_binary(network: &Network) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(16 + network.topology.len() * 4 + network.weight_count() * 4);
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&VERSION.to_le_bytes());
    bytes.extend_from_slice(&network.learning_rate.to_le_bytes());
    bytes.extend_from_slice(&(network.topology.len() as u32).to_le_bytes());
    for &n in &network.topology {
        bytes.extend_from_slice(&(n as u32).to_le_bytes());
    }
    for w in &network.weights {
        for v in w.as_slice() {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
    }
    bytes
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take4(&mut self, what: &str) -> Result<[u8; 4], SnapshotError> {
        let end = self.pos + 4;
        let chunk = self
            .bytes
            .get(self.pos..end)
            .ok_or_else(|| SnapshotError::Format(format!("truncated while reading {what}")))?;
        self.pos = end;
        let mut out = [0u8; 4];
        out.copy_from_slice(chunk);
        Ok(out)
    }

    fn u32(&mut self, what: &str) -> Result<u32, SnapshotError> {
        self.take4(what).map(u32::from_le_bytes)
    }

    fn f32(&mut self, what: &str) -> Result<f32, SnapshotError> {
        self.take4(what).map(f32::from_le_bytes)
    }
}

/// Parse the binary weight format.
pub fn decode_binary(bytes: &[u8]) -> Result<Network, SnapshotError> {
    let mut r = Reader { bytes, pos: 0 };
    if &r.take4("magic")? != MAGIC {
        return Err(SnapshotError::Format("bad magic".into()));
    }
    let version = r.u32("version")?;
    if version != VERSION {
        return Err(SnapshotError::Format(format!("unsupported version {version}")));
    }
    let learning_rate = r.f32("learning rate")?;
    let layer_count = r.u32("layer count")? as usize;
    // Each layer size costs 4 bytes; refuse counts the buffer cannot hold.
    if layer_count > bytes.len() / 4 {
        return Err(SnapshotError::Format(format!("implausible layer count {layer_count}")));
    }
    let mut topology = Vec::with_capacity(layer_count);
    for _ in 0..layer_count {
        topology.push(r.u32("topology")? as usize);
    }
    super::validate_topology(&topology)?;

    let mut weights = Vec::with_capacity(layer_count - 1);
    for pair in topology.windows(2) {
        let (rows, cols) = (pair[1], pair[0]);
        let cells = rows
            .checked_mul(cols)
            .filter(|&c| c <= (bytes.len() - r.pos) / 4)
            .ok_or_else(|| SnapshotError::Format("truncated weight data".into()))?;
        let mut data = Vec::with_capacity(cells);
        for _ in 0..cells {
            data.push(r.f32("weights")?);
        }
        weights.push(Matrix::from_row_major(rows, cols, data).map_err(|e| SnapshotError::Format(e.to_string()))?);
    }
    if r.pos != bytes.len() {
        return Err(SnapshotError::Format(format!(
            "{} trailing bytes",
            bytes.len() - r.pos
        )));
    }
    Ok(Network::from_parts(learning_rate, topology, weights)?)
}

/// Content hash of topology, learning rate and weights (BLAKE3, 128 bits hex).
pub fn hash_weights(network: &Network) -> String {
    let digest = blake3::hash(&encode_binary(network));
    digest.to_hex().as_str()[..32].to_string()
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> SnapshotError {
    SnapshotError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Write `bytes` to `path`, creating missing parent directories first.
pub(crate) fn write_creating_parent(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
    }
    std::fs::write(path, bytes).map_err(|e| io_error(path, e))
}

/// Save as binary when the extension is `.bin`, JSON otherwise.
pub fn save(network: &Network, path: &Path) -> Result<(), SnapshotError> {
    if is_binary_path(path) {
        write_creating_parent(path, &encode_binary(network))
    } else {
        write_creating_parent(path, to_json(network)?.as_bytes())
    }
}

/// Load a network saved by [`save`].
pub fn load(path: &Path) -> Result<Network, SnapshotError> {
    let bytes = std::fs::read(path).map_err(|e| io_error(path, e))?;
    if is_binary_path(path) {
        decode_binary(&bytes)
    } else {
        let text = String::from_utf8(bytes)
            .map_err(|_| SnapshotError::Format("snapshot is not UTF-8".into()))?;
        from_json(&text)
    }
}

fn is_binary_path(path: &Path) -> bool {
    path.extension().is_some_and(|e| e == "bin")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample() -> Network {
        Network::new(0.3, &[3, 4, 2], &mut ChaCha8Rng::seed_from_u64(99)).unwrap()
    }

    #[test]
    fn json_roundtrip_is_exact() {
        let net = sample();
        let text = to_json(&net).unwrap();
        let back = from_json(&text).unwrap();
        assert_eq!(back, net);
        let x = [0.1, 0.5, 0.9];
        assert_eq!(back.query(&x).unwrap(), net.query(&x).unwrap());
    }

    #[test]
    fn json_layout_is_row_major() {
        let w0 = Matrix::from_row_major(2, 1, vec![1.0, 2.0]).unwrap();
        let net = Network::from_parts(0.5, vec![1, 2], vec![w0]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&to_json(&net).unwrap()).unwrap();
        assert_eq!(value["topology"], serde_json::json!([1, 2]));
        assert_eq!(value["learning_rate"], serde_json::json!(0.5));
        assert_eq!(value["layers"], serde_json::json!([[1.0, 2.0]]));
    }

    #[test]
    fn json_rejects_wrong_cell_count() {
        let text = r#"{"topology":[2,1],"learning_rate":0.1,"layers":[[0.1]]}"#;
        assert!(matches!(
            from_json(text),
            Err(SnapshotError::Json(_)) | Err(SnapshotError::Network(_))
        ));
    }

    #[test]
    fn binary_roundtrip_is_exact() {
        let net = sample();
        let back = decode_binary(&encode_binary(&net)).unwrap();
        assert_eq!(back, net);
    }

    #[test]
    fn binary_rejects_corruption() {
        let bytes = encode_binary(&sample());
        assert!(decode_binary(&bytes[..bytes.len() - 1]).is_err());
        let mut extra = bytes.clone();
        extra.push(0);
        assert!(decode_binary(&extra).is_err());
        let mut bad_magic = bytes;
        bad_magic[0] = b'X';
        assert!(decode_binary(&bad_magic).is_err());
    }

    #[test]
    fn hash_deterministic_and_sensitive() {
        let net = sample();
        assert_eq!(hash_weights(&net), hash_weights(&net.clone()));
        assert_eq!(hash_weights(&net).len(), 32);
        let mut other = net.clone();
        other.mutate(1.0, 0.1, &mut ChaCha8Rng::seed_from_u64(1));
        assert_ne!(hash_weights(&net), hash_weights(&other));
    }

    #[test]
    fn save_load_both_formats() {
        let dir = tempfile::tempdir().unwrap();
        let net = sample();
        for name in ["nested/best.json", "nested/best.bin"] {
            let path = dir.path().join(name);
            save(&net, &path).unwrap();
            assert_eq!(load(&path).unwrap(), net);
        }
    }

    #[test]
    fn load_missing_file_reports_path() {
        let err = load(Path::new("/nonexistent/neuroevo/net.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/neuroevo/net.json"));
    }
}
