use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::{tensor::Tensor, Float, GenieError, Result};

pub const MANIFEST_FILE: &str = "weights_manifest.json";

/// Named weight tensors of a checkpoint.
#[derive(Debug, Clone, Default)]
pub struct Weights {
    tensors: HashMap<String, Tensor>,
}

/// One entry of a weights manifest group.
#[derive(Debug, Deserialize)]
struct WeightSpec {
    name: String,
    shape: Vec<usize>,
    #[serde(default = "default_dtype")]
    dtype: String,
    #[serde(default)]
    quantization: Option<serde_json::Value>,
}

fn default_dtype() -> String {
    "float32".to_string()
}

/// Weights stored across `paths`, concatenated in order.
#[derive(Debug, Deserialize)]
struct ManifestGroup {
    paths: Vec<String>,
    weights: Vec<WeightSpec>,
}

/// Inline tensor of a JSON weight map.
#[derive(Debug, Deserialize)]
struct JsonTensor {
    shape: Vec<usize>,
    data: Vec<Float>,
}

impl Weights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.tensors.insert(name.into(), tensor);
    }

    pub fn get(&self, name: &str) -> Result<&Tensor> {
        self.tensors
            .get(name)
            .ok_or_else(|| GenieError::MissingWeight(name.to_string()))
    }

    /// Removes and returns a tensor, handing its ownership to the caller.
    pub fn take(&mut self, name: &str) -> Result<Tensor> {
        self.tensors
            .remove(name)
            .ok_or_else(|| GenieError::MissingWeight(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    /// Reads a `{name: {shape, data}}` JSON map.
    pub fn from_json_reader<R: Read>(r: R) -> Result<Self> {
        let raw: HashMap<String, JsonTensor> = serde_json::from_reader(r)?;
        let mut weights = Self::new();
        for (name, t) in raw {
            weights.insert(name, Tensor::from_vec(t.data, &t.shape)?);
        }
        Ok(weights)
    }

    /// Loads a checkpoint directory holding `weights_manifest.json` and its
    /// shards. `uri` is an `http(s)://` URL, a `file://` URL or a local path.
    pub async fn from_uri(uri: &str) -> Result<Self> {
        let base = uri.trim_end_matches('/');
        let manifest = fetch(&format!("{base}/{MANIFEST_FILE}")).await?;
        let groups: Vec<ManifestGroup> = serde_json::from_slice(&manifest)?;

        let mut weights = Self::new();
        for group in groups {
            let mut buf = Vec::new();
            for path in &group.paths {
                buf.extend(fetch(&format!("{base}/{path}")).await?);
            }
            weights.decode_group(&group.weights, &buf)?;
        }
        log::info!("loaded {} weight tensors from {uri}", weights.len());
        Ok(weights)
    }

    fn decode_group(&mut self, specs: &[WeightSpec], buf: &[u8]) -> Result<()> {
        let mut offset: usize = 0;
        for spec in specs {
            if spec.quantization.is_some() {
                return Err(GenieError::Manifest(format!(
                    "quantized weight `{}` is not supported",
                    spec.name
                )));
            }
            let too_large =
                || GenieError::Manifest(format!("shape of `{}` is too large", spec.name));
            let bytes = spec
                .shape
                .iter()
                .try_fold(4usize, |acc, &dim| acc.checked_mul(dim))
                .ok_or_else(too_large)?;
            let end = offset.checked_add(bytes).ok_or_else(too_large)?;
            let chunk = buf.get(offset..end).ok_or_else(|| {
                GenieError::Manifest(format!("shard data too short for `{}`", spec.name))
            })?;
            let data: Vec<Float> = match spec.dtype.as_str() {
                "float32" => chunk
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect(),
                "int32" => chunk
                    .chunks_exact(4)
                    .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as Float)
                    .collect(),
                other => {
                    return Err(GenieError::Manifest(format!(
                        "unsupported dtype `{other}` for `{}`",
                        spec.name
                    )))
                }
            };
            self.insert(spec.name.clone(), Tensor::from_vec(data, &spec.shape)?);
            offset = end;
        }
        Ok(())
    }
}

impl FromIterator<(String, Tensor)> for Weights {
    fn from_iter<I: IntoIterator<Item = (String, Tensor)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}

async fn fetch(uri: &str) -> Result<Vec<u8>> {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        let response = reqwest::get(uri).await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    } else {
        let path = uri.strip_prefix("file://").unwrap_or(uri);
        Ok(tokio::fs::read(Path::new(path)).await?)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("piano-genie-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn le_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[tokio::test]
    async fn test_load_manifest_from_disk() {
        let dir = scratch_dir("manifest");
        let manifest = r#"[
            {"paths": ["group1-shard1of2", "group1-shard2of2"],
             "weights": [
                {"name": "a", "shape": [2, 2], "dtype": "float32"},
                {"name": "b", "shape": [3], "dtype": "float32"}
             ]},
            {"paths": ["group2-shard1of1"],
             "weights": [{"name": "c", "shape": [1], "dtype": "int32"}]}
        ]"#;
        fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        let all = le_bytes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        fs::write(dir.join("group1-shard1of2"), &all[..12]).unwrap();
        fs::write(dir.join("group1-shard2of2"), &all[12..]).unwrap();
        fs::write(dir.join("group2-shard1of1"), 9i32.to_le_bytes()).unwrap();

        let uri = format!("file://{}", dir.display());
        let weights = Weights::from_uri(&uri).await.unwrap();
        assert_eq!(weights.len(), 3);
        let a = weights.get("a").unwrap();
        assert_eq!(a.layout(), &[2, 2]);
        assert_eq!(&a[1], &[3.0, 4.0]);
        assert_eq!(&**weights.get("b").unwrap(), &[5.0, 6.0, 7.0]);
        assert_eq!(&**weights.get("c").unwrap(), &[9.0]);

        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_short_shard_is_an_error() {
        let dir = scratch_dir("short");
        let manifest = r#"[{"paths": ["s"], "weights": [{"name": "a", "shape": [4]}]}]"#;
        fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        fs::write(dir.join("s"), le_bytes(&[1.0, 2.0])).unwrap();

        let err = Weights::from_uri(dir.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, GenieError::Manifest(_)));

        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_oversized_shape_is_an_error() {
        let dir = scratch_dir("oversized");
        let manifest = format!(
            r#"[{{"paths": ["s"], "weights": [{{"name": "a", "shape": [{}, 2]}}]}}]"#,
            usize::MAX
        );
        fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
        fs::write(dir.join("s"), le_bytes(&[1.0, 2.0])).unwrap();

        let err = Weights::from_uri(dir.to_str().unwrap()).await.unwrap_err();
        assert!(matches!(err, GenieError::Manifest(_)), "{err}");

        fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let err = Weights::from_uri("/nonexistent/piano-genie").await.unwrap_err();
        assert!(matches!(err, GenieError::Reader(_)));
    }

    #[test]
    fn test_json_weights() {
        let json = r#"{"w": {"shape": [1, 2], "data": [0.5, -0.5]}}"#;
        let weights = Weights::from_json_reader(json.as_bytes()).unwrap();
        assert_eq!(&**weights.get("w").unwrap(), &[0.5, -0.5]);
        assert!(matches!(
            weights.get("missing"),
            Err(GenieError::MissingWeight(_))
        ));

        let bad = r#"{"w": {"shape": [3], "data": [0.5]}}"#;
        assert!(Weights::from_json_reader(bad.as_bytes()).is_err());
    }
}
