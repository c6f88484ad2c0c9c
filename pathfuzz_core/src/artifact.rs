use crate::corpus::CorpusError;
use bincode::config::{Configuration, Fixint, LittleEndian, NoLimit};
use bincode::{Decode, Encode};
use std::fs;
use std::path::Path;

/// Persistent summary of one fuzzing run.
#[derive(Encode, Decode, Debug, Clone, PartialEq, Eq)]
pub struct RunArtifact {
    /// Number of distinct locations reached over the whole run.
    pub covered_locations: u64,
    /// Distinct crash results, each described as text.
    pub crashes: Vec<String>,
    /// Milliseconds since the Unix epoch.
    pub start_time_ms: u64,
    pub end_time_ms: u64,
}

fn artifact_bincode_config() -> Configuration<LittleEndian, Fixint, NoLimit> {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

pub fn save_result(path: &Path, artifact: &RunArtifact) -> Result<(), CorpusError> {
    let bytes = bincode::encode_to_vec(artifact, artifact_bincode_config())?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            CorpusError::Io(format!("Failed to create result directory {:?}: {}", parent, e))
        })?;
    }
    fs::write(path, bytes)
        .map_err(|e| CorpusError::Io(format!("Failed to write result file {:?}: {}", path, e)))
}

pub fn load_result(path: &Path) -> Result<RunArtifact, CorpusError> {
    let bytes = fs::read(path)
        .map_err(|e| CorpusError::Io(format!("Failed to read result file {:?}: {}", path, e)))?;
    let (artifact, _read): (RunArtifact, usize) =
        bincode::decode_from_slice(&bytes, artifact_bincode_config()).map_err(|e| {
            CorpusError::Deserialization(format!(
                "Failed to decode result file {:?}: {}",
                path, e
            ))
        })?;
    Ok(artifact)
}
