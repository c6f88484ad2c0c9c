use crate::coverage::{Coverage, Location, PathId};
use crate::seed::Seed;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Defines errors that can arise while loading or persisting seeds and run artifacts.
#[derive(Error, Debug)]
pub enum CorpusError {
    /// An I/O error occurred while reading or writing seed or artifact files.
    #[error("Corpus I/O error: {0}")]
    Io(String),

    /// Encoding seeds or a run artifact failed.
    #[error("Corpus serialization error: {0}")]
    Serialization(String),

    /// Decoding seeds or a run artifact failed (malformed JSON, bad path id, truncated bincode).
    #[error("Corpus deserialization error: {0}")]
    Deserialization(String),
}

impl From<std::io::Error> for CorpusError {
    fn from(err: std::io::Error) -> Self {
        CorpusError::Io(err.to_string())
    }
}
impl From<serde_json::Error> for CorpusError {
    fn from(err: serde_json::Error) -> Self {
        CorpusError::Deserialization(format!("JSON operation error: {}", err))
    }
}
impl From<bincode::error::EncodeError> for CorpusError {
    fn from(err: bincode::error::EncodeError) -> Self {
        CorpusError::Serialization(format!("Bincode encoding error: {}", err))
    }
}
impl From<bincode::error::DecodeError> for CorpusError {
    fn from(err: bincode::error::DecodeError) -> Self {
        CorpusError::Deserialization(format!("Bincode decoding error: {}", err))
    }
}

/// The live corpus: an ordered, append-only collection of seeds.
///
/// Seeds are never removed during a run. Insertion order is kept so that
/// iteration (and therefore energy assignment and seeded selection) is reproducible.
#[derive(Debug, Clone, Default)]
pub struct Population {
    seeds: Vec<Seed>,
}

impl Population {
    /// Creates a new, empty `Population`.
    pub fn new() -> Self {
        Self { seeds: Vec::new() }
    }

    /// Appends `seed` and returns its index.
    pub fn add(&mut self, seed: Seed) -> usize {
        let id = self.seeds.len();
        self.seeds.push(seed);
        id
    }

    pub fn get(&self, id: usize) -> Option<&Seed> {
        self.seeds.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: usize) -> Option<&mut Seed> {
        self.seeds.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.seeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seeds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seed> {
        self.seeds.iter()
    }

    /// Mutable access for power schedules. Only `energy` is writable on a `Seed`,
    /// so this cannot alter data, coverage or path identity.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Seed> {
        self.seeds.iter_mut()
    }

    pub fn as_slice(&self) -> &[Seed] {
        &self.seeds
    }

    /// Loads seeds from each of `seed_paths` (see [`load_seeds`]) and appends them.
    ///
    /// Returns the number of seeds added.
    pub fn load_initial_seeds(&mut self, seed_paths: &[PathBuf]) -> Result<usize, CorpusError> {
        let mut loaded_count = 0;
        for path in seed_paths {
            for seed in load_seeds(path)? {
                self.add(seed);
                loaded_count += 1;
            }
        }
        Ok(loaded_count)
    }
}

impl From<Vec<Seed>> for Population {
    fn from(seeds: Vec<Seed>) -> Self {
        Self { seeds }
    }
}

/// On-disk form of a seed in a `.json` seed file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SeedRecord {
    pub data: Vec<u8>,
    #[serde(default)]
    pub coverage: Vec<u64>,
    /// Hex path id. When absent the path id is derived from `coverage`,
    /// or left unknown if `coverage` is empty too.
    #[serde(default)]
    pub path_id: Option<String>,
}

impl SeedRecord {
    fn from_seed(seed: &Seed) -> Self {
        Self {
            data: seed.data().to_vec(),
            coverage: seed.coverage().iter().map(|location| location.0).collect(),
            path_id: seed.path_id().map(|path_id| path_id.to_string()),
        }
    }

    fn into_seed(self) -> Result<Seed, CorpusError> {
        let coverage: Coverage = self.coverage.into_iter().map(Location).collect();
        let path_id = match self.path_id {
            Some(hex) => Some(PathId::from_hex(&hex).ok_or_else(|| {
                CorpusError::Deserialization(format!("Invalid path id {:?} in seed record", hex))
            })?),
            None if !coverage.is_empty() => Some(coverage.path_id()),
            None => None,
        };
        Ok(Seed::new(self.data, coverage, path_id))
    }
}

/// Loads seeds from `path`.
///
/// * a file with a `.json` extension holds a JSON array of [`SeedRecord`]s;
/// * any other file is a single raw seed with unknown coverage;
/// * a directory loads every regular, non-hidden file inside it (not recursive)
///   as a raw seed, in file-name order.
pub fn load_seeds(path: &Path) -> Result<Vec<Seed>, CorpusError> {
    if path.is_file() {
        if path.extension().is_some_and(|ext| ext == "json") {
            let file = File::open(path).map_err(|e| {
                CorpusError::Io(format!("Failed to open seed file {:?}: {}", path, e))
            })?;
            let records: Vec<SeedRecord> = serde_json::from_reader(BufReader::new(file))
                .map_err(|e| {
                    CorpusError::Deserialization(format!(
                        "Failed to parse seed records from {:?}: {}",
                        path, e
                    ))
                })?;
            return records.into_iter().map(SeedRecord::into_seed).collect();
        }
        let data = fs::read(path)
            .map_err(|e| CorpusError::Io(format!("Failed to read seed file {:?}: {}", path, e)))?;
        return Ok(vec![Seed::unexecuted(data)]);
    }

    if path.is_dir() {
        let mut file_paths = Vec::new();
        for entry_result in fs::read_dir(path).map_err(|e| {
            CorpusError::Io(format!("Failed to read seed directory {:?}: {}", path, e))
        })? {
            let entry = entry_result.map_err(|e| {
                CorpusError::Io(format!(
                    "Error reading entry in seed directory {:?}: {}",
                    path, e
                ))
            })?;
            let file_path = entry.path();
            let hidden = file_path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with('.'));
            if file_path.is_file() && !hidden {
                file_paths.push(file_path);
            }
        }
        file_paths.sort();

        let mut seeds = Vec::with_capacity(file_paths.len());
        for file_path in file_paths {
            let data = fs::read(&file_path).map_err(|e| {
                CorpusError::Io(format!("Failed to read seed file {:?}: {}", file_path, e))
            })?;
            seeds.push(Seed::unexecuted(data));
        }
        return Ok(seeds);
    }

    Err(CorpusError::Io(format!(
        "Seed path {:?} is neither a file nor a directory",
        path
    )))
}

/// Writes `seeds` (data, coverage and path id) as a JSON seed file readable by [`load_seeds`].
pub fn save_seeds(path: &Path, seeds: &[Seed]) -> Result<(), CorpusError> {
    let records: Vec<SeedRecord> = seeds.iter().map(SeedRecord::from_seed).collect();
    let file = File::create(path).map_err(|e| {
        CorpusError::Io(format!("Failed to create seed file {:?}: {}", path, e))
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &records).map_err(|e| {
        CorpusError::Serialization(format!(
            "Failed to serialize seeds to JSON for {:?}: {}",
            path, e
        ))
    })?;
    writer
        .flush()
        .map_err(|e| CorpusError::Io(format!("Failed to flush seed file {:?}: {}", path, e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn population_add_get_len_is_empty() {
        let mut population = Population::new();
        assert!(population.is_empty());
        assert_eq!(population.len(), 0);

        let id1 = population.add(Seed::unexecuted(vec![1, 2, 3]));
        assert_eq!(id1, 0);
        let id2 = population.add(Seed::unexecuted(vec![4, 5]));
        assert_eq!(id2, 1);
        assert_eq!(population.len(), 2);
        assert_eq!(population.get(id1).unwrap().data(), &[1, 2, 3]);
        assert!(population.get(99).is_none());
    }

    #[test]
    fn load_seeds_reads_raw_directory_in_name_order() -> Result<(), CorpusError> {
        let temp_dir = tempdir().unwrap();
        fs::write(temp_dir.path().join("b.bin"), [2u8, 2]).unwrap();
        fs::write(temp_dir.path().join("a.txt"), b"first").unwrap();
        fs::write(temp_dir.path().join(".hidden"), b"skip me").unwrap();
        fs::create_dir(temp_dir.path().join("nested")).unwrap();

        let seeds = load_seeds(temp_dir.path())?;
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].data(), b"first");
        assert_eq!(seeds[1].data(), &[2, 2]);
        assert!(seeds.iter().all(|seed| seed.path_id().is_none()));
        Ok(())
    }

    #[test]
    fn save_and_load_json_seeds_keeps_coverage_and_path() -> Result<(), CorpusError> {
        let temp_dir = tempdir().unwrap();
        let seed_file = temp_dir.path().join("corpus.json");
        let coverage: Coverage = [Location(3), Location(8)].into_iter().collect();
        let seeds = vec![
            Seed::from_coverage(b"GOOD".to_vec(), coverage.clone()),
            Seed::unexecuted(b"INIT".to_vec()),
        ];

        save_seeds(&seed_file, &seeds)?;
        let loaded = load_seeds(&seed_file)?;

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].data(), b"GOOD");
        assert_eq!(loaded[0].coverage(), &coverage);
        assert_eq!(loaded[0].path_id(), Some(&coverage.path_id()));
        assert!(loaded[1].path_id().is_none());
        Ok(())
    }

    #[test]
    fn save_seeds_into_missing_directory_is_an_io_error() {
        let temp_dir = tempdir().unwrap();
        let seed_file = temp_dir.path().join("missing").join("corpus.json");
        let result = save_seeds(&seed_file, &[Seed::unexecuted(b"x".to_vec())]);
        assert!(matches!(result, Err(CorpusError::Io(_))));
    }

    #[test]
    fn saved_seed_file_is_complete_before_the_call_returns() -> Result<(), CorpusError> {
        let temp_dir = tempdir().unwrap();
        let seed_file = temp_dir.path().join("corpus.json");
        let seeds: Vec<Seed> = (0..200u8)
            .map(|i| Seed::from_coverage(vec![i; 64], [Location(i as u64)].into_iter().collect()))
            .collect();

        save_seeds(&seed_file, &seeds)?;
        let on_disk = fs::read_to_string(&seed_file).unwrap();
        let records: Vec<SeedRecord> = serde_json::from_str(&on_disk)?;
        assert_eq!(records.len(), 200);
        assert_eq!(load_seeds(&seed_file)?, seeds);
        Ok(())
    }

    #[test]
    fn json_record_without_path_id_derives_it_from_coverage() -> Result<(), CorpusError> {
        let temp_dir = tempdir().unwrap();
        let seed_file = temp_dir.path().join("seeds.json");
        fs::write(&seed_file, r#"[{"data":[65,66],"coverage":[1,2]}]"#).unwrap();

        let loaded = load_seeds(&seed_file)?;
        let expected: Coverage = [Location(1), Location(2)].into_iter().collect();
        assert_eq!(loaded[0].path_id(), Some(&expected.path_id()));
        Ok(())
    }

    #[test]
    fn bad_path_id_is_a_deserialization_error() {
        let temp_dir = tempdir().unwrap();
        let seed_file = temp_dir.path().join("seeds.json");
        fs::write(&seed_file, r#"[{"data":[65],"path_id":"zz"}]"#).unwrap();

        match load_seeds(&seed_file) {
            Err(CorpusError::Deserialization(msg)) => assert!(msg.contains("zz")),
            other => panic!("Expected Deserialization error, got {other:?}"),
        }
    }

    #[test]
    fn load_initial_seeds_appends_from_every_path() -> Result<(), CorpusError> {
        let temp_dir = tempdir().unwrap();
        let single = temp_dir.path().join("single.bin");
        fs::write(&single, b"one").unwrap();
        let dir = temp_dir.path().join("dir");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("x"), b"two").unwrap();
        fs::write(dir.join("y"), b"three").unwrap();

        let mut population = Population::new();
        let loaded = population.load_initial_seeds(&[single, dir])?;
        assert_eq!(loaded, 3);
        assert_eq!(population.len(), 3);
        Ok(())
    }

    #[test]
    fn missing_seed_path_is_an_io_error() {
        let temp_dir = tempdir().unwrap();
        let missing = temp_dir.path().join("nope");
        assert!(matches!(load_seeds(&missing), Err(CorpusError::Io(_))));
    }
}
