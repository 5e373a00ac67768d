//! CSV persistence for the three result collections.
//!
//! Each bucket lives in its own file inside the output directory. Files are
//! rewritten whole on save: all three are staged as `*.csv.tmp` siblings
//! first, then renamed into place.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, ResultExt};
use crate::models::{Bucket, ResultSet, RunState};

/// What a previous run left behind.
#[derive(Debug, Clone, Default)]
pub struct LoadedResults {
    pub results: ResultSet,
    pub state: RunState,
}

/// Result store rooted at an output directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, bucket: Bucket) -> PathBuf {
        self.dir.join(bucket.file_name())
    }

    /// Loads the persisted collections. A missing file is an empty collection.
    pub fn load(&self) -> Result<LoadedResults, AppError> {
        let located = self.read_bucket(Bucket::Located)?;
        let address_only = self.read_bucket(Bucket::AddressOnly)?;
        let not_found = self.read_bucket(Bucket::NotFound)?;

        let results = ResultSet::from_rows(located, address_only, not_found)
            .context("Persisted results are inconsistent")?;
        let state = RunState::from_results(&results);

        if results.is_empty() {
            tracing::info!("No previous results in {}", self.dir.display());
        } else {
            tracing::info!(
                "Loaded {} located, {} address-only, {} not-found rows from {}",
                results.count(Bucket::Located),
                results.count(Bucket::AddressOnly),
                results.count(Bucket::NotFound),
                self.dir.display()
            );
        }
        tracing::debug!(
            "Last ID evaluated: {} ({:?})",
            state.last_processed_id,
            state.last_bucket
        );

        Ok(LoadedResults { results, state })
    }

    /// Writes all three collections, replacing prior contents.
    ///
    /// All three files are staged and synced before any of them replaces its
    /// predecessor. A failure while staging leaves the previous files intact.
    pub fn save(&self, results: &ResultSet) -> Result<(), AppError> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Creating {}", self.dir.display()))?;

        tracing::info!("Writing .csv files to {}", self.dir.display());
        if let Err(e) = self.stage_all(results) {
            self.discard_staged();
            return Err(e);
        }
        for bucket in Bucket::ALL {
            let path = self.path_of(bucket);
            fs::rename(self.staged_path_of(bucket), &path)
                .with_context(|| format!("Replacing {}", path.display()))?;
        }
        Ok(())
    }

    fn staged_path_of(&self, bucket: Bucket) -> PathBuf {
        self.path_of(bucket).with_extension("csv.tmp")
    }

    fn stage_all(&self, results: &ResultSet) -> Result<(), AppError> {
        for bucket in Bucket::ALL {
            let path = self.path_of(bucket);
            if fs::symlink_metadata(&path).map(|m| m.is_dir()).unwrap_or(false) {
                return Err(AppError::InvalidInput(format!(
                    "{} is a directory, not a result file",
                    path.display()
                )));
            }
        }
        self.write_staged(Bucket::Located, results.located())?;
        self.write_staged(Bucket::AddressOnly, results.address_only())?;
        self.write_staged(Bucket::NotFound, results.not_found())?;
        Ok(())
    }

    fn discard_staged(&self) {
        for bucket in Bucket::ALL {
            let tmp = self.staged_path_of(bucket);
            if tmp.is_file() {
                if let Err(e) = fs::remove_file(&tmp) {
                    tracing::warn!("Could not remove {}: {}", tmp.display(), e);
                }
            }
        }
    }

    fn read_bucket<T: DeserializeOwned>(&self, bucket: Bucket) -> Result<Vec<T>, AppError> {
        let path = self.path_of(bucket);
        let file = match File::open(&path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!("{} not found, starting {} empty", path.display(), bucket);
                return Ok(Vec::new());
            }
            opened => opened.with_context(|| format!("Opening {}", path.display()))?,
        };

        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);
        reader
            .deserialize()
            .collect::<Result<Vec<T>, csv::Error>>()
            .with_context(|| format!("Reading {}", path.display()))
    }

    fn write_staged<'a, T, I>(&self, bucket: Bucket, rows: I) -> Result<(), AppError>
    where
        T: Serialize + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let tmp = self.staged_path_of(bucket);

        let file = File::create(&tmp).with_context(|| format!("Creating {}", tmp.display()))?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer
            .write_record(header_of(bucket))
            .with_context(|| format!("Writing {}", tmp.display()))?;
        let mut count = 0usize;
        for row in rows {
            writer
                .serialize(row)
                .with_context(|| format!("Writing {}", tmp.display()))?;
            count += 1;
        }

        let file = writer
            .into_inner()
            .map_err(|e| AppError::Io(e.into_error()))
            .with_context(|| format!("Flushing {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("Syncing {}", tmp.display()))?;

        tracing::debug!("Staged {} rows in {}", count, tmp.display());
        Ok(())
    }
}

/// Column order of each output file.
pub fn header_of(bucket: Bucket) -> &'static [&'static str] {
    match bucket {
        Bucket::Located => &["id", "lat", "lon", "cep"],
        Bucket::AddressOnly => &[
            "bairro",
            "cep",
            "cidade",
            "logradouro",
            "uf",
            "complemento",
            "id",
        ],
        Bucket::NotFound => &["id", "cep"],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AddressOnlyRow, LocatedRow, NotFoundRow, ResultRow};

    fn sample_results() -> ResultSet {
        let mut set = ResultSet::new();
        set.push(ResultRow::Located(LocatedRow {
            id: 1,
            lat: "-23.5503".into(),
            lon: "-46.6339".into(),
            cep: "01001000".into(),
        }))
        .unwrap();
        set.push(ResultRow::AddressOnly(AddressOnlyRow {
            bairro: "Sé".into(),
            cep: "01002000".into(),
            cidade: "São Paulo".into(),
            logradouro: "Rua Direita".into(),
            uf: "SP".into(),
            complemento: None,
            id: 2,
        }))
        .unwrap();
        set.push(ResultRow::NotFound(NotFoundRow {
            id: 3,
            cep: "00000000".into(),
        }))
        .unwrap();
        set
    }

    #[test]
    fn test_load_without_files_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = ResultStore::new(dir.path()).load().unwrap();
        assert!(loaded.results.is_empty());
        assert_eq!(loaded.state, RunState::default());
    }

    #[test]
    fn test_save_writes_headers_and_integer_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        store.save(&sample_results()).unwrap();

        let located = fs::read_to_string(store.path_of(Bucket::Located)).unwrap();
        assert_eq!(located, "id,lat,lon,cep\n1,-23.5503,-46.6339,01001000\n");

        let found = fs::read_to_string(store.path_of(Bucket::AddressOnly)).unwrap();
        assert_eq!(
            found,
            "bairro,cep,cidade,logradouro,uf,complemento,id\nSé,01002000,São Paulo,Rua Direita,SP,,2\n"
        );

        let not_found = fs::read_to_string(store.path_of(Bucket::NotFound)).unwrap();
        assert_eq!(not_found, "id,cep\n3,00000000\n");

        assert!(!dir.path().join("latloncep.csv.tmp").exists());
    }

    #[test]
    fn test_empty_collections_still_get_headers() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        store.save(&ResultSet::new()).unwrap();

        let not_found = fs::read_to_string(store.path_of(Bucket::NotFound)).unwrap();
        assert_eq!(not_found, "id,cep\n");
        assert!(store.load().unwrap().results.is_empty());
    }

    #[test]
    fn test_load_recovers_run_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        store.save(&sample_results()).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.results.len(), 3);
        assert_eq!(loaded.state.last_processed_id, 3);
        assert_eq!(loaded.state.last_bucket, Some(Bucket::NotFound));
        assert_eq!(loaded.results.address_only().get(2).unwrap().complemento, None);
    }

    #[test]
    fn test_load_accepts_float_ids_and_partial_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("cepnotfound.csv"),
            "id,cep\n4.0,0\n7.0,1001000\n",
        )
        .unwrap();

        let loaded = ResultStore::new(dir.path()).load().unwrap();
        assert_eq!(loaded.results.count(Bucket::NotFound), 2);
        assert_eq!(loaded.results.count(Bucket::Located), 0);
        assert_eq!(loaded.state.last_processed_id, 7);
        assert_eq!(loaded.state.last_bucket, Some(Bucket::NotFound));
        assert_eq!(loaded.results.not_found().get(7).unwrap().cep, "01001000");
    }

    #[test]
    fn test_load_rejects_overlapping_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cepnotfound.csv"), "id,cep\n1,00000000\n").unwrap();
        fs::write(
            dir.path().join("latloncep.csv"),
            "id,lat,lon,cep\n1,-23.5,-46.6,01001000\n",
        )
        .unwrap();

        let err = ResultStore::new(dir.path()).load().unwrap_err();
        assert!(err.to_string().contains("inconsistent"));
    }

    #[test]
    fn test_failed_staging_keeps_previous_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        store.save(&sample_results()).unwrap();
        let before = fs::read_to_string(store.path_of(Bucket::Located)).unwrap();

        let mut grown = sample_results();
        grown
            .push(ResultRow::Located(LocatedRow {
                id: 4,
                lat: "-22.97".into(),
                lon: "-43.18".into(),
                cep: "22041001".into(),
            }))
            .unwrap();
        grown
            .push(ResultRow::AddressOnly(AddressOnlyRow {
                bairro: String::new(),
                cep: "69900000".into(),
                cidade: "Rio Branco".into(),
                logradouro: String::new(),
                uf: "AC".into(),
                complemento: None,
                id: 5,
            }))
            .unwrap();

        // The address-only file cannot be staged.
        let blocker = dir.path().join("cepfound.csv.tmp");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), "").unwrap();

        assert!(store.save(&grown).is_err());
        assert_eq!(fs::read_to_string(store.path_of(Bucket::Located)).unwrap(), before);
        assert!(!dir.path().join("latloncep.csv.tmp").exists());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.state.last_processed_id, 3);
        assert_eq!(loaded.results.len(), 3);
    }

    #[test]
    fn test_directory_in_place_of_result_file_replaces_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let blocker = store.path_of(Bucket::AddressOnly);
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), "").unwrap();

        let err = store.save(&sample_results()).unwrap_err();
        assert!(err.to_string().contains("is a directory"));
        assert!(!store.path_of(Bucket::Located).exists());
        assert!(!store.path_of(Bucket::NotFound).exists());
        assert!(!dir.path().join("latloncep.csv.tmp").exists());
    }

    #[test]
    fn test_save_overwrites_previous_contents() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        store.save(&sample_results()).unwrap();
        store.save(&ResultSet::new()).unwrap();

        assert!(store.load().unwrap().results.is_empty());
    }
}
