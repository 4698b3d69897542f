use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{info, warn};
use logging_timer::time;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::features::Features;
use super::model::{accuracy, FillPrediction, LogisticModel};
use super::scaler::FeatureScaler;
use crate::config::ScannerConfig;
use crate::training::{SkipReason, TrainingOutcome};

pub const MODEL_FILE_NAME: &str = "bubble_model.json";
pub const SCALER_FILE_NAME: &str = "feature_scaler.json";
pub const CURRENT_FILE_NAME: &str = "current.json";
const GENERATION_DIR_PREFIX: &str = "gen-";

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier storage I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to encode or decode {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("stored model (generation {model:?}) and scaler (generation {scaler:?}) do not belong together")]
    InconsistentState {
        model: Option<u64>,
        scaler: Option<u64>,
    },
    #[error("stored classifier state in {0} is malformed")]
    Malformed(PathBuf),
}

/// A fitted model together with the scaling it was fitted under.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedClassifier {
    pub model: LogisticModel,
    pub scaler: FeatureScaler,
}

impl TrainedClassifier {
    pub fn predict(&self, features: &Features) -> FillPrediction {
        self.model.predict(&self.scaler.transform(features))
    }
}

/// One published classifier state. Generation 0 with no classifier is the
/// untrained state; every successful training publishes the next
/// generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClassifierSnapshot {
    pub generation: u64,
    pub trained: Option<TrainedClassifier>,
}

#[derive(Serialize, Deserialize)]
struct ModelBlob {
    generation: u64,
    model: LogisticModel,
}

#[derive(Serialize, Deserialize)]
struct ScalerBlob {
    generation: u64,
    scaler: FeatureScaler,
}

/// Names the generation directory whose blobs are the stored state.
#[derive(Serialize, Deserialize)]
struct CurrentBlob {
    generation: u64,
}

/// The two durable blobs backing a classifier.
///
/// Each generation's pair lives in its own `gen-<N>/` directory under
/// `dir`. `current.json` names the published generation and is the only
/// file replaced in place, so a save that fails part way leaves the
/// previously published pair untouched and still loadable.
///
/// ```text
/// models/
/// ├── current.json           {"generation": 2}
/// ├── gen-2/
/// │   ├── bubble_model.json
/// │   └── feature_scaler.json
/// └── gen-3/                 left behind by an interrupted save
/// ```
#[derive(Debug, Clone)]
pub struct ModelStorage {
    dir: PathBuf,
}

impl ModelStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE_NAME)
    }

    pub fn generation_dir(&self, generation: u64) -> PathBuf {
        self.dir.join(format!("{}{}", GENERATION_DIR_PREFIX, generation))
    }

    pub fn model_path(&self, generation: u64) -> PathBuf {
        self.generation_dir(generation).join(MODEL_FILE_NAME)
    }

    pub fn scaler_path(&self, generation: u64) -> PathBuf {
        self.generation_dir(generation).join(SCALER_FILE_NAME)
    }

    /// Reads the published state. `Ok(None)` when nothing has been
    /// published yet.
    pub fn load(&self) -> Result<Option<ClassifierSnapshot>, ClassifierError> {
        let Some(current) = read_blob::<CurrentBlob>(&self.current_path())? else {
            return Ok(None);
        };
        let generation = current.generation;
        let model_path = self.model_path(generation);
        let scaler_path = self.scaler_path(generation);
        let model_blob = read_blob::<ModelBlob>(&model_path)?;
        let scaler_blob = read_blob::<ScalerBlob>(&scaler_path)?;

        match (model_blob, scaler_blob) {
            (Some(model), Some(scaler))
                if model.generation == generation && scaler.generation == generation =>
            {
                if !model.model.is_well_formed() {
                    return Err(ClassifierError::Malformed(model_path));
                }
                if !scaler.scaler.is_well_formed() {
                    return Err(ClassifierError::Malformed(scaler_path));
                }
                Ok(Some(ClassifierSnapshot {
                    generation,
                    trained: Some(TrainedClassifier {
                        model: model.model,
                        scaler: scaler.scaler,
                    }),
                }))
            }
            (model, scaler) => Err(ClassifierError::InconsistentState {
                model: model.map(|m| m.generation),
                scaler: scaler.map(|s| s.generation),
            }),
        }
    }

    /// Stores a new generation and publishes it.
    ///
    /// Both blobs are written into the generation's own directory, each via
    /// a temporary file renamed into place. Only once both exist is
    /// `current.json` atomically replaced to point at them. On any error
    /// the previously published generation is still the one [`load`]
    /// returns.
    ///
    /// [`load`]: ModelStorage::load
    pub fn save(
        &self,
        generation: u64,
        trained: &TrainedClassifier,
    ) -> Result<(), ClassifierError> {
        let generation_dir = self.generation_dir(generation);
        fs::create_dir_all(&generation_dir).map_err(|source| ClassifierError::Io {
            path: generation_dir.clone(),
            source,
        })?;

        let scaler_file = write_temp(
            &generation_dir,
            &ScalerBlob {
                generation,
                scaler: trained.scaler.clone(),
            },
        )?;
        let model_file = write_temp(
            &generation_dir,
            &ModelBlob {
                generation,
                model: trained.model.clone(),
            },
        )?;
        persist(scaler_file, self.scaler_path(generation))?;
        persist(model_file, self.model_path(generation))?;

        let current_file = write_temp(&self.dir, &CurrentBlob { generation })?;
        persist(current_file, self.current_path())?;

        self.remove_stale_generations(generation);
        Ok(())
    }

    /// Deletes every generation directory except `keep`. Failures only
    /// leave clutter behind, so they are logged.
    fn remove_stale_generations(&self, keep: u64) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("unable to list {}: {}", self.dir.display(), e);
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let stale = name
                .to_str()
                .and_then(|name| name.strip_prefix(GENERATION_DIR_PREFIX))
                .and_then(|generation| generation.parse::<u64>().ok())
                .map_or(false, |generation| generation != keep);
            if stale {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!("unable to remove {}: {}", entry.path().display(), e);
                }
            }
        }
    }
}

fn write_temp<T: Serialize>(dir: &Path, blob: &T) -> Result<NamedTempFile, ClassifierError> {
    let io_error = |source| ClassifierError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let file = NamedTempFile::new_in(dir).map_err(io_error)?;
    {
        let mut writer = BufWriter::new(file.as_file());
        serde_json::to_writer_pretty(&mut writer, blob).map_err(|source| ClassifierError::Json {
            path: file.path().to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_error)?;
    }
    file.as_file().sync_all().map_err(io_error)?;
    Ok(file)
}

fn persist(file: NamedTempFile, path: PathBuf) -> Result<(), ClassifierError> {
    file.persist(&path).map_err(|e| ClassifierError::Io {
        path,
        source: e.error,
    })?;
    Ok(())
}

fn read_blob<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ClassifierError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ClassifierError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_reader(BufReader::new(file))
        .map(Some)
        .map_err(|source| ClassifierError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Process-wide home of the fill classifier.
///
/// Predictions take an [`Arc`] of the current snapshot, so the model and
/// scaler they use always come from the same training run. Training runs
/// one at a time, persists the new state, and only then swaps it in.
#[derive(Debug)]
pub struct ClassifierStore {
    current: RwLock<Arc<ClassifierSnapshot>>,
    storage: Option<ModelStorage>,
    training: Mutex<()>,
}

impl ClassifierStore {
    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self::with_snapshot(ClassifierSnapshot::default(), None)
    }

    /// A store backed by `dir`. Missing state means untrained; unreadable or
    /// inconsistent state is logged and also treated as untrained.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let storage = ModelStorage::new(dir);
        let snapshot = match storage.load() {
            Ok(Some(snapshot)) => {
                info!(
                    "loaded classifier generation {} from {}",
                    snapshot.generation,
                    storage.dir.display()
                );
                snapshot
            }
            Ok(None) => {
                info!(
                    "no stored classifier in {}; starting untrained",
                    storage.dir.display()
                );
                ClassifierSnapshot::default()
            }
            Err(e) => {
                warn!("ignoring stored classifier: {}", e);
                ClassifierSnapshot::default()
            }
        };
        Self::with_snapshot(snapshot, Some(storage))
    }

    pub fn with_snapshot(snapshot: ClassifierSnapshot, storage: Option<ModelStorage>) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            storage,
            training: Mutex::new(()),
        }
    }

    pub fn snapshot(&self) -> Arc<ClassifierSnapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_trained(&self) -> bool {
        self.snapshot().trained.is_some()
    }

    /// Fits a new scaler and model on labeled features, replacing whatever
    /// was there before. Refuses with fewer than `min_training_samples`
    /// samples. A held-out share of the samples is used to report accuracy;
    /// the result is kept regardless of that figure.
    #[time]
    pub fn train(
        &self,
        samples: &[Features],
        labels: &[bool],
        config: &ScannerConfig,
    ) -> Result<TrainingOutcome, ClassifierError> {
        let _guard = self.training.lock().unwrap_or_else(PoisonError::into_inner);

        let n = samples.len().min(labels.len());
        if n < config.min_training_samples {
            info!(
                "not training: {} sample(s), need at least {}",
                n, config.min_training_samples
            );
            return Ok(TrainingOutcome::Skipped(SkipReason::TooFewSamples {
                count: n,
                required: config.min_training_samples,
            }));
        }

        let (train, validate) = split_indices(n, config.validation_fraction, config.training_seed);
        let train_x = train.iter().map(|&i| samples[i]).collect::<Vec<_>>();
        let train_y = train.iter().map(|&i| labels[i]).collect::<Vec<_>>();

        let scaler = FeatureScaler::fit(&train_x);
        let scaled = train_x.iter().map(|f| scaler.transform(f)).collect::<Vec<_>>();
        let model = LogisticModel::fit(&scaled, &train_y);

        let validate_x = validate
            .iter()
            .map(|&i| scaler.transform(&samples[i]))
            .collect::<Vec<_>>();
        let validate_y = validate.iter().map(|&i| labels[i]).collect::<Vec<_>>();
        let validation_accuracy = accuracy(&model, &validate_x, &validate_y);

        let trained = TrainedClassifier { model, scaler };
        let generation = self.snapshot().generation + 1;
        if let Some(storage) = &self.storage {
            storage.save(generation, &trained)?;
        }
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(ClassifierSnapshot {
            generation,
            trained: Some(trained),
        });

        info!(
            "trained classifier generation {} on {} sample(s), validation accuracy {:.4}",
            generation,
            train.len(),
            validation_accuracy
        );
        Ok(TrainingOutcome::Trained {
            accuracy: validation_accuracy,
            samples: n,
        })
    }
}

/// Shuffles `0..n` with a fixed seed and holds out `ceil(n * fraction)` of
/// the indices for validation, keeping at least one index on each side.
fn split_indices(n: usize, fraction: f32, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices = (0..n).collect::<Vec<usize>>();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));
    let held_out = ((n as f32 * fraction - 1e-4).ceil() as usize).clamp(1, n.saturating_sub(1).max(1));
    let train = indices.split_off(held_out);
    (train, indices)
}
