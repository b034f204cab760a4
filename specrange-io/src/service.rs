//! In-memory [`DataService`] over spectrum cubes.

use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::{debug, info};
use specrange_core::{
    CalibrationParameters, DataService, DatasetRef, EnergySpan, IndexSpan, Matrix, ServiceError,
};

use crate::cube::SpectrumCube;
use crate::format::{self, CubeFile, DatasetRecord, SignalRecord, FORMAT_VERSION};
use crate::Result;

/// Serves sums, images and calibration from cubes held in memory.
#[derive(Debug, Clone, Default)]
pub struct CubeDataService {
    datasets: BTreeMap<DatasetRef, Vec<SpectrumCube>>,
    latency: Option<Duration>,
}

impl CubeDataService {
    /// Creates an empty service.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every query, to mimic a remote backend.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Adds or replaces a dataset.
    pub fn insert(&mut self, name: impl AsRef<str>, signals: Vec<SpectrumCube>) {
        self.datasets.insert(DatasetRef::new(name), signals);
    }

    /// Datasets in name order.
    pub fn datasets(&self) -> impl Iterator<Item = (&DatasetRef, &[SpectrumCube])> {
        self.datasets
            .iter()
            .map(|(name, signals)| (name, signals.as_slice()))
    }

    /// Looks up one signal.
    ///
    /// # Errors
    /// [`ServiceError::UnknownDataset`] or [`ServiceError::UnknownSignal`].
    pub fn signal(
        &self,
        dataset: &DatasetRef,
        signal_index: usize,
    ) -> std::result::Result<&SpectrumCube, ServiceError> {
        let signals = self
            .datasets
            .get(dataset)
            .ok_or_else(|| ServiceError::UnknownDataset(dataset.to_string()))?;
        signals
            .get(signal_index)
            .ok_or_else(|| ServiceError::UnknownSignal {
                dataset: dataset.to_string(),
                index: signal_index,
            })
    }

    /// Loads every dataset from a cube file.
    ///
    /// # Errors
    /// File, JSON or cube validation errors.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = format::read_cube_file(path)?;
        let service = Self::from_file(file)?;
        info!(
            "loaded {} dataset(s) from {}",
            service.datasets.len(),
            path.display()
        );
        Ok(service)
    }

    /// Builds a service from parsed file contents.
    ///
    /// # Errors
    /// Cube validation errors.
    pub fn from_file(file: CubeFile) -> Result<Self> {
        let mut service = Self::new();
        for dataset in file.datasets {
            let signals = dataset
                .signals
                .into_iter()
                .map(|signal| {
                    SpectrumCube::from_flat(
                        signal.title,
                        signal.calibration,
                        signal.shape,
                        signal.data,
                    )
                })
                .collect::<Result<Vec<_>>>()?;
            service.insert(&dataset.name, signals);
        }
        Ok(service)
    }

    /// File contents for every dataset.
    #[must_use]
    pub fn to_file(&self) -> CubeFile {
        CubeFile {
            version: FORMAT_VERSION,
            datasets: self
                .datasets
                .iter()
                .map(|(name, signals)| DatasetRecord {
                    name: name.to_string(),
                    signals: signals
                        .iter()
                        .map(|cube| {
                            let (rows, cols, channels) = cube.shape();
                            SignalRecord {
                                title: cube.title().to_string(),
                                calibration: cube.calibration().clone(),
                                shape: [rows, cols, channels],
                                data: cube.values(),
                            }
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    /// Writes every dataset to a cube file.
    ///
    /// # Errors
    /// File or JSON errors.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        format::write_cube_file(path, &self.to_file())
    }

    fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }
    }
}

impl DataService for CubeDataService {
    fn aggregate_sum(
        &self,
        dataset: &DatasetRef,
        signal_index: usize,
        energy: EnergySpan,
    ) -> std::result::Result<f64, ServiceError> {
        self.simulate_latency();
        let sum = self.signal(dataset, signal_index)?.energy_sum(energy)?;
        debug!("sum over {energy} in '{dataset}'[{signal_index}] = {sum}");
        Ok(sum)
    }

    fn range_image(
        &self,
        dataset: &DatasetRef,
        signal_index: usize,
        indices: IndexSpan,
    ) -> std::result::Result<Matrix, ServiceError> {
        self.simulate_latency();
        self.signal(dataset, signal_index)?.channel_image(indices)
    }

    fn calibration(
        &self,
        dataset: &DatasetRef,
        signal_index: usize,
    ) -> std::result::Result<CalibrationParameters, ServiceError> {
        Ok(self.signal(dataset, signal_index)?.calibration().clone())
    }

    fn channel_count(
        &self,
        dataset: &DatasetRef,
        signal_index: usize,
    ) -> std::result::Result<usize, ServiceError> {
        Ok(self.signal(dataset, signal_index)?.channel_count())
    }

    fn zero_peak_width(&self, dataset: &DatasetRef, signal_index: usize) -> Option<f64> {
        self.simulate_latency();
        let width = self.signal(dataset, signal_index).ok()?.zero_peak_width();
        debug!("zero-peak width for '{dataset}'[{signal_index}]: {width:?}");
        width
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn service() -> CubeDataService {
        let cube = SpectrumCube::from_flat(
            "flat",
            CalibrationParameters::new(0.0, 0.5, "keV"),
            [1, 2, 4],
            vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0],
        )
        .unwrap();
        let mut service = CubeDataService::new();
        service.insert("flat", vec![cube]);
        service
    }

    #[test]
    fn test_unknown_dataset_and_signal() {
        let service = service();
        assert_eq!(
            service.channel_count(&"nope".into(), 0).unwrap_err(),
            ServiceError::UnknownDataset("nope".into())
        );
        assert!(matches!(
            service.calibration(&"flat".into(), 3).unwrap_err(),
            ServiceError::UnknownSignal { index: 3, .. }
        ));
    }

    #[test]
    fn test_queries_delegate_to_cube() {
        let service = service();
        let dataset = DatasetRef::new("flat");
        let sum = service
            .aggregate_sum(&dataset, 0, EnergySpan::new(0.0, 1.0).unwrap())
            .unwrap();
        assert_relative_eq!(sum, 1.0 + 2.0 + 10.0 + 20.0);

        let image = service
            .range_image(&dataset, 0, IndexSpan::new(2, 3).unwrap())
            .unwrap();
        assert_eq!(image.dim(), (1, 2));
        assert_relative_eq!(image[[0, 1]], 70.0);
        assert_eq!(service.channel_count(&dataset, 0).unwrap(), 4);
    }
}
