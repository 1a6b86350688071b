// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use crate::acquisition::{AcqState, Acquisition, Notifier};
use crate::dll::SesInstrument;
use crate::error_table::ErrorTable;
use crate::instrument::Instrument;
use crate::registry::Registry;
use crate::{parameters, properties, types::*};
use log::*;
use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// Environment variable naming the SES installation directory.
pub const SES_BASE_DIR: &str = "SES_BASE_DIR";

const LIBRARY_FILE: &str = "dll/SESInstrument.dll";

/// Active detector bits.
pub(crate) const DETECTOR_BIT: i32 = 0x1;
pub(crate) const EXTERNAL_IO_BIT: i32 = 0x2;

/// Where to look for the instrument library when no path is configured.
pub fn default_library_path() -> PathBuf {
    match env::var_os(SES_BASE_DIR) {
        Some(base) if !base.is_empty() => Path::new(&base).join(LIBRARY_FILE),
        _ => PathBuf::from(LIBRARY_FILE),
    }
}

pub(crate) fn resolve(working_dir: &Path, path: &Path) -> PathBuf {
    if path.is_relative() {
        working_dir.join(path)
    } else {
        path.to_owned()
    }
}

#[derive(Default)]
pub struct WrapperBuilder {
    working_dir: Option<PathBuf>,
    library_path: Option<PathBuf>,
    instrument: Option<Box<dyn Instrument>>,
    errors: Option<Arc<ErrorTable>>,
    reset_between_iterations: bool,
}

impl WrapperBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_path = Some(path.into());
        self
    }

    /// Use `instrument` instead of the vendor library.
    pub fn instrument(mut self, instrument: Box<dyn Instrument>) -> Self {
        self.instrument = Some(instrument);
        self
    }

    pub fn error_table(mut self, errors: Arc<ErrorTable>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn reset_data_between_iterations(mut self, reset: bool) -> Self {
        self.reset_between_iterations = reset;
        self
    }

    /// Build the wrapper and try to load the instrument library. A library
    /// that cannot be loaded is not an error here; the wrapper then reports
    /// `NoInstrument` and friends until a working one is configured through
    /// the `instrument_library` property.
    pub fn build(self) -> Result<SesWrapper> {
        let working_dir = match self.working_dir {
            Some(dir) => dir,
            None => env::current_dir().map_err(|_| Error::Fail)?,
        };
        let library_path = self.library_path.unwrap_or_else(default_library_path);
        let mut instrument = self
            .instrument
            .unwrap_or_else(|| Box::new(SesInstrument::new()));
        if !instrument.is_loaded() {
            let path = resolve(&working_dir, &library_path);
            if let Err(e) = instrument.load_library(&path) {
                warn!("SESWrapper: instrument library {} not loaded: {}", path.display(), e);
            }
        }

        let state = State {
            errors: self.errors.unwrap_or_default(),
            instrument,
            working_dir,
            library_path,
            initialized: false,
            instrument_loaded: false,
            info: InstrumentInfo::default(),
            detector_info: DetectorInfo::default(),
            element_sets: Vec::new(),
            lens_modes: Vec::new(),
            pass_energies: Vec::new(),
            element_names: Vec::new(),
            region: Region::default(),
            active_detectors: DETECTOR_BIT,
            temp_file: String::new(),
            reset_between_iterations: self.reset_between_iterations,
            acquisition: Arc::new(Acquisition::new()),
        };
        Ok(SesWrapper {
            properties: properties::registry(),
            parameters: parameters::registry(),
            state,
        })
    }
}

/// Everything the property and data parameter accessors operate on.
pub(crate) struct State {
    pub errors: Arc<ErrorTable>,
    pub instrument: Box<dyn Instrument>,
    pub working_dir: PathBuf,
    pub library_path: PathBuf,
    pub initialized: bool,
    pub instrument_loaded: bool,
    pub info: InstrumentInfo,
    pub detector_info: DetectorInfo,
    pub element_sets: Vec<String>,
    pub lens_modes: Vec<String>,
    pub pass_energies: Vec<f64>,
    pub element_names: Vec<String>,
    pub region: Region,
    pub active_detectors: i32,
    pub temp_file: String,
    pub reset_between_iterations: bool,
    pub acquisition: Arc<Acquisition>,
}

impl State {
    /// Fails with `NoInstrument` until an instrument has been loaded.
    pub fn loaded(&self) -> Result<()> {
        if self.instrument_loaded {
            Ok(())
        } else {
            Err(Error::NoInstrument)
        }
    }

    pub fn hw_status(&self) -> InstrumentStatus {
        if !self.instrument.is_loaded() {
            return InstrumentStatus::NonOperational;
        }
        self.instrument
            .status()
            .unwrap_or(InstrumentStatus::NonOperational)
    }

    pub fn is_running(&self) -> bool {
        self.hw_status() == InstrumentStatus::Running
    }

    fn temp_path(&self) -> Option<PathBuf> {
        if self.temp_file.is_empty() {
            None
        } else {
            Some(resolve(&self.working_dir, Path::new(&self.temp_file)))
        }
    }
}

/// Wrapper around an analyser control library.
///
/// Configuration goes through named properties, results through named data
/// parameters, and acquisitions through the `*_acquisition` methods. The
/// methods that may block or that interrupt a blocked caller take `&self`.
pub struct SesWrapper {
    properties: Registry<State>,
    parameters: Registry<State>,
    state: State,
}

impl SesWrapper {
    pub fn builder() -> WrapperBuilder {
        WrapperBuilder::new()
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    pub fn is_instrument_loaded(&self) -> bool {
        self.state.instrument_loaded
    }

    pub fn error_table(&self) -> &Arc<ErrorTable> {
        &self.state.errors
    }

    pub fn acquisition(&self) -> &Arc<Acquisition> {
        &self.state.acquisition
    }

    pub fn instrument_info(&self) -> &InstrumentInfo {
        &self.state.info
    }

    pub fn initialize(&mut self) -> Result<()> {
        let st = &mut self.state;
        if st.initialized {
            return Ok(());
        }
        if !st.instrument.is_loaded() {
            return Err(Error::LoadLibrary);
        }
        st.instrument.initialize()?;
        st.initialized = true;
        info!("SESWrapper: initialized");
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<()> {
        let st = &mut self.state;
        st.acquisition.stop();
        if st.instrument.is_loaded() {
            if let Err(e) = st.instrument.finalize() {
                warn!("SESWrapper: finalize failed: {}", e);
            }
        }
        st.instrument_loaded = false;
        st.initialized = false;
        info!("SESWrapper: finalized");
        Ok(())
    }

    pub fn get_property(&self, name: &str, index: i32) -> Result<Value> {
        self.properties.get(&self.state, name, index)
    }

    pub fn set_property(&mut self, name: &str, index: i32, value: &Value) -> Result<()> {
        self.properties.set(&mut self.state, name, index, value)
    }

    /// Number of elements `get_property` currently produces, for callers
    /// that allocate before reading.
    pub fn property_size(&self, name: &str, index: i32) -> Result<usize> {
        self.properties.size(&self.state, name, index)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.names()
    }

    pub fn get_acquired_data(&self, name: &str, index: i32) -> Result<Value> {
        self.parameters.get(&self.state, name, index)
    }

    pub fn acquired_data_size(&self, name: &str, index: i32) -> Result<usize> {
        self.parameters.size(&self.state, name, index)
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.names()
    }

    /// Type of a property or data parameter.
    pub fn parameter_type(&self, name: &str) -> Option<ValueType> {
        self.properties
            .value_type(name)
            .or_else(|| self.parameters.value_type(name))
    }

    /// Check that the given settings exist on the loaded instrument.
    pub fn validate(
        &self,
        element_set: &str,
        lens_mode: &str,
        pass_energy: f64,
        _kinetic_energy: f64,
    ) -> Result<()> {
        let st = &self.state;
        st.loaded()?;
        if !st.element_sets.iter().any(|s| s == element_set) {
            return Err(Error::IncorrectElementSet);
        }
        if !st.lens_modes.iter().any(|m| m == lens_mode) {
            return Err(Error::IncorrectLensMode);
        }
        let energies = st
            .instrument
            .pass_energies(lens_mode)
            .map_err(|_| Error::IncorrectPassEnergy)?;
        if !energies.contains(&pass_energy) {
            return Err(Error::IncorrectPassEnergy);
        }
        Ok(())
    }

    pub fn reset_hw(&self) -> Result<()> {
        if let Err(e) = self.stop_acquisition() {
            debug!("SESWrapper: stop before reset: {}", e);
        }
        self.state.instrument.reset().map_err(|_| Error::Fail)
    }

    pub fn test_hw(&self) -> Result<()> {
        self.state
            .instrument
            .test_communication()
            .map_err(|_| Error::Fail)
    }

    /// Load an instrument configuration file and read back what it offers.
    pub fn load_instrument(&mut self, file: &str) -> Result<()> {
        let st = &mut self.state;
        st.instrument_loaded = false;
        st.info = InstrumentInfo::default();
        if !st.initialized {
            return Err(Error::NotInitialized);
        }
        if file.is_empty() {
            return Err(Error::Fail);
        }
        let path = resolve(&st.working_dir, Path::new(file));
        st.detector_info = st.instrument.detector_info().unwrap_or_default();
        st.info = st.instrument.load_instrument(&path).map_err(|e| {
            warn!("SESWrapper: could not load {}: {}", path.display(), e);
            e
        })?;
        st.instrument_loaded = true;
        info!(
            "SESWrapper: loaded instrument {} (S/N {})",
            st.info.model, st.info.serial_no
        );

        if let Ok(det) = st.instrument.global_detector() {
            st.region.detector = det;
        }
        if let Ok(mode) = st.instrument.lens_mode() {
            st.region.lens_mode = mode;
        }
        if let Ok(energy) = st.instrument.pass_energy() {
            st.region.pass_energy = energy;
        }
        st.element_names = st.instrument.element_names().unwrap_or_default();
        let lists = (|| -> Result<()> {
            st.element_sets = st.instrument.element_sets()?;
            st.lens_modes = st.instrument.lens_modes()?;
            st.pass_energies = match st.lens_modes.first() {
                Some(mode) => st.instrument.pass_energies(mode)?,
                None => Vec::new(),
            };
            Ok(())
        })();
        lists.map_err(|e| {
            warn!("SESWrapper: could not read instrument lists: {}", e);
            Error::Fail
        })
    }

    pub fn zero_supplies(&self) -> Result<()> {
        self.state.loaded()?;
        self.state.instrument.zero_supplies().map_err(|_| Error::Fail)
    }

    pub fn energy(&self, kind: Energy) -> Result<f64> {
        self.state.loaded()?;
        self.state.instrument.energy(kind).map_err(|_| Error::Fail)
    }

    pub fn set_energy(&self, kind: Energy, value: f64) -> Result<()> {
        self.state.loaded()?;
        self.state
            .instrument
            .set_energy(kind, value)
            .map_err(|_| Error::Fail)
    }

    pub fn kinetic_energy(&self) -> Result<f64> {
        self.energy(Energy::Kinetic)
    }

    pub fn set_kinetic_energy(&self, value: f64) -> Result<()> {
        self.set_energy(Energy::Kinetic, value)
    }

    pub fn element_voltage(&self, element: &str) -> Result<f64> {
        self.state.loaded()?;
        self.state
            .instrument
            .element_voltage(element)
            .map_err(|_| Error::Fail)
    }

    pub fn set_element_voltage(&self, element: &str, voltage: f64) -> Result<()> {
        self.state.loaded()?;
        self.state
            .instrument
            .set_element_voltage(element, voltage)
            .map_err(|_| Error::Fail)
    }

    /// Check the stored analyzer region against the hardware. The region as
    /// adjusted by the check is stored back and returned along with the
    /// number of steps, the expected time and the smallest energy step.
    pub fn check_analyzer_region(&mut self) -> Result<(AnalyzerRegion, RegionCheck)> {
        let st = &mut self.state;
        st.loaded()?;
        let mut candidate = st.region.clone();
        let checked = st
            .instrument
            .check_region(&mut candidate)
            .map_err(|_| Error::IncorrectAnalyzerRegion)?;
        let adjusted = properties::analyzer_region_of(&candidate);
        st.region = candidate;
        Ok((adjusted, checked))
    }

    /// Prepare a new acquisition of the stored region. With `block_on_point`
    /// the instrument waits after every point until
    /// [`SesWrapper::continue_acquisition`] is called; likewise for
    /// `block_on_region` at the end of the region.
    pub fn init_acquisition(&mut self, block_on_point: bool, block_on_region: bool) -> Result<()> {
        let st = &mut self.state;
        st.loaded()?;
        if st.is_running() {
            return Err(Error::Fail);
        }
        st.acquisition.init(block_on_point, block_on_region);
        let temp = st.temp_path();
        if let Some(path) = &temp {
            match fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => {
                    warn!("SESWrapper: could not remove {}: {}", path.display(), e)
                }
                _ => {}
            }
        }
        let notifier = Notifier::new(st.acquisition.clone());
        match st
            .instrument
            .init_acquisition(&mut st.region, temp.as_deref(), notifier)
        {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("SESWrapper: acquisition init failed: {}", e);
                st.acquisition.fail();
                Err(Error::Fail)
            }
        }
    }

    /// Start the next iteration of the initialized acquisition. Returns as
    /// soon as the instrument is running.
    pub fn start_acquisition(&self) -> Result<()> {
        let st = &self.state;
        st.loaded()?;
        if st.is_running() {
            return Err(Error::Acquiring);
        }
        let iteration = st.acquisition.start(st.reset_between_iterations)?;
        for (res, what) in [
            (
                st.instrument.use_detector(st.active_detectors & DETECTOR_BIT != 0),
                "detector",
            ),
            (
                st.instrument.use_signals(st.active_detectors & EXTERNAL_IO_BIT != 0),
                "external I/O",
            ),
        ]
        .iter()
        {
            if let Err(e) = res {
                debug!("SESWrapper: selecting {}: {}", what, e);
            }
        }
        st.instrument.start_acquisition(iteration).map_err(|e| {
            warn!("SESWrapper: start of iteration {} failed: {}", iteration, e);
            st.acquisition.fail();
            Error::Fail
        })
    }

    /// Abort the running acquisition and wake everything waiting on it.
    pub fn stop_acquisition(&self) -> Result<()> {
        let st = &self.state;
        if !st.instrument.is_loaded() {
            return Err(Error::NoInstrument);
        }
        st.acquisition.stop();
        st.instrument.stop().map_err(|_| Error::Fail)
    }

    /// Wait until the next point is measured; `None` waits without limit.
    /// Returns `Ready` at once when the instrument is not running.
    pub fn wait_for_point_ready(&self, timeout: Option<Duration>) -> Result<Wait> {
        self.state.loaded()?;
        if !self.state.is_running() {
            return Ok(Wait::Ready);
        }
        Ok(self.state.acquisition.wait_for_point(timeout))
    }

    pub fn wait_for_region_ready(&self, timeout: Option<Duration>) -> Result<Wait> {
        self.state.loaded()?;
        if !self.state.is_running() {
            return Ok(Wait::Ready);
        }
        Ok(self.state.acquisition.wait_for_region(timeout))
    }

    pub fn continue_acquisition(&self) -> Result<()> {
        self.state.acquisition.resume();
        Ok(())
    }

    pub fn acquisition_state(&self) -> AcqState {
        self.state.acquisition.state()
    }
}

impl Drop for SesWrapper {
    fn drop(&mut self) {
        if self.state.initialized {
            let _ = self.finalize();
        }
    }
}

#[test]
fn test_default_library_path() {
    let path = default_library_path();
    assert!(path.ends_with("dll/SESInstrument.dll"));
    assert_eq!(
        resolve(Path::new("/opt/ses"), Path::new("dll/SESInstrument.dll")),
        PathBuf::from("/opt/ses/dll/SESInstrument.dll")
    );
    assert_eq!(
        resolve(Path::new("/opt/ses"), Path::new("/lib/x.so")),
        PathBuf::from("/lib/x.so")
    );
}
