// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use crate::ses;
use derive_new::new;
use std::convert::TryFrom;
use std::io;
use thiserror::Error;

/// Failure codes reported by every wrapper operation.
///
/// Each variant has a stable integer code (see [`Error::code`]), which is
/// what crosses the C boundary. Negative codes are errors, positive codes
/// are warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Error {
    #[error("Unknown Error")]
    Unknown,
    #[error("Operation failed")]
    Fail,
    #[error("Not initialized")]
    NotInitialized,
    #[error("Not applicable")]
    NotApplicable,
    #[error("Parameter not found")]
    ParameterNotFound,
    #[error("Index out-of-range")]
    Index,
    #[error("Incorrect element set")]
    IncorrectElementSet,
    #[error("Incorrect lens mode")]
    IncorrectLensMode,
    #[error("Incorrect pass energy")]
    IncorrectPassEnergy,
    #[error("Error in analyzer region")]
    IncorrectAnalyzerRegion,
    #[error("Error in detector region")]
    IncorrectDetectorRegion,
    #[error("Variable is read-only")]
    ReadOnly,
    #[error("No instrument loaded")]
    NoInstrument,
    #[error("Acquisition in progress")]
    Acquiring,
    #[error("Error in call to function GDS_Initialize()")]
    InitializeFail,
    #[error("Could not load the instrument library")]
    LoadLibrary,
    #[error("Could not open the instrument configuration file")]
    OpenInstrument,
    #[error("Operation time-out")]
    Timeout,
    #[error("Not implemented")]
    NotImplemented,
}

impl Error {
    pub const ALL: [Error; 19] = [
        Error::Unknown,
        Error::Fail,
        Error::NotInitialized,
        Error::NotApplicable,
        Error::ParameterNotFound,
        Error::Index,
        Error::IncorrectElementSet,
        Error::IncorrectLensMode,
        Error::IncorrectPassEnergy,
        Error::IncorrectAnalyzerRegion,
        Error::IncorrectDetectorRegion,
        Error::ReadOnly,
        Error::NoInstrument,
        Error::Acquiring,
        Error::InitializeFail,
        Error::LoadLibrary,
        Error::OpenInstrument,
        Error::Timeout,
        Error::NotImplemented,
    ];

    pub fn code(self) -> i32 {
        match self {
            Error::Unknown => -1,
            Error::Fail => -2,
            Error::NotInitialized => -3,
            Error::NotApplicable => -4,
            Error::ParameterNotFound => -5,
            Error::Index => -6,
            Error::IncorrectElementSet => -7,
            Error::IncorrectLensMode => -8,
            Error::IncorrectPassEnergy => -9,
            Error::IncorrectAnalyzerRegion => -10,
            Error::IncorrectDetectorRegion => -11,
            Error::ReadOnly => -12,
            Error::NoInstrument => -13,
            Error::Acquiring => -14,
            Error::InitializeFail => -15,
            Error::LoadLibrary => -16,
            Error::OpenInstrument => -17,
            Error::Timeout => 8,
            Error::NotImplemented => 9,
        }
    }

    pub fn from_code(code: i32) -> Option<Error> {
        Error::ALL.iter().copied().find(|e| e.code() == code)
    }

    /// Warnings (positive codes) are not fatal; the caller may simply retry.
    pub fn is_warning(self) -> bool {
        self.code() > 0
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        io::Error::new(io::ErrorKind::Other, e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Success code on the C surface.
pub const ERR_OK: i32 = 0;

/// Turn an operation result into the integer code used on the C surface.
pub fn code_of<T>(res: &Result<T>) -> i32 {
    match res {
        Ok(_) => ERR_OK,
        Err(e) => e.code(),
    }
}

/// The closed set of value types a property or data parameter can have.
///
/// The discriminants are the codes reported by `parameter_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ValueType {
    Bool = 0,
    Int32 = 1,
    Double = 2,
    String = 3,
    VectorInt32 = 4,
    VectorDouble = 5,
    DetectorInfo = 6,
    DetectorRegion = 7,
    AnalyzerRegion = 8,
}

/// A property or data parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int32(i32),
    Double(f64),
    String(String),
    VectorInt32(Vec<i32>),
    VectorDouble(Vec<f64>),
    DetectorInfo(DetectorInfo),
    DetectorRegion(DetectorRegion),
    AnalyzerRegion(AnalyzerRegion),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Bool(_) => ValueType::Bool,
            Value::Int32(_) => ValueType::Int32,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::VectorInt32(_) => ValueType::VectorInt32,
            Value::VectorDouble(_) => ValueType::VectorDouble,
            Value::DetectorInfo(_) => ValueType::DetectorInfo,
            Value::DetectorRegion(_) => ValueType::DetectorRegion,
            Value::AnalyzerRegion(_) => ValueType::AnalyzerRegion,
        }
    }

    /// Number of elements a caller has to provide room for: bytes for
    /// strings, items for vectors, and 1 for everything else.
    pub fn size(&self) -> usize {
        match self {
            Value::String(s) => s.len(),
            Value::VectorInt32(v) => v.len(),
            Value::VectorDouble(v) => v.len(),
            _ => 1,
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match *self {
            Value::Bool(b) => Ok(b),
            _ => Err(Error::NotApplicable),
        }
    }

    pub fn as_i32(&self) -> Result<i32> {
        match *self {
            Value::Int32(i) => Ok(i),
            _ => Err(Error::NotApplicable),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match *self {
            Value::Double(d) => Ok(d),
            _ => Err(Error::NotApplicable),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::String(s) => Ok(s),
            _ => Err(Error::NotApplicable),
        }
    }

    pub fn as_detector_region(&self) -> Result<DetectorRegion> {
        match *self {
            Value::DetectorRegion(r) => Ok(r),
            _ => Err(Error::NotApplicable),
        }
    }

    pub fn as_analyzer_region(&self) -> Result<AnalyzerRegion> {
        match *self {
            Value::AnalyzerRegion(r) => Ok(r),
            _ => Err(Error::NotApplicable),
        }
    }
}

/// Operating state reported by the instrument library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentStatus {
    /// Working and idle.
    Normal,
    /// An acquisition is running.
    Running,
    /// The last acquisition was interrupted by an error.
    AcqError,
    /// Not operational; a reset may help.
    NonOperational,
    /// The library has not been initialized.
    NotInitialized,
}

impl InstrumentStatus {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            ses::status::Normal => InstrumentStatus::Normal,
            ses::status::Running => InstrumentStatus::Running,
            ses::status::AcqError => InstrumentStatus::AcqError,
            ses::status::NotInitialized => InstrumentStatus::NotInitialized,
            _ => InstrumentStatus::NonOperational,
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            InstrumentStatus::Normal => ses::status::Normal,
            InstrumentStatus::Running => ses::status::Running,
            InstrumentStatus::AcqError => ses::status::AcqError,
            InstrumentStatus::NonOperational => ses::status::NonOperational,
            InstrumentStatus::NotInitialized => ses::status::NotInitialized,
        }
    }
}

/// The subset of library options the wrapper exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentOption {
    AlwaysDelayRegion,
    AllowSignalsWithDetector,
    DetectorCount,
    ActiveDetector,
}

impl InstrumentOption {
    pub fn raw(self) -> i32 {
        match self {
            InstrumentOption::AlwaysDelayRegion => ses::option::AlwaysDelayRegion,
            InstrumentOption::AllowSignalsWithDetector => ses::option::AllowSignalsWithDetector,
            InstrumentOption::DetectorCount => ses::option::DetectorCount,
            InstrumentOption::ActiveDetector => ses::option::ActiveDetector,
        }
    }

    /// Flags are passed to the library as 1-byte booleans, the others as
    /// 32-bit integers.
    pub fn is_flag(self) -> bool {
        matches!(
            self,
            InstrumentOption::AlwaysDelayRegion | InstrumentOption::AllowSignalsWithDetector
        )
    }
}

/// Which energy an energy getter/setter refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Energy {
    Kinetic,
    Binding,
    Excitation,
}

#[derive(Debug, Clone, Default, PartialEq, new)]
pub struct InstrumentInfo {
    pub model: String,
    pub serial_no: String,
}

/// Detector capabilities of the loaded instrument.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DetectorInfo {
    pub timer_controlled: bool,
    pub x_channels: i32,
    pub y_channels: i32,
    pub max_slices: i32,
    pub max_channels: i32,
    pub frame_rate: i32,
    pub adc_present: bool,
    pub disc_present: bool,
}

/// Channel and slice window of the detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, new)]
pub struct DetectorRegion {
    pub first_x_channel: i32,
    pub last_x_channel: i32,
    pub first_y_channel: i32,
    pub last_y_channel: i32,
    pub slices: i32,
    pub adc_mode: bool,
}

/// Energy window of an acquisition job.
///
/// In fixed mode only `center_energy` is used; in swept mode the analyser
/// steps from `low_energy` to `high_energy` in `energy_step` increments.
/// `dwell_time` is in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, new)]
pub struct AnalyzerRegion {
    pub fixed: bool,
    pub high_energy: f64,
    pub low_energy: f64,
    pub center_energy: f64,
    pub energy_step: f64,
    pub dwell_time: i32,
}

/// Full detector setup as the library sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detector {
    pub first_x_channel: i32,
    pub last_x_channel: i32,
    pub first_y_channel: i32,
    pub last_y_channel: i32,
    pub slices: i32,
    pub adc_mode: bool,
    pub adc_mask: i32,
    pub disc_level: i32,
}

impl Default for Detector {
    fn default() -> Self {
        Detector {
            first_x_channel: 0,
            last_x_channel: 0,
            first_y_channel: 0,
            last_y_channel: 0,
            slices: 0,
            adc_mode: true,
            adc_mask: 0,
            disc_level: 0,
        }
    }
}

/// Complete acquisition region, the union of what the wrapper stores for
/// the analyser, the detector and the lens.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: String,
    pub excitation_energy: f64,
    pub kinetic: bool,
    pub fixed: bool,
    pub high_energy: f64,
    pub low_energy: f64,
    pub fix_energy: f64,
    pub energy_step: f64,
    pub step_time: i32,
    pub use_region_detector: bool,
    pub detector: Detector,
    pub lens_mode: String,
    pub pass_energy: f64,
    pub drift_region: bool,
    pub grating: i32,
    pub order: i32,
    pub illumination: f64,
    pub slit: f64,
}

impl Default for Region {
    fn default() -> Self {
        Region {
            name: String::new(),
            excitation_energy: 0.0,
            kinetic: true,
            fixed: true,
            high_energy: 0.0,
            low_energy: 0.0,
            fix_energy: 0.0,
            energy_step: 0.0,
            step_time: 0,
            use_region_detector: true,
            detector: Detector::default(),
            lens_mode: String::new(),
            pass_energy: 0.0,
            drift_region: false,
            grating: 0,
            order: 0,
            illumination: 0.0,
            slit: 0.0,
        }
    }
}

/// Result of a region check: the number of energy steps, the estimated
/// duration in milliseconds and the smallest energy step possible.
#[derive(Debug, Clone, Copy, PartialEq, new)]
pub struct RegionCheck {
    pub steps: i32,
    pub time_ms: f64,
    pub min_energy_step: f64,
}

/// Snapshot of the spectrum buffers of the last acquisition.
///
/// `data` is row-major, `slices` rows of `channels` values each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    pub channels: i32,
    pub slices: i32,
    pub sweeps: i32,
    pub count_unit: String,
    pub channel_unit: String,
    pub slice_unit: String,
    pub channel_scale: Vec<f64>,
    pub slice_scale: Vec<f64>,
    pub data: Vec<f64>,
    pub sum_data: Vec<f64>,
}

impl Spectrum {
    pub fn slice(&self, index: i32) -> Option<&[f64]> {
        if index < 0 || index >= self.slices {
            return None;
        }
        let width = usize::try_from(self.channels).ok()?;
        let start = (index as usize).checked_mul(width)?;
        self.data.get(start..start.checked_add(width)?)
    }
}

/// Snapshot of the external I/O buffers of the last acquisition.
///
/// `data` is row-major, `count` rows (one per port) of `steps` values each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Signals {
    pub count: i32,
    pub steps: i32,
    pub sweeps: i32,
    pub steps_unit: String,
    pub steps_scale: Vec<f64>,
    pub names: Vec<String>,
    pub data: Vec<f64>,
}

impl Signals {
    pub fn port(&self, index: i32) -> Option<&[f64]> {
        if index < 0 || index >= self.count {
            return None;
        }
        let width = usize::try_from(self.steps).ok()?;
        let start = (index as usize).checked_mul(width)?;
        self.data.get(start..start.checked_add(width)?)
    }
}

/// One detector frame; `byte_size` is 1 for 8-bit and 2 for 16-bit pixels.
#[derive(Debug, Clone, Default, PartialEq, new)]
pub struct RawImage {
    pub width: i32,
    pub height: i32,
    pub byte_size: i32,
    pub data: Vec<u8>,
}

impl RawImage {
    /// Pixel values, decoded according to `byte_size`.
    pub fn pixels(&self) -> Vec<i32> {
        match self.byte_size {
            2 => self
                .data
                .chunks_exact(2)
                .map(|c| i32::from(u16::from_ne_bytes([c[0], c[1]])))
                .collect(),
            _ => self.data.iter().map(|b| i32::from(*b)).collect(),
        }
    }
}

/// How a blocking wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// The awaited event fired, or nothing was running.
    Ready,
    /// The acquisition was stopped while waiting.
    Aborted,
    /// The timeout elapsed first.
    TimedOut,
}

impl Wait {
    pub fn code(self) -> i32 {
        match self {
            Wait::TimedOut => Error::Timeout.code(),
            _ => ERR_OK,
        }
    }
}

#[test]
fn test_error_codes() {
    assert_eq!(Error::NoInstrument.code(), -13);
    assert_eq!(Error::from_code(-13), Some(Error::NoInstrument));
    assert_eq!(Error::from_code(0), None);
    assert_eq!(Error::from_code(123), None);
    assert!(Error::Timeout.is_warning());
    assert!(!Error::Fail.is_warning());
    for e in Error::ALL.iter() {
        assert_eq!(Error::from_code(e.code()), Some(*e));
    }
    assert_eq!(Wait::TimedOut.code(), 8);
    assert_eq!(Wait::Aborted.code(), 0);
}

#[test]
fn test_value_size() {
    assert_eq!(Value::String("Transmission".into()).size(), 12);
    assert_eq!(Value::VectorDouble(vec![1.0; 5]).size(), 5);
    assert_eq!(Value::Double(2.0).size(), 1);
    assert_eq!(Value::Double(2.0).as_bool().unwrap_err(), Error::NotApplicable);
}

#[test]
fn test_spectrum_slice() {
    let spectrum = Spectrum {
        channels: 3,
        slices: 2,
        data: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        ..Spectrum::default()
    };
    assert_eq!(spectrum.slice(1), Some(&[4.0, 5.0, 6.0][..]));
    assert_eq!(spectrum.slice(2), None);
    assert_eq!(spectrum.slice(-1), None);

    let broken = Spectrum {
        channels: -3,
        ..spectrum
    };
    assert_eq!(broken.slice(0), None);
}

#[test]
fn test_signals_port() {
    let signals = Signals {
        count: 2,
        steps: 2,
        data: vec![1.0, 2.0, 3.0, 4.0],
        ..Signals::default()
    };
    assert_eq!(signals.port(1), Some(&[3.0, 4.0][..]));
    assert_eq!(signals.port(2), None);
    let broken = Signals {
        steps: -1,
        ..signals
    };
    assert_eq!(broken.port(0), None);
}

#[test]
fn test_raw_image_pixels() {
    let image = RawImage::new(2, 1, 2, vec![1, 0, 0, 1]);
    assert_eq!(image.pixels().len(), 2);
    let image = RawImage::new(2, 1, 1, vec![7, 255]);
    assert_eq!(image.pixels(), vec![7, 255]);
}
