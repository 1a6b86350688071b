// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! [`Instrument`] backed by the vendor's SESInstrument library.

use crate::acquisition::Notifier;
use crate::convert::*;
use crate::instrument::Instrument;
use crate::library::Library;
use crate::{ses, types::*};
use log::*;
use parking_lot::Mutex;
use std::{
    ffi::CString,
    os::raw::{c_char, c_int, c_void},
    path::Path,
    ptr,
};

#[derive(PartialEq)]
enum Import {
    Required,
    Optional,
}

macro_rules! functions {
    ($($name:ident: $ty:ident = $kind:ident),* $(,)?) => {
        /// The library's entry points; absent ones are `None`.
        #[allow(non_snake_case)]
        #[derive(Default, Clone, Copy)]
        struct Functions {
            $($name: Option<ses::$ty>,)*
        }

        impl Functions {
            fn import(lib: &Library) -> Result<Functions> {
                let mut missing = Vec::new();
                let functions = Functions {
                    $($name: {
                        let f = unsafe { lib.resolve::<ses::$ty>(stringify!($name)) };
                        if f.is_none() && Import::$kind == Import::Required {
                            missing.push(stringify!($name));
                        }
                        f
                    },)*
                };
                if missing.is_empty() {
                    Ok(functions)
                } else {
                    warn!("SESInstrument: missing required functions: {}", missing.join(", "));
                    Err(Error::LoadLibrary)
                }
            }
        }
    }
}

functions! {
    GDS_GetLastError:            GDS_GetLastError       = Required,
    GDS_GetLastErrorString:      GDS_GetLastErrorString = Required,
    GDS_Initialize:              GDS_Initialize         = Required,
    GDS_Finalize:                GDS_Finalize           = Required,
    GDS_LoadInstrument:          GDS_LoadInstrument     = Required,
    GDS_ResetInstrument:         GDS_ResetInstrument    = Required,
    GDS_ZeroSupplies:            GDS_ZeroSupplies       = Required,
    GDS_TestCommunication:       GDS_TestCommunication  = Required,
    GDS_GetOption:               GDS_GetOption          = Required,
    GDS_SetOption:               GDS_SetOption          = Required,
    GDS_GetInstrumentInfo:       GDS_GetInstrumentInfo  = Required,
    GDS_GetDetectorInfo:         GDS_GetDetectorInfo    = Required,
    GDS_GetElementSets:          GDS_GetList            = Required,
    GDS_GetLensModes:            GDS_GetList            = Required,
    GDS_GetPassEnergies:         GDS_GetPassEnergies    = Required,
    GDS_GetElements:             GDS_GetList            = Optional,
    GDS_GetCurrElementSet:       GDS_GetList            = Required,
    GDS_GetCurrLensMode:         GDS_GetList            = Required,
    GDS_GetCurrPassEnergy:       GDS_GetDouble          = Required,
    GDS_GetCurrKineticEnergy:    GDS_GetDouble          = Required,
    GDS_GetCurrExcitationEnergy: GDS_GetDouble          = Required,
    GDS_GetCurrBindingEnergy:    GDS_GetDouble          = Required,
    GDS_GetGlobalDetector:       GDS_GetGlobalDetector  = Required,
    GDS_SetGlobalDetector:       GDS_SetGlobalDetector  = Required,
    GDS_GetElement:              GDS_GetElement         = Required,
    GDS_SetElement:              GDS_SetElement         = Required,
    GDS_SetElementSet:           GDS_SetString          = Required,
    GDS_SetLensMode:             GDS_SetString          = Required,
    GDS_SetPassEnergy:           GDS_SetDouble          = Required,
    GDS_SetKineticEnergy:        GDS_SetDouble          = Required,
    GDS_SetExcitationEnergy:     GDS_SetDouble          = Required,
    GDS_SetBindingEnergy:        GDS_SetDouble          = Required,
    GDS_CheckRegion:             GDS_CheckRegion        = Required,
    GDS_Stop:                    GDS_Stop               = Required,
    GDS_GetStatus:               GDS_GetStatus          = Required,
    GDS_UseDetector:             GDS_UseFlag            = Optional,
    GDS_UseSignals:              GDS_UseFlag            = Optional,
    GDS_GetCurrSpectrum:         GDS_GetCurrSpectrum    = Optional,
    GDS_GetCurrSignals:          GDS_GetCurrSignals     = Optional,
    GDS_GetRawImage:             GDS_GetRawImage        = Optional,
    GDS_InitAcquisition:         GDS_InitAcquisition    = Required,
    GDS_StartAcquisition:        GDS_StartAcquisition   = Required,
}

/// Call an entry point, mapping a non-zero return to `Fail` and a missing
/// entry point to `missing`.
macro_rules! gds {
    (@or $missing:expr, $f:expr, $($arg:tt)*) => {{
        match $f {
            None => Err($missing),
            Some(f) => {
                let res = unsafe { f($($arg)*) };
                if res == 0 { Ok(()) } else { Err(Error::Fail) }
            }
        }
    }};
    ($f:expr) => { gds!($f,) };
    ($f:expr, $($arg:tt)*) => { gds!(@or Error::NotInitialized, $f, $($arg)*) };
}

// The library's callbacks carry no context pointer, so the session they
// belong to is kept here. Only one library session exists per process.
static ACTIVE: Mutex<Option<Notifier>> = parking_lot::const_mutex(None);
static LAST_ERROR: Mutex<Option<ses::GDS_GetLastErrorString>> = parking_lot::const_mutex(None);

extern "system" fn on_error(code: c_int) {
    let message = match *LAST_ERROR.lock() {
        Some(f) => c_array_to_string(unsafe { f() }),
        None => String::new(),
    };
    error!("SESInstrument error {}: {}", code, message);
}

extern "system" fn on_point_ready(index: c_int) {
    let notifier = ACTIVE.lock().clone();
    if let Some(n) = notifier {
        n.point_ready(index);
    }
}

extern "system" fn on_region_ready() {
    let notifier = ACTIVE.lock().clone();
    if let Some(n) = notifier {
        n.region_ready();
    }
}

/// Result buffers handed out by the library at acquisition init.
struct Buffers {
    spectrum: *mut ses::WSpectrum,
    signals: *mut ses::WSignals,
}

// The pointers are only dereferenced under the mutex, and the library keeps
// the memory alive until the next init.
unsafe impl Send for Buffers {}

fn c_string(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| Error::NotApplicable)
}

pub struct SesInstrument {
    lib: Library,
    fns: Functions,
    buffers: Mutex<Buffers>,
}

impl Default for SesInstrument {
    fn default() -> Self {
        SesInstrument {
            lib: Library::new(),
            fns: Functions::default(),
            buffers: Mutex::new(Buffers {
                spectrum: ptr::null_mut(),
                signals: ptr::null_mut(),
            }),
        }
    }
}

impl SesInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and load the library at `path` in one go.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut instrument = Self::new();
        instrument.load_library(path.as_ref())?;
        Ok(instrument)
    }

    /// Read a list or string the library hands out in two steps: first the
    /// size with a null buffer, then the content.
    fn read_string(&self, f: Option<ses::GDS_GetList>) -> Result<String> {
        let f = f.ok_or(Error::NotInitialized)?;
        let mut size: c_int = 0;
        if unsafe { f(ptr::null_mut(), &mut size) } != 0 {
            return Err(Error::Fail);
        }
        let mut buf = vec![0 as c_char; size.max(0) as usize + 1];
        size = buf.len() as c_int;
        if unsafe { f(buf.as_mut_ptr(), &mut size) } != 0 {
            return Err(Error::Fail);
        }
        Ok(c_buf_to_string(&buf))
    }

    fn read_double(&self, f: Option<ses::GDS_GetDouble>) -> Result<f64> {
        let mut value: f64 = 0.0;
        gds!(f, &mut value)?;
        Ok(value)
    }
}

impl Instrument for SesInstrument {
    fn load_library(&mut self, path: &Path) -> Result<()> {
        self.fns = Functions::default();
        self.lib.load(path)?;
        match Functions::import(&self.lib) {
            Ok(fns) => {
                self.fns = fns;
                info!("SESInstrument: loaded {}", path.display());
                Ok(())
            }
            Err(e) => {
                self.lib.unload();
                Err(e)
            }
        }
    }

    fn unload_library(&mut self) {
        self.fns = Functions::default();
        self.lib.unload();
    }

    fn is_loaded(&self) -> bool {
        self.lib.is_loaded()
    }

    fn initialize(&self) -> Result<()> {
        *LAST_ERROR.lock() = self.fns.GDS_GetLastErrorString;
        gds!(@or Error::NotInitialized, self.fns.GDS_Initialize, Some(on_error as ses::ErrorNotify), ptr::null_mut())
            .map_err(|_| Error::InitializeFail)
    }

    fn finalize(&self) -> Result<()> {
        ACTIVE.lock().take();
        gds!(self.fns.GDS_Finalize)
    }

    fn load_instrument(&self, config: &Path) -> Result<InstrumentInfo> {
        let name = c_string(config.to_str().ok_or(Error::OpenInstrument)?)?;
        gds!(self.fns.GDS_LoadInstrument, name.as_ptr()).map_err(|_| Error::OpenInstrument)?;
        let mut info = ses::WInstrumentInfo::default();
        gds!(self.fns.GDS_GetInstrumentInfo, &mut info)?;
        Ok(InstrumentInfo::new(
            pascal_to_string(&info.Model),
            pascal_to_string(&info.SerialNo),
        ))
    }

    fn reset(&self) -> Result<()> {
        gds!(self.fns.GDS_ResetInstrument)
    }

    fn test_communication(&self) -> Result<()> {
        gds!(self.fns.GDS_TestCommunication)
    }

    fn zero_supplies(&self) -> Result<()> {
        gds!(self.fns.GDS_ZeroSupplies)
    }

    fn status(&self) -> Result<InstrumentStatus> {
        let mut status = ses::status::NonOperational;
        if self.fns.GDS_GetStatus.is_some() {
            gds!(self.fns.GDS_GetStatus, &mut status)?;
        }
        Ok(InstrumentStatus::from_raw(status))
    }

    fn last_error(&self) -> String {
        match self.fns.GDS_GetLastErrorString {
            Some(f) => c_array_to_string(unsafe { f() }),
            None => String::new(),
        }
    }

    fn option(&self, opt: InstrumentOption) -> Result<i32> {
        if opt.is_flag() {
            let mut flag: u8 = 0;
            gds!(self.fns.GDS_GetOption, opt.raw(), &mut flag as *mut u8 as *mut c_void)?;
            Ok(i32::from(flag != 0))
        } else {
            let mut value: c_int = 0;
            gds!(self.fns.GDS_GetOption, opt.raw(), &mut value as *mut c_int as *mut c_void)?;
            Ok(value)
        }
    }

    fn set_option(&self, opt: InstrumentOption, value: i32) -> Result<()> {
        if opt.is_flag() {
            let flag = (value != 0) as u8;
            gds!(self.fns.GDS_SetOption, opt.raw(), &flag as *const u8 as *const c_void)
        } else {
            gds!(self.fns.GDS_SetOption, opt.raw(), &value as *const c_int as *const c_void)
        }
    }

    fn detector_info(&self) -> Result<DetectorInfo> {
        let mut info = ses::WDetectorInfo::default();
        gds!(self.fns.GDS_GetDetectorInfo, &mut info)?;
        Ok(detector_info_from_raw(&info))
    }

    fn global_detector(&self) -> Result<Detector> {
        let mut det = ses::WDetector::default();
        gds!(self.fns.GDS_GetGlobalDetector, &mut det)?;
        Ok(detector_from_raw(&det))
    }

    fn set_global_detector(&self, detector: &Detector) -> Result<()> {
        let det = detector_to_raw(detector);
        gds!(self.fns.GDS_SetGlobalDetector, &det)
    }

    fn element_sets(&self) -> Result<Vec<String>> {
        Ok(split_ses_list(&self.read_string(self.fns.GDS_GetElementSets)?))
    }

    fn lens_modes(&self) -> Result<Vec<String>> {
        Ok(split_ses_list(&self.read_string(self.fns.GDS_GetLensModes)?))
    }

    fn pass_energies(&self, lens_mode: &str) -> Result<Vec<f64>> {
        let f = self.fns.GDS_GetPassEnergies.ok_or(Error::NotInitialized)?;
        let mode = c_string(lens_mode)?;
        let mut size: c_int = 0;
        if unsafe { f(mode.as_ptr(), ptr::null_mut(), &mut size) } != 0 {
            return Err(Error::Fail);
        }
        let mut buf = vec![0 as c_char; size.max(0) as usize + 1];
        size = buf.len() as c_int;
        if unsafe { f(mode.as_ptr(), buf.as_mut_ptr(), &mut size) } != 0 || buf[0] == 0 {
            return Err(Error::Fail);
        }
        Ok(split_ses_list(&c_buf_to_string(&buf))
            .iter()
            .filter_map(|s| s.trim().parse().ok())
            .collect())
    }

    fn element_names(&self) -> Result<Vec<String>> {
        if self.fns.GDS_GetElements.is_none() {
            return Err(Error::NotImplemented);
        }
        Ok(split_ses_list(&self.read_string(self.fns.GDS_GetElements)?))
    }

    fn element_set(&self) -> Result<String> {
        self.read_string(self.fns.GDS_GetCurrElementSet)
    }

    fn set_element_set(&self, name: &str) -> Result<()> {
        let name = c_string(name)?;
        gds!(self.fns.GDS_SetElementSet, name.as_ptr())
    }

    fn lens_mode(&self) -> Result<String> {
        self.read_string(self.fns.GDS_GetCurrLensMode)
    }

    fn set_lens_mode(&self, name: &str) -> Result<()> {
        let name = c_string(name)?;
        gds!(self.fns.GDS_SetLensMode, name.as_ptr())
    }

    fn pass_energy(&self) -> Result<f64> {
        self.read_double(self.fns.GDS_GetCurrPassEnergy)
    }

    fn set_pass_energy(&self, energy: f64) -> Result<()> {
        gds!(self.fns.GDS_SetPassEnergy, energy)
    }

    fn energy(&self, kind: Energy) -> Result<f64> {
        self.read_double(match kind {
            Energy::Kinetic => self.fns.GDS_GetCurrKineticEnergy,
            Energy::Binding => self.fns.GDS_GetCurrBindingEnergy,
            Energy::Excitation => self.fns.GDS_GetCurrExcitationEnergy,
        })
    }

    fn set_energy(&self, kind: Energy, value: f64) -> Result<()> {
        let f = match kind {
            Energy::Kinetic => self.fns.GDS_SetKineticEnergy,
            Energy::Binding => self.fns.GDS_SetBindingEnergy,
            Energy::Excitation => self.fns.GDS_SetExcitationEnergy,
        };
        gds!(f, value)
    }

    fn element_voltage(&self, element: &str) -> Result<f64> {
        let name = c_string(element)?;
        let mut voltage: f64 = 0.0;
        gds!(self.fns.GDS_GetElement, name.as_ptr(), &mut voltage)?;
        Ok(voltage)
    }

    fn set_element_voltage(&self, element: &str, voltage: f64) -> Result<()> {
        let name = c_string(element)?;
        gds!(self.fns.GDS_SetElement, name.as_ptr(), voltage)
    }

    fn check_region(&self, region: &mut Region) -> Result<RegionCheck> {
        let mut raw = region_to_raw(region);
        let mut steps: c_int = 0;
        let mut time_ms: f64 = 0.0;
        let mut min_step: f64 = 0.0;
        let res = gds!(self.fns.GDS_CheckRegion, &mut raw, &mut steps, &mut time_ms, &mut min_step);
        // the library adjusts the region even when rejecting it
        *region = region_from_raw(&raw);
        res.map(|_| RegionCheck::new(steps, time_ms, min_step))
    }

    fn init_acquisition(
        &self,
        region: &mut Region,
        temp_file: Option<&Path>,
        notifier: Notifier,
    ) -> Result<()> {
        let temp = c_string(temp_file.and_then(Path::to_str).unwrap_or(""))?;
        let mut raw = region_to_raw(region);
        let mut guard = self.buffers.lock();
        let buffers = &mut *guard;
        buffers.spectrum = ptr::null_mut();
        buffers.signals = ptr::null_mut();
        *ACTIVE.lock() = Some(notifier);
        let res = gds!(
            self.fns.GDS_InitAcquisition,
            &mut raw,
            &mut buffers.spectrum,
            &mut buffers.signals,
            temp.as_ptr(),
            Some(on_point_ready as ses::PointReady),
            Some(on_region_ready as ses::RegionReady)
        );
        *region = region_from_raw(&raw);
        res
    }

    fn start_acquisition(&self, iteration: i32) -> Result<()> {
        gds!(self.fns.GDS_StartAcquisition, iteration)
    }

    fn stop(&self) -> Result<()> {
        gds!(self.fns.GDS_Stop)
    }

    fn use_detector(&self, on: bool) -> Result<()> {
        gds!(@or Error::NotImplemented, self.fns.GDS_UseDetector, on as u8)
    }

    fn use_signals(&self, on: bool) -> Result<()> {
        gds!(@or Error::NotImplemented, self.fns.GDS_UseSignals, on as u8)
    }

    fn spectrum(&self) -> Result<Option<Spectrum>> {
        let mut buffers = self.buffers.lock();
        if buffers.spectrum.is_null() && self.fns.GDS_GetCurrSpectrum.is_some() {
            gds!(self.fns.GDS_GetCurrSpectrum, &mut buffers.spectrum)?;
        }
        if buffers.spectrum.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { spectrum_from_raw(&*buffers.spectrum) }))
    }

    fn signals(&self) -> Result<Option<Signals>> {
        let mut buffers = self.buffers.lock();
        if buffers.signals.is_null() && self.fns.GDS_GetCurrSignals.is_some() {
            gds!(self.fns.GDS_GetCurrSignals, &mut buffers.signals)?;
        }
        if buffers.signals.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { signals_from_raw(&*buffers.signals) }))
    }

    fn raw_image(&self) -> Result<RawImage> {
        let info = self.detector_info()?;
        let (mut width, mut height, mut byte_size) = (info.x_channels, info.y_channels, 2);
        let mut data = vec![0u8; image_len(width, height, byte_size)?];
        gds!(
            self.fns.GDS_GetRawImage,
            data.as_mut_ptr(),
            &mut width,
            &mut height,
            &mut byte_size
        )?;
        data.truncate(image_len(width, height, byte_size)?);
        Ok(RawImage::new(width, height, byte_size, data))
    }
}

/// Buffer size of a `width` x `height` image; negative dimensions count as
/// zero.
fn image_len(width: i32, height: i32, byte_size: i32) -> Result<usize> {
    let dim = |v: i32| v.max(0) as usize;
    dim(width)
        .checked_mul(dim(height))
        .and_then(|n| n.checked_mul(dim(byte_size)))
        .ok_or(Error::Fail)
}

impl Drop for SesInstrument {
    fn drop(&mut self) {
        ACTIVE.lock().take();
    }
}

#[test]
fn test_unloaded_instrument() {
    let instrument = SesInstrument::new();
    assert!(!instrument.is_loaded());
    assert_eq!(instrument.status(), Ok(InstrumentStatus::NonOperational));
    assert_eq!(instrument.reset(), Err(Error::NotInitialized));
    assert_eq!(instrument.initialize(), Err(Error::InitializeFail));
    assert_eq!(instrument.use_detector(true), Err(Error::NotImplemented));
    assert_eq!(instrument.element_names(), Err(Error::NotImplemented));
    assert_eq!(instrument.spectrum(), Ok(None));
    assert!(instrument.last_error().is_empty());
}

#[test]
fn test_open_missing_library() {
    assert_eq!(
        SesInstrument::open("/nonexistent/dll/SESInstrument.dll").err(),
        Some(Error::LoadLibrary)
    );
}

#[test]
fn test_image_len() {
    assert_eq!(image_len(64, 32, 2), Ok(4096));
    assert_eq!(image_len(-1, 32, 2), Ok(0));
    assert_eq!(image_len(i32::MAX, i32::MAX, i32::MAX), Err(Error::Fail));
}
