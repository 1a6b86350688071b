// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Raw structure layouts, constants and entry point signatures of the
//! SESInstrument library.
//!
//! The library ships without a C header, so everything here is written by
//! hand after the layouts the vendor documents. Boolean members are kept as
//! `u8` since the library is free to put any bit pattern in them.

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use libc::{c_char, c_double, c_int, c_uchar, c_void};

pub type Char32 = [c_char; 32];
pub type Vector = *mut c_double;
pub type Matrix = *mut Vector;

pub type ErrorNotify = extern "system" fn(c_int);
pub type PointReady = extern "system" fn(c_int);
pub type RegionReady = extern "system" fn();

/// Option identifiers accepted by `GDS_GetOption` and `GDS_SetOption`.
#[rustfmt::skip]
pub mod option {
    use libc::c_int;

    pub const FermiEdge: c_int                          = 0;
    pub const SmoothPoints: c_int                       = 1;
    pub const AlwaysDelayRegion: c_int                  = 2;
    pub const ZeroVoltages: c_int                       = 3;
    pub const ShowProgress: c_int                       = 4;
    pub const DelayDrawing: c_int                       = 5;
    pub const ImageScaleFactor: c_int                   = 6;
    pub const AllowSignalsWithDetector: c_int           = 7;
    pub const ErrorLevel: c_int                         = 8;
    pub const AdjustRegionForSignalsWithDetector: c_int = 9;
    pub const DetectorCount: c_int                      = 10;
    pub const DetectorNamesSize: c_int                  = 11;
    pub const DetectorNames: c_int                      = 12;
    pub const ActiveDetector: c_int                     = 13;
}

/// Values reported by `GDS_GetStatus`.
#[rustfmt::skip]
pub mod status {
    use libc::c_int;

    pub const Normal: c_int         = 0;
    pub const Running: c_int        = 1;
    pub const AcqError: c_int       = 2;
    pub const NonOperational: c_int = 3;
    pub const NotInitialized: c_int = 4;
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WInstrumentInfo {
    pub Model: [c_char; 256],
    pub SerialNo: [c_char; 256],
}

impl Default for WInstrumentInfo {
    fn default() -> Self {
        WInstrumentInfo {
            Model: [0; 256],
            SerialNo: [0; 256],
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WDetectorInfo {
    pub Name: [c_char; 256],
    pub TimerControlled: u8,
    pub XChannels: c_int,
    pub YChannels: c_int,
    pub MaxSlices: c_int,
    pub MaxChannels: c_int,
    pub FramesPerSec: c_int,
    pub ADCPresent: u8,
    pub DiscPresent: u8,
}

impl Default for WDetectorInfo {
    fn default() -> Self {
        WDetectorInfo {
            Name: [0; 256],
            TimerControlled: 0,
            XChannels: 0,
            YChannels: 0,
            MaxSlices: 0,
            MaxChannels: 0,
            FramesPerSec: 0,
            ADCPresent: 0,
            DiscPresent: 0,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct WDetector {
    pub FirstXChannel: c_int,
    pub LastXChannel: c_int,
    pub FirstYChannel: c_int,
    pub LastYChannel: c_int,
    pub Slices: c_int,
    pub ADCMode: c_char,
    pub ADCMask: c_int,
    pub DiscLvl: c_int,
}

impl Default for WDetector {
    fn default() -> Self {
        WDetector {
            FirstXChannel: 0,
            LastXChannel: 0,
            FirstYChannel: 0,
            LastYChannel: 0,
            Slices: 0,
            ADCMode: 1,
            ADCMask: 0,
            DiscLvl: 0,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct WRegion {
    pub Name: Char32,
    pub ExcEnergy: c_double,
    pub Kinetic: u8,
    pub Fixed: u8,
    pub HighEnergy: c_double,
    pub LowEnergy: c_double,
    pub FixEnergy: c_double,
    pub EnergyStep: c_double,
    pub StepTime: c_int,
    pub UseRegionDetector: u8,
    pub FirstXChannel: c_int,
    pub LastXChannel: c_int,
    pub FirstYChannel: c_int,
    pub LastYChannel: c_int,
    pub Slices: c_int,
    pub ADCMode: c_char,
    pub ADCMask: c_int,
    pub DiscLvl: c_int,
    pub LensMode: Char32,
    pub PassEnergy: c_double,
    pub DriftRegion: u8,
    pub Grating: c_int,
    pub Order: c_int,
    pub Illumination: c_double,
    pub Slit: c_double,
}

impl Default for WRegion {
    fn default() -> Self {
        WRegion {
            Name: [0; 32],
            ExcEnergy: 0.0,
            Kinetic: 1,
            Fixed: 1,
            HighEnergy: 0.0,
            LowEnergy: 0.0,
            FixEnergy: 0.0,
            EnergyStep: 0.0,
            StepTime: 0,
            UseRegionDetector: 1,
            FirstXChannel: 0,
            LastXChannel: 0,
            FirstYChannel: 0,
            LastYChannel: 0,
            Slices: 0,
            ADCMode: 1,
            ADCMask: 0,
            DiscLvl: 0,
            LensMode: [0; 32],
            PassEnergy: 0.0,
            DriftRegion: 0,
            Grating: 0,
            Order: 0,
            Illumination: 0.0,
            Slit: 0.0,
        }
    }
}

/// Spectrum buffers owned by the library. `Data` holds `Slices` rows of
/// `Channels` values each.
#[repr(C)]
pub struct WSpectrum {
    pub Channels: c_int,
    pub Slices: c_int,
    pub Sweeps: c_int,
    pub CountUnit: Char32,
    pub ChannelUnit: Char32,
    pub SliceUnit: Char32,
    pub ChannelScale: Vector,
    pub SliceScale: Vector,
    pub Data: Matrix,
    pub SumData: Vector,
}

/// External I/O buffers owned by the library. `Data` holds `Count` rows of
/// `Steps` values each.
#[repr(C)]
pub struct WSignals {
    pub Count: c_int,
    pub Steps: c_int,
    pub Sweeps: c_int,
    pub StepsUnit: Char32,
    pub StepsScale: Vector,
    pub Names: *mut Char32,
    pub Data: Matrix,
}

// Entry points, all `__stdcall` on the platforms the library exists for.

pub type GDS_GetLastError = unsafe extern "system" fn() -> c_int;
pub type GDS_GetLastErrorString = unsafe extern "system" fn() -> *const c_char;
pub type GDS_Initialize = unsafe extern "system" fn(Option<ErrorNotify>, *mut c_void) -> c_int;
pub type GDS_Finalize = unsafe extern "system" fn() -> c_int;
pub type GDS_LoadInstrument = unsafe extern "system" fn(*const c_char) -> c_int;
pub type GDS_ResetInstrument = unsafe extern "system" fn() -> c_int;
pub type GDS_ZeroSupplies = unsafe extern "system" fn() -> c_int;
pub type GDS_TestCommunication = unsafe extern "system" fn() -> c_int;
pub type GDS_GetOption = unsafe extern "system" fn(c_int, *mut c_void) -> c_int;
pub type GDS_SetOption = unsafe extern "system" fn(c_int, *const c_void) -> c_int;
pub type GDS_GetInstrumentInfo = unsafe extern "system" fn(*mut WInstrumentInfo) -> c_int;
pub type GDS_GetDetectorInfo = unsafe extern "system" fn(*mut WDetectorInfo) -> c_int;
pub type GDS_GetList = unsafe extern "system" fn(*mut c_char, *mut c_int) -> c_int;
pub type GDS_GetPassEnergies =
    unsafe extern "system" fn(*const c_char, *mut c_char, *mut c_int) -> c_int;
pub type GDS_GetDouble = unsafe extern "system" fn(*mut c_double) -> c_int;
pub type GDS_SetDouble = unsafe extern "system" fn(c_double) -> c_int;
pub type GDS_SetString = unsafe extern "system" fn(*const c_char) -> c_int;
pub type GDS_GetGlobalDetector = unsafe extern "system" fn(*mut WDetector) -> c_int;
pub type GDS_SetGlobalDetector = unsafe extern "system" fn(*const WDetector) -> c_int;
pub type GDS_GetElement = unsafe extern "system" fn(*const c_char, *mut c_double) -> c_int;
pub type GDS_SetElement = unsafe extern "system" fn(*const c_char, c_double) -> c_int;
pub type GDS_CheckRegion =
    unsafe extern "system" fn(*mut WRegion, *mut c_int, *mut c_double, *mut c_double) -> c_int;
pub type GDS_Stop = unsafe extern "system" fn() -> c_int;
pub type GDS_GetStatus = unsafe extern "system" fn(*mut c_int) -> c_int;
pub type GDS_UseFlag = unsafe extern "system" fn(u8) -> c_int;
pub type GDS_GetCurrSpectrum = unsafe extern "system" fn(*mut *mut WSpectrum) -> c_int;
pub type GDS_GetCurrSignals = unsafe extern "system" fn(*mut *mut WSignals) -> c_int;
pub type GDS_GetRawImage =
    unsafe extern "system" fn(*mut c_uchar, *mut c_int, *mut c_int, *mut c_int) -> c_int;
pub type GDS_InitAcquisition = unsafe extern "system" fn(
    *mut WRegion,
    *mut *mut WSpectrum,
    *mut *mut WSignals,
    *const c_char,
    Option<PointReady>,
    Option<RegionReady>,
) -> c_int;
pub type GDS_StartAcquisition = unsafe extern "system" fn(c_int) -> c_int;

#[test]
fn test_region_defaults() {
    let region = WRegion::default();
    assert_eq!(region.Kinetic, 1);
    assert_eq!(region.Fixed, 1);
    assert_eq!(region.UseRegionDetector, 1);
    assert_eq!(region.ADCMode, 1);
    assert_eq!(region.DriftRegion, 0);
    assert_eq!(WDetector::default().ADCMode, 1);
}
