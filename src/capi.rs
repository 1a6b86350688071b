// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Flat C interface for host environments such as LabVIEW.
//!
//! Every function takes the handle returned by [`WRP_Open`] and returns an
//! error code, 0 on success. Getters that take a `size` pointer report the
//! full size of the value there; passing a null value pointer only queries
//! that size. Strings are truncated to the buffer and always terminated.

#![allow(non_snake_case)]
#![allow(clippy::missing_safety_doc)]

use crate::convert::{c_array_to_string, flag, unflag};
use crate::types::*;
use crate::wrapper::SesWrapper;
use libc::{c_char, c_double, c_int};
use log::*;
use parking_lot::RwLock;
use std::{ptr, slice, time::Duration};

/// Opaque handle owning one wrapper.
///
/// Calls that block on the acquisition take a shared lock, and stop and
/// continue take theirs even while a writer is queued, so they always get
/// through to a blocked wait.
pub struct WrpHandle {
    wrapper: RwLock<SesWrapper>,
}

impl WrpHandle {
    pub fn new(wrapper: SesWrapper) -> Self {
        WrpHandle {
            wrapper: RwLock::new(wrapper),
        }
    }

    /// Move the handle to the heap for use through the C interface.
    pub fn into_raw(self) -> *mut WrpHandle {
        Box::into_raw(Box::new(self))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct WrpDetectorInfo {
    pub timer_controlled: u8,
    pub x_channels: c_int,
    pub y_channels: c_int,
    pub max_slices: c_int,
    pub max_channels: c_int,
    pub frame_rate: c_int,
    pub adc_present: u8,
    pub disc_present: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct WrpDetectorRegion {
    pub first_x_channel: c_int,
    pub last_x_channel: c_int,
    pub first_y_channel: c_int,
    pub last_y_channel: c_int,
    pub slices: c_int,
    pub adc_mode: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct WrpAnalyzerRegion {
    pub fixed: u8,
    pub high_energy: c_double,
    pub low_energy: c_double,
    pub center_energy: c_double,
    pub energy_step: c_double,
    pub dwell_time: c_int,
}

impl From<DetectorInfo> for WrpDetectorInfo {
    fn from(i: DetectorInfo) -> Self {
        WrpDetectorInfo {
            timer_controlled: flag(i.timer_controlled),
            x_channels: i.x_channels,
            y_channels: i.y_channels,
            max_slices: i.max_slices,
            max_channels: i.max_channels,
            frame_rate: i.frame_rate,
            adc_present: flag(i.adc_present),
            disc_present: flag(i.disc_present),
        }
    }
}

impl From<DetectorRegion> for WrpDetectorRegion {
    fn from(r: DetectorRegion) -> Self {
        WrpDetectorRegion {
            first_x_channel: r.first_x_channel,
            last_x_channel: r.last_x_channel,
            first_y_channel: r.first_y_channel,
            last_y_channel: r.last_y_channel,
            slices: r.slices,
            adc_mode: flag(r.adc_mode),
        }
    }
}

impl From<&WrpDetectorRegion> for DetectorRegion {
    fn from(r: &WrpDetectorRegion) -> Self {
        DetectorRegion::new(
            r.first_x_channel,
            r.last_x_channel,
            r.first_y_channel,
            r.last_y_channel,
            r.slices,
            unflag(r.adc_mode),
        )
    }
}

impl From<AnalyzerRegion> for WrpAnalyzerRegion {
    fn from(r: AnalyzerRegion) -> Self {
        WrpAnalyzerRegion {
            fixed: flag(r.fixed),
            high_energy: r.high_energy,
            low_energy: r.low_energy,
            center_energy: r.center_energy,
            energy_step: r.energy_step,
            dwell_time: r.dwell_time,
        }
    }
}

impl From<&WrpAnalyzerRegion> for AnalyzerRegion {
    fn from(r: &WrpAnalyzerRegion) -> Self {
        AnalyzerRegion::new(
            unflag(r.fixed),
            r.high_energy,
            r.low_energy,
            r.center_energy,
            r.energy_step,
            r.dwell_time,
        )
    }
}

fn code(res: Result<()>) -> c_int {
    code_of(&res)
}

unsafe fn handle<'a>(h: *mut WrpHandle) -> Result<&'a WrpHandle> {
    h.as_ref().ok_or(Error::NotInitialized)
}

unsafe fn name(s: *const c_char) -> Result<String> {
    if s.is_null() {
        return Err(Error::Fail);
    }
    Ok(c_array_to_string(s))
}

unsafe fn store<T>(out: *mut T, value: T) {
    if !out.is_null() {
        *out = value;
    }
}

unsafe fn read<T: Copy>(input: *const T) -> Result<T> {
    input.as_ref().copied().ok_or(Error::Fail)
}

/// Copy `value` into the caller's buffer, honoring the size protocol.
unsafe fn put_value(value: &Value, out: *mut libc::c_void, size: *mut c_int) -> Result<()> {
    let len = value.size();
    match value {
        Value::String(s) => {
            if !out.is_null() {
                let cap = if size.is_null() { 0 } else { (*size).max(0) as usize };
                if cap > 0 {
                    let n = s.len().min(cap - 1);
                    ptr::copy_nonoverlapping(s.as_ptr(), out as *mut u8, n);
                    *(out as *mut u8).add(n) = 0;
                }
            }
        }
        Value::VectorInt32(v) => put_slice(v, out as *mut i32, size),
        Value::VectorDouble(v) => put_slice(v, out as *mut f64, size),
        Value::Bool(b) => store(out as *mut u8, flag(*b)),
        Value::Int32(i) => store(out as *mut c_int, *i),
        Value::Double(d) => store(out as *mut c_double, *d),
        Value::DetectorInfo(i) => store(out as *mut WrpDetectorInfo, (*i).into()),
        Value::DetectorRegion(r) => store(out as *mut WrpDetectorRegion, (*r).into()),
        Value::AnalyzerRegion(r) => store(out as *mut WrpAnalyzerRegion, (*r).into()),
    }
    store(size, len as c_int);
    Ok(())
}

unsafe fn put_slice<T: Copy>(v: &[T], out: *mut T, size: *const c_int) {
    if out.is_null() || size.is_null() {
        return;
    }
    let n = v.len().min((*size).max(0) as usize);
    slice::from_raw_parts_mut(out, n).copy_from_slice(&v[..n]);
}

/// Fetch a value, refusing it unless it has the type the caller expects.
fn typed(value: Result<Value>, expected: ValueType) -> Result<Value> {
    let value = value?;
    if value.value_type() != expected {
        return Err(Error::NotApplicable);
    }
    Ok(value)
}

unsafe fn get_property(
    h: *mut WrpHandle,
    property: *const c_char,
    index: c_int,
    expected: ValueType,
    out: *mut libc::c_void,
    size: *mut c_int,
) -> c_int {
    code((|| {
        let h = handle(h)?;
        let name = name(property)?;
        let value = typed(h.wrapper.read().get_property(&name, index), expected)?;
        put_value(&value, out, size)
    })())
}

unsafe fn set_property(
    h: *mut WrpHandle,
    property: *const c_char,
    index: c_int,
    value: Result<Value>,
) -> c_int {
    code((|| {
        let h = handle(h)?;
        let name = name(property)?;
        h.wrapper.write().set_property(&name, index, &value?)
    })())
}

unsafe fn get_data(
    h: *mut WrpHandle,
    parameter: *const c_char,
    index: c_int,
    expected: ValueType,
    out: *mut libc::c_void,
    size: *mut c_int,
) -> c_int {
    code((|| {
        let h = handle(h)?;
        let name = name(parameter)?;
        let value = typed(h.wrapper.read().get_acquired_data(&name, index), expected)?;
        put_value(&value, out, size)
    })())
}

/// A negative timeout waits without limit.
fn timeout(ms: c_int) -> Option<Duration> {
    if ms < 0 {
        None
    } else {
        Some(Duration::from_millis(ms as u64))
    }
}

/// Create a wrapper. Null arguments select the current directory and the
/// default library location. Returns null if the wrapper cannot be set up.
#[no_mangle]
pub unsafe extern "C" fn WRP_Open(
    working_dir: *const c_char,
    library_path: *const c_char,
) -> *mut WrpHandle {
    let mut builder = SesWrapper::builder();
    if !working_dir.is_null() {
        builder = builder.working_dir(c_array_to_string(working_dir));
    }
    if !library_path.is_null() {
        builder = builder.library_path(c_array_to_string(library_path));
    }
    match builder.build() {
        Ok(wrapper) => WrpHandle::new(wrapper).into_raw(),
        Err(e) => {
            error!("WRP_Open: {}", e);
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn WRP_Close(h: *mut WrpHandle) {
    if !h.is_null() {
        drop(Box::from_raw(h));
    }
}

#[no_mangle]
pub unsafe extern "C" fn WRP_Initialize(h: *mut WrpHandle) -> c_int {
    code(handle(h).and_then(|h| h.wrapper.write().initialize()))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_Finalize(h: *mut WrpHandle) -> c_int {
    code(handle(h).and_then(|h| h.wrapper.write().finalize()))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetPropertyBool(
    h: *mut WrpHandle,
    property: *const c_char,
    index: c_int,
    value: *mut u8,
    size: *mut c_int,
) -> c_int {
    get_property(h, property, index, ValueType::Bool, value as _, size)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetPropertyInteger(
    h: *mut WrpHandle,
    property: *const c_char,
    index: c_int,
    value: *mut c_int,
    size: *mut c_int,
) -> c_int {
    get_property(h, property, index, ValueType::Int32, value as _, size)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetPropertyDouble(
    h: *mut WrpHandle,
    property: *const c_char,
    index: c_int,
    value: *mut c_double,
    size: *mut c_int,
) -> c_int {
    get_property(h, property, index, ValueType::Double, value as _, size)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetPropertyString(
    h: *mut WrpHandle,
    property: *const c_char,
    index: c_int,
    value: *mut c_char,
    size: *mut c_int,
) -> c_int {
    get_property(h, property, index, ValueType::String, value as _, size)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetDetectorInfo(h: *mut WrpHandle, value: *mut WrpDetectorInfo) -> c_int {
    let name = b"detector_info\0";
    get_property(h, name.as_ptr() as _, -1, ValueType::DetectorInfo, value as _, ptr::null_mut())
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetDetectorRegion(
    h: *mut WrpHandle,
    value: *mut WrpDetectorRegion,
) -> c_int {
    let name = b"detector_region\0";
    get_property(h, name.as_ptr() as _, -1, ValueType::DetectorRegion, value as _, ptr::null_mut())
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetAnalyzerRegion(
    h: *mut WrpHandle,
    value: *mut WrpAnalyzerRegion,
) -> c_int {
    let name = b"analyzer_region\0";
    get_property(h, name.as_ptr() as _, -1, ValueType::AnalyzerRegion, value as _, ptr::null_mut())
}

#[no_mangle]
pub unsafe extern "C" fn WRP_SetPropertyBool(
    h: *mut WrpHandle,
    property: *const c_char,
    index: c_int,
    value: *const u8,
) -> c_int {
    set_property(h, property, index, read(value).map(|b| Value::Bool(unflag(b))))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_SetPropertyInteger(
    h: *mut WrpHandle,
    property: *const c_char,
    index: c_int,
    value: *const c_int,
) -> c_int {
    set_property(h, property, index, read(value).map(Value::Int32))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_SetPropertyDouble(
    h: *mut WrpHandle,
    property: *const c_char,
    index: c_int,
    value: *const c_double,
) -> c_int {
    set_property(h, property, index, read(value).map(Value::Double))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_SetPropertyString(
    h: *mut WrpHandle,
    property: *const c_char,
    index: c_int,
    value: *const c_char,
) -> c_int {
    set_property(h, property, index, name(value).map(Value::String))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_SetDetectorRegion(
    h: *mut WrpHandle,
    value: *const WrpDetectorRegion,
) -> c_int {
    let region = value.as_ref().map(|r| Value::DetectorRegion(r.into()));
    set_property(h, b"detector_region\0".as_ptr() as _, -1, region.ok_or(Error::Fail))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_SetAnalyzerRegion(
    h: *mut WrpHandle,
    value: *const WrpAnalyzerRegion,
) -> c_int {
    let region = value.as_ref().map(|r| Value::AnalyzerRegion(r.into()));
    set_property(h, b"analyzer_region\0".as_ptr() as _, -1, region.ok_or(Error::Fail))
}

/// Type code of a property or data parameter, or `ParameterNotFound`.
#[no_mangle]
pub unsafe extern "C" fn WRP_GetParameterType(h: *mut WrpHandle, parameter: *const c_char) -> c_int {
    let res = (|| {
        let h = handle(h)?;
        let name = name(parameter)?;
        h.wrapper
            .read()
            .parameter_type(&name)
            .ok_or(Error::ParameterNotFound)
    })();
    match res {
        Ok(ty) => ty as c_int,
        Err(e) => e.code(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn WRP_Validate(
    h: *mut WrpHandle,
    element_set: *const c_char,
    lens_mode: *const c_char,
    pass_energy: c_double,
    kinetic_energy: c_double,
) -> c_int {
    code((|| {
        let h = handle(h)?;
        let (set, mode) = (name(element_set)?, name(lens_mode)?);
        h.wrapper
            .read()
            .validate(&set, &mode, pass_energy, kinetic_energy)
    })())
}

#[no_mangle]
pub unsafe extern "C" fn WRP_ResetHW(h: *mut WrpHandle) -> c_int {
    code(handle(h).and_then(|h| h.wrapper.read().reset_hw()))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_TestHW(h: *mut WrpHandle) -> c_int {
    code(handle(h).and_then(|h| h.wrapper.read().test_hw()))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_LoadInstrument(h: *mut WrpHandle, file: *const c_char) -> c_int {
    code((|| {
        let h = handle(h)?;
        let file = name(file)?;
        h.wrapper.write().load_instrument(&file)
    })())
}

#[no_mangle]
pub unsafe extern "C" fn WRP_ZeroSupplies(h: *mut WrpHandle) -> c_int {
    code(handle(h).and_then(|h| h.wrapper.read().zero_supplies()))
}

unsafe fn get_energy(h: *mut WrpHandle, kind: Energy, out: *mut c_double) -> c_int {
    code((|| {
        let h = handle(h)?;
        let value = h.wrapper.read().energy(kind)?;
        store(out, value);
        Ok(())
    })())
}

unsafe fn set_energy(h: *mut WrpHandle, kind: Energy, value: c_double) -> c_int {
    code(handle(h).and_then(|h| h.wrapper.read().set_energy(kind, value)))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetKineticEnergy(h: *mut WrpHandle, energy: *mut c_double) -> c_int {
    get_energy(h, Energy::Kinetic, energy)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_SetKineticEnergy(h: *mut WrpHandle, energy: c_double) -> c_int {
    set_energy(h, Energy::Kinetic, energy)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetBindingEnergy(h: *mut WrpHandle, energy: *mut c_double) -> c_int {
    get_energy(h, Energy::Binding, energy)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_SetBindingEnergy(h: *mut WrpHandle, energy: c_double) -> c_int {
    set_energy(h, Energy::Binding, energy)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetExcitationEnergy(h: *mut WrpHandle, energy: *mut c_double) -> c_int {
    get_energy(h, Energy::Excitation, energy)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_SetExcitationEnergy(h: *mut WrpHandle, energy: c_double) -> c_int {
    set_energy(h, Energy::Excitation, energy)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetElementVoltage(
    h: *mut WrpHandle,
    element: *const c_char,
    voltage: *mut c_double,
) -> c_int {
    code((|| {
        let h = handle(h)?;
        let element = name(element)?;
        let value = h.wrapper.read().element_voltage(&element)?;
        store(voltage, value);
        Ok(())
    })())
}

#[no_mangle]
pub unsafe extern "C" fn WRP_SetElementVoltage(
    h: *mut WrpHandle,
    element: *const c_char,
    voltage: c_double,
) -> c_int {
    code((|| {
        let h = handle(h)?;
        let element = name(element)?;
        h.wrapper.read().set_element_voltage(&element, voltage)
    })())
}

/// Check the stored analyzer region and write the adjusted version to
/// `region`. Nothing is read from `region`.
#[no_mangle]
pub unsafe extern "C" fn WRP_CheckAnalyzerRegion(
    h: *mut WrpHandle,
    region: *mut WrpAnalyzerRegion,
    steps: *mut c_int,
    time_ms: *mut c_double,
    energy_step: *mut c_double,
) -> c_int {
    code((|| {
        let h = handle(h)?;
        let (adjusted, check) = h.wrapper.write().check_analyzer_region()?;
        store(region, adjusted.into());
        store(steps, check.steps);
        store(time_ms, check.time_ms);
        store(energy_step, check.min_energy_step);
        Ok(())
    })())
}

#[no_mangle]
pub unsafe extern "C" fn WRP_InitAcquisition(
    h: *mut WrpHandle,
    block_point_ready: u8,
    block_region_ready: u8,
) -> c_int {
    code(handle(h).and_then(|h| {
        h.wrapper
            .write()
            .init_acquisition(unflag(block_point_ready), unflag(block_region_ready))
    }))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_StartAcquisition(h: *mut WrpHandle) -> c_int {
    code(handle(h).and_then(|h| h.wrapper.read().start_acquisition()))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_StopAcquisition(h: *mut WrpHandle) -> c_int {
    code(handle(h).and_then(|h| h.wrapper.read_recursive().stop_acquisition()))
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetStatus(h: *mut WrpHandle, status: *mut c_int) -> c_int {
    let name = b"instrument_status\0";
    get_property(h, name.as_ptr() as _, -1, ValueType::Int32, status as _, ptr::null_mut())
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetAcquiredDataInteger(
    h: *mut WrpHandle,
    parameter: *const c_char,
    index: c_int,
    data: *mut c_int,
    size: *mut c_int,
) -> c_int {
    get_data(h, parameter, index, ValueType::Int32, data as _, size)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetAcquiredDataDouble(
    h: *mut WrpHandle,
    parameter: *const c_char,
    index: c_int,
    data: *mut c_double,
    size: *mut c_int,
) -> c_int {
    get_data(h, parameter, index, ValueType::Double, data as _, size)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetAcquiredDataString(
    h: *mut WrpHandle,
    parameter: *const c_char,
    index: c_int,
    data: *mut c_char,
    size: *mut c_int,
) -> c_int {
    get_data(h, parameter, index, ValueType::String, data as _, size)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetAcquiredDataVectorDouble(
    h: *mut WrpHandle,
    parameter: *const c_char,
    index: c_int,
    data: *mut c_double,
    size: *mut c_int,
) -> c_int {
    get_data(h, parameter, index, ValueType::VectorDouble, data as _, size)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_GetAcquiredDataVectorInt32(
    h: *mut WrpHandle,
    parameter: *const c_char,
    index: c_int,
    data: *mut c_int,
    size: *mut c_int,
) -> c_int {
    get_data(h, parameter, index, ValueType::VectorInt32, data as _, size)
}

#[no_mangle]
pub unsafe extern "C" fn WRP_WaitForPointReady(h: *mut WrpHandle, timeout_ms: c_int) -> c_int {
    match handle(h).and_then(|h| h.wrapper.read_recursive().wait_for_point_ready(timeout(timeout_ms))) {
        Ok(wait) => wait.code(),
        Err(e) => e.code(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn WRP_WaitForRegionReady(h: *mut WrpHandle, timeout_ms: c_int) -> c_int {
    match handle(h).and_then(|h| h.wrapper.read_recursive().wait_for_region_ready(timeout(timeout_ms))) {
        Ok(wait) => wait.code(),
        Err(e) => e.code(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn WRP_ContinueAcquisition(h: *mut WrpHandle) -> c_int {
    code(handle(h).and_then(|h| h.wrapper.read_recursive().continue_acquisition()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedInstrument;
    use std::ffi::CString;

    fn open() -> *mut WrpHandle {
        open_with(SimulatedInstrument::new())
    }

    fn open_with(sim: SimulatedInstrument) -> *mut WrpHandle {
        let wrapper = SesWrapper::builder()
            .working_dir("/tmp")
            .instrument(Box::new(sim))
            .build()
            .unwrap();
        WrpHandle::new(wrapper).into_raw()
    }

    /// A handle with the instrument loaded and a swept region of `steps`
    /// points set.
    unsafe fn open_loaded(sim: SimulatedInstrument, steps: i32) -> *mut WrpHandle {
        let h = open_with(sim);
        let file = cs("R4000.dat");
        assert_eq!(WRP_Initialize(h), 0);
        assert_eq!(WRP_LoadInstrument(h, file.as_ptr()), 0);
        let region = WrpAnalyzerRegion {
            fixed: 0,
            low_energy: 10.0,
            high_energy: 10.0 + 0.5 * f64::from(steps - 1),
            center_energy: 0.0,
            energy_step: 0.5,
            dwell_time: 1,
        };
        assert_eq!(WRP_SetAnalyzerRegion(h, &region), 0);
        h
    }

    fn cs(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    #[test]
    fn test_string_size_query() {
        let h = open();
        let prop = cs("lib_description");
        unsafe {
            let mut size = 0;
            let res = WRP_GetPropertyString(h, prop.as_ptr(), -1, ptr::null_mut(), &mut size);
            assert_eq!(res, 0);
            assert_eq!(size, 10);

            let mut buf = [0x55 as c_char; 5];
            size = 5;
            let res = WRP_GetPropertyString(h, prop.as_ptr(), -1, buf.as_mut_ptr(), &mut size);
            assert_eq!(res, 0);
            assert_eq!(size, 10);
            assert_eq!(c_array_to_string(buf.as_ptr()), "SESW");
            WRP_Close(h);
        }
    }

    #[test]
    fn test_type_mismatch() {
        let h = open();
        let prop = cs("lib_description");
        unsafe {
            let mut value = 0;
            let res = WRP_GetPropertyInteger(h, prop.as_ptr(), -1, &mut value, ptr::null_mut());
            assert_eq!(res, Error::NotApplicable.code());
            let unknown = cs("no_such_property");
            let res = WRP_GetPropertyInteger(h, unknown.as_ptr(), -1, &mut value, ptr::null_mut());
            assert_eq!(res, Error::ParameterNotFound.code());
            assert_eq!(WRP_GetParameterType(h, unknown.as_ptr()), Error::ParameterNotFound.code());
            assert_eq!(WRP_GetParameterType(h, prop.as_ptr()), ValueType::String as c_int);
            WRP_Close(h);
        }
    }

    #[test]
    fn test_bool_roundtrip() {
        let h = open();
        let prop = cs("use_binding_energy");
        unsafe {
            assert_eq!(WRP_SetPropertyBool(h, prop.as_ptr(), -1, &1), 0);
            let mut value = 0u8;
            assert_eq!(WRP_GetPropertyBool(h, prop.as_ptr(), -1, &mut value, ptr::null_mut()), 0);
            assert_eq!(value, 1);
            WRP_Close(h);
        }
    }

    #[test]
    fn test_without_instrument() {
        let h = open();
        unsafe {
            let mut info = WrpDetectorInfo::default();
            assert_eq!(WRP_GetDetectorInfo(h, &mut info), Error::NoInstrument.code());
            assert_eq!(WRP_WaitForRegionReady(h, 10), Error::NoInstrument.code());
            assert_eq!(WRP_StartAcquisition(h), Error::NoInstrument.code());
            assert_eq!(WRP_Initialize(ptr::null_mut()), Error::NotInitialized.code());
            let mut status = 0;
            assert_eq!(WRP_GetStatus(h, &mut status), 0);
            assert_eq!(status, InstrumentStatus::NotInitialized.raw());
            WRP_Close(h);
        }
    }

    #[test]
    fn test_negative_timeout_waits_for_region() {
        unsafe {
            let sim = SimulatedInstrument::new().with_step_delay(Duration::from_millis(50));
            let h = open_loaded(sim, 10);
            assert_eq!(WRP_InitAcquisition(h, 0, 0), 0);
            assert_eq!(WRP_StartAcquisition(h), 0);
            assert_eq!(WRP_WaitForRegionReady(h, 0), Wait::TimedOut.code());
            assert_eq!(WRP_WaitForRegionReady(h, -1), 0);
            let iterations = cs("acq_iterations");
            let mut value = 0;
            let res = WRP_GetAcquiredDataInteger(h, iterations.as_ptr(), -1, &mut value, ptr::null_mut());
            assert_eq!(res, 0);
            assert_eq!(value, 1);
            // idle again, so even an unbounded wait returns at once
            assert_eq!(WRP_WaitForPointReady(h, -1), 0);
            WRP_Close(h);
        }
    }

    #[test]
    fn test_check_region_only_writes() {
        unsafe {
            let h = open_loaded(SimulatedInstrument::new(), 5);
            let mut out = WrpAnalyzerRegion::default();
            let (mut steps, mut time_ms, mut step) = (0, 0.0, 0.0);
            let res = WRP_CheckAnalyzerRegion(h, &mut out, &mut steps, &mut time_ms, &mut step);
            assert_eq!(res, 0);
            assert_eq!(steps, 5);
            assert_eq!(out.low_energy, 10.0);
            assert_eq!(out.high_energy, 12.0);
            assert_eq!(out.energy_step, 0.5);

            let mut stored = WrpAnalyzerRegion::default();
            assert_eq!(WRP_GetAnalyzerRegion(h, &mut stored), 0);
            assert_eq!(stored.high_energy, 12.0);
            assert_eq!(stored.dwell_time, 1);
            assert_eq!(
                WRP_CheckAnalyzerRegion(h, ptr::null_mut(), ptr::null_mut(), ptr::null_mut(), ptr::null_mut()),
                0
            );
            WRP_Close(h);
        }
    }
}
