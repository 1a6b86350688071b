// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Translation between the wrapper's types and the library's raw layouts.

use crate::ses;
use crate::types::{Detector, DetectorInfo, Region, Signals, Spectrum};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::slice;

/// Copy `input` into a fixed size, NUL terminated C string. Input that
/// does not fit is truncated to `N - 1` bytes.
pub(crate) fn string_to_c_array<const N: usize>(input: &str) -> [c_char; N] {
    let mut out = [0 as c_char; N];
    input
        .as_bytes()
        .iter()
        .take(N.saturating_sub(1))
        .zip(&mut out)
        .for_each(|(i, r)| *r = *i as _);
    out
}

#[test]
fn test_string_to_c_array() {
    let cmp = |s: &str, chars: &[c_char]| {
        let arr: Vec<c_char> = s.as_bytes().iter().map(|c| *c as c_char).collect();
        assert_eq!(chars[0..arr.len()], arr[..]);
        assert!(chars[arr.len()..].iter().all(|c| *c == 0));
    };

    let name = "Transmission";
    let chars = string_to_c_array::<32>(name);
    cmp(name, &chars);

    let name = "\u{2665}\u{1F494};";
    let chars = string_to_c_array::<32>(name);
    cmp(name, &chars);

    let name = "a region name that is just too long so we'll see what happens";
    let chars = string_to_c_array::<32>(name);
    cmp(&name[..31], &chars);
    assert_eq!(chars[31], 0);
}

/// Read a NUL terminated C string. A null pointer reads as empty.
pub(crate) fn c_array_to_string(data: *const c_char) -> String {
    if data.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(data).to_string_lossy().into_owned() }
}

/// Read a fixed size C string that may lack the terminator.
pub(crate) fn c_buf_to_string(data: &[c_char]) -> String {
    let bytes: Vec<u8> = data
        .iter()
        .take_while(|c| **c != 0)
        .map(|c| *c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[test]
fn test_c_array_to_string() {
    let arr: [c_char; 64] = [0; 64];
    assert_eq!(c_array_to_string(arr.as_ptr()), "");
    assert_eq!(c_array_to_string(std::ptr::null()), "");

    let mut arr: [c_char; 64] = [0; 64];
    [80_u8, 114, 111, 100, 117, 99, 116, 32, 99, 111, 100, 101]
        .iter()
        .enumerate()
        .for_each(|(idx, v)| {
            arr[idx] = *v as c_char;
        });
    assert_eq!(c_array_to_string(arr.as_ptr()), "Product code");

    let full = [65 as c_char; 4];
    assert_eq!(c_buf_to_string(&full), "AAAA");
}

/// Decode a length prefixed string as the library stores the instrument
/// model and serial number: the first byte holds the length.
pub(crate) fn pascal_to_string(data: &[c_char]) -> String {
    match data.split_first() {
        None => String::new(),
        Some((len, rest)) => {
            let len = (*len as u8 as usize).min(rest.len());
            let bytes: Vec<u8> = rest[..len].iter().map(|c| *c as u8).collect();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }
}

#[test]
fn test_pascal_to_string() {
    let mut arr = [0 as c_char; 16];
    arr[0] = 6;
    for (i, b) in b"R4000xyz".iter().enumerate() {
        arr[i + 1] = *b as c_char;
    }
    assert_eq!(pascal_to_string(&arr), "R4000x");
    arr[0] = 100;
    assert_eq!(pascal_to_string(&arr).len(), 15);
    assert_eq!(pascal_to_string(&[]), "");
}

/// Split a list in the library's format, quoted items separated by
/// whitespace: `"Low Pass" "High Pass"`. Unquoted tokens are accepted too.
pub fn split_ses_list(list: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut chars = list.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() || c == '\0' {
            chars.next();
        } else if c == '"' {
            chars.next();
            let item: String = chars.by_ref().take_while(|c| *c != '"').collect();
            items.push(item);
        } else {
            let mut item = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '"' || c == '\0' {
                    break;
                }
                item.push(c);
                chars.next();
            }
            items.push(item);
        }
    }
    items
}

#[test]
fn test_split_ses_list() {
    assert_eq!(
        split_ses_list(r#""Transmission" "Angular45" "Angular30""#),
        vec!["Transmission", "Angular45", "Angular30"]
    );
    assert_eq!(split_ses_list(r#""High Pass"  "Low""#), vec!["High Pass", "Low"]);
    assert_eq!(split_ses_list("2 5 10 20"), vec!["2", "5", "10", "20"]);
    assert!(split_ses_list("   ").is_empty());
    assert_eq!(split_ses_list(r#""unterminated"#), vec!["unterminated"]);
}

pub(crate) fn flag(b: bool) -> u8 {
    b as u8
}

pub(crate) fn unflag(b: u8) -> bool {
    b != 0
}

pub(crate) fn detector_info_from_raw(raw: &ses::WDetectorInfo) -> DetectorInfo {
    DetectorInfo {
        timer_controlled: unflag(raw.TimerControlled),
        x_channels: raw.XChannels,
        y_channels: raw.YChannels,
        max_slices: raw.MaxSlices,
        max_channels: raw.MaxChannels,
        frame_rate: raw.FramesPerSec,
        adc_present: unflag(raw.ADCPresent),
        disc_present: unflag(raw.DiscPresent),
    }
}

pub(crate) fn detector_from_raw(raw: &ses::WDetector) -> Detector {
    Detector {
        first_x_channel: raw.FirstXChannel,
        last_x_channel: raw.LastXChannel,
        first_y_channel: raw.FirstYChannel,
        last_y_channel: raw.LastYChannel,
        slices: raw.Slices,
        adc_mode: raw.ADCMode != 0,
        adc_mask: raw.ADCMask,
        disc_level: raw.DiscLvl,
    }
}

pub(crate) fn detector_to_raw(det: &Detector) -> ses::WDetector {
    ses::WDetector {
        FirstXChannel: det.first_x_channel,
        LastXChannel: det.last_x_channel,
        FirstYChannel: det.first_y_channel,
        LastYChannel: det.last_y_channel,
        Slices: det.slices,
        ADCMode: det.adc_mode as c_char,
        ADCMask: det.adc_mask,
        DiscLvl: det.disc_level,
    }
}

pub(crate) fn region_to_raw(region: &Region) -> ses::WRegion {
    let det = &region.detector;
    ses::WRegion {
        Name: string_to_c_array(&region.name),
        ExcEnergy: region.excitation_energy,
        Kinetic: flag(region.kinetic),
        Fixed: flag(region.fixed),
        HighEnergy: region.high_energy,
        LowEnergy: region.low_energy,
        FixEnergy: region.fix_energy,
        EnergyStep: region.energy_step,
        StepTime: region.step_time,
        UseRegionDetector: flag(region.use_region_detector),
        FirstXChannel: det.first_x_channel,
        LastXChannel: det.last_x_channel,
        FirstYChannel: det.first_y_channel,
        LastYChannel: det.last_y_channel,
        Slices: det.slices,
        ADCMode: det.adc_mode as c_char,
        ADCMask: det.adc_mask,
        DiscLvl: det.disc_level,
        LensMode: string_to_c_array(&region.lens_mode),
        PassEnergy: region.pass_energy,
        DriftRegion: flag(region.drift_region),
        Grating: region.grating,
        Order: region.order,
        Illumination: region.illumination,
        Slit: region.slit,
    }
}

pub(crate) fn region_from_raw(raw: &ses::WRegion) -> Region {
    Region {
        name: c_buf_to_string(&raw.Name),
        excitation_energy: raw.ExcEnergy,
        kinetic: unflag(raw.Kinetic),
        fixed: unflag(raw.Fixed),
        high_energy: raw.HighEnergy,
        low_energy: raw.LowEnergy,
        fix_energy: raw.FixEnergy,
        energy_step: raw.EnergyStep,
        step_time: raw.StepTime,
        use_region_detector: unflag(raw.UseRegionDetector),
        detector: Detector {
            first_x_channel: raw.FirstXChannel,
            last_x_channel: raw.LastXChannel,
            first_y_channel: raw.FirstYChannel,
            last_y_channel: raw.LastYChannel,
            slices: raw.Slices,
            adc_mode: raw.ADCMode != 0,
            adc_mask: raw.ADCMask,
            disc_level: raw.DiscLvl,
        },
        lens_mode: c_buf_to_string(&raw.LensMode),
        pass_energy: raw.PassEnergy,
        drift_region: unflag(raw.DriftRegion),
        grating: raw.Grating,
        order: raw.Order,
        illumination: raw.Illumination,
        slit: raw.Slit,
    }
}

#[test]
fn test_region_raw() {
    let mut region = Region::default();
    region.name = "Fermi edge".into();
    region.lens_mode = "Angular30".into();
    region.kinetic = false;
    region.detector.adc_mode = false;
    region.pass_energy = 20.0;

    let raw = region_to_raw(&region);
    assert_eq!(raw.Kinetic, 0);
    assert_eq!(raw.Fixed, 1);
    assert_eq!(raw.ADCMode, 0);
    assert_eq!(c_buf_to_string(&raw.LensMode), "Angular30");

    let mut raw = raw;
    raw.Fixed = 0xfe;
    let back = region_from_raw(&raw);
    assert!(back.fixed);
    assert!(!back.kinetic);
    assert_eq!(back.name, "Fermi edge");
    assert_eq!(back.pass_energy, 20.0);
}

/// Copy `len` values out of a library owned vector.
///
/// # Safety
///
/// `ptr` must be null or point to at least `len` readable values.
unsafe fn copy_vector(ptr: *const f64, len: i32) -> Vec<f64> {
    if ptr.is_null() || len <= 0 {
        return Vec::new();
    }
    slice::from_raw_parts(ptr, len as usize).to_vec()
}

/// # Safety
///
/// `ptr` must be null or point to `rows` row pointers, each of which is null
/// or points to `cols` readable values.
unsafe fn copy_matrix(ptr: *const ses::Vector, rows: i32, cols: i32) -> Vec<f64> {
    if ptr.is_null() || rows <= 0 || cols <= 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(rows as usize * cols as usize);
    for row in slice::from_raw_parts(ptr, rows as usize) {
        if row.is_null() {
            out.extend(std::iter::repeat(0.0).take(cols as usize));
        } else {
            out.extend_from_slice(slice::from_raw_parts(*row, cols as usize));
        }
    }
    out
}

/// Take an owned snapshot of a spectrum the library owns.
///
/// # Safety
///
/// All buffer pointers in `raw` must be valid for the sizes it declares.
pub(crate) unsafe fn spectrum_from_raw(raw: &ses::WSpectrum) -> Spectrum {
    Spectrum {
        channels: raw.Channels,
        slices: raw.Slices,
        sweeps: raw.Sweeps,
        count_unit: c_buf_to_string(&raw.CountUnit),
        channel_unit: c_buf_to_string(&raw.ChannelUnit),
        slice_unit: c_buf_to_string(&raw.SliceUnit),
        channel_scale: copy_vector(raw.ChannelScale, raw.Channels),
        slice_scale: copy_vector(raw.SliceScale, raw.Slices),
        data: copy_matrix(raw.Data, raw.Slices, raw.Channels),
        sum_data: copy_vector(raw.SumData, raw.Channels),
    }
}

/// Take an owned snapshot of the external I/O data the library owns.
///
/// # Safety
///
/// All buffer pointers in `raw` must be valid for the sizes it declares.
pub(crate) unsafe fn signals_from_raw(raw: &ses::WSignals) -> Signals {
    let names = if raw.Names.is_null() || raw.Count <= 0 {
        Vec::new()
    } else {
        slice::from_raw_parts(raw.Names, raw.Count as usize)
            .iter()
            .map(|n| c_buf_to_string(n))
            .collect()
    };
    Signals {
        count: raw.Count,
        steps: raw.Steps,
        sweeps: raw.Sweeps,
        steps_unit: c_buf_to_string(&raw.StepsUnit),
        steps_scale: copy_vector(raw.StepsScale, raw.Steps),
        names,
        data: copy_matrix(raw.Data, raw.Count, raw.Steps),
    }
}

#[test]
fn test_spectrum_from_raw() {
    let mut row0 = vec![1.0, 2.0];
    let mut row1 = vec![3.0, 4.0];
    let mut rows = vec![row0.as_mut_ptr(), row1.as_mut_ptr()];
    let mut sum = vec![4.0, 6.0];
    let mut scale = vec![10.0, 10.5];
    let raw = ses::WSpectrum {
        Channels: 2,
        Slices: 2,
        Sweeps: 1,
        CountUnit: string_to_c_array("counts"),
        ChannelUnit: string_to_c_array("eV"),
        SliceUnit: string_to_c_array("deg"),
        ChannelScale: scale.as_mut_ptr(),
        SliceScale: std::ptr::null_mut(),
        Data: rows.as_mut_ptr(),
        SumData: sum.as_mut_ptr(),
    };
    let spectrum = unsafe { spectrum_from_raw(&raw) };
    assert_eq!(spectrum.data, vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(spectrum.sum_data, vec![4.0, 6.0]);
    assert_eq!(spectrum.channel_scale, vec![10.0, 10.5]);
    assert!(spectrum.slice_scale.is_empty());
    assert_eq!(spectrum.channel_unit, "eV");
}
