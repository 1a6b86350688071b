// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! The configuration properties of the wrapper.

use crate::registry::Registry;
use crate::types::*;
use crate::wrapper::{resolve, State, DETECTOR_BIT, EXTERNAL_IO_BIT};
use log::*;
use std::path::PathBuf;

const MAX_REGION_NAME: usize = 31;

/// The first detector index usable for spin detection; 0 is the main
/// detector and 1 the external I/O.
const FIRST_SPIN_DETECTOR: i32 = 2;

pub(crate) fn registry() -> Registry<State> {
    use ValueType::*;
    let mut reg = Registry::new();
    reg.register_read_only("lib_description", String, State::lib_description);
    reg.register_read_only("lib_version", String, State::lib_version);
    reg.register_read_only("lib_error", String, State::lib_error);
    reg.register("lib_working_dir", String, State::working_dir, State::set_working_dir);
    reg.register(
        "instrument_library",
        String,
        State::instrument_library,
        State::set_instrument_library,
    );
    reg.register_read_only("instrument_status", Int32, State::instrument_status);
    reg.register(
        "always_delay_region",
        Bool,
        State::always_delay_region,
        State::set_always_delay_region,
    );
    reg.register(
        "allow_io_with_detector",
        Bool,
        State::allow_io_with_detector,
        State::set_allow_io_with_detector,
    );
    reg.register_read_only("instrument_model", String, State::instrument_model);
    reg.register_read_only("instrument_serial_no", String, State::instrument_serial_no);
    reg.register_read_only("detector_info", DetectorInfo, State::get_detector_info);
    reg.register(
        "detector_region",
        DetectorRegion,
        State::detector_region,
        State::set_detector_region,
    );
    reg.register_read_only("element_set_count", Int32, State::element_set_count);
    reg.register("element_set", String, State::element_set, State::set_element_set);
    reg.register_read_only("element_name_count", Int32, State::element_name_count);
    reg.register_read_only("element_name", String, State::element_name);
    reg.register_read_only("lens_mode_count", Int32, State::lens_mode_count);
    reg.register("lens_mode", String, State::lens_mode, State::set_lens_mode);
    reg.register_read_only("pass_energy_count", Int32, State::pass_energy_count);
    reg.register("pass_energy", Double, State::pass_energy, State::set_pass_energy);
    reg.register(
        "analyzer_region",
        AnalyzerRegion,
        State::analyzer_region,
        State::set_analyzer_region,
    );
    reg.register("use_external_io", Bool, State::use_external_io, State::set_use_external_io);
    reg.register("use_detector", Bool, State::use_detector, State::set_use_detector);
    reg.register("use_spin", Bool, State::use_spin, State::set_use_spin);
    reg.register("region_name", String, State::region_name, State::set_region_name);
    reg.register("temp_file_name", String, State::temp_file_name, State::set_temp_file_name);
    reg.register(
        "reset_data_between_iterations",
        Bool,
        State::reset_between_iterations,
        State::set_reset_between_iterations,
    );
    reg.register(
        "use_binding_energy",
        Bool,
        State::use_binding_energy,
        State::set_use_binding_energy,
    );
    reg
}

/// Copy the analyser part of `from` into the full region.
fn apply_analyzer_region(region: &mut Region, from: &AnalyzerRegion) {
    region.fixed = from.fixed;
    region.high_energy = from.high_energy;
    region.low_energy = from.low_energy;
    region.fix_energy = from.center_energy;
    region.energy_step = from.energy_step;
    region.step_time = from.dwell_time;
    region.drift_region = false;
    region.grating = 0;
    region.order = 0;
    region.illumination = 0.0;
    region.slit = 0.0;
    region.use_region_detector = true;
}

pub(crate) fn analyzer_region_of(region: &Region) -> AnalyzerRegion {
    AnalyzerRegion::new(
        region.fixed,
        region.high_energy,
        region.low_energy,
        region.fix_energy,
        region.energy_step,
        region.step_time,
    )
}

/// Select from `list` with the property index convention: -1 is the
/// current value, 0..n-1 the list entries.
fn pick(list: &[String], index: i32, current: impl FnOnce() -> Result<String>) -> Result<Value> {
    if index == -1 {
        return current().map(Value::String);
    }
    if index < 0 {
        return Err(Error::Index);
    }
    list.get(index as usize)
        .cloned()
        .map(Value::String)
        .ok_or(Error::Index)
}

fn count(list_len: usize) -> Value {
    Value::Int32(list_len as i32)
}

impl State {
    fn lib_description(&self, _: i32) -> Result<Value> {
        Ok(Value::String("SESWrapper".into()))
    }

    fn lib_version(&self, _: i32) -> Result<Value> {
        Ok(Value::String(env!("CARGO_PKG_VERSION").into()))
    }

    fn lib_error(&self, index: i32) -> Result<Value> {
        Ok(Value::String(self.errors.message(index).into()))
    }

    fn working_dir(&self, _: i32) -> Result<Value> {
        Ok(Value::String(self.working_dir.display().to_string()))
    }

    fn set_working_dir(&mut self, _: i32, value: &Value) -> Result<()> {
        let dir = value.as_str()?;
        self.working_dir = PathBuf::from(dir);
        debug!("SESWrapper: working directory is now {}", dir);
        Ok(())
    }

    fn instrument_library(&self, _: i32) -> Result<Value> {
        Ok(Value::String(self.library_path.display().to_string()))
    }

    fn set_instrument_library(&mut self, _: i32, value: &Value) -> Result<()> {
        let path = PathBuf::from(value.as_str()?);
        self.instrument.unload_library();
        self.initialized = false;
        self.instrument_loaded = false;
        self.library_path = path;
        let full = resolve(&self.working_dir, &self.library_path);
        self.instrument.load_library(&full).map_err(|e| {
            warn!("SESWrapper: could not load {}: {}", full.display(), e);
            Error::LoadLibrary
        })?;
        info!("SESWrapper: using instrument library {}", full.display());
        Ok(())
    }

    fn instrument_status(&self, _: i32) -> Result<Value> {
        Ok(Value::Int32(self.hw_status().raw()))
    }

    fn flag_option(&self, opt: InstrumentOption) -> Result<Value> {
        self.loaded()?;
        let value = self.instrument.option(opt).map_err(|_| Error::Fail)?;
        Ok(Value::Bool(value != 0))
    }

    fn set_flag_option(&mut self, opt: InstrumentOption, value: &Value) -> Result<()> {
        let on = value.as_bool()?;
        if !self.instrument.is_loaded() {
            return Err(Error::NotInitialized);
        }
        self.instrument
            .set_option(opt, on as i32)
            .map_err(|_| Error::Fail)
    }

    fn always_delay_region(&self, _: i32) -> Result<Value> {
        self.flag_option(InstrumentOption::AlwaysDelayRegion)
    }

    fn set_always_delay_region(&mut self, _: i32, value: &Value) -> Result<()> {
        self.set_flag_option(InstrumentOption::AlwaysDelayRegion, value)
    }

    fn allow_io_with_detector(&self, _: i32) -> Result<Value> {
        self.flag_option(InstrumentOption::AllowSignalsWithDetector)
    }

    fn set_allow_io_with_detector(&mut self, _: i32, value: &Value) -> Result<()> {
        self.set_flag_option(InstrumentOption::AllowSignalsWithDetector, value)
    }

    fn instrument_model(&self, _: i32) -> Result<Value> {
        Ok(Value::String(self.info.model.clone()))
    }

    fn instrument_serial_no(&self, _: i32) -> Result<Value> {
        Ok(Value::String(self.info.serial_no.clone()))
    }

    fn get_detector_info(&self, _: i32) -> Result<Value> {
        self.loaded()?;
        Ok(Value::DetectorInfo(self.detector_info))
    }

    fn detector_region(&self, _: i32) -> Result<Value> {
        self.loaded()?;
        let d = &self.region.detector;
        Ok(Value::DetectorRegion(DetectorRegion::new(
            d.first_x_channel,
            d.last_x_channel,
            d.first_y_channel,
            d.last_y_channel,
            d.slices,
            d.adc_mode,
        )))
    }

    fn set_detector_region(&mut self, _: i32, value: &Value) -> Result<()> {
        let dr = value.as_detector_region()?;
        self.loaded()?;
        if self.is_running() {
            return Err(Error::Acquiring);
        }
        let mut region = self.region.clone();
        if let Ok(mode) = self.instrument.lens_mode() {
            region.lens_mode = mode;
        }
        if let Ok(energy) = self.instrument.pass_energy() {
            region.pass_energy = energy;
        }
        region.detector = Detector {
            first_x_channel: dr.first_x_channel,
            last_x_channel: dr.last_x_channel,
            first_y_channel: dr.first_y_channel,
            last_y_channel: dr.last_y_channel,
            slices: dr.slices,
            adc_mode: dr.adc_mode,
            adc_mask: 0,
            disc_level: 0,
        };
        region.use_region_detector = true;
        // only the adjustments matter here, the energy window may be unset
        if let Err(e) = self.instrument.check_region(&mut region) {
            debug!("SESWrapper: region check with new detector: {}", e);
        }
        self.instrument
            .set_global_detector(&region.detector)
            .map_err(|_| Error::IncorrectDetectorRegion)?;
        self.region = region;
        Ok(())
    }

    fn element_set_count(&self, _: i32) -> Result<Value> {
        self.loaded()?;
        Ok(count(self.element_sets.len()))
    }

    fn element_set(&self, index: i32) -> Result<Value> {
        self.loaded()?;
        pick(&self.element_sets, index, || {
            self.instrument.element_set().map_err(|_| Error::Fail)
        })
    }

    fn set_element_set(&mut self, _: i32, value: &Value) -> Result<()> {
        let name = value.as_str()?;
        self.loaded()?;
        self.instrument
            .set_element_set(name)
            .map_err(|_| Error::IncorrectElementSet)
    }

    fn element_name_count(&self, _: i32) -> Result<Value> {
        self.loaded()?;
        Ok(count(self.element_names.len()))
    }

    fn element_name(&self, index: i32) -> Result<Value> {
        self.loaded()?;
        pick(&self.element_names, index, || Err(Error::Index))
    }

    fn lens_mode_count(&self, _: i32) -> Result<Value> {
        self.loaded()?;
        Ok(count(self.lens_modes.len()))
    }

    fn lens_mode(&self, index: i32) -> Result<Value> {
        self.loaded()?;
        pick(&self.lens_modes, index, || {
            self.instrument.lens_mode().map_err(|_| Error::Fail)
        })
    }

    fn set_lens_mode(&mut self, _: i32, value: &Value) -> Result<()> {
        let mode = value.as_str()?;
        self.loaded()?;
        self.instrument
            .set_lens_mode(mode)
            .map_err(|_| Error::IncorrectLensMode)?;
        self.region.lens_mode = mode.to_owned();
        self.pass_energies = self.instrument.pass_energies(mode).map_err(|e| {
            warn!("SESWrapper: no pass energies for {}: {}", mode, e);
            Error::Fail
        })?;
        Ok(())
    }

    fn pass_energy_count(&self, _: i32) -> Result<Value> {
        self.loaded()?;
        Ok(count(self.pass_energies.len()))
    }

    fn pass_energy(&self, index: i32) -> Result<Value> {
        self.loaded()?;
        if index == -1 {
            return self
                .instrument
                .pass_energy()
                .map(Value::Double)
                .map_err(|_| Error::Fail);
        }
        if index < 0 {
            return Err(Error::Index);
        }
        self.pass_energies
            .get(index as usize)
            .map(|&e| Value::Double(e))
            .ok_or(Error::Index)
    }

    fn set_pass_energy(&mut self, _: i32, value: &Value) -> Result<()> {
        let energy = value.as_f64()?;
        self.loaded()?;
        self.instrument
            .set_pass_energy(energy)
            .map_err(|_| Error::IncorrectPassEnergy)?;
        self.region.pass_energy = self.instrument.pass_energy().unwrap_or(energy);
        Ok(())
    }

    fn analyzer_region(&self, _: i32) -> Result<Value> {
        self.loaded()?;
        Ok(Value::AnalyzerRegion(analyzer_region_of(&self.region)))
    }

    fn set_analyzer_region(&mut self, _: i32, value: &Value) -> Result<()> {
        let ar = value.as_analyzer_region()?;
        apply_analyzer_region(&mut self.region, &ar);
        Ok(())
    }

    fn active_bit(&self, bit: i32) -> Result<Value> {
        self.loaded()?;
        Ok(Value::Bool(self.active_detectors & bit != 0))
    }

    fn set_active_bit(&mut self, bit: i32, value: &Value) -> Result<()> {
        if value.as_bool()? {
            self.active_detectors |= bit;
        } else {
            self.active_detectors &= !bit;
        }
        Ok(())
    }

    fn use_external_io(&self, _: i32) -> Result<Value> {
        self.active_bit(EXTERNAL_IO_BIT)
    }

    fn set_use_external_io(&mut self, _: i32, value: &Value) -> Result<()> {
        self.set_active_bit(EXTERNAL_IO_BIT, value)
    }

    fn use_detector(&self, _: i32) -> Result<Value> {
        self.active_bit(DETECTOR_BIT)
    }

    fn set_use_detector(&mut self, _: i32, value: &Value) -> Result<()> {
        self.set_active_bit(DETECTOR_BIT, value)
    }

    /// Resolve the spin detector addressed by `index` (-1 is the first one)
    /// to its bit in the active detector mask.
    fn spin_bit(&self, index: i32) -> Result<i32> {
        self.loaded()?;
        let detectors = self
            .instrument
            .option(InstrumentOption::DetectorCount)
            .map_err(|_| Error::Fail)?;
        if detectors <= FIRST_SPIN_DETECTOR {
            return Err(Error::NotApplicable);
        }
        let index = if index == -1 { FIRST_SPIN_DETECTOR } else { index };
        if index < FIRST_SPIN_DETECTOR || index >= detectors || index >= 31 {
            return Err(Error::Index);
        }
        Ok(1 << index)
    }

    fn use_spin(&self, index: i32) -> Result<Value> {
        let bit = self.spin_bit(index)?;
        let active = self
            .instrument
            .option(InstrumentOption::ActiveDetector)
            .map_err(|_| Error::Fail)?;
        Ok(Value::Bool(active & bit != 0))
    }

    fn set_use_spin(&mut self, index: i32, value: &Value) -> Result<()> {
        let on = value.as_bool()?;
        let bit = self.spin_bit(index)?;
        let active = self
            .instrument
            .option(InstrumentOption::ActiveDetector)
            .map_err(|_| Error::Fail)?;
        let active = if on { active | bit } else { active & !bit };
        self.instrument
            .set_option(InstrumentOption::ActiveDetector, active)
            .map_err(|_| Error::Fail)
    }

    fn region_name(&self, _: i32) -> Result<Value> {
        Ok(Value::String(self.region.name.clone()))
    }

    fn set_region_name(&mut self, _: i32, value: &Value) -> Result<()> {
        let name = value.as_str()?;
        let mut end = name.len().min(MAX_REGION_NAME);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        self.region.name = name[..end].to_owned();
        Ok(())
    }

    fn temp_file_name(&self, _: i32) -> Result<Value> {
        Ok(Value::String(self.temp_file.clone()))
    }

    fn set_temp_file_name(&mut self, _: i32, value: &Value) -> Result<()> {
        self.temp_file = value.as_str()?.to_owned();
        Ok(())
    }

    fn reset_between_iterations(&self, _: i32) -> Result<Value> {
        Ok(Value::Bool(self.reset_between_iterations))
    }

    fn set_reset_between_iterations(&mut self, _: i32, value: &Value) -> Result<()> {
        self.reset_between_iterations = value.as_bool()?;
        Ok(())
    }

    fn use_binding_energy(&self, _: i32) -> Result<Value> {
        Ok(Value::Bool(!self.region.kinetic))
    }

    fn set_use_binding_energy(&mut self, _: i32, value: &Value) -> Result<()> {
        self.region.kinetic = !value.as_bool()?;
        Ok(())
    }
}
