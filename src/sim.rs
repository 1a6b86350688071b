// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! A software analyser that behaves enough like the real library to run the
//! wrapper without hardware.

use crate::acquisition::Notifier;
use crate::instrument::Instrument;
use crate::types::*;
use log::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::{thread, time::Duration};

const ELEMENT_SETS: &[&str] = &["Low Pass (UPS)", "High Pass (XPS)"];
const LENS_MODES: &[&str] = &["Transmission", "Angular30", "Angular45"];
const PASS_ENERGIES: &[f64] = &[2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0];
const ELEMENTS: &[&str] = &["L1", "L2", "L3", "Focus", "DetectorVoltage"];
const IO_PORTS: &[&str] = &["Sample current", "Photon flux"];
/// Largest swept region the simulator accepts, in energy steps.
const MAX_STEPS: f64 = 100_000.0;

struct State {
    library: Option<PathBuf>,
    initialized: bool,
    instrument: bool,
    status: InstrumentStatus,
    options: HashMap<i32, i32>,
    detector: Detector,
    element_set: String,
    lens_mode: String,
    pass_energy: f64,
    kinetic_energy: f64,
    excitation_energy: f64,
    voltages: HashMap<String, f64>,
    region: Option<Region>,
    notifier: Option<Notifier>,
    spectrum: Option<Spectrum>,
    signals: Option<Signals>,
    run: u64,
    stop: Arc<AtomicBool>,
}

/// Simulated analyser. Swept regions produce one point per energy step,
/// fixed regions a single snapshot, each taking `step_delay`.
pub struct SimulatedInstrument {
    state: Arc<Mutex<State>>,
    step_delay: Duration,
    detector_info: DetectorInfo,
}

impl Default for SimulatedInstrument {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedInstrument {
    pub fn new() -> Self {
        let mut options = HashMap::new();
        options.insert(InstrumentOption::AlwaysDelayRegion.raw(), 0);
        options.insert(InstrumentOption::AllowSignalsWithDetector.raw(), 0);
        options.insert(InstrumentOption::DetectorCount.raw(), 1);
        options.insert(InstrumentOption::ActiveDetector.raw(), 1);
        let state = State {
            library: None,
            initialized: false,
            instrument: false,
            status: InstrumentStatus::NotInitialized,
            options,
            detector: Detector {
                last_x_channel: 63,
                last_y_channel: 31,
                slices: 4,
                ..Detector::default()
            },
            element_set: ELEMENT_SETS[0].into(),
            lens_mode: LENS_MODES[0].into(),
            pass_energy: 10.0,
            kinetic_energy: 0.0,
            excitation_energy: 21.2,
            voltages: ELEMENTS.iter().map(|e| (e.to_string(), 0.0)).collect(),
            region: None,
            notifier: None,
            spectrum: None,
            signals: None,
            run: 0,
            stop: Arc::new(AtomicBool::new(false)),
        };
        SimulatedInstrument {
            state: Arc::new(Mutex::new(state)),
            step_delay: Duration::from_millis(5),
            detector_info: DetectorInfo {
                timer_controlled: true,
                x_channels: 64,
                y_channels: 32,
                max_slices: 32,
                max_channels: 64,
                frame_rate: 25,
                adc_present: true,
                disc_present: false,
            },
        }
    }

    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Number of detectors the instrument reports (the spin detector
    /// setups have 3 and more).
    pub fn with_detector_count(self, count: i32) -> Self {
        self.state
            .lock()
            .options
            .insert(InstrumentOption::DetectorCount.raw(), count);
        self
    }

    fn ready(&self) -> Result<parking_lot::MutexGuard<State>> {
        let st = self.state.lock();
        if !st.initialized {
            return Err(Error::NotInitialized);
        }
        Ok(st)
    }
}

/// Intensity model: a Fermi edge at 16.8 eV on a small background.
fn intensity(energy: f64, slice: i32) -> f64 {
    let edge = 1.0 / (1.0 + ((energy - 16.8) / 0.1).exp());
    10.0 + 1000.0 * edge * (1.0 + 0.1 * f64::from(slice))
}

fn energy_axis(region: &Region, channels: i32) -> Vec<f64> {
    if region.fixed {
        let half = f64::from(channels) / 2.0;
        let spread = region.pass_energy * 0.1 / f64::from(channels.max(1));
        (0..channels)
            .map(|c| region.fix_energy + (f64::from(c) - half) * spread)
            .collect()
    } else {
        (0..channels)
            .map(|c| region.low_energy + f64::from(c) * region.energy_step)
            .collect()
    }
}

fn check(region: &mut Region) -> Result<RegionCheck> {
    let min_step = (region.pass_energy * 0.0005).max(0.0005);
    if region.step_time <= 0 {
        return Err(Error::Fail);
    }
    if region.fixed {
        let time = f64::from(region.step_time);
        return Ok(RegionCheck::new(1, time, min_step));
    }
    if region.high_energy <= region.low_energy || region.energy_step <= 0.0 {
        return Err(Error::Fail);
    }
    if region.energy_step < min_step {
        region.energy_step = min_step;
    }
    let span = (region.high_energy - region.low_energy) / region.energy_step;
    if span >= MAX_STEPS {
        return Err(Error::Fail);
    }
    let steps = (span + 1e-9).floor() as i32 + 1;
    Ok(RegionCheck::new(
        steps,
        f64::from(steps) * f64::from(region.step_time),
        min_step,
    ))
}

impl Instrument for SimulatedInstrument {
    fn load_library(&mut self, path: &Path) -> Result<()> {
        let mut st = self.state.lock();
        st.library = Some(path.to_owned());
        debug!("Simulator: pretending to load {}", path.display());
        Ok(())
    }

    fn unload_library(&mut self) {
        let mut st = self.state.lock();
        st.library = None;
        st.initialized = false;
        st.instrument = false;
        st.status = InstrumentStatus::NotInitialized;
    }

    fn is_loaded(&self) -> bool {
        self.state.lock().library.is_some()
    }

    fn initialize(&self) -> Result<()> {
        let mut st = self.state.lock();
        if st.library.is_none() {
            return Err(Error::InitializeFail);
        }
        st.initialized = true;
        st.status = InstrumentStatus::Normal;
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        let mut st = self.state.lock();
        st.stop.store(true, Ordering::SeqCst);
        st.initialized = false;
        st.instrument = false;
        st.notifier = None;
        st.status = InstrumentStatus::NotInitialized;
        Ok(())
    }

    fn load_instrument(&self, config: &Path) -> Result<InstrumentInfo> {
        let mut st = self.ready()?;
        if config.as_os_str().is_empty() {
            return Err(Error::OpenInstrument);
        }
        st.instrument = true;
        Ok(InstrumentInfo::new("R4000 (simulated)".into(), "SIM-0001".into()))
    }

    fn reset(&self) -> Result<()> {
        let mut st = self.ready()?;
        st.stop.store(true, Ordering::SeqCst);
        st.status = InstrumentStatus::Normal;
        Ok(())
    }

    fn test_communication(&self) -> Result<()> {
        self.ready().map(|_| ())
    }

    fn zero_supplies(&self) -> Result<()> {
        let mut st = self.ready()?;
        st.voltages.values_mut().for_each(|v| *v = 0.0);
        st.kinetic_energy = 0.0;
        Ok(())
    }

    fn status(&self) -> Result<InstrumentStatus> {
        Ok(self.state.lock().status)
    }

    fn option(&self, opt: InstrumentOption) -> Result<i32> {
        let st = self.ready()?;
        Ok(st.options.get(&opt.raw()).copied().unwrap_or(0))
    }

    fn set_option(&self, opt: InstrumentOption, value: i32) -> Result<()> {
        let mut st = self.ready()?;
        if opt == InstrumentOption::DetectorCount {
            return Err(Error::Fail);
        }
        st.options.insert(opt.raw(), value);
        Ok(())
    }

    fn detector_info(&self) -> Result<DetectorInfo> {
        Ok(self.detector_info)
    }

    fn global_detector(&self) -> Result<Detector> {
        Ok(self.ready()?.detector)
    }

    fn set_global_detector(&self, detector: &Detector) -> Result<()> {
        let mut st = self.ready()?;
        st.detector = *detector;
        Ok(())
    }

    fn element_sets(&self) -> Result<Vec<String>> {
        Ok(ELEMENT_SETS.iter().map(|s| s.to_string()).collect())
    }

    fn lens_modes(&self) -> Result<Vec<String>> {
        Ok(LENS_MODES.iter().map(|s| s.to_string()).collect())
    }

    fn pass_energies(&self, lens_mode: &str) -> Result<Vec<f64>> {
        if !LENS_MODES.contains(&lens_mode) {
            return Err(Error::Fail);
        }
        // the angular modes do not work at the lowest pass energy
        let skip = if lens_mode.starts_with("Angular") { 1 } else { 0 };
        Ok(PASS_ENERGIES[skip..].to_vec())
    }

    fn element_names(&self) -> Result<Vec<String>> {
        Ok(ELEMENTS.iter().map(|s| s.to_string()).collect())
    }

    fn element_set(&self) -> Result<String> {
        Ok(self.ready()?.element_set.clone())
    }

    fn set_element_set(&self, name: &str) -> Result<()> {
        let mut st = self.ready()?;
        if !ELEMENT_SETS.contains(&name) {
            return Err(Error::Fail);
        }
        st.element_set = name.into();
        Ok(())
    }

    fn lens_mode(&self) -> Result<String> {
        Ok(self.ready()?.lens_mode.clone())
    }

    fn set_lens_mode(&self, name: &str) -> Result<()> {
        let valid = self.pass_energies(name)?;
        let mut st = self.ready()?;
        st.lens_mode = name.into();
        if !valid.contains(&st.pass_energy) {
            if let Some(first) = valid.first() {
                st.pass_energy = *first;
            }
        }
        Ok(())
    }

    fn pass_energy(&self) -> Result<f64> {
        Ok(self.ready()?.pass_energy)
    }

    fn set_pass_energy(&self, energy: f64) -> Result<()> {
        let mode = self.lens_mode()?;
        if !self.pass_energies(&mode)?.contains(&energy) {
            return Err(Error::Fail);
        }
        self.ready()?.pass_energy = energy;
        Ok(())
    }

    fn energy(&self, kind: Energy) -> Result<f64> {
        let st = self.ready()?;
        Ok(match kind {
            Energy::Kinetic => st.kinetic_energy,
            Energy::Excitation => st.excitation_energy,
            Energy::Binding => st.excitation_energy - st.kinetic_energy,
        })
    }

    fn set_energy(&self, kind: Energy, value: f64) -> Result<()> {
        let mut st = self.ready()?;
        match kind {
            Energy::Kinetic => st.kinetic_energy = value,
            Energy::Excitation => st.excitation_energy = value,
            Energy::Binding => st.kinetic_energy = st.excitation_energy - value,
        }
        Ok(())
    }

    fn element_voltage(&self, element: &str) -> Result<f64> {
        self.ready()?.voltages.get(element).copied().ok_or(Error::Fail)
    }

    fn set_element_voltage(&self, element: &str, voltage: f64) -> Result<()> {
        let mut st = self.ready()?;
        match st.voltages.get_mut(element) {
            Some(v) => {
                *v = voltage;
                Ok(())
            }
            None => Err(Error::Fail),
        }
    }

    fn check_region(&self, region: &mut Region) -> Result<RegionCheck> {
        self.ready()?;
        check(region)
    }

    fn init_acquisition(
        &self,
        region: &mut Region,
        temp_file: Option<&Path>,
        notifier: Notifier,
    ) -> Result<()> {
        let checked = check(region)?;
        let mut st = self.ready()?;
        if !st.instrument || st.status == InstrumentStatus::Running {
            return Err(Error::Fail);
        }
        if let Some(file) = temp_file {
            debug!("Simulator: would write results to {}", file.display());
        }
        let det = if region.use_region_detector {
            region.detector
        } else {
            st.detector
        };
        let channels = if region.fixed {
            (det.last_x_channel - det.first_x_channel + 1).max(1)
        } else {
            checked.steps
        };
        let slices = det.slices.max(1);
        let len = (channels * slices) as usize;
        st.spectrum = Some(Spectrum {
            channels,
            slices,
            sweeps: 0,
            count_unit: "counts/s".into(),
            channel_unit: (if region.kinetic {
                "Kinetic Energy [eV]"
            } else {
                "Binding Energy [eV]"
            })
            .into(),
            slice_unit: "Slice".into(),
            channel_scale: energy_axis(region, channels),
            slice_scale: (0..slices).map(f64::from).collect(),
            data: vec![0.0; len],
            sum_data: vec![0.0; channels as usize],
        });
        st.signals = Some(Signals {
            count: IO_PORTS.len() as i32,
            steps: channels,
            sweeps: 0,
            steps_unit: "V".into(),
            steps_scale: energy_axis(region, channels),
            names: IO_PORTS.iter().map(|s| s.to_string()).collect(),
            data: vec![0.0; IO_PORTS.len() * channels as usize],
        });
        st.region = Some(region.clone());
        st.notifier = Some(notifier);
        Ok(())
    }

    fn start_acquisition(&self, iteration: i32) -> Result<()> {
        let mut st = self.ready()?;
        if st.status == InstrumentStatus::Running {
            return Err(Error::Fail);
        }
        let (region, notifier) = match (st.region.clone(), st.notifier.clone()) {
            (Some(r), Some(n)) => (r, n),
            _ => return Err(Error::Fail),
        };
        st.run += 1;
        st.stop = Arc::new(AtomicBool::new(false));
        st.status = InstrumentStatus::Running;
        if iteration <= 1 {
            if let Some(s) = st.spectrum.as_mut() {
                s.data.iter_mut().for_each(|v| *v = 0.0);
                s.sum_data.iter_mut().for_each(|v| *v = 0.0);
                s.sweeps = 0;
            }
            if let Some(s) = st.signals.as_mut() {
                s.data.iter_mut().for_each(|v| *v = 0.0);
                s.sweeps = 0;
            }
        }
        let worker = Worker {
            state: self.state.clone(),
            stop: st.stop.clone(),
            run: st.run,
            delay: self.step_delay,
            region,
            notifier,
            iteration,
        };
        drop(st);
        thread::Builder::new()
            .name("sim-acquisition".into())
            .spawn(move || worker.run())
            .map_err(|_| Error::Fail)?;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut st = self.state.lock();
        st.stop.store(true, Ordering::SeqCst);
        if st.status == InstrumentStatus::Running {
            st.status = InstrumentStatus::Normal;
        }
        Ok(())
    }

    fn use_detector(&self, _on: bool) -> Result<()> {
        Ok(())
    }

    fn use_signals(&self, _on: bool) -> Result<()> {
        Ok(())
    }

    fn spectrum(&self) -> Result<Option<Spectrum>> {
        Ok(self.state.lock().spectrum.clone())
    }

    fn signals(&self) -> Result<Option<Signals>> {
        Ok(self.state.lock().signals.clone())
    }

    fn raw_image(&self) -> Result<RawImage> {
        self.ready()?;
        let (w, h) = (self.detector_info.x_channels, self.detector_info.y_channels);
        let data = (0..w * h).map(|i| (i % 251) as u8).collect();
        Ok(RawImage::new(w, h, 1, data))
    }
}

impl Drop for SimulatedInstrument {
    fn drop(&mut self) {
        self.state.lock().stop.store(true, Ordering::SeqCst);
    }
}

struct Worker {
    state: Arc<Mutex<State>>,
    stop: Arc<AtomicBool>,
    run: u64,
    delay: Duration,
    region: Region,
    notifier: Notifier,
    iteration: i32,
}

impl Worker {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn run(self) {
        debug!("Simulator: acquisition run {} (iteration {})", self.run, self.iteration);
        if self.region.fixed {
            thread::sleep(self.delay);
            if !self.stopped() {
                self.measure(None);
            }
        } else {
            let steps = {
                let st = self.state.lock();
                st.spectrum.as_ref().map(|s| s.channels).unwrap_or(0)
            };
            for point in 0..steps {
                thread::sleep(self.delay);
                if self.stopped() {
                    break;
                }
                self.measure(Some(point));
                self.notifier.point_ready(point);
            }
        }
        let completed = !self.stopped();
        // status and completion change together, so a caller never sees an
        // idle instrument with its region still pending
        let hold = {
            let mut st = self.state.lock();
            if st.run != self.run {
                return;
            }
            if completed {
                if let Some(s) = st.spectrum.as_mut() {
                    s.sweeps += 1;
                }
                if let Some(s) = st.signals.as_mut() {
                    s.sweeps += 1;
                }
            }
            st.status = InstrumentStatus::Normal;
            completed && self.notifier.complete_region()
        };
        if hold {
            self.notifier.hold_region();
        }
    }

    /// Add counts for one channel, or for all of them in fixed mode.
    fn measure(&self, point: Option<i32>) {
        let mut st = self.state.lock();
        if let Some(s) = st.spectrum.as_mut() {
            let channels: Vec<i32> = match point {
                Some(p) => vec![p],
                None => (0..s.channels).collect(),
            };
            for c in channels {
                let energy = s.channel_scale.get(c as usize).copied().unwrap_or(0.0);
                let mut sum = 0.0;
                for slice in 0..s.slices {
                    let counts = intensity(energy, slice);
                    s.data[(slice * s.channels + c) as usize] += counts;
                    sum += counts;
                }
                s.sum_data[c as usize] += sum;
            }
        }
        if let (Some(p), Some(s)) = (point, st.signals.as_mut()) {
            for port in 0..s.count {
                s.data[(port * s.steps + p) as usize] += 1.0 + f64::from(port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::Acquisition;

    fn ready_sim() -> SimulatedInstrument {
        let mut sim = SimulatedInstrument::new().with_step_delay(Duration::from_millis(1));
        sim.load_library(Path::new("sim")).unwrap();
        sim.initialize().unwrap();
        sim
    }

    #[test]
    fn test_check_region() {
        let sim = ready_sim();
        let mut region = Region {
            fixed: false,
            low_energy: 15.0,
            high_energy: 17.0,
            energy_step: 0.1,
            step_time: 100,
            pass_energy: 10.0,
            ..Region::default()
        };
        let res = sim.check_region(&mut region).unwrap();
        assert_eq!(res.steps, 21);
        assert_eq!(res.time_ms, 2100.0);

        region.energy_step = 0.000_01;
        let res = sim.check_region(&mut region).unwrap();
        assert_eq!(region.energy_step, res.min_energy_step);

        region.high_energy = 14.0;
        assert_eq!(sim.check_region(&mut region), Err(Error::Fail));
    }

    #[test]
    fn test_region_too_long() {
        let sim = ready_sim();
        let mut region = Region {
            fixed: false,
            low_energy: 0.0,
            high_energy: 500.0,
            energy_step: 0.01,
            step_time: 1,
            pass_energy: 10.0,
            ..Region::default()
        };
        assert_eq!(sim.check_region(&mut region).unwrap().steps, 50_001);
        region.high_energy = 1e9;
        assert_eq!(sim.check_region(&mut region), Err(Error::Fail));
        let acq = Arc::new(Acquisition::new());
        sim.load_instrument(Path::new("R4000.dat")).unwrap();
        assert_eq!(
            sim.init_acquisition(&mut region, None, Notifier::new(acq)),
            Err(Error::Fail)
        );
    }

    #[test]
    fn test_swept_run() {
        let sim = ready_sim();
        let acq = Arc::new(Acquisition::new());
        let mut region = Region {
            fixed: false,
            low_energy: 16.0,
            high_energy: 17.0,
            energy_step: 0.25,
            step_time: 10,
            ..Region::default()
        };
        sim.load_instrument(Path::new("R4000.dat")).unwrap();
        acq.init(false, false);
        sim.init_acquisition(&mut region, None, Notifier::new(acq.clone()))
            .unwrap();
        acq.start(false).unwrap();
        sim.start_acquisition(1).unwrap();
        assert_eq!(acq.wait_for_region(Some(Duration::from_secs(5))), Wait::Ready);
        assert_eq!(acq.current_step(), 5);
        assert_eq!(acq.current_point(), 4);
        assert_eq!(sim.status(), Ok(InstrumentStatus::Normal));
        let spectrum = sim.spectrum().unwrap().unwrap();
        assert_eq!(spectrum.channels, 5);
        assert_eq!(spectrum.sweeps, 1);
        assert!(spectrum.sum_data.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn test_lens_mode_limits_pass_energy() {
        let sim = ready_sim();
        sim.set_pass_energy(2.0).unwrap();
        sim.set_lens_mode("Angular30").unwrap();
        assert_eq!(sim.pass_energy(), Ok(5.0));
        assert_eq!(sim.set_pass_energy(2.0), Err(Error::Fail));
        assert_eq!(sim.set_lens_mode("Nonsense"), Err(Error::Fail));
    }
}
