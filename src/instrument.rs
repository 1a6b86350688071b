// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use crate::acquisition::Notifier;
use crate::types::*;
use std::path::Path;

/// The analyser control library as seen by the wrapper.
///
/// Optional capabilities have default implementations that report
/// `NotImplemented`, so a backend only provides what it actually has.
pub trait Instrument: Send + Sync {
    /// Load the control library itself. Backends that need no library
    /// accept any path.
    fn load_library(&mut self, path: &Path) -> Result<()>;
    fn unload_library(&mut self);
    fn is_loaded(&self) -> bool;

    fn initialize(&self) -> Result<()>;
    fn finalize(&self) -> Result<()>;
    fn load_instrument(&self, config: &Path) -> Result<InstrumentInfo>;
    fn reset(&self) -> Result<()>;
    fn test_communication(&self) -> Result<()>;
    fn zero_supplies(&self) -> Result<()>;
    fn status(&self) -> Result<InstrumentStatus>;
    fn last_error(&self) -> String {
        String::new()
    }

    fn option(&self, opt: InstrumentOption) -> Result<i32>;
    fn set_option(&self, opt: InstrumentOption, value: i32) -> Result<()>;

    fn detector_info(&self) -> Result<DetectorInfo>;
    fn global_detector(&self) -> Result<Detector>;
    fn set_global_detector(&self, detector: &Detector) -> Result<()>;

    fn element_sets(&self) -> Result<Vec<String>>;
    fn lens_modes(&self) -> Result<Vec<String>>;
    fn pass_energies(&self, lens_mode: &str) -> Result<Vec<f64>>;
    fn element_names(&self) -> Result<Vec<String>> {
        Err(Error::NotImplemented)
    }

    fn element_set(&self) -> Result<String>;
    fn set_element_set(&self, name: &str) -> Result<()>;
    fn lens_mode(&self) -> Result<String>;
    fn set_lens_mode(&self, name: &str) -> Result<()>;
    fn pass_energy(&self) -> Result<f64>;
    fn set_pass_energy(&self, energy: f64) -> Result<()>;
    fn energy(&self, kind: Energy) -> Result<f64>;
    fn set_energy(&self, kind: Energy, value: f64) -> Result<()>;
    fn element_voltage(&self, element: &str) -> Result<f64>;
    fn set_element_voltage(&self, element: &str, voltage: f64) -> Result<()>;

    /// Check `region`, adjusting it in place to what the hardware can do.
    /// `Err(Fail)` means the region was rejected.
    fn check_region(&self, region: &mut Region) -> Result<RegionCheck>;

    /// Prepare an acquisition of `region`. Callbacks for the rest of the
    /// session go to `notifier`, from a thread owned by the instrument.
    fn init_acquisition(
        &self,
        region: &mut Region,
        temp_file: Option<&Path>,
        notifier: Notifier,
    ) -> Result<()>;
    fn start_acquisition(&self, iteration: i32) -> Result<()>;
    fn stop(&self) -> Result<()>;

    fn use_detector(&self, _on: bool) -> Result<()> {
        Err(Error::NotImplemented)
    }
    fn use_signals(&self, _on: bool) -> Result<()> {
        Err(Error::NotImplemented)
    }

    /// Snapshot of the current spectrum, `None` before any acquisition
    /// was initialized.
    fn spectrum(&self) -> Result<Option<Spectrum>>;
    fn signals(&self) -> Result<Option<Signals>> {
        Ok(None)
    }
    fn raw_image(&self) -> Result<RawImage> {
        Err(Error::NotImplemented)
    }
}
