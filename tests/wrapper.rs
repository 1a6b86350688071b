// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use seswrapper::*;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const LONG: Option<Duration> = Some(Duration::from_secs(5));

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn wrapper_with(sim: SimulatedInstrument) -> SesWrapper {
    init_logging();
    SesWrapper::builder()
        .working_dir(std::env::temp_dir())
        .instrument(Box::new(sim))
        .build()
        .unwrap()
}

fn loaded_with(sim: SimulatedInstrument) -> SesWrapper {
    let mut w = wrapper_with(sim);
    w.initialize().unwrap();
    w.load_instrument("R4000.dat").unwrap();
    w
}

fn loaded() -> SesWrapper {
    loaded_with(SimulatedInstrument::new().with_step_delay(Duration::from_millis(2)))
}

fn swept(w: &mut SesWrapper, low: f64, high: f64, step: f64) {
    let region = AnalyzerRegion::new(false, high, low, 0.0, step, 1);
    w.set_property("analyzer_region", -1, &Value::AnalyzerRegion(region))
        .unwrap();
}

#[test]
fn test_every_property_reports_its_size() {
    let w = loaded();
    let names: Vec<String> = w.property_names().map(String::from).collect();
    for name in names {
        match w.property_size(&name, -1) {
            Ok(size) => {
                let value = w.get_property(&name, -1).unwrap();
                assert_eq!(value.size(), size, "{}", name);
                assert_eq!(w.property_size(&name, -1), Ok(size), "{}", name);
            }
            // spin detection needs at least three detectors
            Err(Error::NotApplicable) => assert_eq!(name, "use_spin"),
            // the simulator has no element names at index -1
            Err(Error::Index) => assert_eq!(name, "element_name"),
            Err(e) => panic!("{}: {}", name, e),
        }
    }
}

#[test]
fn test_unknown_and_read_only() {
    let mut w = wrapper_with(SimulatedInstrument::new());
    assert_eq!(w.get_property("no_such_property", -1), Err(Error::ParameterNotFound));
    assert_eq!(w.get_acquired_data("no_such_data", -1), Err(Error::ParameterNotFound));
    assert_eq!(w.parameter_type("no_such_property"), None);
    for name in &["lib_description", "lib_version", "instrument_status", "lens_mode_count"] {
        for value in &[Value::Bool(true), Value::Int32(1), Value::String("x".into())] {
            assert_eq!(w.set_property(name, -1, value), Err(Error::ReadOnly), "{}", name);
        }
    }
    assert_eq!(w.parameter_type("pass_energy"), Some(ValueType::Double));
    assert_eq!(w.parameter_type("acq_spectrum"), Some(ValueType::VectorDouble));
}

#[test]
fn test_before_loading() {
    let mut w = wrapper_with(SimulatedInstrument::new());
    assert_eq!(
        w.get_property("lib_description", -1),
        Ok(Value::String("SESWrapper".into()))
    );
    assert_eq!(
        w.get_property("lib_error", -13),
        Ok(Value::String("No instrument loaded".into()))
    );
    assert_eq!(w.load_instrument("R4000.dat"), Err(Error::NotInitialized));
    assert_eq!(w.get_property("detector_info", -1), Err(Error::NoInstrument));
    assert_eq!(w.start_acquisition(), Err(Error::NoInstrument));
    assert_eq!(w.wait_for_region_ready(LONG), Err(Error::NoInstrument));
    assert_eq!(w.wait_for_point_ready(None), Err(Error::NoInstrument));
    for name in &[
        "analyzer_region",
        "element_set_count",
        "element_name_count",
        "lens_mode_count",
        "pass_energy_count",
        "use_external_io",
        "use_detector",
    ] {
        assert_eq!(w.get_property(name, -1), Err(Error::NoInstrument), "{}", name);
    }
    for name in &["element_set", "element_name", "lens_mode", "pass_energy"] {
        assert_eq!(w.get_property(name, 0), Err(Error::NoInstrument), "{}", name);
    }
    assert_eq!(w.check_analyzer_region(), Err(Error::NoInstrument));
    // plain settings without hardware behind them stay available
    w.set_property("reset_data_between_iterations", -1, &Value::Bool(true))
        .unwrap();
    assert_eq!(
        w.get_property("reset_data_between_iterations", -1),
        Ok(Value::Bool(true))
    );
    // counts are zero and buffers absent before any acquisition
    assert_eq!(w.get_acquired_data("acq_channels", -1), Ok(Value::Int32(0)));
    assert_eq!(w.get_acquired_data("acq_spectrum", -1), Err(Error::Fail));
    assert_eq!(w.get_acquired_data("acq_io_ports", -1), Err(Error::Fail));
    w.initialize().unwrap();
    assert_eq!(w.load_instrument(""), Err(Error::Fail));
}

#[test]
fn test_instrument_lists() {
    let mut w = loaded();
    assert_eq!(w.get_property("instrument_model", -1), Ok(Value::String("R4000 (simulated)".into())));
    assert_eq!(w.get_property("lens_mode_count", -1), Ok(Value::Int32(3)));
    assert_eq!(w.get_property("lens_mode", 1), Ok(Value::String("Angular30".into())));
    assert_eq!(w.get_property("lens_mode", 3), Err(Error::Index));
    assert_eq!(w.get_property("lens_mode", -2), Err(Error::Index));
    assert_eq!(w.get_property("pass_energy_count", -1), Ok(Value::Int32(7)));

    w.set_property("lens_mode", -1, &Value::String("Angular45".into()))
        .unwrap();
    assert_eq!(w.get_property("pass_energy_count", -1), Ok(Value::Int32(6)));
    assert_eq!(
        w.set_property("lens_mode", -1, &Value::String("Wide".into())),
        Err(Error::IncorrectLensMode)
    );
    assert_eq!(
        w.set_property("pass_energy", -1, &Value::Double(3.0)),
        Err(Error::IncorrectPassEnergy)
    );
    w.set_property("pass_energy", -1, &Value::Double(20.0)).unwrap();
    assert_eq!(w.get_property("pass_energy", -1), Ok(Value::Double(20.0)));

    assert_eq!(w.validate("High Pass (XPS)", "Transmission", 2.0, 100.0), Ok(()));
    assert_eq!(
        w.validate("High Pass (XPS)", "Angular30", 2.0, 100.0),
        Err(Error::IncorrectPassEnergy)
    );
    assert_eq!(
        w.validate("Medium Pass", "Transmission", 2.0, 100.0),
        Err(Error::IncorrectElementSet)
    );
    assert_eq!(
        w.validate("High Pass (XPS)", "Wide", 2.0, 100.0),
        Err(Error::IncorrectLensMode)
    );
}

#[test]
fn test_region_properties() {
    let mut w = loaded();
    let name = "a region name that is far too long to be stored";
    w.set_property("region_name", -1, &Value::String(name.into())).unwrap();
    assert_eq!(w.get_property("region_name", -1), Ok(Value::String(name[..31].into())));

    w.set_property("use_binding_energy", -1, &Value::Bool(true)).unwrap();
    assert_eq!(w.get_property("use_binding_energy", -1), Ok(Value::Bool(true)));

    w.set_property("use_external_io", -1, &Value::Bool(true)).unwrap();
    assert_eq!(w.get_property("use_detector", -1), Ok(Value::Bool(true)));
    w.set_property("use_detector", -1, &Value::Bool(false)).unwrap();
    assert_eq!(w.get_property("use_external_io", -1), Ok(Value::Bool(true)));
    assert_eq!(w.get_property("use_detector", -1), Ok(Value::Bool(false)));
    assert_eq!(w.get_property("use_spin", -1), Err(Error::NotApplicable));

    let det = DetectorRegion::new(0, 31, 0, 15, 2, true);
    w.set_property("detector_region", -1, &Value::DetectorRegion(det))
        .unwrap();
    assert_eq!(w.get_property("detector_region", -1), Ok(Value::DetectorRegion(det)));
}

#[test]
fn test_spin_detectors() {
    let mut w = loaded_with(SimulatedInstrument::new().with_detector_count(4));
    assert_eq!(w.get_property("use_spin", -1), Ok(Value::Bool(false)));
    w.set_property("use_spin", 3, &Value::Bool(true)).unwrap();
    assert_eq!(w.get_property("use_spin", 3), Ok(Value::Bool(true)));
    assert_eq!(w.get_property("use_spin", 2), Ok(Value::Bool(false)));
    assert_eq!(w.get_property("use_spin", 1), Err(Error::Index));
    assert_eq!(w.get_property("use_spin", 4), Err(Error::Index));
}

#[test]
fn test_check_analyzer_region() {
    let mut w = loaded();
    let region = AnalyzerRegion::new(false, 12.0, 10.0, 0.0, 0.5, 100);
    w.set_property("analyzer_region", -1, &Value::AnalyzerRegion(region))
        .unwrap();
    let (adjusted, check) = w.check_analyzer_region().unwrap();
    assert_eq!(check.steps, 5);
    assert_eq!(check.time_ms, 500.0);
    assert_eq!(adjusted, region);
    assert_eq!(w.get_property("analyzer_region", -1), Ok(Value::AnalyzerRegion(region)));

    // a step below the analyser's resolution is raised by the check
    let fine = AnalyzerRegion::new(false, 12.0, 10.0, 0.0, 0.000_01, 100);
    w.set_property("analyzer_region", -1, &Value::AnalyzerRegion(fine))
        .unwrap();
    let (adjusted, check) = w.check_analyzer_region().unwrap();
    assert_eq!(adjusted.energy_step, check.min_energy_step);
    assert_eq!(w.get_property("analyzer_region", -1), Ok(Value::AnalyzerRegion(adjusted)));

    let bad = AnalyzerRegion::new(false, 10.0, 12.0, 0.0, 0.5, 100);
    w.set_property("analyzer_region", -1, &Value::AnalyzerRegion(bad))
        .unwrap();
    assert_eq!(w.check_analyzer_region(), Err(Error::IncorrectAnalyzerRegion));
    assert_eq!(w.get_property("analyzer_region", -1), Ok(Value::AnalyzerRegion(bad)));
}

#[test]
fn test_iteration_counter() {
    let mut w = loaded();
    swept(&mut w, 10.0, 11.0, 0.5);
    w.init_acquisition(false, false).unwrap();
    assert_eq!(w.acquisition().iteration(), 0);
    w.start_acquisition().unwrap();
    assert_eq!(w.acquisition().iteration(), 1);
    assert_eq!(w.wait_for_region_ready(LONG), Ok(Wait::Ready));

    w.start_acquisition().unwrap();
    assert_eq!(w.acquisition().iteration(), 2);
    assert_eq!(w.wait_for_region_ready(LONG), Ok(Wait::Ready));
    assert_eq!(w.get_acquired_data("acq_channels", -1), Ok(Value::Int32(3)));
    assert_eq!(w.get_acquired_data("acq_iterations", -1), Ok(Value::Int32(2)));

    w.set_property("reset_data_between_iterations", -1, &Value::Bool(true))
        .unwrap();
    w.start_acquisition().unwrap();
    assert_eq!(w.acquisition().iteration(), 1);
    assert_eq!(w.wait_for_region_ready(LONG), Ok(Wait::Ready));
}

#[test]
fn test_idle_stop_and_wait() {
    let w = loaded();
    w.stop_acquisition().unwrap();
    w.stop_acquisition().unwrap();
    assert!(!w.acquisition().events_pending());
    assert_eq!(w.acquisition_state(), AcqState::Idle);
    // nothing runs, so nothing to wait for even without a timeout
    assert_eq!(w.wait_for_point_ready(Some(Duration::from_millis(0))), Ok(Wait::Ready));
    assert_eq!(w.wait_for_region_ready(Some(Duration::from_millis(0))), Ok(Wait::Ready));
    assert_eq!(w.wait_for_region_ready(None), Ok(Wait::Ready));
}

#[test]
fn test_region_wait_follows_hardware() {
    let mut w = loaded();
    swept(&mut w, 10.0, 11.0, 0.5);
    w.init_acquisition(false, false).unwrap();
    // the session runs, the instrument does not
    w.acquisition().start(false).unwrap();
    assert_eq!(w.acquisition_state(), AcqState::Running);
    assert_eq!(
        w.get_property("instrument_status", -1),
        Ok(Value::Int32(InstrumentStatus::Normal.raw()))
    );
    let started = Instant::now();
    assert_eq!(w.wait_for_region_ready(Some(Duration::from_millis(500))), Ok(Wait::Ready));
    assert_eq!(w.wait_for_point_ready(None), Ok(Wait::Ready));
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn test_wait_without_timeout() {
    let mut w = loaded_with(SimulatedInstrument::new().with_step_delay(Duration::from_millis(20)));
    swept(&mut w, 10.0, 12.0, 0.5);
    w.init_acquisition(false, false).unwrap();
    w.start_acquisition().unwrap();
    assert_eq!(w.wait_for_point_ready(None), Ok(Wait::Ready));
    assert_eq!(w.wait_for_region_ready(None), Ok(Wait::Ready));
    assert_eq!(w.acquisition_state(), AcqState::Completed);
    assert_eq!(w.get_acquired_data("acq_iterations", -1), Ok(Value::Int32(1)));

    // a stop reaches a waiter without a time limit
    w.start_acquisition().unwrap();
    let w = Arc::new(w);
    let waiter = {
        let w = w.clone();
        thread::spawn(move || w.wait_for_region_ready(None))
    };
    thread::sleep(Duration::from_millis(20));
    w.stop_acquisition().unwrap();
    assert_eq!(waiter.join().unwrap(), Ok(Wait::Aborted));
}

#[test]
fn test_block_on_point() {
    let mut w = loaded();
    swept(&mut w, 10.0, 11.0, 0.5);
    w.init_acquisition(true, false).unwrap();
    w.start_acquisition().unwrap();
    for point in 0..3 {
        assert_eq!(w.wait_for_point_ready(LONG), Ok(Wait::Ready));
        assert_eq!(w.get_acquired_data("acq_current_point", -1), Ok(Value::Int32(point)));
        w.continue_acquisition().unwrap();
    }
    assert_eq!(w.wait_for_region_ready(LONG), Ok(Wait::Ready));
    assert_eq!(w.acquisition().current_step(), 3);
}

#[test]
fn test_stop_wakes_waiter() {
    let mut w = loaded_with(SimulatedInstrument::new().with_step_delay(Duration::from_millis(50)));
    swept(&mut w, 10.0, 20.0, 0.1);
    w.init_acquisition(false, false).unwrap();
    w.start_acquisition().unwrap();
    let w = Arc::new(w);
    let waiter = {
        let w = w.clone();
        thread::spawn(move || w.wait_for_region_ready(LONG))
    };
    thread::sleep(Duration::from_millis(20));
    w.stop_acquisition().unwrap();
    assert_eq!(waiter.join().unwrap(), Ok(Wait::Aborted));
    assert_eq!(w.acquisition_state(), AcqState::Aborted);
    assert!(!w.acquisition().events_pending());
}

#[test]
fn test_wait_times_out() {
    let mut w = loaded_with(SimulatedInstrument::new().with_step_delay(Duration::from_millis(200)));
    swept(&mut w, 10.0, 11.0, 0.5);
    w.init_acquisition(false, false).unwrap();
    w.start_acquisition().unwrap();
    assert_eq!(w.start_acquisition(), Err(Error::Acquiring));
    assert_eq!(w.init_acquisition(false, false), Err(Error::Fail));
    let res = w.wait_for_region_ready(Some(Duration::from_millis(10)));
    assert_eq!(res, Ok(Wait::TimedOut));
    assert_eq!(Wait::TimedOut.code(), 8);
    w.stop_acquisition().unwrap();
}

#[test]
fn test_acquired_data() {
    let mut w = loaded();
    swept(&mut w, 10.0, 11.0, 0.5);
    w.init_acquisition(false, false).unwrap();
    w.start_acquisition().unwrap();
    assert_eq!(w.wait_for_region_ready(LONG), Ok(Wait::Ready));

    let slices = match w.get_acquired_data("acq_slices", -1).unwrap() {
        Value::Int32(n) => n,
        v => panic!("{:?}", v),
    };
    assert!(slices > 0);
    assert_eq!(w.acquired_data_size("acq_image", -1), Ok(3 * slices as usize));
    assert_eq!(w.acquired_data_size("acq_slice", 0), Ok(3));
    assert_eq!(w.get_acquired_data("acq_slice", slices), Err(Error::Index));
    assert_eq!(w.acquired_data_size("acq_channel_scale", -1), Ok(3));
    assert_eq!(w.acquired_data_size("acq_channel_intensity", 1), Ok(slices as usize));
    assert_eq!(w.get_acquired_data("acq_channel_intensity", 3), Err(Error::Index));
    assert_eq!(w.get_acquired_data("acq_io_ports", -1), Ok(Value::Int32(2)));
    assert_eq!(
        w.get_acquired_data("acq_io_port_name", 1),
        Ok(Value::String("Photon flux".into()))
    );
    assert_eq!(w.get_acquired_data("acq_io_port_name", 2), Err(Error::Index));
    assert_eq!(w.acquired_data_size("acq_io_spectrum", 0), Ok(3));
    match w.get_acquired_data("acq_elapsed_time", -1) {
        Ok(Value::Double(ms)) => assert!(ms >= 0.0),
        v => panic!("{:?}", v),
    }
}

#[test]
fn test_energies() {
    let w = loaded();
    w.set_kinetic_energy(15.5).unwrap();
    assert_eq!(w.kinetic_energy(), Ok(15.5));
    assert_eq!(w.energy(Energy::Excitation), Ok(21.2));
    w.set_element_voltage("Focus", 12.0).unwrap();
    assert_eq!(w.element_voltage("Focus"), Ok(12.0));
    assert_eq!(w.element_voltage("Nope"), Err(Error::Fail));
    w.zero_supplies().unwrap();
    assert_eq!(w.element_voltage("Focus"), Ok(0.0));
}
