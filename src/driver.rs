// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! An area detector style acquisition task on top of [`SesWrapper`].
//!
//! The task waits for an acquire command, then acquires the configured
//! region once per image and publishes every finished image as a [`Frame`].

use crate::acquisition::AcqState;
use crate::types::*;
use crate::wrapper::SesWrapper;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use derive_new::new;
use log::*;
use parking_lot::{Mutex, RwLock};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

const POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMode {
    Single,
    Multiple,
    Continuous,
}

/// Detector status, numbered like the area detector `ADStatus` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum DetectorStatus {
    Idle = 0,
    Acquire = 1,
    Readout = 2,
    Aborting = 5,
    Error = 6,
    Waiting = 7,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Params {
    pub acquire: bool,
    pub status: DetectorStatus,
    pub status_message: String,
    pub image_mode: ImageMode,
    pub num_images: i32,
    pub num_images_counter: i32,
    pub array_counter: i32,
    pub acquire_period: Duration,
}

impl Default for Params {
    fn default() -> Self {
        Params {
            acquire: false,
            status: DetectorStatus::Idle,
            status_message: String::new(),
            image_mode: ImageMode::Single,
            num_images: 1,
            num_images_counter: 0,
            array_counter: 0,
            acquire_period: Duration::from_secs(0),
        }
    }
}

/// One acquired image: `height` slices of `width` channels.
#[derive(Debug, Clone, PartialEq, new)]
pub struct Frame {
    pub number: i32,
    pub width: i32,
    pub height: i32,
    pub data: Vec<f64>,
    pub spectrum: Vec<f64>,
    pub channel_scale: Vec<f64>,
}

enum Command {
    Start,
    Stop,
    Shutdown,
}

struct Shared {
    params: Mutex<Params>,
    wrapper: RwLock<SesWrapper>,
}

impl Shared {
    fn set_status(&self, status: DetectorStatus, message: &str) {
        let mut p = self.params.lock();
        p.status = status;
        p.status_message = message.into();
    }
}

pub struct Analyser {
    shared: Arc<Shared>,
    commands: Sender<Command>,
    frames: Receiver<Frame>,
    task: Option<JoinHandle<()>>,
}

impl Analyser {
    /// Take over `wrapper` and start the acquisition task.
    pub fn new(wrapper: SesWrapper) -> Result<Self> {
        let shared = Arc::new(Shared {
            params: Mutex::new(Params::default()),
            wrapper: RwLock::new(wrapper),
        });
        let (cmd_tx, cmd_rx) = unbounded();
        let (frame_tx, frame_rx) = unbounded();
        let task = Task {
            shared: shared.clone(),
            commands: cmd_rx,
            frames: frame_tx,
        };
        let handle = thread::Builder::new()
            .name("analyser-task".into())
            .spawn(move || task.run())
            .map_err(|_| Error::Fail)?;
        Ok(Analyser {
            shared,
            commands: cmd_tx,
            frames: frame_rx,
            task: Some(handle),
        })
    }

    /// Configure the wrapper. Blocks while an image is being acquired.
    pub fn wrapper(&self) -> &RwLock<SesWrapper> {
        &self.shared.wrapper
    }

    pub fn frames(&self) -> &Receiver<Frame> {
        &self.frames
    }

    pub fn params(&self) -> Params {
        self.shared.params.lock().clone()
    }

    pub fn set_image_mode(&self, mode: ImageMode) {
        self.shared.params.lock().image_mode = mode;
    }

    pub fn set_num_images(&self, n: i32) {
        self.shared.params.lock().num_images = n.max(1);
    }

    pub fn set_acquire_period(&self, period: Duration) {
        self.shared.params.lock().acquire_period = period;
    }

    pub fn start(&self) -> Result<()> {
        {
            let mut p = self.shared.params.lock();
            if p.acquire {
                return Ok(());
            }
            p.acquire = true;
            p.num_images_counter = 0;
        }
        self.commands.send(Command::Start).map_err(|_| Error::Fail)
    }

    pub fn stop(&self) -> Result<()> {
        {
            let mut p = self.shared.params.lock();
            if p.acquire {
                p.status = DetectorStatus::Aborting;
            }
            p.acquire = false;
        }
        if let Err(e) = self.shared.wrapper.read_recursive().stop_acquisition() {
            debug!("Analyser: stop: {}", e);
        }
        self.commands.send(Command::Stop).map_err(|_| Error::Fail)
    }
}

impl Drop for Analyser {
    fn drop(&mut self) {
        let _ = self.stop();
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if task.join().is_err() {
                error!("Analyser: acquisition task panicked");
            }
        }
    }
}

struct Task {
    shared: Arc<Shared>,
    commands: Receiver<Command>,
    frames: Sender<Frame>,
}

impl Task {
    fn run(self) {
        debug!("Analyser: task started");
        loop {
            if !self.shared.params.lock().acquire {
                {
                    let mut p = self.shared.params.lock();
                    if p.status != DetectorStatus::Error {
                        p.status = DetectorStatus::Idle;
                        p.status_message = "Waiting for acquire command".into();
                    }
                }
                match self.commands.recv() {
                    Ok(Command::Start) | Ok(Command::Stop) => continue,
                    Ok(Command::Shutdown) | Err(_) => break,
                }
            }

            let started = Instant::now();
            self.shared.set_status(DetectorStatus::Acquire, "Acquiring");
            let frame = match self.acquire_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    info!("Analyser: acquisition aborted");
                    self.finish(DetectorStatus::Idle, "Acquisition aborted");
                    continue;
                }
                Err(e) => {
                    warn!("Analyser: acquisition failed: {}", e);
                    self.finish(DetectorStatus::Error, &format!("Acquisition failed: {}", e));
                    continue;
                }
            };

            let (acquire, period, number) = {
                let mut p = self.shared.params.lock();
                p.num_images_counter += 1;
                p.array_counter += 1;
                let done = match p.image_mode {
                    ImageMode::Single => true,
                    ImageMode::Multiple => p.num_images_counter >= p.num_images,
                    ImageMode::Continuous => false,
                };
                if done {
                    p.acquire = false;
                    p.num_images_counter = 0;
                }
                (p.acquire, p.acquire_period, p.array_counter)
            };
            if self.frames.send(Frame { number, ..frame }).is_err() {
                debug!("Analyser: nobody listens for frames");
            }

            if acquire {
                if let Some(delay) = period.checked_sub(started.elapsed()) {
                    self.shared
                        .set_status(DetectorStatus::Waiting, "Waiting for next image");
                    match self.commands.recv_timeout(delay) {
                        Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                        _ => {}
                    }
                }
            }
        }
        debug!("Analyser: task stopped");
    }

    fn finish(&self, status: DetectorStatus, message: &str) {
        let mut p = self.shared.params.lock();
        p.acquire = false;
        p.status = status;
        p.status_message = message.into();
    }

    /// Acquire one region. `None` means it was aborted.
    fn acquire_frame(&self) -> Result<Option<Frame>> {
        self.shared.wrapper.write().init_acquisition(false, false)?;
        let wrapper = self.shared.wrapper.read_recursive();
        wrapper.start_acquisition()?;
        loop {
            if !self.shared.params.lock().acquire {
                // a stop that raced with the start above
                wrapper.stop_acquisition()?;
                return Ok(None);
            }
            match wrapper.wait_for_region_ready(Some(POLL))? {
                Wait::Ready if wrapper.acquisition_state() == AcqState::Aborted => return Ok(None),
                Wait::Ready => break,
                Wait::Aborted => return Ok(None),
                Wait::TimedOut => {}
            }
        }
        self.shared.set_status(DetectorStatus::Readout, "Reading out");
        let int = |name: &str| -> Result<i32> {
            match wrapper.get_acquired_data(name, -1)? {
                Value::Int32(i) => Ok(i),
                _ => Err(Error::NotApplicable),
            }
        };
        let vector = |name: &str| -> Result<Vec<f64>> {
            match wrapper.get_acquired_data(name, -1)? {
                Value::VectorDouble(v) => Ok(v),
                _ => Err(Error::NotApplicable),
            }
        };
        Ok(Some(Frame::new(
            0,
            int("acq_channels")?,
            int("acq_slices")?,
            vector("acq_image")?,
            vector("acq_spectrum")?,
            vector("acq_channel_scale")?,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedInstrument;

    fn analyser() -> Analyser {
        let sim = SimulatedInstrument::new().with_step_delay(Duration::from_millis(1));
        let mut wrapper = SesWrapper::builder()
            .working_dir("/tmp")
            .instrument(Box::new(sim))
            .build()
            .unwrap();
        wrapper.initialize().unwrap();
        wrapper.load_instrument("R4000.dat").unwrap();
        let region = AnalyzerRegion::new(false, 11.0, 10.0, 0.0, 0.5, 1);
        wrapper
            .set_property("analyzer_region", -1, &Value::AnalyzerRegion(region))
            .unwrap();
        Analyser::new(wrapper).unwrap()
    }

    #[test]
    fn test_multiple_images() {
        let an = analyser();
        an.set_image_mode(ImageMode::Multiple);
        an.set_num_images(2);
        an.start().unwrap();
        for n in 1..=2 {
            let frame = an.frames().recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(frame.number, n);
            assert_eq!(frame.width, 3);
            assert_eq!(frame.spectrum.len(), 3);
            assert_eq!(frame.data.len(), (frame.width * frame.height) as usize);
        }
        let deadline = Instant::now() + Duration::from_secs(5);
        while an.params().acquire && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let params = an.params();
        assert!(!params.acquire);
        assert_eq!(params.array_counter, 2);
    }

    #[test]
    fn test_stop_continuous() {
        let an = analyser();
        an.set_image_mode(ImageMode::Continuous);
        an.start().unwrap();
        an.frames().recv_timeout(Duration::from_secs(5)).unwrap();
        an.stop().unwrap();
        assert!(!an.params().acquire);
    }
}
