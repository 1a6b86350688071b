// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Read-only data parameters exposing the results of an acquisition.
//!
//! Counts read as zero before the first acquisition was initialized,
//! buffers fail with `Fail`.

use crate::registry::Registry;
use crate::types::*;
use crate::wrapper::State;

pub(crate) fn registry() -> Registry<State> {
    use ValueType::*;
    let mut reg = Registry::new();
    let params: &[(&str, ValueType, fn(&State, i32) -> Result<Value>)] = &[
        ("acq_channels", Int32, State::acq_channels),
        ("acq_slices", Int32, State::acq_slices),
        ("acq_iterations", Int32, State::acq_iterations),
        ("acq_intensity_unit", String, State::acq_intensity_unit),
        ("acq_channel_unit", String, State::acq_channel_unit),
        ("acq_slice_unit", String, State::acq_slice_unit),
        ("acq_spectrum", VectorDouble, State::acq_spectrum),
        ("acq_image", VectorDouble, State::acq_image),
        ("acq_slice", VectorDouble, State::acq_slice),
        ("acq_channel_scale", VectorDouble, State::acq_channel_scale),
        ("acq_slice_scale", VectorDouble, State::acq_slice_scale),
        ("acq_raw_image", VectorInt32, State::acq_raw_image),
        ("acq_current_step", Int32, State::acq_current_step),
        ("acq_current_point", Int32, State::acq_current_point),
        ("acq_elapsed_time", Double, State::acq_elapsed_time),
        ("acq_point_intensity", Double, State::acq_point_intensity),
        ("acq_channel_intensity", VectorDouble, State::acq_channel_intensity),
        ("acq_io_ports", Int32, State::acq_io_ports),
        ("acq_io_size", Int32, State::acq_io_size),
        ("acq_io_iterations", Int32, State::acq_io_iterations),
        ("acq_io_unit", String, State::acq_io_unit),
        ("acq_io_scale", VectorDouble, State::acq_io_scale),
        ("acq_io_spectrum", VectorDouble, State::acq_io_spectrum),
        ("acq_io_data", VectorDouble, State::acq_io_data),
        ("acq_io_port_name", String, State::acq_io_port_name),
    ];
    for &(name, ty, getter) in params {
        reg.register_read_only(name, ty, getter);
    }
    reg
}

impl State {
    fn spectrum(&self) -> Option<Spectrum> {
        if !self.instrument.is_loaded() {
            return None;
        }
        self.instrument.spectrum().ok().flatten()
    }

    fn with_spectrum<T>(&self, f: impl FnOnce(Spectrum) -> Result<T>) -> Result<T> {
        self.spectrum().map_or(Err(Error::Fail), f)
    }

    fn spectrum_count(&self, f: impl FnOnce(&Spectrum) -> i32) -> Result<Value> {
        Ok(Value::Int32(self.spectrum().as_ref().map_or(0, f)))
    }

    fn with_signals<T>(&self, f: impl FnOnce(Signals) -> Result<T>) -> Result<T> {
        if !self.instrument.is_loaded() {
            return Err(Error::Fail);
        }
        match self.instrument.signals() {
            Ok(Some(signals)) => f(signals),
            _ => Err(Error::Fail),
        }
    }

    fn acq_channels(&self, _: i32) -> Result<Value> {
        self.spectrum_count(|s| s.channels)
    }

    fn acq_slices(&self, _: i32) -> Result<Value> {
        self.spectrum_count(|s| s.slices)
    }

    fn acq_iterations(&self, _: i32) -> Result<Value> {
        self.spectrum_count(|s| s.sweeps)
    }

    fn acq_intensity_unit(&self, _: i32) -> Result<Value> {
        self.with_spectrum(|s| Ok(Value::String(s.count_unit)))
    }

    fn acq_channel_unit(&self, _: i32) -> Result<Value> {
        self.with_spectrum(|s| Ok(Value::String(s.channel_unit)))
    }

    fn acq_slice_unit(&self, _: i32) -> Result<Value> {
        self.with_spectrum(|s| Ok(Value::String(s.slice_unit)))
    }

    fn acq_spectrum(&self, _: i32) -> Result<Value> {
        self.with_spectrum(|s| Ok(Value::VectorDouble(s.sum_data)))
    }

    fn acq_image(&self, _: i32) -> Result<Value> {
        self.with_spectrum(|s| Ok(Value::VectorDouble(s.data)))
    }

    fn acq_slice(&self, index: i32) -> Result<Value> {
        self.with_spectrum(|s| {
            s.slice(index)
                .map(|row| Value::VectorDouble(row.to_vec()))
                .ok_or(Error::Index)
        })
    }

    fn acq_channel_scale(&self, _: i32) -> Result<Value> {
        self.with_spectrum(|s| Ok(Value::VectorDouble(s.channel_scale)))
    }

    fn acq_slice_scale(&self, _: i32) -> Result<Value> {
        self.with_spectrum(|s| Ok(Value::VectorDouble(s.slice_scale)))
    }

    fn acq_raw_image(&self, _: i32) -> Result<Value> {
        if !self.instrument.is_loaded() {
            return Err(Error::NoInstrument);
        }
        match self.instrument.raw_image() {
            Ok(image) => Ok(Value::VectorInt32(image.pixels())),
            Err(Error::NotImplemented) => Err(Error::NotInitialized),
            Err(_) => Err(Error::Fail),
        }
    }

    fn acq_current_step(&self, _: i32) -> Result<Value> {
        self.with_spectrum(|_| Ok(Value::Int32(self.acquisition.current_step())))
    }

    fn acq_current_point(&self, _: i32) -> Result<Value> {
        self.with_spectrum(|_| Ok(Value::Int32(self.acquisition.current_point())))
    }

    fn acq_elapsed_time(&self, _: i32) -> Result<Value> {
        let elapsed = self.acquisition.elapsed();
        Ok(Value::Double(elapsed.as_secs_f64() * 1000.0))
    }

    fn acq_point_intensity(&self, _: i32) -> Result<Value> {
        let point = self.acquisition.current_point();
        self.with_spectrum(|s| {
            if point < 0 {
                return Err(Error::Index);
            }
            s.sum_data
                .get(point as usize)
                .map(|&v| Value::Double(v))
                .ok_or(Error::Index)
        })
    }

    /// Intensity of every slice at one channel; index -1 is the channel of
    /// the point measured last.
    fn acq_channel_intensity(&self, index: i32) -> Result<Value> {
        let channel = if index == -1 {
            self.acquisition.current_point()
        } else {
            index
        };
        self.with_spectrum(|s| {
            if channel < 0 || channel >= s.channels {
                return Err(Error::Index);
            }
            let column = (0..s.slices)
                .filter_map(|slice| s.slice(slice).map(|row| row[channel as usize]))
                .collect();
            Ok(Value::VectorDouble(column))
        })
    }

    fn acq_io_ports(&self, _: i32) -> Result<Value> {
        self.with_signals(|s| Ok(Value::Int32(s.count)))
    }

    fn acq_io_size(&self, _: i32) -> Result<Value> {
        self.with_signals(|s| Ok(Value::Int32(s.steps)))
    }

    fn acq_io_iterations(&self, _: i32) -> Result<Value> {
        self.with_signals(|s| Ok(Value::Int32(s.sweeps)))
    }

    fn acq_io_unit(&self, _: i32) -> Result<Value> {
        self.with_signals(|s| Ok(Value::String(s.steps_unit)))
    }

    fn acq_io_scale(&self, _: i32) -> Result<Value> {
        self.with_signals(|s| Ok(Value::VectorDouble(s.steps_scale)))
    }

    fn acq_io_spectrum(&self, index: i32) -> Result<Value> {
        self.with_signals(|s| {
            s.port(index)
                .map(|port| Value::VectorDouble(port.to_vec()))
                .ok_or(Error::Index)
        })
    }

    fn acq_io_data(&self, _: i32) -> Result<Value> {
        self.with_signals(|s| Ok(Value::VectorDouble(s.data)))
    }

    fn acq_io_port_name(&self, index: i32) -> Result<Value> {
        self.with_signals(|s| {
            if index < 0 {
                return Err(Error::Index);
            }
            s.names
                .get(index as usize)
                .cloned()
                .map(Value::String)
                .ok_or(Error::Index)
        })
    }
}
