// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

//! Control layer for VG Scienta electron analysers driven through the
//! vendor's SESInstrument library.
//!
//! The entry point is [`SesWrapper`], built with [`WrapperBuilder`]. It
//! loads the instrument library at run time, exposes the analyser setup as
//! named, typed properties and runs acquisitions whose progress can be
//! waited for from any thread. [`SimulatedInstrument`] stands in for the
//! hardware. The [`capi`] module exports the same functionality as a flat
//! C interface, and [`driver::Analyser`] runs image acquisitions in a task.

use sesinstrument_sys as ses;

mod acquisition;
pub mod capi;
mod convert;
mod dll;
pub mod driver;
mod error_table;
pub mod feed;
mod instrument;
mod library;
mod parameters;
mod properties;
mod registry;
mod sim;
mod types;
mod wrapper;

pub use self::{
    acquisition::{AcqState, Acquisition, Notifier},
    convert::split_ses_list,
    dll::SesInstrument,
    error_table::ErrorTable,
    instrument::Instrument,
    library::Library,
    registry::{read_only, Getter, Registry, Setter},
    sim::SimulatedInstrument,
    types::*,
    wrapper::{default_library_path, SesWrapper, WrapperBuilder, SES_BASE_DIR},
};
