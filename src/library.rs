// Part of seswrapper. Copyright 2018-2020 by the authors.
// This work is dual-licensed under Apache 2.0 and MIT terms.

use crate::types::{Error, Result};
use log::*;
use std::path::{Path, PathBuf};

/// A shared library loaded at runtime.
#[derive(Default)]
pub struct Library {
    handle: Option<dlopen2::raw::Library>,
    path: Option<PathBuf>,
}

impl Library {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the library at `path`. An already loaded library is unloaded
    /// first, also when loading the new one fails.
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.unload();
        match dlopen2::raw::Library::open(path) {
            Ok(handle) => {
                debug!("Library: loaded {}", path.display());
                self.handle = Some(handle);
                self.path = Some(path.to_owned());
                Ok(())
            }
            Err(e) => {
                warn!("Library: could not load {}: {}", path.display(), e);
                Err(Error::LoadLibrary)
            }
        }
    }

    /// Unload the library. Does nothing if nothing is loaded.
    pub fn unload(&mut self) {
        if let Some(handle) = self.handle.take() {
            drop(handle);
            if let Some(path) = self.path.take() {
                debug!("Library: unloaded {}", path.display());
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.handle.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Look up `name` and reinterpret it as `T`, which must be a function
    /// pointer type matching the exported symbol.
    ///
    /// # Safety
    ///
    /// The caller guarantees that `T` matches the symbol's real signature.
    pub unsafe fn resolve<T: Copy>(&self, name: &str) -> Option<T> {
        let handle = self.handle.as_ref()?;
        match handle.symbol::<T>(name) {
            Ok(sym) => Some(sym),
            Err(e) => {
                debug!("Library: symbol {} not resolved: {}", name, e);
                None
            }
        }
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        self.unload();
    }
}

#[test]
fn test_unloaded_library() {
    let mut lib = Library::new();
    assert!(!lib.is_loaded());
    lib.unload();
    assert!(!lib.is_loaded());
    assert!(lib.path().is_none());
    let sym: Option<extern "C" fn()> = unsafe { lib.resolve("GDS_Initialize") };
    assert!(sym.is_none());
}

#[test]
fn test_load_missing_library() {
    let mut lib = Library::new();
    let err = lib.load("/nonexistent/SESInstrument.dll").unwrap_err();
    assert_eq!(err, Error::LoadLibrary);
    assert!(!lib.is_loaded());
}
