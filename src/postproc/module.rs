// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Transforms loaded at run time.
//!
//! How a module is found is up to the [`ModuleLoader`] handed to
//! [`Registry::load_module`](super::Registry::load_module).
//! [`SharedLibraryLoader`] opens a shared library and resolves one C
//! function with the signature of [`ExternTransformFn`].

use super::Transform;
use crate::error::{Error, Result};
use libloading::{library_filename, Library};
use std::{
    ffi::c_int,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

/// C entry point of an external transform. Returns zero on success.
pub type ExternTransformFn = unsafe extern "C" fn(
    src: *const u8,
    src_len: usize,
    width: u32,
    height: u32,
    dst: *mut u8,
    dst_len: usize,
) -> c_int;

/// Symbol resolved when none is configured.
pub const DEFAULT_SYMBOL: &str = "grabber_transform";

/// Resolves a module name into a transform.
pub trait ModuleLoader {
    fn load(&self, name: &str) -> Result<Arc<dyn Transform>>;
}

/// Loads transforms from shared libraries.
///
/// A bare name such as `mytransform` is expanded to the platform file name
/// (`libmytransform.so`) and looked up in the search directory if one is
/// set, otherwise by the dynamic linker. Names containing a path separator
/// are used as given.
#[derive(Clone, Debug)]
pub struct SharedLibraryLoader {
    search_path: Option<PathBuf>,
    symbol: String,
}

impl Default for SharedLibraryLoader {
    fn default() -> Self {
        Self {
            search_path: None,
            symbol: DEFAULT_SYMBOL.to_string(),
        }
    }
}

impl SharedLibraryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = symbol.into();
        self
    }

    pub fn resolve(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.components().count() > 1 {
            return path.to_path_buf();
        }
        match &self.search_path {
            Some(dir) => dir.join(library_filename(name)),
            None => PathBuf::from(library_filename(name)),
        }
    }
}

impl ModuleLoader for SharedLibraryLoader {
    fn load(&self, name: &str) -> Result<Arc<dyn Transform>> {
        let path = self.resolve(name);
        let library = unsafe { Library::new(&path) }.map_err(|e| {
            Error::Configuration(format!("cannot load module {}: {e}", path.display()))
        })?;
        let func = unsafe { library.get::<ExternTransformFn>(self.symbol.as_bytes()) }
            .map(|symbol| *symbol)
            .map_err(|e| {
                Error::Configuration(format!(
                    "module {} has no symbol {}: {e}",
                    path.display(),
                    self.symbol
                ))
            })?;
        info!(module = %path.display(), symbol = %self.symbol, "transform module loaded");
        Ok(Arc::new(ExternalTransform {
            func,
            name: name.to_string(),
            _library: library,
        }))
    }
}

struct ExternalTransform {
    func: ExternTransformFn,
    name: String,
    // Keeps `func` mapped.
    _library: Library,
}

impl Transform for ExternalTransform {
    fn apply(&self, src: &[u8], width: u32, height: u32, dst: &mut [u8]) -> Result<()> {
        let rc = unsafe {
            (self.func)(
                src.as_ptr(),
                src.len(),
                width,
                height,
                dst.as_mut_ptr(),
                dst.len(),
            )
        };
        if rc != 0 {
            return Err(Error::TransformFailed(format!(
                "module {} returned {rc}",
                self.name
            )));
        }
        Ok(())
    }
}
