//! Per-module DWARF symbolization
//!
//! Loads a module's debug sections once and resolves module-relative
//! addresses to function names and source locations. Includes a cache so
//! repeated reports do not re-walk the line programs for the same address.

use addr2line::Context;
use anyhow::{Context as _, Result};
use gimli::{EndianArcSlice, RunTimeEndian};
use object::{Object, ObjectSection};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

/// Resolved (function, source location) pair; either half may be missing.
pub type SymbolizedFrame = (Option<String>, Option<String>);

/// DWARF context for one on-disk module.
pub struct ModuleSymbols {
    ctx: Context<EndianArcSlice<RunTimeEndian>>,
    /// Cache of resolved frames by module-relative address.
    cache: RefCell<HashMap<u64, SymbolizedFrame>>,
}

impl ModuleSymbols {
    /// Load debug info for the module at `path`.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if DWARF
    /// debug info cannot be loaded from it.
    pub fn load(path: &str) -> Result<Self> {
        let binary_data = fs::read(path).context("failed to read module file")?;

        let obj_file = object::File::parse(&*binary_data).context("failed to parse object file")?;

        let endian =
            if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section =
            |id: gimli::SectionId| -> Result<EndianArcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj_file
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
                Ok(EndianArcSlice::new(Arc::from(&*data), endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section)?;
        let ctx = Context::from_dwarf(dwarf).context("failed to load DWARF debug information")?;

        Ok(Self { ctx, cache: RefCell::new(HashMap::new()) })
    }

    /// Resolve a module-relative address to the innermost inlined frame's
    /// function name and `file:line`.
    pub fn resolve(&self, addr: u64) -> SymbolizedFrame {
        if let Some(cached) = self.cache.borrow().get(&addr) {
            return cached.clone();
        }

        let mut function = None;
        let mut location = None;

        if let Ok(mut frame_iter) = self.ctx.find_frames(addr).skip_all_loads() {
            while let Ok(Some(frame)) = frame_iter.next() {
                if function.is_none() {
                    function = frame
                        .function
                        .as_ref()
                        .and_then(|f| f.demangle().ok().map(|name| name.to_string()));
                }
                if location.is_none() {
                    location = frame.location.as_ref().and_then(|loc| {
                        loc.file.map(|file| match loc.line {
                            Some(line) => format!("{file}:{line}"),
                            None => file.to_string(),
                        })
                    });
                }
                if function.is_some() && location.is_some() {
                    break;
                }
            }
        }

        let resolved = (function, location);
        self.cache.borrow_mut().insert(addr, resolved.clone());
        resolved
    }
}
