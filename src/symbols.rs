//! Symbol resolution for function entry points
//!
//! Maps entry program counters recorded in the trace to function names and
//! source locations using DWARF debug info from the traced binary.
//!
//! Uses addr2line crate for robust DWARF parsing

use anyhow::{Context, Result};
use object::{Object, ObjectSection};
use std::fs::File;
use std::path::Path;
use tracing::debug;

/// A resolved symbol for an entry-point address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Function name
    pub function: String,
    /// Source file path (if available)
    pub file: Option<String>,
    /// Line number (if available)
    pub line: Option<u32>,
}

/// Address-to-function resolution capability.
///
/// Injected into the tracker's name lookup and the reporter so tests can
/// substitute a deterministic fake. Lookups are read-only and side-effect
/// free.
pub trait SymbolResolver {
    /// Resolve an entry-point address, or `None` if it has no symbol.
    fn lookup(&self, addr: u64) -> Option<Symbol>;
}

/// Resolver that never resolves; reports fall back to raw addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl SymbolResolver for NoSymbols {
    fn lookup(&self, _addr: u64) -> Option<Symbol> {
        None
    }
}

/// DWARF debug info resolver for an ELF binary
pub struct DwarfResolver {
    /// addr2line context for DWARF lookups
    context: addr2line::Context<gimli::EndianRcSlice<gimli::RunTimeEndian>>,
}

impl DwarfResolver {
    /// Load DWARF debug info from an ELF binary
    pub fn load(binary_path: &Path) -> Result<Self> {
        // Verify binary exists
        if !binary_path.exists() {
            anyhow::bail!("Binary does not exist: {}", binary_path.display());
        }

        // Open and parse ELF binary
        let file = File::open(binary_path)
            .with_context(|| format!("Failed to open binary: {}", binary_path.display()))?;

        let mmap = unsafe { memmap2::Mmap::map(&file) }
            .context("Failed to memory-map binary")?;

        let object = object::File::parse(&*mmap)
            .context("Failed to parse ELF binary")?;

        // Load DWARF sections from object file
        let endian = if object.is_little_endian() {
            gimli::RunTimeEndian::Little
        } else {
            gimli::RunTimeEndian::Big
        };

        // Helper to load a DWARF section
        let load_section = |id: gimli::SectionId| -> Result<gimli::EndianRcSlice<gimli::RunTimeEndian>> {
            let data = object
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or(std::borrow::Cow::Borrowed(&[]));
            // Convert Cow<[u8]> to Rc<[u8]> by converting to owned Vec first
            let bytes: std::rc::Rc<[u8]> = std::rc::Rc::from(data.into_owned());
            Ok(gimli::EndianRcSlice::new(bytes, endian))
        };

        // Load all DWARF sections
        let dwarf = gimli::Dwarf::load(&load_section)
            .context("Failed to load DWARF sections - binary may not have debug symbols. Compile with -g flag.")?;

        // Create addr2line context from DWARF
        let context = addr2line::Context::from_dwarf(dwarf)
            .context("Failed to create DWARF context")?;

        debug!(binary = %binary_path.display(), "DWARF debug info loaded");

        Ok(Self { context })
    }
}

impl SymbolResolver for DwarfResolver {
    /// Look up the function containing an entry-point address.
    ///
    /// Entry points are exact function start addresses, so no offset probing
    /// is needed; a miss simply means the address has no debug info.
    fn lookup(&self, addr: u64) -> Option<Symbol> {
        let mut function = None;

        // addr2line returns LookupResult which needs to be handled with load()
        if let Ok(mut frames_iter) = self.context.find_frames(addr).skip_all_loads() {
            if let Ok(Some(frame)) = frames_iter.next() {
                if let Some(func) = frame.function {
                    if let Ok(name) = func.raw_name() {
                        function = Some(name.to_string());
                    }
                }
            }
        }

        let function = function?;

        let (file, line) = match self.context.find_location(addr) {
            Ok(Some(location)) => (location.file.map(str::to_string), location.line),
            _ => (None, None),
        };

        Some(Symbol {
            function,
            file,
            line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    fn compile_test_binary() -> (TempDir, std::path::PathBuf) {
        let temp_dir = TempDir::new().unwrap();
        let src_file = temp_dir.path().join("test.rs");
        let bin_file = temp_dir.path().join("test_bin");

        fs::write(&src_file, "fn main() { println!(\"test\"); }").unwrap();

        Command::new("rustc")
            .arg(&src_file)
            .arg("-o")
            .arg(&bin_file)
            .arg("-g")
            .status()
            .unwrap();

        (temp_dir, bin_file)
    }

    #[test]
    fn test_dwarf_resolver_loads() {
        let (_temp_dir, bin_file) = compile_test_binary();
        let result = DwarfResolver::load(&bin_file);
        assert!(result.is_ok(), "Should load DWARF context: {:?}", result.err());
    }

    #[test]
    fn test_dwarf_resolver_missing_binary_fails() {
        let result = DwarfResolver::load(Path::new("/nonexistent/binary"));
        assert!(result.is_err());
    }

    #[test]
    fn test_dwarf_lookup_unmapped_address_is_none() {
        let (_temp_dir, bin_file) = compile_test_binary();
        let resolver = DwarfResolver::load(&bin_file).unwrap();
        // Address 1 is never a function entry point
        assert!(resolver.lookup(0x1).is_none());
    }

    #[test]
    fn test_no_symbols_never_resolves() {
        let resolver = NoSymbols;
        assert!(resolver.lookup(0x1000).is_none());
        assert!(resolver.lookup(0).is_none());
    }
}
