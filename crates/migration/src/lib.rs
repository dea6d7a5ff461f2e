//! KDVH to LARD migration: dumping legacy tables to files and importing
//! those files into the target archive.
//!
//! The two halves share the table catalog and the dump file layout:
//!
//! - [`Dumper`] enumerates (table, station, element) units in the legacy
//!   archive and writes one file per unit.
//! - [`Importer`] reads those files back, resolves a timeseries for every
//!   unit through [`IdentityResolver`], converts the rows and bulk loads
//!   them.
//!
//! Per-table work is wrapped in [`run_guarded`], which reports panics to the
//! operators before re-raising or continuing.

pub mod cache;
pub mod catalog;
pub mod dump;
pub mod dumpfile;
pub mod guard;
pub mod import;
pub mod notify;
pub mod options;
pub mod resolver;

pub use cache::{read_offsets, ReferenceCache, DEFAULT_OFFSETS_FILE};
pub use catalog::{ExtractionStrategy, TableCatalog, TableSpec};
pub use dump::{DumpReport, Dumper, UnitDump};
pub use dumpfile::{DumpFormat, DumpReader, DumpRecord, DumpWriter};
pub use guard::{install_panic_hook, run_guarded, settle};
pub use import::{Importer, TableReport, UnitReport};
pub use notify::{Notifier, PanicReport};
pub use options::{DumpOptions, ImportOptions, PanicPolicy, Selection};
pub use resolver::IdentityResolver;
