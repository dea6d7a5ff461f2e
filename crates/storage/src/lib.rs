//! Storage abstractions for the KDVH migration.
//!
//! Provides unified interfaces for:
//! - the legacy KDVH archive (read-only, behind a Postgres proxy)
//! - the LARD target archive (timeseries identities and bulk loads)
//! - the Stinfosys parameter catalog (read-only metadata)

pub mod ident;
pub mod source;
pub mod stinfo;
pub mod target;
pub mod traits;

pub use ident::validate_ident;
pub use source::{DumpRow, RowFilter, SourceArchive, UnitQuery, EXCLUDED_COLUMNS};
pub use stinfo::ParameterCatalog;
pub use target::TargetArchive;
pub use traits::{LegacySource, ObservationSink, ParameterSource, TimeseriesStore};
