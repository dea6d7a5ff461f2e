//! Observation conversion engine.
//!
//! Turns one dumped KDVH row into a target observation with `controlinfo`
//! and `useinfo` flags, following the rules of the row's table family.

pub mod convert;
pub mod family;
pub mod flags;

pub use convert::{ConversionContext, ConversionError, OT_24};
pub use family::{ConversionFamily, FlagRule, FlagTable, NullMarker};
