//! Row conversion from a dumped KDVH observation to the target schema.

use chrono::{DateTime, Utc};
use thiserror::Error;

use kdvh_common::time::hour_of_day;
use kdvh_common::{
    format_dump_time, MigrationError, ObsValue, Period, RawObservation, TargetObservation,
    TimeseriesId, ValidityWindow, WindowPosition,
};

use crate::family::{ConversionFamily, NullMarker};
use crate::flags::{use_flags_for, COMPLETED_HQC, EMPTY, INVALID};

/// Element whose legacy encoding is 18 hours early and in hours instead
/// of minutes.
pub const OT_24: &str = "OT_24";

/// Hours at which the V family marks an observation as HQC-complete.
pub const SYNOP_HOURS: [u32; 4] = [0, 6, 12, 18];

/// Errors raised while converting a single row.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConversionError {
    #[error("non-scalar value '{value}' is not supported by the {family} family")]
    NonScalarNotSupported {
        family: ConversionFamily,
        value: String,
    },

    #[error("could not add period {period} to {time}")]
    PeriodArithmetic { period: Period, time: DateTime<Utc> },
}

impl From<ConversionError> for MigrationError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::PeriodArithmetic { period, time } => {
                MigrationError::PeriodArithmetic {
                    period: period.to_string(),
                    time: format_dump_time(&time),
                }
            }
            other => MigrationError::Conversion(other.to_string()),
        }
    }
}

/// Per-unit state shared by every row of a (table, station, element).
#[derive(Debug, Clone)]
pub struct ConversionContext {
    pub timeseries: TimeseriesId,
    pub element_code: String,
    pub offset: Period,
    pub window: Option<ValidityWindow>,
}

impl ConversionContext {
    pub fn new(timeseries: TimeseriesId, element_code: impl Into<String>) -> Self {
        Self {
            timeseries,
            element_code: element_code.into(),
            offset: Period::ZERO,
            window: None,
        }
    }

    pub fn with_offset(mut self, offset: Period) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_window(mut self, window: Option<ValidityWindow>) -> Self {
        self.window = window;
        self
    }

    /// Position of a legacy observation time relative to the validity
    /// window. Rows without a window are always inside.
    pub fn window_position(&self, time: &DateTime<Utc>) -> WindowPosition {
        self.window
            .as_ref()
            .map_or(WindowPosition::Inside, |w| w.position(time))
    }
}

/// Parsed form of the raw value column.
#[derive(Debug, Clone, PartialEq)]
enum RawValue {
    Number(f64),
    Null,
    Text(String),
}

fn parse_value(raw: &str) -> RawValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return RawValue::Null;
    }
    match trimmed.parse::<f64>() {
        Ok(v) => RawValue::Number(v),
        Err(_) => RawValue::Text(raw.to_string()),
    }
}

impl ConversionFamily {
    /// Convert one raw row.
    ///
    /// Returns `Ok(None)` when the row falls outside the unit's validity
    /// window.
    pub fn convert(
        &self,
        raw: &RawObservation,
        ctx: &ConversionContext,
    ) -> Result<Option<TargetObservation>, ConversionError> {
        if ctx.window_position(&raw.obs_time) != WindowPosition::Inside {
            return Ok(None);
        }

        let value = parse_value(&raw.raw_value);
        if let RawValue::Text(text) = &value {
            if !self.supports_non_scalar() {
                return Err(ConversionError::NonScalarNotSupported {
                    family: *self,
                    value: text.clone(),
                });
            }
        }

        let table = self.flag_table();
        let rule = table.lookup(&raw.raw_flags);

        let use_flags = match (self, rule) {
            (ConversionFamily::VData, _) => {
                if SYNOP_HOURS.contains(&hour_of_day(&raw.obs_time)) {
                    COMPLETED_HQC.to_string()
                } else {
                    INVALID.to_string()
                }
            }
            (_, Some(r)) => match r.use_flags {
                Some(fixed) => fixed.to_string(),
                None => use_flags_for(r.code, table.rule_tail),
            },
            (_, None) => use_flags_for(&raw.raw_flags, table.default_tail),
        };

        let null = rule.map_or(NullMarker::Missing, |r| r.null);
        let present = rule.map_or(EMPTY, |r| r.present);

        let is_real = matches!(value, RawValue::Number(_));
        let (obs_value, control_flags) = match value {
            RawValue::Number(v) => (ObsValue::Scalar(v), present),
            RawValue::Null => (ObsValue::Scalar(null.sentinel()), null.control_flags()),
            RawValue::Text(text) => (ObsValue::NonScalar(text), EMPTY),
        };

        let mut obs = TargetObservation {
            timeseries: ctx.timeseries,
            obs_time: raw.obs_time,
            value: obs_value,
            control_flags: control_flags.to_string(),
            use_flags,
        };

        match self {
            ConversionFamily::Product if !ctx.offset.is_zero() => {
                obs.obs_time = shift(&ctx.offset, obs.obs_time)?;
            }
            // every row is shifted, only real values are scaled
            ConversionFamily::VData if ctx.element_code == OT_24 => {
                obs.obs_time = shift(&Period::hours(18), obs.obs_time)?;
                if let (true, ObsValue::Scalar(v)) = (is_real, &mut obs.value) {
                    // hours to minutes
                    *v *= 60.0;
                }
            }
            _ => {}
        }

        Ok(Some(obs))
    }
}

fn shift(period: &Period, time: DateTime<Utc>) -> Result<DateTime<Utc>, ConversionError> {
    period
        .add_to(time)
        .ok_or(ConversionError::PeriodArithmetic {
            period: *period,
            time,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{EXPECTED_VALUE_MISSING, MISSING_SENTINEL, REMOVED_SENTINEL, VALUE_REMOVED_BY_QC};
    use chrono::TimeZone;

    fn raw(table: &str, element: &str, hour: u32, value: &str, flags: &str) -> RawObservation {
        RawObservation {
            station_id: 18700,
            table: table.into(),
            element_code: element.into(),
            obs_time: Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap(),
            raw_value: value.into(),
            raw_flags: flags.into(),
        }
    }

    fn ctx(element: &str) -> ConversionContext {
        ConversionContext::new(TimeseriesId(7), element)
    }

    fn convert(family: ConversionFamily, r: &RawObservation) -> TargetObservation {
        family.convert(r, &ctx(&r.element_code)).unwrap().unwrap()
    }

    #[test]
    fn test_generic_present_value() {
        let obs = convert(ConversionFamily::Generic, &raw("T_ADATA", "TA", 0, "-5.3", "00000"));
        assert_eq!(obs.value, ObsValue::Scalar(-5.3));
        assert_eq!(obs.control_flags, "0000000000000000");
        assert_eq!(obs.use_flags, "0000000900000000");
        assert_eq!(obs.timeseries, TimeseriesId(7));
    }

    #[test]
    fn test_generic_null_value() {
        let obs = convert(ConversionFamily::Generic, &raw("T_ADATA", "TA", 0, "", "00000"));
        assert_eq!(obs.value, ObsValue::Scalar(MISSING_SENTINEL));
        assert_eq!(obs.control_flags, EXPECTED_VALUE_MISSING);
    }

    #[test]
    fn test_generic_non_scalar() {
        let obs = convert(ConversionFamily::Generic, &raw("T_METARDATA", "METAR", 0, "EGLL 0600Z", "00000"));
        assert_eq!(obs.value, ObsValue::NonScalar("EGLL 0600Z".into()));
        assert_eq!(obs.control_flags, EMPTY);
    }

    #[test]
    fn test_non_scalar_rejected_for_flag_families() {
        for family in [
            ConversionFamily::EData,
            ConversionFamily::PData,
            ConversionFamily::NData,
            ConversionFamily::VData,
        ] {
            let err = family
                .convert(&raw("T_EDATA", "SA", 0, "abc", "70000"), &ctx("SA"))
                .unwrap_err();
            assert!(matches!(err, ConversionError::NonScalarNotSupported { .. }));
        }
    }

    #[test]
    fn test_invalid_flags() {
        for flags in ["", "1234", "123456", "12a45", "1.2.3"] {
            let obs = convert(ConversionFamily::Generic, &raw("T_ADATA", "TA", 0, "1", flags));
            assert_eq!(obs.use_flags, INVALID, "flags {flags:?}");
        }
    }

    #[test]
    fn test_edata_removed_by_qc() {
        let obs = convert(ConversionFamily::EData, &raw("T_EDATA", "SA", 0, "", "70381"));
        assert_eq!(obs.value, ObsValue::Scalar(REMOVED_SENTINEL));
        assert_eq!(obs.control_flags, VALUE_REMOVED_BY_QC);
        assert_eq!(obs.use_flags, "7038100900000000");

        let obs = convert(ConversionFamily::EData, &raw("T_EDATA", "SA", 0, "", "70000"));
        assert_eq!(obs.value, ObsValue::Scalar(MISSING_SENTINEL));
        assert_eq!(obs.control_flags, EXPECTED_VALUE_MISSING);
    }

    #[test]
    fn test_pdata_rules() {
        let obs = convert(ConversionFamily::PData, &raw("T_PDATA", "PO", 0, "1003.2", "10319"));
        assert_eq!(obs.control_flags, "0000004000000005");
        assert_eq!(obs.use_flags, "1031900900000000");

        let obs = convert(ConversionFamily::PData, &raw("T_PDATA", "PO", 0, "1003.2", "71381"));
        assert_eq!(obs.use_flags, "7038100900000000");

        let obs = convert(ConversionFamily::PData, &raw("T_PDATA", "PO", 0, "", "50383"));
        assert_eq!(obs.value, ObsValue::Scalar(REMOVED_SENTINEL));

        // unknown code falls back to the in-time tail
        let obs = convert(ConversionFamily::PData, &raw("T_PDATA", "PO", 0, "1", "12345"));
        assert_eq!(obs.use_flags, "1234500000000000");
        assert_eq!(obs.control_flags, EMPTY);
    }

    #[test]
    fn test_ndata_rules() {
        let obs = convert(ConversionFamily::NData, &raw("T_NDATA", "NN", 0, "4", "43325"));
        assert_eq!(obs.control_flags, "0000004000000006");

        let obs = convert(ConversionFamily::NData, &raw("T_NDATA", "NN", 0, "", "73309"));
        assert_eq!(obs.value, ObsValue::Scalar(MISSING_SENTINEL));
        assert_eq!(obs.control_flags, EXPECTED_VALUE_MISSING);
    }

    #[test]
    fn test_vdata_hour_dependence() {
        let at6 = convert(ConversionFamily::VData, &raw("T_VDATA", "WW", 6, "3", "00000"));
        let at7 = convert(ConversionFamily::VData, &raw("T_VDATA", "WW", 7, "3", "00000"));
        assert_eq!(at6.use_flags, COMPLETED_HQC);
        assert_eq!(at7.use_flags, INVALID);
        assert_eq!(at6.control_flags, at7.control_flags);
    }

    #[test]
    fn test_ot24_shift_and_scale() {
        let r = raw("T_VDATA", OT_24, 0, "2.0", "00000");
        let obs = convert(ConversionFamily::VData, &r);
        assert_eq!(obs.value, ObsValue::Scalar(120.0));
        assert_eq!(obs.obs_time, r.obs_time + chrono::Duration::hours(18));
    }

    #[test]
    fn test_ot24_null_row_is_shifted_not_scaled() {
        let obs = convert(ConversionFamily::VData, &raw("T_VDATA", OT_24, 6, "", "00000"));
        assert_eq!(obs.obs_time, Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(obs.value, ObsValue::Scalar(MISSING_SENTINEL));
        assert_eq!(obs.control_flags, EXPECTED_VALUE_MISSING);
        // hour rule sees the legacy hour
        assert_eq!(obs.use_flags, COMPLETED_HQC);
    }

    #[test]
    fn test_product_offset() {
        let r = raw("T_MONTH", "TAM", 6, "1.5", "00000");
        let offset = Period::parse("-PT6H").unwrap().checked_add(&Period::parse("P1M").unwrap()).unwrap();
        let obs = ConversionFamily::Product
            .convert(&r, &ctx("TAM").with_offset(offset))
            .unwrap()
            .unwrap();
        assert_eq!(obs.obs_time, Utc.with_ymd_and_hms(2020, 2, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_window_filter() {
        let window = ValidityWindow {
            table_name: "T_ADATA".into(),
            station_id: 18700,
            element_code: "TA".into(),
            from_time: Some(Utc.with_ymd_and_hms(2020, 1, 1, 6, 0, 0).unwrap()),
            to_time: None,
        };
        let c = ctx("TA").with_window(Some(window));
        let early = raw("T_ADATA", "TA", 0, "1", "00000");
        let late = raw("T_ADATA", "TA", 12, "1", "00000");
        assert_eq!(ConversionFamily::Generic.convert(&early, &c).unwrap(), None);
        assert!(ConversionFamily::Generic.convert(&late, &c).unwrap().is_some());
    }

    #[test]
    fn test_period_error_maps_to_row_error() {
        let err = ConversionError::PeriodArithmetic {
            period: Period::days(1),
            time: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
        };
        let migration: MigrationError = err.into();
        assert_eq!(migration.severity(), kdvh_common::Severity::Row);
    }
}
