//! Properties that must hold for every family and every flag code.

use chrono::{TimeZone, Utc};
use conversion::flags::{FLAG_WIDTH, INVALID};
use conversion::{ConversionContext, ConversionFamily};
use kdvh_common::{ObsValue, RawObservation, TimeseriesId};

fn row(value: &str, flags: &str, hour: u32) -> RawObservation {
    RawObservation {
        station_id: 77062,
        table: "T_ADATA".to_string(),
        element_code: "TA".to_string(),
        obs_time: Utc.with_ymd_and_hms(2020, 1, 1, hour, 0, 0).unwrap(),
        raw_value: value.to_string(),
        raw_flags: flags.to_string(),
    }
}

fn sample_codes() -> Vec<String> {
    let mut codes: Vec<String> = ConversionFamily::ALL
        .iter()
        .flat_map(|f| f.flag_table().rules.iter().map(|r| r.code.to_string()))
        .collect();
    codes.extend(["00000", "12345", "99999", "00001", "-1234", "1.234"].map(String::from));
    codes
}

#[test]
fn valid_codes_yield_full_width_flags_deterministically() {
    let ctx = ConversionContext::new(TimeseriesId(1), "TA");
    for family in ConversionFamily::ALL {
        for code in sample_codes() {
            for value in ["", "1.5"] {
                let first = family.convert(&row(value, &code, 6), &ctx).unwrap().unwrap();
                let second = family.convert(&row(value, &code, 6), &ctx).unwrap().unwrap();
                assert_eq!(first, second);
                assert_eq!(first.use_flags.len(), FLAG_WIDTH, "{family} {code}");
                assert_eq!(first.control_flags.len(), FLAG_WIDTH, "{family} {code}");
                if family != ConversionFamily::VData {
                    assert_ne!(first.use_flags, INVALID, "{family} {code}");
                }
            }
        }
    }
}

#[test]
fn malformed_codes_are_invalid() {
    let ctx = ConversionContext::new(TimeseriesId(1), "TA");
    for family in ConversionFamily::ALL {
        for code in ["", "0000", "000000", "00 00", "1e100", "--123", "1..23", "ABCDE"] {
            let obs = family.convert(&row("1", code, 7), &ctx).unwrap().unwrap();
            assert_eq!(obs.use_flags, INVALID, "{family} {code:?}");
        }
    }
}

#[test]
fn null_sentinel_and_control_flags_travel_together() {
    let ctx = ConversionContext::new(TimeseriesId(1), "TA");
    for family in ConversionFamily::ALL {
        for code in sample_codes() {
            let obs = family.convert(&row("", &code, 0), &ctx).unwrap().unwrap();
            match (obs.value, obs.control_flags.as_str()) {
                (ObsValue::Scalar(v), "0000003000000000") => assert_eq!(v, -32767.0),
                (ObsValue::Scalar(v), "0000002000000000") => assert_eq!(v, -32766.0),
                (value, control) => panic!("{family} {code}: {value:?} with {control}"),
            }
        }
    }
}

#[test]
fn end_to_end_generic_row() {
    let ctx = ConversionContext::new(TimeseriesId(42), "TA");
    let obs = ConversionFamily::Generic
        .convert(&row("-5.3", "00000", 0), &ctx)
        .unwrap()
        .unwrap();
    assert_eq!(obs.timeseries, TimeseriesId(42));
    assert_eq!(obs.value, ObsValue::Scalar(-5.3));
    assert_eq!(obs.control_flags, "0000000000000000");
    assert_eq!(obs.use_flags, "0000000900000000");
}
