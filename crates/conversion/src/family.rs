//! Conversion families and their flag rule tables.
//!
//! Each family is a data table keyed on the exact five character legacy
//! flag code. Adding a code means adding a row, never a branch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::flags::{
    DELAY_IN_TIME, DELAY_NOT_CONSIDERED, EMPTY, EXPECTED_VALUE_MISSING, MISSING_SENTINEL,
    REMOVED_SENTINEL, VALUE_REMOVED_BY_QC,
};

/// What a null value becomes: a control string and its sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullMarker {
    /// Expected value missing (`-32767`).
    Missing,
    /// Value removed by quality control (`-32766`).
    RemovedByQc,
}

impl NullMarker {
    pub fn control_flags(&self) -> &'static str {
        match self {
            NullMarker::Missing => EXPECTED_VALUE_MISSING,
            NullMarker::RemovedByQc => VALUE_REMOVED_BY_QC,
        }
    }

    pub fn sentinel(&self) -> f64 {
        match self {
            NullMarker::Missing => MISSING_SENTINEL,
            NullMarker::RemovedByQc => REMOVED_SENTINEL,
        }
    }
}

/// One row of a family's flag table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagRule {
    pub code: &'static str,
    /// `controlinfo` when the value is present.
    pub present: &'static str,
    pub null: NullMarker,
    /// Replaces the `useinfo` derived from the code itself.
    pub use_flags: Option<&'static str>,
}

const fn rule(code: &'static str, present: &'static str, null: NullMarker) -> FlagRule {
    FlagRule {
        code,
        present,
        null,
        use_flags: None,
    }
}

const fn rule_with_use(
    code: &'static str,
    present: &'static str,
    null: NullMarker,
    use_flags: &'static str,
) -> FlagRule {
    FlagRule {
        code,
        present,
        null,
        use_flags: Some(use_flags),
    }
}

/// Flag table for a family: explicit rules plus the `useinfo` tail used
/// when a code has no rule.
#[derive(Debug)]
pub struct FlagTable {
    pub rules: &'static [FlagRule],
    /// Tail appended to codes found in `rules`.
    pub rule_tail: &'static str,
    /// Tail appended to codes not found in `rules`.
    pub default_tail: &'static str,
}

impl FlagTable {
    pub fn lookup(&self, code: &str) -> Option<&FlagRule> {
        self.rules.iter().find(|r| r.code == code)
    }
}

use NullMarker::{Missing, RemovedByQc};

const MANUALLY_INTERPOLATED: &str = "0000004000000005";
const CORRECTED_WITH_MANUAL_INTERPOLATION: &str = "0000001000000005";
const QC_SUSPECT: &str = "0000004000000000";
const ACCUMULATED_PASS: &str = "0000000000000001";

static GENERIC_RULES: FlagTable = FlagTable {
    rules: &[],
    rule_tail: DELAY_NOT_CONSIDERED,
    default_tail: DELAY_NOT_CONSIDERED,
};

static E_RULES: FlagTable = FlagTable {
    rules: &[
        rule("70000", EMPTY, Missing),
        rule("70101", EMPTY, Missing),
        rule("70381", EMPTY, RemovedByQc),
        rule("70389", EMPTY, RemovedByQc),
        rule("90989", EMPTY, RemovedByQc),
        rule("99999", EMPTY, Missing),
    ],
    rule_tail: DELAY_NOT_CONSIDERED,
    default_tail: DELAY_NOT_CONSIDERED,
};

static P_RULES: FlagTable = FlagTable {
    rules: &[
        rule("00000", EMPTY, Missing),
        rule("10000", ACCUMULATED_PASS, Missing),
        rule("30000", ACCUMULATED_PASS, Missing),
        rule("40000", ACCUMULATED_PASS, Missing),
        rule("50000", EMPTY, Missing),
        rule("60000", EMPTY, Missing),
        rule("70000", EMPTY, Missing),
        rule("70103", EMPTY, Missing),
        rule("70203", EMPTY, Missing),
        rule_with_use("50205", EMPTY, Missing, "7020500900000000"),
        rule("10319", MANUALLY_INTERPOLATED, Missing),
        rule("30319", MANUALLY_INTERPOLATED, Missing),
        rule("40319", MANUALLY_INTERPOLATED, Missing),
        rule("99319", QC_SUSPECT, Missing),
        rule("10329", MANUALLY_INTERPOLATED, Missing),
        rule("70381", QC_SUSPECT, RemovedByQc),
        rule_with_use("71381", QC_SUSPECT, RemovedByQc, "7038100900000000"),
        rule("50383", QC_SUSPECT, RemovedByQc),
        rule("20389", QC_SUSPECT, RemovedByQc),
        rule("30389", QC_SUSPECT, RemovedByQc),
        rule("40389", QC_SUSPECT, RemovedByQc),
        rule("90909", EMPTY, Missing),
        rule("40929", "0000000000000005", Missing),
        rule("48929", CORRECTED_WITH_MANUAL_INTERPOLATION, Missing),
        rule("48999", CORRECTED_WITH_MANUAL_INTERPOLATION, Missing),
        rule("71000", EMPTY, Missing),
        rule("71203", EMPTY, Missing),
        rule("99999", EMPTY, Missing),
    ],
    rule_tail: DELAY_NOT_CONSIDERED,
    default_tail: DELAY_IN_TIME,
};

static N_RULES: FlagTable = FlagTable {
    rules: &[
        rule("30319", MANUALLY_INTERPOLATED, Missing),
        rule("38929", CORRECTED_WITH_MANUAL_INTERPOLATION, Missing),
        rule("40000", ACCUMULATED_PASS, Missing),
        rule("40100", ACCUMULATED_PASS, Missing),
        rule("40315", MANUALLY_INTERPOLATED, Missing),
        rule("40319", MANUALLY_INTERPOLATED, Missing),
        rule("43325", "0000004000000006", Missing),
        rule("48325", "0000001000000006", Missing),
        rule("49225", "0000000000000005", Missing),
        rule("49915", "0000000000000005", Missing),
        rule("70000", EMPTY, Missing),
        rule("70204", EMPTY, Missing),
        rule("70389", QC_SUSPECT, RemovedByQc),
        rule("71000", EMPTY, Missing),
        rule("73309", QC_SUSPECT, Missing),
        rule("78937", "0000001000000000", Missing),
        rule("90909", EMPTY, Missing),
        rule("93399", QC_SUSPECT, Missing),
        rule("98999", "0000001000000000", Missing),
        rule("99999", EMPTY, Missing),
    ],
    rule_tail: DELAY_NOT_CONSIDERED,
    default_tail: DELAY_IN_TIME,
};

/// Per-table-family conversion behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionFamily {
    /// Plain flag passthrough.
    Generic,
    /// Generic, then the cached time offset is added to the obs time.
    Product,
    /// T_EDATA rules.
    EData,
    /// T_PDATA rules.
    PData,
    /// T_NDATA rules.
    NData,
    /// T_VDATA: `useinfo` depends on the hour of day.
    VData,
}

impl ConversionFamily {
    pub const ALL: [ConversionFamily; 6] = [
        ConversionFamily::Generic,
        ConversionFamily::Product,
        ConversionFamily::EData,
        ConversionFamily::PData,
        ConversionFamily::NData,
        ConversionFamily::VData,
    ];

    /// Flag table consulted for `useinfo`/`controlinfo`.
    ///
    /// The V family only uses the generic control rules; its `useinfo`
    /// comes from the observation hour instead.
    pub fn flag_table(&self) -> &'static FlagTable {
        match self {
            ConversionFamily::Generic | ConversionFamily::Product | ConversionFamily::VData => {
                &GENERIC_RULES
            }
            ConversionFamily::EData => &E_RULES,
            ConversionFamily::PData => &P_RULES,
            ConversionFamily::NData => &N_RULES,
        }
    }

    /// Whether non-numeric values may be stored as non-scalar data.
    pub fn supports_non_scalar(&self) -> bool {
        matches!(self, ConversionFamily::Generic | ConversionFamily::Product)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConversionFamily::Generic => "generic",
            ConversionFamily::Product => "product",
            ConversionFamily::EData => "edata",
            ConversionFamily::PData => "pdata",
            ConversionFamily::NData => "ndata",
            ConversionFamily::VData => "vdata",
        }
    }
}

impl fmt::Display for ConversionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConversionFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConversionFamily::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown conversion family '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::{flags_are_valid, FLAG_WIDTH};
    use std::collections::HashSet;

    #[test]
    fn test_rule_tables_are_well_formed() {
        for family in ConversionFamily::ALL {
            let table = family.flag_table();
            let mut seen = HashSet::new();
            for rule in table.rules {
                assert!(flags_are_valid(rule.code), "{family}: {}", rule.code);
                assert!(seen.insert(rule.code), "{family}: duplicate {}", rule.code);
                assert_eq!(rule.present.len(), FLAG_WIDTH);
                if let Some(use_flags) = rule.use_flags {
                    assert_eq!(use_flags.len(), FLAG_WIDTH);
                }
            }
        }
    }

    #[test]
    fn test_removed_by_qc_codes() {
        let removed: Vec<_> = E_RULES
            .rules
            .iter()
            .filter(|r| r.null == RemovedByQc)
            .map(|r| r.code)
            .collect();
        assert_eq!(removed, vec!["70381", "70389", "90989"]);

        let n = ConversionFamily::NData.flag_table().lookup("70389").unwrap();
        assert_eq!(n.null.sentinel(), REMOVED_SENTINEL);
        assert_eq!(n.null.control_flags(), VALUE_REMOVED_BY_QC);
    }

    #[test]
    fn test_family_names_roundtrip() {
        for family in ConversionFamily::ALL {
            assert_eq!(family.name().parse::<ConversionFamily>().unwrap(), family);
        }
        assert!("xdata".parse::<ConversionFamily>().is_err());
    }
}
