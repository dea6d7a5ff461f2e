//! Run options for dumping and importing.

use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;

use crate::dumpfile::DumpFormat;

/// Optional allow-lists narrowing a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub tables: Option<Vec<String>>,
    pub stations: Option<Vec<i64>>,
    pub elements: Option<Vec<String>>,
}

impl Selection {
    pub fn allows_station(&self, station: i64) -> bool {
        self.stations.as_ref().map_or(true, |s| s.contains(&station))
    }

    /// Element codes compare case-insensitively (`ta` in the source, `TA`
    /// in the catalog).
    pub fn allows_element(&self, element: &str) -> bool {
        self.elements
            .as_ref()
            .map_or(true, |e| e.iter().any(|x| x.eq_ignore_ascii_case(element)))
    }

    /// Element allow-list in upper case, as the caches key it.
    pub fn elements_upper(&self) -> Option<Vec<String>> {
        self.elements
            .as_ref()
            .map(|e| e.iter().map(|x| x.to_uppercase()).collect())
    }
}

/// What happens after a panic has been caught and reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PanicPolicy {
    /// Re-raise the panic once the operator has been notified.
    #[default]
    Abort,
    /// Log it and carry on with the next table.
    Continue,
}

impl FromStr for PanicPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(PanicPolicy::Abort),
            "continue" => Ok(PanicPolicy::Continue),
            other => Err(format!("unknown panic policy '{}' (abort|continue)", other)),
        }
    }
}

/// Options for dump runs.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub base_dir: PathBuf,
    pub format: DumpFormat,
    pub selection: Selection,
    /// Re-dump tables whose output directory already exists.
    pub overwrite: bool,
}

/// Options for import runs.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub base_dir: PathBuf,
    pub format: DumpFormat,
    pub selection: Selection,
    pub skip_data: bool,
    pub skip_flags: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_defaults_allow_everything() {
        let all = Selection::default();
        assert!(all.allows_station(18700));
        assert!(all.allows_element("TA"));
        assert_eq!(all.elements_upper(), None);
    }

    #[test]
    fn test_selection_filters() {
        let sel = Selection {
            tables: None,
            stations: Some(vec![18700]),
            elements: Some(vec!["ta".into()]),
        };
        assert!(sel.allows_station(18700));
        assert!(!sel.allows_station(50540));
        assert!(sel.allows_element("TA"));
        assert!(!sel.allows_element("RR"));
        assert_eq!(sel.elements_upper(), Some(vec!["TA".to_string()]));
    }

    #[test]
    fn test_panic_policy_parse() {
        assert_eq!("abort".parse::<PanicPolicy>().unwrap(), PanicPolicy::Abort);
        assert_eq!("Continue".parse::<PanicPolicy>().unwrap(), PanicPolicy::Continue);
        assert!("ignore".parse::<PanicPolicy>().is_err());
    }
}
