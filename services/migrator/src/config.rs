//! Command line arguments and their validation.
//!
//! Everything is checked before a connection is opened; a bad value is a
//! fatal configuration error.

use std::path::PathBuf;

use clap::Args;

use kdvh_common::{MigrationError, MigrationResult};
use migration::{DumpFormat, DumpOptions, ImportOptions, PanicPolicy, Selection, DEFAULT_OFFSETS_FILE};

/// Flags shared by `dump` and `import`.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Base directory of the dump files
    #[arg(long, default_value = "./")]
    pub dir: PathBuf,

    /// Single character separating the columns of a dump file
    #[arg(long, default_value = ";")]
    pub sep: String,

    /// Comma separated list of tables (default: all)
    #[arg(long)]
    pub table: Option<String>,

    /// Comma separated list of station numbers (default: all)
    #[arg(long)]
    pub station: Option<String>,

    /// Comma separated list of element codes (default: all)
    #[arg(long)]
    pub elemcode: Option<String>,

    /// Dump files start with a header line
    #[arg(long)]
    pub has_header: bool,

    /// Recipient of panic reports, repeatable
    #[arg(long)]
    pub email: Vec<String>,

    /// What to do after a panic has been reported (abort|continue)
    #[arg(long, default_value = "abort")]
    pub on_panic: PanicPolicy,

    /// Connection string of the KDVH proxy
    #[arg(long, env = "KDVH_PROXY_CONN", hide_env_values = true)]
    pub kdvh_conn: String,

    /// Webhook relaying panic reports to the recipients
    #[arg(long, env = "NOTIFY_WEBHOOK_URL")]
    pub notify_url: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DumpArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Dump tables again even if their directory already exists
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ImportArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Do not load observation values
    #[arg(long)]
    pub skip_data: bool,

    /// Do not load flags
    #[arg(long)]
    pub skip_flags: bool,

    /// CSV with time offsets of product parameters
    #[arg(long, default_value = DEFAULT_OFFSETS_FILE)]
    pub offsets: PathBuf,

    /// Connection string of LARD
    #[arg(long, env = "LARD_STRING", hide_env_values = true)]
    pub lard_conn: String,

    /// Connection string of Stinfosys
    #[arg(long, env = "STINFO_STRING", hide_env_values = true)]
    pub stinfo_conn: String,
}

/// Settings needed by every run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub kdvh_conn: String,
    pub notify_url: Option<String>,
    pub recipients: Vec<String>,
    pub on_panic: PanicPolicy,
}

#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub run: RunConfig,
    pub options: DumpOptions,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub run: RunConfig,
    pub options: ImportOptions,
    pub offsets: PathBuf,
    pub lard_conn: String,
    pub stinfo_conn: String,
}

fn split_list(list: Option<&str>) -> Option<Vec<String>> {
    list.map(|l| {
        l.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    })
}

fn parse_stations(list: Option<&str>) -> MigrationResult<Option<Vec<i64>>> {
    split_list(list)
        .map(|stations| {
            stations
                .iter()
                .map(|s| {
                    s.parse::<i64>()
                        .map_err(|_| MigrationError::Config(format!("Invalid station number '{}'", s)))
                })
                .collect()
        })
        .transpose()
}

fn parse_separator(sep: &str) -> MigrationResult<u8> {
    match sep.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => Err(MigrationError::Config(format!(
            "Separator must be a single ASCII character, got '{}'",
            sep
        ))),
    }
}

impl CommonArgs {
    fn format(&self) -> MigrationResult<DumpFormat> {
        Ok(DumpFormat {
            separator: parse_separator(&self.sep)?,
            has_header: self.has_header,
        })
    }

    fn selection(&self) -> MigrationResult<Selection> {
        Ok(Selection {
            tables: split_list(self.table.as_deref()),
            stations: parse_stations(self.station.as_deref())?,
            elements: split_list(self.elemcode.as_deref()),
        })
    }

    fn run(&self) -> RunConfig {
        RunConfig {
            kdvh_conn: self.kdvh_conn.clone(),
            notify_url: self.notify_url.clone(),
            recipients: self.email.clone(),
            on_panic: self.on_panic,
        }
    }
}

impl DumpConfig {
    pub fn from_args(args: DumpArgs) -> MigrationResult<Self> {
        Ok(Self {
            options: DumpOptions {
                base_dir: args.common.dir.clone(),
                format: args.common.format()?,
                selection: args.common.selection()?,
                overwrite: args.overwrite,
            },
            run: args.common.run(),
        })
    }
}

impl ImportConfig {
    pub fn from_args(args: ImportArgs) -> MigrationResult<Self> {
        if args.skip_data && args.skip_flags {
            return Err(MigrationError::Config(
                "Both --skip-data and --skip-flags are set, nothing to import".to_string(),
            ));
        }

        if !args.common.dir.is_dir() {
            return Err(MigrationError::Config(format!(
                "Dump directory {} does not exist",
                args.common.dir.display()
            )));
        }

        Ok(Self {
            options: ImportOptions {
                base_dir: args.common.dir.clone(),
                format: args.common.format()?,
                selection: args.common.selection()?,
                skip_data: args.skip_data,
                skip_flags: args.skip_flags,
            },
            run: args.common.run(),
            offsets: args.offsets,
            lard_conn: args.lard_conn,
            stinfo_conn: args.stinfo_conn,
        })
    }
}
