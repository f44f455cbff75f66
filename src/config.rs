// config.rs - viewer settings from the command line and environment
//
// Flags win over environment variables, which win over the defaults.

use crate::source::Location;
use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_LANG: &str = "en";
const BIN_NAME: &str = "streetview_bricks";

/// Street View panoramas rebuilt out of bricks.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = BIN_NAME, version)]
pub struct ViewerConfig {
    /// Panorama pack root.
    #[arg(
        long = "data",
        env = "STREETVIEW_DATA",
        value_name = "DIR",
        default_value = DEFAULT_DATA_DIR
    )]
    pub data_dir: PathBuf,

    /// Panorama to open. Without one the viewer opens on Times Square.
    #[arg(long, env = "STREETVIEW_PANO", value_name = "ID")]
    pub pano: Option<String>,

    /// UI language code (en, fr, ja, zh-Hans).
    #[arg(long, env = "STREETVIEW_LANG", value_name = "CODE", default_value = DEFAULT_LANG)]
    pub lang: String,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            pano: None,
            lang: DEFAULT_LANG.to_string(),
        }
    }
}

impl ViewerConfig {
    /// Reads the process arguments. Prints usage and exits on bad input.
    pub fn from_env() -> Self {
        Self::parse().blanks_unset()
    }

    /// `args` excludes the program name.
    pub fn resolve<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        let argv = std::iter::once(OsString::from(BIN_NAME))
            .chain(args.into_iter().map(Into::into));
        Self::try_parse_from(argv).map(Self::blanks_unset)
    }

    /// Whitespace-only values, from a flag or the environment, mean "unset".
    fn blanks_unset(mut self) -> Self {
        let defaults = Self::default();
        if self.data_dir.as_os_str().to_string_lossy().trim().is_empty() {
            self.data_dir = defaults.data_dir;
        }
        self.pano = self.pano.filter(|p| !p.trim().is_empty());
        if self.lang.trim().is_empty() {
            self.lang = defaults.lang;
        }
        self
    }

    pub fn location(&self) -> Location {
        Location::from_route(self.pano.as_deref())
    }
}
