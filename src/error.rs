use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Any failed git operation (branch switch, stash, commit, fetch...).
    #[error("git: {0}")]
    Vcs(#[from] git2::Error),

    #[error("push of {refname} was rejected: {message}")]
    PushRejected { refname: String, message: String },

    #[error("repository has no `origin` remote")]
    NoOrigin,

    #[error("hosting API returned {status}: {body}")]
    RemoteApi { status: u16, body: String },

    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    #[error("commit message generation failed: {0}")]
    MessageGeneration(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("filesystem error at `{}`: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Network failures worth another attempt: timeouts, refused connections and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().map(|s| s.is_server_error()).unwrap_or(false)
            }
            Error::RemoteApi { status, .. } => *status >= 500,
            Error::Vcs(e) => e.class() == git2::ErrorClass::Net,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file `{}` not found", .0.display())]
    NotFound(PathBuf),

    #[error("unable to read config file `{}`: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file `{}`: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("projects_dir `{}` is not a directory", .0.display())]
    ProjectsDir(PathBuf),

    #[error("stale_after_hours must be at most {max}, got {value}")]
    StaleAfterOutOfRange { value: u64, max: u64 },

    #[error("could not determine a config directory; set GITHUB_AUTOSAVE_CONFIG_FILE")]
    NoConfigHome,
}
