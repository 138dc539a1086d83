use std::{fmt, io, path::StripPrefixError};

use http::status::StatusCode;
use pulldown_cmark_to_cmark::Error as CmarkToCmarkError;
use regex::Error as RegexError;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;
use tempfile::PersistError;
use thiserror::Error;
use walkdir::Error as WalkDirError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum MantraError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Document conversion error: {0}")]
    Conversion(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("Index corruption: {0}")]
    IndexCorruption(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

impl MantraError {
    /// Status code for the web layer sitting on top of the service.
    pub fn status_code(&self) -> StatusCode {
        match self {
            MantraError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MantraError::Conversion(_) => StatusCode::UNPROCESSABLE_ENTITY,
            MantraError::Custom(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MantraError::IndexCorruption(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MantraError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MantraError::NotFound(_) => StatusCode::NOT_FOUND,
            MantraError::PermissionDenied => StatusCode::FORBIDDEN,
            MantraError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Wraps any error raised while converting a source document, so a failed parse is always
    /// reported as a conversion failure of that document.
    pub fn conversion<P: fmt::Debug>(path: P, cause: impl fmt::Display) -> MantraError {
        MantraError::Conversion(format!("cannot convert {path:?}: {cause}"))
    }
}

impl From<StripPrefixError> for MantraError {
    fn from(src: StripPrefixError) -> MantraError {
        MantraError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for MantraError {
    fn from(src: toml::de::Error) -> MantraError {
        MantraError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for MantraError {
    fn from(src: toml::ser::Error) -> MantraError {
        MantraError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for MantraError {
    fn from(src: JsonError) -> MantraError {
        MantraError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<YamlError> for MantraError {
    fn from(src: YamlError) -> MantraError {
        MantraError::Serialization(format!("YAML (de)serialization error: {src}"))
    }
}

impl From<io::Error> for MantraError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => MantraError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => MantraError::PermissionDenied,
            _ => MantraError::Io(format!("IOError: {}: {x}", x.kind())),
        }
    }
}

impl From<PersistError> for MantraError {
    fn from(x: PersistError) -> Self {
        MantraError::from(x.error)
    }
}

impl From<WalkDirError> for MantraError {
    fn from(x: WalkDirError) -> Self {
        match x.into_io_error() {
            Some(io_error) => MantraError::from(io_error),
            None => MantraError::Io("directory walk hit a filesystem loop".to_string()),
        }
    }
}

impl From<fmt::Error> for MantraError {
    fn from(x: fmt::Error) -> Self {
        MantraError::Conversion(format!("{x}"))
    }
}

impl From<CmarkToCmarkError> for MantraError {
    fn from(x: CmarkToCmarkError) -> Self {
        MantraError::Conversion(format!("{x}"))
    }
}

impl From<RegexError> for MantraError {
    fn from(x: RegexError) -> Self {
        MantraError::Config(format!("Regex parse failed: {x}"))
    }
}
