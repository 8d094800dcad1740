//! External SVG→PDF converter
//!
//! The converter is treated as a pure function from normalized SVG bytes to
//! PDF bytes. Production deployments point `SVG_CONVERTER_BIN` at a
//! deterministic command-line converter; tests substitute a fake.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ConvertError {
    /// No converter binary is configured or the configured one is absent.
    #[error("SVG converter is not installed")]
    ConverterMissing,

    #[error("SVG converter failed: {0}")]
    ConversionFailed(String),

    #[error("Converter produced non-PDF output")]
    BadOutput,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Deterministic SVG→PDF conversion.
#[async_trait]
pub trait SvgConverter: Send + Sync {
    async fn convert(&self, svg: &str) -> Result<Vec<u8>>;
}

/// Converter that spawns an external binary.
///
/// The binary is invoked as `<bin> <input.svg> <output.pdf>`; both paths
/// live in a per-call temporary directory.
pub struct CommandConverter {
    bin: PathBuf,
}

impl CommandConverter {
    /// Build from configuration. `None` when no binary is configured, so
    /// callers surface [`ConvertError::ConverterMissing`] lazily at first
    /// use rather than at startup.
    pub fn from_config(bin: Option<&str>) -> Option<Self> {
        bin.map(|b| Self {
            bin: PathBuf::from(b),
        })
    }

    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

#[async_trait]
impl SvgConverter for CommandConverter {
    async fn convert(&self, svg: &str) -> Result<Vec<u8>> {
        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("input.svg");
        let output = workdir.path().join("output.pdf");

        let mut file = tokio::fs::File::create(&input).await?;
        file.write_all(svg.as_bytes()).await?;
        file.flush().await?;

        let status = Command::new(&self.bin)
            .arg(&input)
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ConvertError::ConverterMissing
                } else {
                    ConvertError::Io(e)
                }
            })?;

        if !status.success() {
            return Err(ConvertError::ConversionFailed(format!(
                "{} exited with {status}",
                self.bin.display()
            )));
        }

        let bytes = tokio::fs::read(&output).await?;
        if !bytes.starts_with(b"%PDF-") {
            return Err(ConvertError::BadOutput);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_maps_to_converter_missing() {
        let converter = CommandConverter::new("/nonexistent/svg2pdf-binary");
        let err = converter.convert("<svg/>").await.unwrap_err();
        assert!(matches!(err, ConvertError::ConverterMissing));
    }

    #[test]
    fn from_config_requires_a_binary() {
        assert!(CommandConverter::from_config(None).is_none());
        assert!(CommandConverter::from_config(Some("svg2pdf")).is_some());
    }
}
