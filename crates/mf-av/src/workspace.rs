//! Scoped scratch space for a single conversion.
//!
//! A [`Workspace`] owns a temporary directory holding the fetched input and
//! the transcoder output. The directory and everything in it is removed when
//! the workspace is dropped, so every exit path of the pipeline releases it.

use std::path::{Path, PathBuf};

use mf_core::{Error, JobId, OutputFormat, Result};
use tempfile::TempDir;

pub struct Workspace {
    temp_dir: TempDir,
    input_path: PathBuf,
    output_path: PathBuf,
}

impl Workspace {
    /// Create a workspace for `job_id`.
    ///
    /// The directory is created under `parent` when given, otherwise under
    /// the system temp dir. `input_ext` is kept on the fetched copy so the
    /// transcoder can sniff the container from the name.
    pub fn new(
        parent: Option<&Path>,
        job_id: JobId,
        input_ext: Option<&str>,
        format: OutputFormat,
    ) -> Result<Self> {
        let prefix = format!("mediaflow-{job_id}-");
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let temp_dir = match parent {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)
            }
            None => builder.tempdir(),
        }
        .map_err(|e| Error::tool("workspace", format!("failed to create temp dir: {e}")))?;

        let input_name = match input_ext {
            Some(ext) => format!("input.{ext}"),
            None => "input".to_string(),
        };
        let input_path = temp_dir.path().join(input_name);
        let output_path = temp_dir.path().join(format!("output.{}", format.extension()));

        Ok(Self {
            temp_dir,
            input_path,
            output_path,
        })
    }

    /// Where the fetched input is written.
    pub fn input(&self) -> &Path {
        &self.input_path
    }

    /// Where the transcoder writes its output.
    pub fn output(&self) -> &Path {
        &self.output_path
    }

    pub fn dir(&self) -> &Path {
        self.temp_dir.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_inside_dir() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::new(Some(parent.path()), JobId::new(), Some("wav"), OutputFormat::Mp3)
            .unwrap();

        assert!(ws.dir().starts_with(parent.path()));
        assert!(ws.input().starts_with(ws.dir()));
        assert_eq!(ws.input().file_name().unwrap(), "input.wav");
        assert_eq!(ws.output().file_name().unwrap(), "output.mp3");
    }

    #[test]
    fn drop_removes_everything() {
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::new(Some(parent.path()), JobId::new(), None, OutputFormat::Mkv)
            .unwrap();
        std::fs::write(ws.input(), b"in").unwrap();
        std::fs::write(ws.output(), b"out").unwrap();
        let dir = ws.dir().to_path_buf();
        assert_eq!(ws.input().file_name().unwrap(), "input");

        drop(ws);
        assert!(!dir.exists());
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }
}
