//! Mode discovery on disk. A mode is a directory containing `main.rhai`;
//! the directory name is the mode's display name. Inline uploads are staged
//! into a scratch directory so they flow through the same load path as
//! on-disk modes.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::logging::warn;

use super::ModeLoadError;

pub const ENTRY_POINT: &str = "main.rhai";

/// Staged uploads carry this prefix on disk; it is stripped for display.
const UPLOAD_PREFIX: &str = "uploaded_";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModeDefinition {
    pub name: String,
    pub path: PathBuf,
}

pub struct ModeLibrary {
    dir: PathBuf,
    staging: PathBuf,
}

impl ModeLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            staging: std::env::temp_dir().join("ocellus-staged-modes"),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn set_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dir = dir.into();
    }

    /// List every mode directory, sorted by name. Unreadable entries are
    /// skipped with a warning rather than failing the whole listing.
    pub fn discover(&self) -> Vec<ModeDefinition> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("cannot read modes dir {}: {e}", self.dir.display());
                return Vec::new();
            }
        };

        let mut modes: Vec<ModeDefinition> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().join(ENTRY_POINT).is_file())
            .map(|entry| ModeDefinition {
                name: display_name(&entry.file_name().to_string_lossy()),
                path: entry.path(),
            })
            .collect();

        modes.sort_by(|a, b| a.name.cmp(&b.name));
        modes
    }

    /// Resolve a mode path (absolute, or relative to the modes dir) and
    /// read its entry-point source.
    pub fn read_source(
        &self,
        path: &str,
    ) -> Result<(String, String), ModeLoadError> {
        let mode_dir = if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.dir.join(path)
        };

        let entry = mode_dir.join(ENTRY_POINT);
        if !entry.is_file() {
            return Err(ModeLoadError::EntryPointMissing {
                path: entry.display().to_string(),
            });
        }

        let name = mode_dir
            .file_name()
            .map(|n| display_name(&n.to_string_lossy()))
            .unwrap_or_else(|| "unknown".to_string());
        let source = fs::read_to_string(&entry)?;
        Ok((name, source))
    }

    /// Stage inline source as a loadable mode directory and return its
    /// path. Re-staging the same filename overwrites the previous copy.
    pub fn stage_inline(
        &self,
        filename: &str,
        content: &str,
    ) -> Result<PathBuf, ModeLoadError> {
        let stem = Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "untitled".to_string());

        let mode_dir = self.staging.join(format!("{UPLOAD_PREFIX}{stem}"));
        fs::create_dir_all(&mode_dir)?;
        fs::write(mode_dir.join(ENTRY_POINT), content)?;
        Ok(mode_dir)
    }
}

fn display_name(dir_name: &str) -> String {
    dir_name
        .strip_prefix(UPLOAD_PREFIX)
        .unwrap_or(dir_name)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_library(tag: &str) -> (PathBuf, ModeLibrary) {
        let dir = std::env::temp_dir()
            .join(format!("ocellus-library-{tag}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let library = ModeLibrary::new(&dir);
        (dir, library)
    }

    fn add_mode(dir: &Path, name: &str) {
        let mode_dir = dir.join(name);
        fs::create_dir_all(&mode_dir).unwrap();
        fs::write(mode_dir.join(ENTRY_POINT), "fn draw(screen, etc) { }")
            .unwrap();
    }

    #[test]
    fn discover_lists_sorted_mode_dirs() {
        let (dir, library) = scratch_library("discover");
        add_mode(&dir, "zebra");
        add_mode(&dir, "aurora");
        // A directory without an entry point is not a mode.
        fs::create_dir_all(dir.join("not-a-mode")).unwrap();

        let names: Vec<String> =
            library.discover().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["aurora", "zebra"]);
    }

    #[test]
    fn discover_of_missing_dir_is_empty() {
        let library = ModeLibrary::new("/definitely/not/here");
        assert!(library.discover().is_empty());
    }

    #[test]
    fn read_source_resolves_relative_paths() {
        let (dir, library) = scratch_library("relative");
        add_mode(&dir, "waves");

        let (name, source) = library.read_source("waves").unwrap();
        assert_eq!(name, "waves");
        assert!(source.contains("fn draw"));

        let absolute = dir.join("waves");
        let (name, _) =
            library.read_source(&absolute.display().to_string()).unwrap();
        assert_eq!(name, "waves");
    }

    #[test]
    fn missing_entry_point_is_reported() {
        let (_dir, library) = scratch_library("missing");
        let err = library.read_source("ghost").unwrap_err();
        assert!(matches!(err, ModeLoadError::EntryPointMissing { .. }));
    }

    #[test]
    fn staged_inline_modes_load_and_display_clean() {
        let (_dir, library) = scratch_library("staged");
        let staged = library
            .stage_inline("sketch.rhai", "fn draw(screen, etc) { }")
            .unwrap();

        let (name, source) =
            library.read_source(&staged.display().to_string()).unwrap();
        assert_eq!(name, "sketch");
        assert!(source.contains("fn draw"));
    }
}
