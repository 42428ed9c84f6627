//! WGSL program sources and hot reloading.
//!
//! Every program is one WGSL file with `vs` and (optionally) `fs` entry
//! points. The shared prelude `common.wgsl` is prepended to each, so the
//! uniform blocks and helpers are declared once. Sources are read from the
//! configured shader directory when present, falling back to copies built
//! into the binary.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::error::RenderError;

const PRELUDE: &str = "common";

const EMBEDDED: &[(&str, &str)] = &[
    ("common", include_str!("shaders/common.wgsl")),
    ("height_perturb", include_str!("shaders/height_perturb.wgsl")),
    ("height_diffuse", include_str!("shaders/height_diffuse.wgsl")),
    ("shadow", include_str!("shaders/shadow.wgsl")),
    ("water_depth", include_str!("shaders/water_depth.wgsl")),
    ("environment", include_str!("shaders/environment.wgsl")),
    ("caustics", include_str!("shaders/caustics.wgsl")),
    ("scene_lit", include_str!("shaders/scene_lit.wgsl")),
    ("water", include_str!("shaders/water.wgsl")),
    ("sky", include_str!("shaders/sky.wgsl")),
    ("light_volume", include_str!("shaders/light_volume.wgsl")),
    ("debug_blit", include_str!("shaders/debug_blit.wgsl")),
    ("debug_depth", include_str!("shaders/debug_depth.wgsl")),
    ("present", include_str!("shaders/present.wgsl")),
];

/// Resolves program names to complete WGSL sources.
#[derive(Clone, Debug, Default)]
pub struct ProgramLibrary {
    dir: Option<PathBuf>,
}

impl ProgramLibrary {
    /// A library that only uses the built-in sources.
    pub fn embedded() -> Self {
        Self { dir: None }
    }

    /// A library reading `<dir>/<name>.wgsl`, falling back to built-in sources
    /// for files that do not exist.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        EMBEDDED.iter().any(|(n, _)| *n == name)
    }

    /// The prelude followed by the program's own source.
    pub fn source(&self, name: &str) -> Result<String, RenderError> {
        let prelude = self.file(PRELUDE)?;
        let body = self.file(name)?;
        Ok(format!("{prelude}\n{body}"))
    }

    fn file(&self, name: &str) -> Result<String, RenderError> {
        if let Some(dir) = &self.dir {
            let path = dir.join(format!("{name}.wgsl"));
            match fs::read_to_string(&path) {
                Ok(source) => return Ok(source),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!("No '{}' on disk, using built-in source", path.display());
                }
                Err(err) => {
                    return Err(RenderError::ShaderReload {
                        program: name.to_string(),
                        message: format!("cannot read {}: {err}", path.display()),
                    });
                }
            }
        }
        EMBEDDED
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, source)| source.to_string())
            .ok_or_else(|| RenderError::UnknownResource(format!("program '{name}'")))
    }
}

/// Polls a shader directory for modified `.wgsl` files.
pub struct ShaderWatcher {
    dir: PathBuf,
    modified: HashMap<PathBuf, SystemTime>,
}

impl ShaderWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let modified = scan(&dir);
        Self { dir, modified }
    }

    /// Returns `true` if any shader file was added or changed since the last poll.
    pub fn poll(&mut self) -> bool {
        let current = scan(&self.dir);
        let changed = current
            .iter()
            .any(|(path, time)| self.modified.get(path).is_none_or(|seen| time > seen));
        self.modified = current;
        changed
    }
}

fn scan(dir: &Path) -> HashMap<PathBuf, SystemTime> {
    let Ok(entries) = fs::read_dir(dir) else {
        warn!("Cannot watch shader directory '{}'", dir.display());
        return HashMap::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "wgsl"))
        .filter_map(|path| {
            let modified = fs::metadata(&path).ok()?.modified().ok()?;
            Some((path, modified))
        })
        .collect()
}
