//! Launch configuration and project configuration discovery.

use crate::debugger::{Error, LaunchOptions};
use crate::vm::CompilerSettings;
use anyhow::{anyhow, Context};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

/// Name of project configuration files.
pub const PROJECT_FILE: &str = "bcdap.toml";
/// Number of parent directories inspected when looking for project files.
const MAX_DEPTH: usize = 50;

/// Arguments of a `launch` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    pub program: Option<String>,
    #[serde(default)]
    pub stop_on_entry: bool,
    #[serde(default)]
    pub no_debug: bool,
}

impl LaunchArguments {
    /// Absolute path of an existing program file.
    pub fn program_path(&self) -> anyhow::Result<PathBuf> {
        let program = self
            .program
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("launch: `program` is not set"))?;
        let path = Path::new(program);
        if !path.exists() {
            return Err(anyhow!("launch: program `{program}` does not exist"));
        }
        path.canonicalize()
            .with_context(|| format!("launch: resolve `{program}`"))
    }

    /// Build launch options, project configuration problems are returned besides.
    pub fn into_options(self) -> anyhow::Result<(LaunchOptions, Vec<Error>)> {
        let program = self.program_path()?;
        let dir = program.parent().unwrap_or(Path::new("/"));
        let (settings, errors) = discover(dir);
        Ok((
            LaunchOptions {
                program,
                stop_on_entry: self.stop_on_entry,
                no_debug: self.no_debug,
                settings,
            },
            errors,
        ))
    }
}

/// Content of a single project file.
#[derive(Debug, Default, Deserialize)]
struct ProjectFile {
    #[serde(default)]
    additional_imports: Vec<String>,
    #[serde(default)]
    extra_directories: Vec<PathBuf>,
    #[serde(default)]
    external_constants: BTreeMap<String, i64>,
}

fn load(path: &Path) -> Result<ProjectFile, Error> {
    let data = read_to_string(path)?;
    toml::de::from_str(&data).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

/// Collect compiler settings from project files placed in `start` and its parents.
///
/// The nearest file wins for constants, lists from all files are concatenated nearest first.
/// Relative directories are resolved against the directory of the file declaring them.
pub fn discover(start: &Path) -> (CompilerSettings, Vec<Error>) {
    let mut settings = CompilerSettings::default();
    let mut errors = vec![];

    for dir in start.ancestors().take(MAX_DEPTH) {
        let path = dir.join(PROJECT_FILE);
        if !path.is_file() {
            continue;
        }
        log::debug!(target: "dap", "project file {}", path.display());

        let file = match load(&path) {
            Ok(file) => file,
            Err(e) => {
                log::warn!(target: "dap", "skip project file: {e}");
                errors.push(e);
                continue;
            }
        };

        settings.additional_imports.extend(file.additional_imports);
        settings
            .extra_directories
            .extend(file.extra_directories.into_iter().map(|d| dir.join(d)));
        for (name, value) in file.external_constants {
            settings.external_constants.entry(name).or_insert(value);
        }
    }

    (settings, errors)
}
