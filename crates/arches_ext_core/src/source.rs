//! Loading extension source definitions.
//!
//! Structured data files are parsed directly. `.py` files are trusted
//! descriptors: the module is executed by a Python interpreter and its
//! declared attribute is read back as JSON. Loading one runs arbitrary code
//! from the file, so only point the registry at sources you trust.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{RegistryError, RegistryResult};

pub const DEFAULT_PYTHON_INTERPRETER: &str = "python3";
pub const DEFAULT_DESCRIPTOR_ATTRIBUTE: &str = "details";

const MISSING_ATTRIBUTE_MARKER: &str = "arches-ext: descriptor attribute missing";

const PYTHON_BOOTSTRAP: &str = r#"
import importlib.util
import json
import os
import sys

path, attribute, marker = sys.argv[1], sys.argv[2], sys.argv[3]
sys.path.insert(0, os.path.dirname(os.path.abspath(path)))
spec = importlib.util.spec_from_file_location("arches_ext_source", path)
if spec is None or spec.loader is None:
    sys.stderr.write("not an importable python module\n")
    sys.exit(2)
module = importlib.util.module_from_spec(spec)
real_stdout = sys.stdout
sys.stdout = sys.stderr
try:
    spec.loader.exec_module(module)
finally:
    sys.stdout = real_stdout
if not hasattr(module, attribute):
    sys.stderr.write("\n%s\n" % marker)
    sys.exit(1)
json.dump(getattr(module, attribute), real_stdout, default=str)
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Json,
    Yaml,
    Toml,
    TrustedModule,
}

impl SourceFormat {
    pub fn detect(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            "py" => Some(Self::TrustedModule),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceOptions {
    pub python_interpreter: PathBuf,
    pub descriptor_attribute: String,
    pub working_dir: Option<PathBuf>,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            python_interpreter: PathBuf::from(DEFAULT_PYTHON_INTERPRETER),
            descriptor_attribute: DEFAULT_DESCRIPTOR_ATTRIBUTE.to_string(),
            working_dir: None,
        }
    }
}

/// Read a source file into a flat field-name to value mapping.
pub fn load_source(path: &Path, options: &SourceOptions) -> RegistryResult<Map<String, Value>> {
    let Some(format) = SourceFormat::detect(path) else {
        return Err(RegistryError::UnsupportedSourceFormat {
            path: path.to_path_buf(),
        });
    };
    debug!(path = %path.display(), ?format, "loading extension source");

    let value = match format {
        SourceFormat::TrustedModule => return load_trusted_module(path, options),
        SourceFormat::Json => {
            let content = read_source(path)?;
            serde_json::from_str::<Value>(&content).map_err(|err| malformed(path, err))?
        }
        SourceFormat::Yaml => {
            let content = read_source(path)?;
            serde_yaml::from_str::<Value>(&content).map_err(|err| malformed(path, err))?
        }
        SourceFormat::Toml => {
            let content = read_source(path)?;
            toml::from_str::<Value>(&content).map_err(|err| malformed(path, err))?
        }
    };

    into_mapping(path, value)
}

/// Execute a `.py` source with the configured interpreter and read its descriptor attribute.
pub fn load_trusted_module(
    path: &Path,
    options: &SourceOptions,
) -> RegistryResult<Map<String, Value>> {
    if !path.is_file() {
        return Err(load_failure(path, "file does not exist"));
    }
    warn!(
        path = %path.display(),
        interpreter = %options.python_interpreter.display(),
        "executing trusted python descriptor"
    );

    let mut command = Command::new(&options.python_interpreter);
    command
        .arg("-c")
        .arg(PYTHON_BOOTSTRAP)
        .arg(path)
        .arg(&options.descriptor_attribute)
        .arg(MISSING_ATTRIBUTE_MARKER);
    if let Some(dir) = &options.working_dir {
        command.current_dir(dir);
    }

    let output = command.output().map_err(|err| {
        load_failure(
            path,
            format!(
                "failed to execute {}: {err}",
                options.python_interpreter.display()
            ),
        )
    })?;
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        let detail = last_line(&stderr).unwrap_or("no error output");
        let message = match output.status.code() {
            _ if detail == MISSING_ATTRIBUTE_MARKER => format!(
                "module does not define `{}`",
                options.descriptor_attribute
            ),
            Some(code) => format!("module exited with status {code}: {detail}"),
            None => format!("module terminated by signal: {detail}"),
        };
        return Err(load_failure(path, message));
    }

    let value: Value = serde_json::from_slice(&output.stdout).map_err(|err| {
        load_failure(
            path,
            format!(
                "`{}` is not JSON-serializable: {err}",
                options.descriptor_attribute
            ),
        )
    })?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(load_failure(
            path,
            format!(
                "`{}` must be a mapping, found {}",
                options.descriptor_attribute,
                value_kind(&other)
            ),
        )),
    }
}

fn read_source(path: &Path) -> RegistryResult<String> {
    fs::read_to_string(path).map_err(|err| load_failure(path, err.to_string()))
}

fn into_mapping(path: &Path, value: Value) -> RegistryResult<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RegistryError::MalformedSource {
            path: path.to_path_buf(),
            message: format!("top level must be a mapping, found {}", value_kind(&other)),
        }),
    }
}

fn malformed(path: &Path, err: impl std::fmt::Display) -> RegistryError {
    RegistryError::MalformedSource {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn load_failure(path: &Path, message: impl Into<String>) -> RegistryError {
    RegistryError::SourceLoadFailure {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|line| !line.is_empty())
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}
