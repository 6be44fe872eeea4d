//! Workflow definition files.
//!
//! Definitions are written in TOML (`*.toml`) or YAML (`*.yaml`, `*.yml`):
//!
//! ```toml
//! workflow_type = "w1_editing"
//! name = "W1 Editing"
//! initial_step = "strategic"
//!
//! [[steps]]
//! name = "strategic"
//! command = "w1-strategic"
//! next = "writer"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::definition::WorkflowDefinition;
use crate::error::WorkflowError;

/// Supported definition file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Toml,
    Yaml,
}

impl DefinitionFormat {
    /// Format for a file extension, `None` for unrelated files.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "toml" => Some(DefinitionFormat::Toml),
            "yaml" | "yml" => Some(DefinitionFormat::Yaml),
            _ => None,
        }
    }
}

/// Parse and validate a definition.
pub fn parse_definition(
    content: &str,
    format: DefinitionFormat,
) -> Result<WorkflowDefinition, WorkflowError> {
    let definition: WorkflowDefinition = match format {
        DefinitionFormat::Toml => {
            toml::from_str(content).map_err(|e| WorkflowError::InvalidDefinition(e.to_string()))?
        }
        DefinitionFormat::Yaml => serde_yml::from_str(content)
            .map_err(|e| WorkflowError::InvalidDefinition(e.to_string()))?,
    };
    definition.validate()?;
    Ok(definition)
}

/// Load one definition file.
pub fn load_definition_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let load_error = |message: String| WorkflowError::DefinitionLoad {
        path: path.to_path_buf(),
        message,
    };

    let format = DefinitionFormat::from_path(path)
        .ok_or_else(|| load_error("expected a .toml, .yaml or .yml file".to_string()))?;
    let content = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
    let definition = parse_definition(&content, format).map_err(|e| load_error(e.to_string()))?;

    debug!(
        "Loaded workflow {} from {}",
        definition.workflow_type,
        path.display()
    );
    Ok(definition)
}

/// Load every definition file in `dir`, in file name order.
pub fn load_definitions_dir(dir: &Path) -> Result<Vec<WorkflowDefinition>, WorkflowError> {
    let entries = fs::read_dir(dir).map_err(|e| WorkflowError::DefinitionLoad {
        path: dir.to_path_buf(),
        message: e.to_string(),
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && DefinitionFormat::from_path(path).is_some())
        .collect();
    paths.sort();

    let definitions = paths
        .iter()
        .map(|path| load_definition_file(path))
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        "Loaded {} workflow definitions from {}",
        definitions.len(),
        dir.display()
    );
    Ok(definitions)
}
