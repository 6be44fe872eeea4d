//! Registered workflow definitions and the book pipeline stages.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::definition::WorkflowDefinition;
use crate::error::WorkflowError;
use crate::loader::{DefinitionFormat, load_definition_file, load_definitions_dir, parse_definition};

const BUILTIN: [(&str, &str); 4] = [
    ("w1_editing.toml", include_str!("../workflows/w1_editing.toml")),
    ("w2_pdf.toml", include_str!("../workflows/w2_pdf.toml")),
    ("w3_publication.toml", include_str!("../workflows/w3_publication.toml")),
    ("w4_playtesting.toml", include_str!("../workflows/w4_playtesting.toml")),
];

/// The four stages a book moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PipelineStage {
    #[serde(rename = "w1_editing")]
    W1Editing,
    #[serde(rename = "w2_pdf")]
    W2Pdf,
    #[serde(rename = "w3_publication")]
    W3Publication,
    #[serde(rename = "w4_playtesting")]
    W4Playtesting,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 4] = [
        PipelineStage::W1Editing,
        PipelineStage::W2Pdf,
        PipelineStage::W3Publication,
        PipelineStage::W4Playtesting,
    ];

    /// Workflow type identifier of the stage.
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::W1Editing => "w1_editing",
            PipelineStage::W2Pdf => "w2_pdf",
            PipelineStage::W3Publication => "w3_publication",
            PipelineStage::W4Playtesting => "w4_playtesting",
        }
    }

    /// Stages whose output this stage consumes.
    pub fn dependencies(&self) -> &'static [PipelineStage] {
        match self {
            PipelineStage::W1Editing => &[],
            PipelineStage::W2Pdf => &[PipelineStage::W1Editing],
            PipelineStage::W3Publication => &[PipelineStage::W2Pdf],
            PipelineStage::W4Playtesting => &[PipelineStage::W1Editing],
        }
    }

    /// Stage for a workflow type, `None` for types outside the pipeline.
    pub fn from_workflow_type(workflow_type: &str) -> Option<Self> {
        workflow_type.parse().ok()
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown pipeline stage '{}'", s))
    }
}

/// Workflow definitions available to the runner, keyed by workflow type.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    definitions: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// The four pipeline workflows.
    pub fn builtin() -> Result<Self, WorkflowError> {
        let mut catalog = Self::new();
        for (file, content) in BUILTIN {
            let definition = parse_definition(content, DefinitionFormat::Toml).map_err(|e| {
                WorkflowError::DefinitionLoad {
                    path: file.into(),
                    message: e.to_string(),
                }
            })?;
            catalog.register(definition)?;
        }
        Ok(catalog)
    }

    /// Add a definition, replacing any previous one of the same type.
    pub fn register(&mut self, definition: WorkflowDefinition) -> Result<(), WorkflowError> {
        definition.validate()?;
        let workflow_type = definition.workflow_type.clone();
        if self.definitions.insert(workflow_type.clone(), definition).is_some() {
            info!("Replaced workflow definition {}", workflow_type);
        } else {
            debug!("Registered workflow definition {}", workflow_type);
        }
        Ok(())
    }

    pub fn with(mut self, definition: WorkflowDefinition) -> Result<Self, WorkflowError> {
        self.register(definition)?;
        Ok(self)
    }

    pub fn get(&self, workflow_type: &str) -> Option<&WorkflowDefinition> {
        self.definitions.get(workflow_type)
    }

    pub fn require(&self, workflow_type: &str) -> Result<&WorkflowDefinition, WorkflowError> {
        self.get(workflow_type)
            .ok_or_else(|| WorkflowError::UnknownWorkflowType(workflow_type.to_string()))
    }

    pub fn contains(&self, workflow_type: &str) -> bool {
        self.definitions.contains_key(workflow_type)
    }

    /// Definitions ordered by workflow type.
    pub fn list(&self) -> Vec<&WorkflowDefinition> {
        self.definitions.values().collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Register one definition file.
    pub fn load_file(&mut self, path: &Path) -> Result<String, WorkflowError> {
        let definition = load_definition_file(path)?;
        let workflow_type = definition.workflow_type.clone();
        self.register(definition)?;
        Ok(workflow_type)
    }

    /// Register every definition file in `dir`. Returns how many were added.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, WorkflowError> {
        let definitions = load_definitions_dir(dir)?;
        let count = definitions.len();
        for definition in definitions {
            self.register(definition)?;
        }
        Ok(count)
    }
}
