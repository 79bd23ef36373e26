//! Pipeline descriptor loading and normalization (§6).

use camino::Utf8Path;
use serde::Deserialize;
use svpatch_types::OpErrorCode;

/// Raw `steps[].scripts` entry shape before normalization: a bare string, a
/// `{script: string}` object, or an array of either.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawScripts {
    One(RawScriptEntry),
    Many(Vec<RawScriptEntry>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawScriptEntry {
    Bare(String),
    Object { script: String },
}

impl RawScriptEntry {
    fn into_path(self) -> String {
        match self {
            RawScriptEntry::Bare(s) => s,
            RawScriptEntry::Object { script } => script,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct RawStep {
    name: Option<String>,
    scripts: RawScripts,
}

#[derive(Debug, Clone, Deserialize)]
struct RawPipeline {
    steps: Vec<RawStep>,
}

/// One pipeline step: an optional name plus its ordered, non-empty list of
/// script paths.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub scripts: Vec<String>,
}

/// A fully parsed and validated pipeline descriptor.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub steps: Vec<Step>,
}

/// Parse and validate a pipeline descriptor from its raw JSON text. Empty
/// `steps` or an empty normalized `scripts` list is `PIPELINE_INVALID`.
pub fn parse_pipeline(text: &str) -> Result<Pipeline, OpErrorCode> {
    let raw: RawPipeline = serde_json::from_str(text)
        .map_err(|e| OpErrorCode::PipelineInvalid(format!("invalid JSON: {e}")))?;

    if raw.steps.is_empty() {
        return Err(OpErrorCode::PipelineInvalid("steps[] is required".to_string()));
    }

    let mut steps = Vec::with_capacity(raw.steps.len());
    for (i, step) in raw.steps.into_iter().enumerate() {
        let scripts: Vec<String> = match step.scripts {
            RawScripts::One(entry) => vec![entry.into_path()],
            RawScripts::Many(entries) => entries.into_iter().map(RawScriptEntry::into_path).collect(),
        };
        let scripts: Vec<String> = scripts.into_iter().filter(|s| !s.is_empty()).collect();
        if scripts.is_empty() {
            return Err(OpErrorCode::PipelineInvalid(format!(
                "step[{i}] scripts[] must be non-empty"
            )));
        }
        let name = step.name.unwrap_or_else(|| format!("step[{i}]"));
        steps.push(Step { name, scripts });
    }

    Ok(Pipeline { steps })
}

/// Load and parse the pipeline descriptor at `path`.
pub fn load_pipeline(path: &Utf8Path) -> Result<Pipeline, OpErrorCode> {
    let text = fs_err::read_to_string(path)
        .map_err(|e| OpErrorCode::PipelineInvalid(format!("{path}: {e}")))?;
    parse_pipeline(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bare_string_script_normalizes_to_one_entry() {
        let p = parse_pipeline(r#"{"steps":[{"scripts":"a.sv"}]}"#).unwrap();
        assert_eq!(p.steps.len(), 1);
        assert_eq!(p.steps[0].scripts, vec!["a.sv".to_string()]);
    }

    #[test]
    fn object_and_array_forms_normalize() {
        let p = parse_pipeline(r#"{"steps":[{"name":"s","scripts":[{"script":"a.sv"},"b.sv"]}]}"#).unwrap();
        assert_eq!(p.steps[0].name, "s");
        assert_eq!(p.steps[0].scripts, vec!["a.sv".to_string(), "b.sv".to_string()]);
    }

    #[test]
    fn empty_steps_is_pipeline_invalid() {
        let err = parse_pipeline(r#"{"steps":[]}"#).unwrap_err();
        assert!(matches!(err, OpErrorCode::PipelineInvalid(_)));
    }

    #[test]
    fn empty_scripts_is_pipeline_invalid() {
        let err = parse_pipeline(r#"{"steps":[{"scripts":[]}]}"#).unwrap_err();
        assert!(matches!(err, OpErrorCode::PipelineInvalid(_)));
    }

    #[test]
    fn blank_script_entries_are_dropped_and_then_checked_for_emptiness() {
        let err = parse_pipeline(r#"{"steps":[{"scripts":[""]}]}"#).unwrap_err();
        assert!(matches!(err, OpErrorCode::PipelineInvalid(_)));
    }

    #[test]
    fn unnamed_step_gets_a_positional_name() {
        let p = parse_pipeline(r#"{"steps":[{"scripts":"a.sv"}]}"#).unwrap();
        assert_eq!(p.steps[0].name, "step[0]");
    }
}
