use serde_json::{Map, Value, json};

/// One block of the B1..B8 pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSpec {
    pub id: &'static str,
    pub name: &'static str,
    pub owner: &'static str,
    /// Fields this block contributes to the shared accumulator.
    pub outputs: &'static [&'static str],
    /// Output field filled by the text generator when one is configured.
    pub narrative: Option<&'static str>,
}

pub const BLOCKS: &[BlockSpec] = &[
    BlockSpec {
        id: "B1",
        name: "Scope Lock",
        owner: "Planner",
        outputs: &["scope", "acceptance_criteria"],
        narrative: Some("scope"),
    },
    BlockSpec {
        id: "B2",
        name: "Dependency Check",
        owner: "Planner",
        outputs: &["dependencies", "dependencies_ready"],
        narrative: None,
    },
    BlockSpec {
        id: "B3",
        name: "Design Pass",
        owner: "Architect",
        outputs: &["design_notes"],
        narrative: Some("design_notes"),
    },
    BlockSpec {
        id: "B4",
        name: "Implement Pass",
        owner: "Implementer",
        outputs: &["implementation_notes", "changed_files"],
        narrative: Some("implementation_notes"),
    },
    BlockSpec {
        id: "B5",
        name: "Verify Pass",
        owner: "Tester",
        outputs: &["verification_passed", "verification_notes"],
        narrative: Some("verification_notes"),
    },
    BlockSpec {
        id: "B6",
        name: "Review Pass",
        owner: "Reviewer",
        outputs: &["review_findings", "review_approved"],
        narrative: None,
    },
    BlockSpec {
        id: "B7",
        name: "Docs Sync",
        owner: "Docs Agent",
        outputs: &["docs_updated", "docs_notes"],
        narrative: Some("docs_notes"),
    },
    BlockSpec {
        id: "B8",
        name: "Ship Decision",
        owner: "Lead",
        outputs: &["ship_decision"],
        narrative: None,
    },
];

/// Block whose execution waits on the approval gate.
pub const GATED_BLOCK: &str = "B7";

pub fn find(id: &str) -> Option<&'static BlockSpec> {
    BLOCKS.iter().find(|b| b.id == id)
}

fn text<'a>(input: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn flag(input: &Map<String, Value>, key: &str, default: bool) -> bool {
    input.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn list(input: &Map<String, Value>, key: &str) -> Value {
    match input.get(key) {
        Some(Value::Array(items)) => Value::Array(items.clone()),
        _ => json!([]),
    }
}

/// Deterministic outputs of `block` for the given stage input.
///
/// `input` is the accumulator overlaid with the block's own inputs. Only the
/// block's declared output fields are returned.
pub fn compute_outputs(block: &BlockSpec, task_id: &str, input: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    match block.id {
        "B1" => {
            let scope = text(input, "scope")
                .map(str::to_string)
                .unwrap_or_else(|| format!("Deliver {task_id} as described in its roadmap entry"));
            out.insert("scope".into(), json!(scope));
            let criteria = match input.get("acceptance_criteria") {
                Some(Value::Array(items)) if !items.is_empty() => Value::Array(items.clone()),
                _ => json!([
                    format!("{task_id} behaviour implemented"),
                    "tests cover the change",
                    "docs reflect the change",
                ]),
            };
            out.insert("acceptance_criteria".into(), criteria);
        }
        "B2" => {
            let deps = list(input, "dependencies");
            out.insert("dependencies".into(), deps);
            out.insert(
                "dependencies_ready".into(),
                json!(flag(input, "dependencies_ready", true)),
            );
        }
        "B3" => {
            let scope = text(input, "scope").unwrap_or(task_id);
            out.insert(
                "design_notes".into(),
                json!(format!("Design covers: {scope}")),
            );
        }
        "B4" => {
            let files = list(input, "changed_files");
            let count = files.as_array().map_or(0, Vec::len);
            out.insert(
                "implementation_notes".into(),
                json!(format!("Implemented {task_id} across {count} file(s)")),
            );
            out.insert("changed_files".into(), files);
        }
        "B5" => {
            let passed = flag(input, "dependencies_ready", true);
            out.insert("verification_passed".into(), json!(passed));
            let notes = if passed {
                "Verification suite passed"
            } else {
                "Verification blocked by unresolved dependencies"
            };
            out.insert("verification_notes".into(), json!(notes));
        }
        "B6" => {
            let findings = list(input, "review_findings");
            let clean = findings.as_array().is_none_or(Vec::is_empty);
            let approved = clean && flag(input, "verification_passed", false);
            out.insert("review_findings".into(), findings);
            out.insert("review_approved".into(), json!(approved));
        }
        "B7" => {
            out.insert("docs_updated".into(), json!(true));
            out.insert(
                "docs_notes".into(),
                json!(format!("Docs synced for {task_id}")),
            );
        }
        "B8" => {
            let ship = flag(input, "verification_passed", false)
                && flag(input, "review_approved", false)
                && flag(input, "docs_updated", false);
            out.insert(
                "ship_decision".into(),
                json!(if ship { "ship" } else { "hold" }),
            );
        }
        _ => {}
    }
    out
}

/// Prompt used for the block's narrative field.
pub fn narrative_prompt(block: &BlockSpec, task_id: &str, input: &Map<String, Value>) -> String {
    let field = block.narrative.unwrap_or("notes");
    let context = serde_json::to_string(input).unwrap_or_default();
    format!(
        "You are the {owner} running the {name} block ({id}) for task {task_id}.\n\
         Write the `{field}` field as two or three plain sentences.\n\
         Accumulated context: {context}",
        owner = block.owner,
        name = block.name,
        id = block.id,
    )
}
