use quill_jobs::{DraftedProposal, JobOutcome, PartialKind, ProposalPlan};
use serde::Serialize;
use serde_json::{json, Value};

/// Terminal view of a job accumulator.
pub(crate) trait JobView {
    fn unit_count(&self, kind: PartialKind) -> usize;

    fn render_text(&self) -> String;
}

impl JobView for DraftedProposal {
    fn unit_count(&self, _kind: PartialKind) -> usize {
        self.sections.len()
    }

    fn render_text(&self) -> String {
        self.sections
            .iter()
            .map(|section| format!("## {}\n\n{}\n", section.name, content_text(&section.content)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl JobView for ProposalPlan {
    fn unit_count(&self, kind: PartialKind) -> usize {
        self.stage(kind).map_or(0, |stage| stage.len())
    }

    fn render_text(&self) -> String {
        let mut lines = Vec::new();
        for (title, stage) in [("Pre-plan", &self.pre_plan), ("Plan", &self.plan)] {
            if stage.is_empty() {
                continue;
            }
            lines.push(format!("# {title}"));
            for (name, content) in stage {
                lines.push(format!("- {name}: {}", content_text(content)));
            }
        }
        lines.join("\n")
    }
}

pub(crate) fn progress_line<T: JobView>(kind: PartialKind, snapshot: &T) -> String {
    format!("[{kind}] {} received", snapshot.unit_count(kind))
}

/// Machine-readable outcome document printed by `--json`.
pub(crate) fn outcome_document<T: Serialize>(
    job: &str,
    outcome: &JobOutcome<T>,
) -> Result<Value, serde_json::Error> {
    Ok(match outcome {
        JobOutcome::Completed(result) => json!({
            "job": job,
            "status": "completed",
            "result": serde_json::to_value(result)?,
        }),
        JobOutcome::Failed(message) => json!({
            "job": job,
            "status": "failed",
            "error": message,
        }),
        JobOutcome::Cancelled => json!({
            "job": job,
            "status": "cancelled",
        }),
    })
}

fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
