use indexmap::IndexMap;
use quill_session::{JobAdapter, MergeError};
use quill_wire::{JobRequest, OwnerIdPlacement, PartialKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::section::read_section;

pub const PLANNING_ENDPOINT_PREFIX: &str = "/ws/plan-proposal";

/// Two-stage plan for a proposal. Each stage maps a section name to its
/// planned content, in the order the names first arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalPlan {
    #[serde(default)]
    pub pre_plan: IndexMap<String, Value>,
    #[serde(default)]
    pub plan: IndexMap<String, Value>,
}

impl ProposalPlan {
    pub fn stage(&self, kind: PartialKind) -> Option<&IndexMap<String, Value>> {
        match kind {
            PartialKind::PrePlan => Some(&self.pre_plan),
            PartialKind::Plan => Some(&self.plan),
            PartialKind::Section => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pre_plan.is_empty() && self.plan.is_empty()
    }
}

/// Planning job: owner id travels in the endpoint path.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanningAdapter;

impl JobAdapter for PlanningAdapter {
    type Accumulator = ProposalPlan;

    fn name(&self) -> &'static str {
        "planning"
    }

    fn endpoint_path(&self, request: &JobRequest) -> String {
        format!(
            "{PLANNING_ENDPOINT_PREFIX}/{}",
            encode_path_segment(request.job_owner_id().as_str())
        )
    }

    fn owner_placement(&self) -> OwnerIdPlacement {
        OwnerIdPlacement::Path
    }

    fn merge(
        &self,
        accumulator: &mut ProposalPlan,
        kind: PartialKind,
        unit: Value,
    ) -> Result<(), MergeError> {
        let stage = match kind {
            PartialKind::PrePlan => &mut accumulator.pre_plan,
            PartialKind::Plan => &mut accumulator.plan,
            PartialKind::Section => {
                return Err(MergeError::UnsupportedKind {
                    adapter: self.name(),
                    kind,
                })
            }
        };
        let section = read_section(unit, "plan section")?;
        // Re-sent names keep their first position.
        stage.insert(section.name, section.content);
        Ok(())
    }

    fn decode_result(&self, result: Value) -> Result<ProposalPlan, MergeError> {
        let Value::Object(mut payload) = result else {
            return Err(MergeError::Invalid {
                what: "planning result",
                reason: "expected an object".to_string(),
            });
        };
        if !payload.contains_key("pre_plan") && !payload.contains_key("plan") {
            return Err(MergeError::Invalid {
                what: "planning result",
                reason: "neither pre_plan nor plan is present".to_string(),
            });
        }
        Ok(ProposalPlan {
            pre_plan: decode_stage(payload.remove("pre_plan"), "pre_plan stage")?,
            plan: decode_stage(payload.remove("plan"), "plan stage")?,
        })
    }
}

fn decode_stage(
    stage: Option<Value>,
    what: &'static str,
) -> Result<IndexMap<String, Value>, MergeError> {
    match stage {
        None | Some(Value::Null) => Ok(IndexMap::new()),
        Some(Value::Object(entries)) => Ok(entries.into_iter().collect()),
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| read_section(item, what).map(|section| (section.name, section.content)))
            .collect(),
        Some(_) => Err(MergeError::Invalid {
            what,
            reason: "expected an object or a list of sections".to_string(),
        }),
    }
}

fn encode_path_segment(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                encoded.push(char::from(byte))
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}
