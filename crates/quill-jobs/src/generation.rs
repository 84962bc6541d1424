use quill_session::{JobAdapter, MergeError};
use quill_wire::{JobRequest, OwnerIdPlacement, PartialKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::section::{read_section, Section};

pub const GENERATION_ENDPOINT: &str = "/ws/generate-proposal";
pub const GENERATION_OWNER_FIELD: &str = "template_id";

/// Proposal drafted section by section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DraftedProposal {
    pub sections: Vec<Section>,
}

impl DraftedProposal {
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|section| section.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|section| section.name.as_str())
    }

    /// Replaces a section with the same name in place, or appends it.
    pub fn upsert(&mut self, section: Section) {
        match self
            .sections
            .iter_mut()
            .find(|existing| existing.name == section.name)
        {
            Some(existing) => existing.content = section.content,
            None => self.sections.push(section),
        }
    }
}

/// Generation job: owner id travels as `template_id` in the request body.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationAdapter;

impl JobAdapter for GenerationAdapter {
    type Accumulator = DraftedProposal;

    fn name(&self) -> &'static str {
        "generation"
    }

    fn endpoint_path(&self, _request: &JobRequest) -> String {
        GENERATION_ENDPOINT.to_string()
    }

    fn owner_placement(&self) -> OwnerIdPlacement {
        OwnerIdPlacement::BodyField(GENERATION_OWNER_FIELD)
    }

    fn merge(
        &self,
        accumulator: &mut DraftedProposal,
        kind: PartialKind,
        unit: Value,
    ) -> Result<(), MergeError> {
        if kind != PartialKind::Section {
            return Err(MergeError::UnsupportedKind {
                adapter: self.name(),
                kind,
            });
        }
        accumulator.upsert(read_section(unit, "drafted section")?);
        Ok(())
    }

    fn decode_result(&self, result: Value) -> Result<DraftedProposal, MergeError> {
        match result {
            Value::Object(mut payload) => match payload.remove("sections") {
                Some(sections) => self.decode_result(sections),
                // Name -> content map, in server order.
                None => Ok(DraftedProposal {
                    sections: payload
                        .into_iter()
                        .map(|(name, content)| Section::new(name, content))
                        .collect(),
                }),
            },
            // Kept exactly as sent, repeated names included.
            Value::Array(items) => Ok(DraftedProposal {
                sections: items
                    .into_iter()
                    .map(|item| read_section(item, "drafted section"))
                    .collect::<Result<_, _>>()?,
            }),
            _ => Err(MergeError::Invalid {
                what: "generation result",
                reason: "expected a list of sections or an object".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use quill_session::{JobAdapter, JobCallbacks, JobOutcome, JobSession, MergeError};
    use quill_transport::ChannelEvent;
    use quill_wire::{JobOwnerId, JobRequest, OwnerIdPlacement, PartialKind};
    use serde_json::json;

    use super::{DraftedProposal, GenerationAdapter, GENERATION_ENDPOINT};
    use crate::Section;

    fn merge_section(
        proposal: &mut DraftedProposal,
        name: &str,
        content: &str,
    ) -> Result<(), MergeError> {
        GenerationAdapter.merge(
            proposal,
            PartialKind::Section,
            json!({"name": name, "content": content}),
        )
    }

    #[test]
    fn unit_generation_endpoint_is_fixed_and_owner_travels_in_body() {
        let request = JobRequest::new(JobOwnerId::from(3_u64));
        assert_eq!(
            GenerationAdapter.endpoint_path(&request),
            GENERATION_ENDPOINT
        );
        assert_eq!(
            GenerationAdapter.owner_placement(),
            OwnerIdPlacement::BodyField("template_id")
        );
    }

    #[test]
    fn functional_generation_merge_upserts_by_name_in_first_seen_order() {
        let mut proposal = DraftedProposal::default();
        merge_section(&mut proposal, "Intro", "v1").expect("merge");
        merge_section(&mut proposal, "Budget", "12k").expect("merge");
        merge_section(&mut proposal, "Intro", "v2").expect("merge");

        assert_eq!(proposal.names().collect::<Vec<_>>(), vec!["Intro", "Budget"]);
        assert_eq!(
            proposal.section("Intro").and_then(Section::text),
            Some("v2")
        );
    }

    #[test]
    fn regression_generation_merge_rejects_plan_units_without_mutation() {
        let mut proposal = DraftedProposal::default();
        let error = GenerationAdapter
            .merge(
                &mut proposal,
                PartialKind::Plan,
                json!({"name": "Budget", "content": "x"}),
            )
            .expect_err("plan units are not part of a draft");
        assert!(matches!(error, MergeError::UnsupportedKind { .. }));
        assert!(GenerationAdapter
            .merge(&mut proposal, PartialKind::Section, json!(42))
            .is_err());
        assert!(proposal.sections.is_empty());
    }

    #[test]
    fn functional_generation_result_accepts_list_wrapper_and_map_shapes() {
        let from_list = GenerationAdapter
            .decode_result(json!([
                {"name": "Intro", "content": "a"},
                {"name": "Budget", "content": "b"},
            ]))
            .expect("list");
        let from_wrapper = GenerationAdapter
            .decode_result(json!({"sections": [
                {"name": "Intro", "content": "a"},
                {"name": "Budget", "content": "b"},
            ]}))
            .expect("wrapper");
        let from_map = GenerationAdapter
            .decode_result(json!({"Intro": "a", "Budget": "b"}))
            .expect("map");

        assert_eq!(from_list, from_wrapper);
        assert_eq!(from_list, from_map);
        assert_eq!(from_map.names().collect::<Vec<_>>(), vec!["Intro", "Budget"]);
    }

    #[test]
    fn regression_generation_result_list_is_kept_as_sent() {
        let proposal = GenerationAdapter
            .decode_result(json!([
                {"name": "A", "content": 1},
                {"name": "B", "content": 2},
                {"name": "A", "content": 3},
            ]))
            .expect("list");
        assert_eq!(proposal.names().collect::<Vec<_>>(), vec!["A", "B", "A"]);
        assert_eq!(proposal.sections[2].content, json!(3));
    }

    #[test]
    fn regression_metadata_only_completion_keeps_drafted_sections() {
        let mut session = JobSession::new(GenerationAdapter);
        session
            .start(JobRequest::new(JobOwnerId::from(5_u64)), JobCallbacks::new())
            .expect("start");
        session.request_sent().expect("request sent");
        session.handle_channel_event(ChannelEvent::text(
            json!({"type": "section", "data": {"name": "Intro", "content": "Hello"}}).to_string(),
        ));
        session.handle_channel_event(ChannelEvent::text(
            json!({"type": "complete", "status": "ok", "count": 2}).to_string(),
        ));

        match session.outcome() {
            Some(JobOutcome::Completed(proposal)) => {
                assert_eq!(proposal.names().collect::<Vec<_>>(), vec!["Intro"]);
                assert_eq!(
                    proposal.section("Intro").and_then(Section::text),
                    Some("Hello")
                );
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn regression_generation_result_rejects_scalars() {
        assert!(GenerationAdapter.decode_result(json!("done")).is_err());
        assert!(GenerationAdapter
            .decode_result(json!({"sections": 5}))
            .is_err());
    }
}
