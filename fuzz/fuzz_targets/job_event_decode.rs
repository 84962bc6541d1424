#![no_main]

use libfuzzer_sys::fuzz_target;
use quill_wire::{decode_event_bytes, InboundEvent};

fuzz_target!(|data: &[u8]| {
    let event = decode_event_bytes(data);
    match &event {
        InboundEvent::Failed { message } => assert!(!message.trim().is_empty()),
        InboundEvent::Unknown { reason } => assert!(!reason.is_empty()),
        InboundEvent::Partial { unit, .. } => assert!(!unit.is_null()),
        InboundEvent::Complete { .. } | InboundEvent::Heartbeat { .. } => {}
    }
    assert_eq!(
        event.is_terminal(),
        matches!(
            event,
            InboundEvent::Complete { .. } | InboundEvent::Failed { .. }
        )
    );
});
