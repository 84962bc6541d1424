#![no_main]

use libfuzzer_sys::fuzz_target;
use quill_jobs::{GenerationAdapter, JobOwnerId, JobRequest, Phase};
use quill_session::{Dispatch, JobCallbacks, JobSession};
use quill_wire::decode_event_bytes;

// Newline-separated frames fed to a streaming generation session.
fuzz_target!(|data: &[u8]| {
    let mut session = JobSession::new(GenerationAdapter);
    if session
        .start(JobRequest::new(JobOwnerId::from(1_u64)), JobCallbacks::new())
        .is_err()
        || session.request_sent().is_err()
    {
        return;
    }

    let mut terminations = 0;
    for frame in data.split(|byte| *byte == b'\n') {
        let was_terminal = session.phase().is_terminal();
        let dispatch = session.dispatch(decode_event_bytes(frame));
        if was_terminal {
            assert_eq!(dispatch, Dispatch::Ignored);
        }
        if let Dispatch::Terminated(_) = dispatch {
            terminations += 1;
        }
    }
    assert!(terminations <= 1);
    assert!(matches!(
        session.phase(),
        Phase::Streaming | Phase::Completed | Phase::Failed
    ));
});
