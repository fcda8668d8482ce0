mod common;
mod stage;
mod wiring;

use crate::{ExitOutcome, ExitPolicy, ExitStatus, Pipeline, PipelineError, Stage};

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn public_types_are_send_and_sync() {
    assert_send_sync::<Stage>();
    assert_send_sync::<Pipeline>();
    assert_send_sync::<ExitOutcome>();
    assert_send_sync::<ExitPolicy>();
    assert_send_sync::<ExitStatus>();
    assert_send_sync::<PipelineError>();
}
