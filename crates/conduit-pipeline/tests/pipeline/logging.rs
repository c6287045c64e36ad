//! 变更日志携带的结构化字段。

use conduit_pipeline::{PipelineConfig, observability::keys};
use tracing_test::traced_test;

use super::support::{Recorder, journal, ready_pipeline, tag};

#[test]
#[traced_test]
fn mutations_log_the_pipeline_and_epoch() {
    let pipeline = ready_pipeline(PipelineConfig::named("observed"));
    pipeline.add_pre_message_processor(tag("(pre)")).unwrap();
    pipeline.update_pipeline().unwrap();

    assert!(logs_contain("pipeline.mutation applied"));
    assert!(logs_contain(&format!("{}=observed", keys::PIPELINE_ID)));
    assert!(logs_contain(&format!("{}=2", keys::EPOCH)));
}

#[test]
#[traced_test]
fn aborted_updates_are_logged_as_errors() {
    let pipeline = ready_pipeline(PipelineConfig::named("aborted"));
    let journal = journal();
    pipeline
        .add_post_message_processor(Recorder::failing("bad", &journal, "initialise"))
        .unwrap();
    assert!(pipeline.update_pipeline().is_err());

    assert!(logs_contain("pipeline update aborted"));
    assert!(!logs_contain("pipeline.mutation applied"));
}
