//! 新成员初始化失败时更新整体中止；离场成员拆除失败只上报。

use std::sync::Arc;

use conduit_core::{Lifecycle, LifecycleState, SharedProcessor, codes as core_codes};
use conduit_pipeline::{PipelineConfig, PipelineError, Segment, codes};

use super::support::{Recorder, Stateful, entries, journal, ready_pipeline, run, tag};

#[test]
fn failing_initialisation_keeps_the_previous_generation() {
    let pipeline = ready_pipeline(PipelineConfig::named("init-failure"));
    pipeline.add_pre_message_processor(tag("(pre1)")).unwrap();
    pipeline.update_pipeline().unwrap();
    let published = pipeline.epoch();

    let journal = journal();
    let bad = Recorder::failing("bad", &journal, "initialise");
    pipeline.add_pre_message_processor(bad.clone()).unwrap();
    pipeline
        .add_pre_message_processor(Recorder::shared("good", &journal))
        .unwrap();

    let err = pipeline.update_pipeline().expect_err("初始化失败应中止更新");
    assert_eq!(err.code(), codes::PIPELINE_INITIALISATION_FAILED);
    match &err {
        PipelineError::Initialisation { segment, source } => {
            assert_eq!(*segment, Segment::Pre);
            assert_eq!(source.code(), core_codes::LIFECYCLE_INITIALISE_FAILED);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    assert_eq!(pipeline.epoch(), published, "失败的更新不推进 epoch");
    assert_eq!(run(&pipeline), "source->(pre1)(static)");
    assert_eq!(pipeline.staged_pre_len(), 2, "取走的处理器放回暂存列表");
    assert_eq!(
        entries(&journal),
        ["bad:initialise"],
        "初始化在首个失败处停止，放回暂存列表的处理器不被释放"
    );

    assert!(pipeline.remove_pre_message_processor(&bad));
    pipeline.update_pipeline().expect("移除失败的处理器后可以更新");
    assert_eq!(run(&pipeline), "source->(good)(static)");
    assert_eq!(entries(&journal), ["bad:initialise", "good:initialise"]);
}

#[test]
fn restored_processors_stay_usable_after_a_failed_update() {
    let pipeline = ready_pipeline(PipelineConfig::named("retry"));
    let journal = journal();
    let first = Stateful::shared("first");
    let bad = Recorder::failing("bad", &journal, "initialise");
    pipeline.add_pre_message_processor(first.clone()).unwrap();
    pipeline.add_post_message_processor(bad.clone()).unwrap();

    pipeline.update_pipeline().expect_err("后置处理器初始化失败");
    assert_eq!(first.state(), LifecycleState::Initialised, "已激活的成员保持可用");
    assert_eq!(run(&pipeline), "source->(static)");

    assert!(pipeline.remove_post_message_processor(&bad));
    pipeline.update_pipeline().expect("重试复用已激活的成员");
    assert_eq!(run(&pipeline), "source->(first)(static)");
    assert_eq!(first.state(), LifecycleState::Initialised);
    assert_eq!(entries(&journal), ["bad:initialise"]);
}

#[test]
fn activated_processors_dropped_before_the_retry_are_released() {
    let pipeline = ready_pipeline(PipelineConfig::named("abandoned"));
    let journal = journal();
    let abandoned = Stateful::shared("abandoned");
    let abandoned_processor: SharedProcessor = abandoned.clone();
    pipeline
        .add_pre_message_processor(Arc::clone(&abandoned_processor))
        .unwrap();
    pipeline
        .add_pre_message_processor(Recorder::failing("bad", &journal, "initialise"))
        .unwrap();
    pipeline.update_pipeline().expect_err("初始化失败");

    pipeline.reset_and_update().expect("清空后发布仅含静态段的链路");
    assert_eq!(abandoned.state(), LifecycleState::Disposed, "未进入新一代的已激活成员被释放");
    assert_eq!(run(&pipeline), "source->(static)");
}

#[test]
fn a_failing_post_processor_restores_both_segments() {
    let pipeline = ready_pipeline(PipelineConfig::named("post-failure"));
    let journal = journal();
    pipeline
        .add_pre_message_processor(Recorder::shared("pre", &journal))
        .unwrap();
    pipeline
        .add_post_message_processor(Recorder::failing("post", &journal, "initialise"))
        .unwrap();

    let err = pipeline.update_pipeline().expect_err("后置段初始化失败");
    assert!(matches!(
        err,
        PipelineError::Initialisation {
            segment: Segment::Post,
            ..
        }
    ));
    assert_eq!(entries(&journal), ["pre:initialise", "post:initialise"]);
    assert_eq!(run(&pipeline), "source->(static)");
    assert_eq!((pipeline.staged_pre_len(), pipeline.staged_post_len()), (1, 1));
}

#[test]
fn start_failures_abort_updates_on_a_started_pipeline() {
    let pipeline = ready_pipeline(PipelineConfig::named("start-failure"));
    pipeline.initialise().unwrap();
    pipeline.start().unwrap();

    let journal = journal();
    pipeline
        .add_pre_message_processor(Recorder::failing("lazy", &journal, "start"))
        .unwrap();
    match pipeline.update_pipeline() {
        Err(PipelineError::Initialisation { segment, source }) => {
            assert_eq!(segment, Segment::Pre);
            assert_eq!(source.code(), core_codes::LIFECYCLE_START_FAILED);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(
        entries(&journal),
        ["lazy:initialise", "lazy:start"],
        "启动失败的处理器留在暂存列表，由调用方决定去留"
    );
    assert_eq!(pipeline.staged_pre_len(), 1);
    assert_eq!(run(&pipeline), "source->(static)");
}

#[test]
fn disposal_failures_are_reported_without_failing_the_update() {
    let pipeline = ready_pipeline(PipelineConfig::named("disposal"));
    let journal = journal();
    pipeline
        .add_post_message_processor(Recorder::failing("flaky", &journal, "dispose"))
        .unwrap();
    pipeline.update_pipeline().unwrap();
    assert_eq!(run(&pipeline), "source->(static)(flaky)");

    let report = pipeline.update_pipeline().expect("拆除失败不影响新代发布");
    assert!(!report.is_clean());
    assert_eq!(report.disposal_errors.len(), 1);
    let failure = &report.disposal_errors[0];
    assert_eq!(failure.code(), codes::PIPELINE_DISPOSAL_FAILED);
    assert!(matches!(
        failure,
        PipelineError::Disposal {
            segment: Segment::Post,
            ..
        }
    ));
    assert_eq!(run(&pipeline), "source->(static)");
    assert_eq!(report.epoch, pipeline.epoch());
}
