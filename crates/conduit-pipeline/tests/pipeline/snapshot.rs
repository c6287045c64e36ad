//! 暂存快照隔离、清空语义、静态段不变性与参数校验。

use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use conduit_core::{
    CoreError, InterceptingProcessor, Lifecycle, LifecycleState, MessageEvent, MessageProcessor,
    ProcessorDescriptor, ResponseAdapter, SharedProcessor, codes as core_codes, same_processor,
};
use conduit_pipeline::{DynamicPipeline, PipelineConfig, PipelineError};

use super::support::{Stateful, ready_pipeline, run, tag};

/// 第一次初始化时在两道栅栏之间停留，把更新“卡”在构建阶段。
struct GatedInit {
    armed: AtomicBool,
    entered: Arc<Barrier>,
    release: Arc<Barrier>,
}

impl MessageProcessor for GatedInit {
    fn process(&self, mut event: MessageEvent) -> Result<Option<MessageEvent>, CoreError> {
        event.append_text("(gate)")?;
        Ok(Some(event))
    }

    fn describe(&self) -> ProcessorDescriptor {
        ProcessorDescriptor::new("gate", "test")
    }

    fn lifecycle(&self) -> Option<&dyn Lifecycle> {
        Some(self)
    }
}

impl Lifecycle for GatedInit {
    fn initialise(&self) -> Result<(), CoreError> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.wait();
            self.release.wait();
        }
        Ok(())
    }

    fn start(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), CoreError> {
        Ok(())
    }

    fn dispose(&self) -> Result<(), CoreError> {
        Ok(())
    }
}

#[test]
fn processors_added_during_a_build_wait_for_the_next_update() {
    let pipeline = ready_pipeline(PipelineConfig::named("isolation"));
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    pipeline
        .add_pre_message_processor(Arc::new(GatedInit {
            armed: AtomicBool::new(true),
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        }))
        .unwrap();

    thread::scope(|scope| {
        let updater = scope.spawn(|| pipeline.update_pipeline());
        entered.wait();
        pipeline
            .add_pre_message_processor(tag("(late)"))
            .expect("构建期间仍可暂存");
        release.wait();
        updater
            .join()
            .expect("更新线程不应 panic")
            .expect("更新成功");
    });

    assert_eq!(run(&pipeline), "source->(gate)(static)");
    assert_eq!(pipeline.staged_pre_len(), 1, "构建期间加入的处理器留在暂存列表");

    pipeline.update_pipeline().unwrap();
    assert_eq!(run(&pipeline), "source->(late)(static)");
}

#[test]
fn a_successful_update_clears_the_staging_lists() {
    let pipeline = ready_pipeline(PipelineConfig::named("clear"));
    pipeline.add_pre_message_processor(tag("(pre)")).unwrap();
    pipeline.add_post_message_processor(tag("(post)")).unwrap();
    let report = pipeline.update_pipeline().unwrap();
    assert!(report.is_clean());
    assert_eq!((pipeline.staged_pre_len(), pipeline.staged_post_len()), (0, 0));

    pipeline.update_pipeline().unwrap();
    assert_eq!(run(&pipeline), "source->(static)", "空暂存列表重建出仅含静态段的链路");
    let snapshot = pipeline.snapshot();
    assert!(snapshot.pre.is_empty() && snapshot.post.is_empty());
}

#[test]
fn reset_discards_staged_processors() {
    let pipeline = ready_pipeline(PipelineConfig::named("reset"));
    pipeline.add_pre_message_processor(tag("(live)")).unwrap();
    pipeline.update_pipeline().unwrap();
    pipeline.add_post_message_processor(tag("(staged)")).unwrap();

    let before = pipeline.epoch();
    let report = pipeline.reset_and_update().unwrap();
    assert_eq!(report.epoch, before + 1);
    assert_eq!(pipeline.staged_post_len(), 0);
    assert_eq!(run(&pipeline), "source->(static)");
}

#[test]
fn the_static_segment_never_changes() {
    let pipeline = ready_pipeline(PipelineConfig::named("static"));
    let original = pipeline.static_segment().expect("已捕获静态段");

    pipeline.set_listener(tag("(other)"));
    for round in 0..3 {
        pipeline
            .add_pre_message_processor(tag(format!("(pre{round})")))
            .unwrap();
        pipeline.update_pipeline().unwrap();
        let current = pipeline.static_segment().unwrap();
        assert!(same_processor(&current, &original));
        assert_eq!(pipeline.snapshot().static_segment.as_deref(), Some("(static)"));
    }
    assert_eq!(run(&pipeline), "source->(pre2)(static)");

    let listener = pipeline.listener().expect("对外监听者已设置");
    assert_eq!(listener.describe().name(), "(other)");
}

#[test]
fn epochs_advance_once_per_publication() {
    let pipeline = Arc::new(DynamicPipeline::new(PipelineConfig::named("epochs")));
    assert_eq!(pipeline.epoch(), 0);
    pipeline.set_listener(tag("(static)"));
    assert_eq!(pipeline.epoch(), 1);

    let report = pipeline.update_pipeline().unwrap();
    assert_eq!(report.epoch, 2);
    assert_eq!(pipeline.snapshot().epoch, 2);
}

#[test]
fn staged_processors_can_be_removed_by_identity() {
    let pipeline = ready_pipeline(PipelineConfig::named("remove"));
    let keep = tag("(keep)");
    let drop_me = tag("(drop)");
    let twin = tag("(drop)");
    pipeline.add_post_message_processor(Arc::clone(&keep)).unwrap();
    pipeline.add_post_message_processor(Arc::clone(&drop_me)).unwrap();

    assert!(!pipeline.remove_post_message_processor(&twin), "同名不同实例不应被移除");
    assert!(!pipeline.remove_pre_message_processor(&drop_me), "只在对应段内查找");
    assert!(pipeline.remove_post_message_processor(&drop_me));
    assert!(!pipeline.remove_post_message_processor(&drop_me));

    pipeline.update_pipeline().unwrap();
    assert_eq!(run(&pipeline), "source->(static)(keep)");
}

#[test]
fn the_static_segment_cannot_be_staged() {
    let pipeline = ready_pipeline(PipelineConfig::named("guard"));
    let static_segment = pipeline.static_segment().unwrap();
    let err = pipeline
        .add_pre_message_processor(static_segment)
        .expect_err("静态段不能再作为前置处理器");
    assert!(matches!(err, PipelineError::Argument(_)));
    assert_eq!(err.code(), conduit_pipeline::codes::PIPELINE_ARGUMENT);
}

#[test]
fn a_pipeline_cannot_contain_itself() {
    let pipeline = ready_pipeline(PipelineConfig::named("self"));
    let itself: SharedProcessor = pipeline.clone();
    assert!(matches!(
        pipeline.add_post_message_processor(itself),
        Err(PipelineError::Argument(_))
    ));
}

#[test]
fn disposed_pipelines_reject_work() {
    let pipeline = ready_pipeline(PipelineConfig::named("disposed"));
    pipeline.add_pre_message_processor(tag("(pre)")).unwrap();
    pipeline.update_pipeline().unwrap();
    pipeline.dispose().unwrap();

    let err = pipeline
        .process(MessageEvent::text("source->"))
        .expect_err("释放后拒绝处理");
    assert_eq!(err.code(), core_codes::PIPELINE_DISPOSED);
    assert!(matches!(
        pipeline.update_pipeline(),
        Err(PipelineError::Lifecycle(_))
    ));
    assert!(matches!(
        pipeline.add_pre_message_processor(tag("(late)")),
        Err(PipelineError::Lifecycle(_))
    ));
    pipeline.dispose().expect("重复释放为无操作");
}

#[test]
fn restaged_processors_are_carried_into_the_next_generation() {
    let pipeline = ready_pipeline(PipelineConfig::named("carry"));
    let pre1 = Stateful::shared("pre1");
    pipeline.add_pre_message_processor(pre1.clone()).unwrap();
    pipeline.update_pipeline().unwrap();
    assert_eq!(pre1.state(), LifecycleState::Initialised);

    pipeline.add_pre_message_processor(pre1.clone()).unwrap();
    pipeline.add_pre_message_processor(tag("(pre2)")).unwrap();
    let report = pipeline.update_pipeline().expect("延续的成员不重复初始化");
    assert!(report.is_clean());
    assert_eq!(pre1.state(), LifecycleState::Initialised, "延续的成员不被释放");
    assert_eq!(run(&pipeline), "source->(pre1)(pre2)(static)");

    pipeline.add_pre_message_processor(pre1.clone()).unwrap();
    pipeline.update_pipeline().expect("第三次构建仍可复用");
    assert_eq!(run(&pipeline), "source->(pre1)(static)");

    pipeline.update_pipeline().unwrap();
    assert_eq!(pre1.state(), LifecycleState::Disposed, "离开管线后才释放");
    assert_eq!(run(&pipeline), "source->(static)");
}

#[test]
fn carried_processors_stay_started() {
    let pipeline = ready_pipeline(PipelineConfig::named("carry-started"));
    pipeline.initialise().unwrap();
    pipeline.start().unwrap();

    let post = Stateful::shared("post");
    pipeline.add_post_message_processor(post.clone()).unwrap();
    pipeline.update_pipeline().unwrap();
    assert_eq!(post.state(), LifecycleState::Started, "启动后的管线同时启动新成员");

    pipeline.add_post_message_processor(post.clone()).unwrap();
    pipeline.update_pipeline().unwrap();
    assert_eq!(post.state(), LifecycleState::Started);
    assert_eq!(run(&pipeline), "source->(static)(post)");

    pipeline.update_pipeline().unwrap();
    assert_eq!(post.state(), LifecycleState::Disposed);
}

#[test]
fn a_moved_interceptor_only_sees_its_new_followers() {
    let pipeline = ready_pipeline(PipelineConfig::named("moved-pre"));
    let adapter = ResponseAdapter::wrap(tag("(resp)"));
    pipeline.add_pre_message_processor(Arc::clone(&adapter)).unwrap();
    pipeline.add_pre_message_processor(tag("(a)")).unwrap();
    pipeline.update_pipeline().unwrap();
    assert_eq!(run(&pipeline), "source->(a)(static)(resp)");

    pipeline.add_pre_message_processor(Arc::clone(&adapter)).unwrap();
    pipeline.update_pipeline().unwrap();
    assert_eq!(run(&pipeline), "source->(static)(resp)");
}

#[test]
fn an_interceptor_moved_to_the_tail_drops_its_old_followers() {
    let pipeline = ready_pipeline(PipelineConfig::named("moved-post"));
    let adapter = ResponseAdapter::wrap(tag("(resp)"));
    let follower = tag("(b)");
    pipeline.add_post_message_processor(Arc::clone(&adapter)).unwrap();
    pipeline.add_post_message_processor(Arc::clone(&follower)).unwrap();
    pipeline.update_pipeline().unwrap();
    assert_eq!(run(&pipeline), "source->(static)(b)(resp)");

    pipeline.add_post_message_processor(follower).unwrap();
    pipeline.add_post_message_processor(adapter).unwrap();
    pipeline.update_pipeline().unwrap();
    assert_eq!(run(&pipeline), "source->(static)(b)(resp)", "末位拦截器不再转发到旧后继");
}
