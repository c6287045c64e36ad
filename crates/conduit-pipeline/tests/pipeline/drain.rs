//! Drain 拆除策略：旧段等待在途调用结束，超时后仍然拆除并告警。

use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use conduit_pipeline::{PipelineConfig, TeardownPolicy};
use tracing_test::traced_test;

use super::support::{Hold, Recorder, entries, journal, ready_pipeline, run};

fn draining(name: &str, timeout: Duration) -> PipelineConfig {
    PipelineConfig::named(name).with_teardown(TeardownPolicy::Drain { timeout })
}

fn disposed(journal: &super::support::Journal) -> bool {
    entries(journal).iter().any(|entry| entry == "rec:dispose")
}

#[test]
fn retired_segments_wait_for_in_flight_calls() {
    let pipeline = ready_pipeline(draining("drain", Duration::from_secs(10)));
    let journal = journal();
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    pipeline
        .add_pre_message_processor(Hold::shared(&entered, &release))
        .unwrap();
    pipeline
        .add_pre_message_processor(Recorder::shared("rec", &journal))
        .unwrap();
    pipeline.update_pipeline().unwrap();

    let (output, early_dispose, updater_blocked) = thread::scope(|scope| {
        let reader = scope.spawn(|| run(&pipeline));
        entered.wait();
        let updater = scope.spawn(|| pipeline.reset_and_update());

        thread::sleep(Duration::from_millis(50));
        let early_dispose = disposed(&journal);
        let updater_blocked = !updater.is_finished();

        release.wait();
        let output = reader.join().expect("读线程不应 panic");
        updater
            .join()
            .expect("更新线程不应 panic")
            .expect("重置成功");
        (output, early_dispose, updater_blocked)
    });

    assert!(!early_dispose, "在途调用结束前旧段不应被释放");
    assert!(updater_blocked, "更新应等待在途调用");
    assert_eq!(output, "source->(hold)(rec)(static)", "在途调用完整地跑完旧代");
    assert!(disposed(&journal));
    assert_eq!(run(&pipeline), "source->(static)");
}

#[test]
#[traced_test]
fn drain_gives_up_after_the_timeout() {
    let pipeline = ready_pipeline(draining("drain-timeout", Duration::from_millis(20)));
    let journal = journal();
    let entered = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    pipeline
        .add_pre_message_processor(Hold::shared(&entered, &release))
        .unwrap();
    pipeline
        .add_pre_message_processor(Recorder::shared("rec", &journal))
        .unwrap();
    pipeline.update_pipeline().unwrap();

    thread::scope(|scope| {
        let reader = scope.spawn(|| run(&pipeline));
        entered.wait();

        let report = pipeline.reset_and_update();
        let disposed_while_in_flight = disposed(&journal);
        release.wait();

        report.expect("超时后仍然发布新代");
        assert!(disposed_while_in_flight, "超时后不再等待在途调用");
        assert_eq!(reader.join().expect("读线程不应 panic"), "source->(hold)(rec)(static)");
    });

    assert!(logs_contain("drain timed out"));
    assert_eq!(run(&pipeline), "source->(static)");
}

#[test]
fn drain_returns_immediately_when_nothing_is_in_flight() {
    let pipeline = ready_pipeline(draining("drain-idle", Duration::from_secs(10)));
    let journal = journal();
    pipeline
        .add_post_message_processor(Recorder::shared("rec", &journal))
        .unwrap();
    pipeline.update_pipeline().unwrap();
    assert_eq!(run(&pipeline), "source->(static)(rec)");

    let report = pipeline.reset_and_update().unwrap();
    assert!(report.is_clean());
    assert!(disposed(&journal));
}
