//! End-to-end tests for sequencing, retry and teardown.

#[cfg(test)]
mod tests {
    use crate::cancellation::CancellationToken;
    use crate::core::{Outcome, RunState};
    use crate::errors::ProvisionError;
    use crate::events::{names, CollectingEventSink};
    use crate::sequencer::{
        retry, RetryPolicy, SequencerBuilder, StageSpec, Teardown, TeardownGroup, TeardownScope,
    };
    use crate::stages::{FnStage, Stage, StageContext};
    use crate::testing::{FakeResource, MockStage, RecordingStage, SlowStage};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn stage(s: impl Stage + 'static) -> Arc<dyn Stage> {
        Arc::new(s)
    }

    fn names_and_labels(report: &crate::core::SequenceReport) -> Vec<(String, &'static str)> {
        report
            .records
            .iter()
            .map(|r| (r.name.clone(), r.outcome.label()))
            .collect()
    }

    #[tokio::test]
    async fn test_non_fatal_failure_continues_with_warnings() {
        let sequencer = SequencerBuilder::new("provision")
            .with_spec(StageSpec::new(stage(MockStage::new("a"))).fatal())
            .unwrap()
            .with_spec(StageSpec::new(stage(MockStage::failing("b", "chart missing"))).non_fatal())
            .unwrap()
            .with_spec(StageSpec::new(stage(MockStage::new("c"))).fatal())
            .unwrap()
            .build()
            .unwrap();

        let report = sequencer.run().await;

        assert_eq!(
            report.outcomes(),
            vec![
                ("a", &Outcome::Success),
                ("b", &Outcome::failure("chart missing")),
                ("c", &Outcome::Success),
            ]
        );
        assert_eq!(report.state, RunState::CompletedWithWarnings);
        assert_eq!(report.exit_code(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_after_retries_aborts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let failing = FnStage::new("a", move |ctx: StageContext| {
            let counter = counter.clone();
            async move {
                let policy = RetryPolicy::new(3, Duration::from_secs(2), 2.0);
                retry(&policy, "a", &ctx.token, || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(ProvisionError::TransientExternal("api unavailable".into())) }
                })
                .await
            }
        });
        let b = Arc::new(MockStage::new("b"));
        let sink = Arc::new(CollectingEventSink::new());

        let report = SequencerBuilder::new("provision")
            .with_sink(sink.clone())
            .stage(stage(failing), &[])
            .unwrap()
            .stage(b.clone(), &["a"])
            .unwrap()
            .stage(stage(MockStage::new("c")), &[])
            .unwrap()
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            names_and_labels(&report),
            vec![
                ("a".to_string(), "failure"),
                ("b".to_string(), "not_run"),
                ("c".to_string(), "not_run"),
            ]
        );
        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.exit_code(), 1);
        assert_eq!(b.call_count(), 0);
        assert_eq!(sink.events_of_type(names::STAGE_STARTED).len(), 1);
    }

    #[tokio::test]
    async fn test_degraded_fatal_stage_does_not_abort() {
        let report = SequencerBuilder::new("provision")
            .stage(
                stage(MockStage::scripted("ingress", vec![Outcome::degraded("webhook slow")])),
                &[],
            )
            .unwrap()
            .stage(stage(MockStage::new("dns")), &["ingress"])
            .unwrap()
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.state, RunState::CompletedWithWarnings);
        assert_eq!(report.outcome("dns"), Some(&Outcome::Success));
        assert_eq!(report.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_stages_run_in_declaration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = SequencerBuilder::new("provision");
        for name in ["cluster", "ingress", "dns", "ldap", "oidc"] {
            builder
                .add_stage(StageSpec::new(stage(RecordingStage::new(name, log.clone()))))
                .unwrap();
        }

        let report = builder.build().unwrap().run().await;

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(*log.lock(), vec!["cluster", "ingress", "dns", "ldap", "oidc"]);
    }

    #[tokio::test]
    async fn test_skipped_stage_is_recorded() {
        let forge = Arc::new(MockStage::new("forge"));
        let report = SequencerBuilder::new("provision")
            .stage(stage(MockStage::new("cluster")), &[])
            .unwrap()
            .with_spec(StageSpec::new(forge.clone()).non_fatal().skip_because("disabled"))
            .unwrap()
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.outcome("forge"), Some(&Outcome::Skipped("disabled".into())));
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(forge.call_count(), 0);
    }

    #[tokio::test]
    async fn test_event_stream() {
        let sink = Arc::new(CollectingEventSink::new());
        SequencerBuilder::new("provision")
            .with_sink(sink.clone())
            .stage(stage(MockStage::new("cluster")), &[])
            .unwrap()
            .with_spec(StageSpec::new(stage(MockStage::failing("dns", "no ip"))).non_fatal())
            .unwrap()
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(
            sink.event_types(),
            vec![
                names::RUN_STARTED,
                names::STAGE_STARTED,
                names::STAGE_COMPLETED,
                names::STAGE_STARTED,
                names::STAGE_FAILED,
                names::RUN_FINISHED,
            ]
        );
        let failed = sink.events_of_type(names::STAGE_FAILED);
        let data = failed[0].1.clone().unwrap();
        assert_eq!(data["stage"], "dns");
        assert_eq!(data["reason"], "no ip");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_in_progress_stage() {
        let token = Arc::new(CancellationToken::new());
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel("interrupt");
        });

        let report = SequencerBuilder::new("provision")
            .with_token(token)
            .stage(stage(MockStage::new("cluster")), &[])
            .unwrap()
            .stage(stage(SlowStage::new("ingress", Duration::from_secs(60))), &[])
            .unwrap()
            .stage(stage(MockStage::new("dns")), &[])
            .unwrap()
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(
            names_and_labels(&report),
            vec![
                ("cluster".to_string(), "success"),
                ("ingress".to_string(), "interrupted"),
                ("dns".to_string(), "not_run"),
            ]
        );
        assert_eq!(report.state, RunState::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_stage_ignoring_token() {
        let token = Arc::new(CancellationToken::new());
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel("interrupt");
        });

        let report = SequencerBuilder::new("provision")
            .with_token(token)
            .stage(stage(SlowStage::stubborn("cluster", Duration::from_secs(600))), &[])
            .unwrap()
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.outcome("cluster"), Some(&Outcome::Interrupted));
        assert_eq!(report.state, RunState::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stubborn_stage_dropped_after_grace_period() {
        let token = Arc::new(CancellationToken::new());
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel("interrupt");
        });

        let start = tokio::time::Instant::now();
        let report = SequencerBuilder::new("provision")
            .with_token(token)
            .with_cancel_grace(Duration::from_secs(5))
            .stage(stage(SlowStage::stubborn("cluster", Duration::from_secs(600))), &[])
            .unwrap()
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.outcome("cluster"), Some(&Outcome::Interrupted));
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stage_finishing_within_grace_keeps_its_outcome() {
        let token = Arc::new(CancellationToken::new());
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel("interrupt");
        });

        let report = SequencerBuilder::new("provision")
            .with_token(token)
            .with_cancel_grace(Duration::from_secs(5))
            .stage(stage(SlowStage::stubborn("cluster", Duration::from_secs(3))), &[])
            .unwrap()
            .stage(stage(MockStage::new("dns")), &[])
            .unwrap()
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.outcome("cluster"), Some(&Outcome::Success));
        assert_eq!(report.outcome("dns"), Some(&Outcome::NotRun));
        assert_eq!(report.state, RunState::Aborted);
    }

    #[tokio::test]
    async fn test_cancelled_before_run_marks_everything_not_run() {
        let token = Arc::new(CancellationToken::new());
        token.cancel("interrupt");
        let cluster = Arc::new(MockStage::new("cluster"));

        let report = SequencerBuilder::new("provision")
            .with_token(token)
            .stage(cluster.clone(), &[])
            .unwrap()
            .build()
            .unwrap()
            .run()
            .await;

        assert_eq!(report.outcome("cluster"), Some(&Outcome::NotRun));
        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(cluster.call_count(), 0);
    }

    fn teardown_plan(
        releases: &[Arc<FakeResource>],
        cluster: &Arc<FakeResource>,
        kubeconfig: &Arc<FakeResource>,
        docker: &Arc<FakeResource>,
    ) -> Teardown {
        let mut plan = Teardown::new("teardown")
            .with_retry(RetryPolicy::new(3, Duration::from_millis(10), 2.0));
        for release in releases.iter().rev() {
            plan = plan.step(TeardownGroup::Cluster, release.clone());
        }
        plan.step(TeardownGroup::Cluster, cluster.clone())
            .step(TeardownGroup::Config, kubeconfig.clone())
            .step(TeardownGroup::Resources, docker.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_is_idempotent() {
        let releases = vec![
            FakeResource::present("helm-ingress-nginx"),
            FakeResource::flaky("helm-dex", 1),
        ];
        let cluster = FakeResource::present("kind-cluster");
        let kubeconfig = FakeResource::present("kubeconfig-entries");
        let docker = FakeResource::absent("docker-leftovers");
        let plan = teardown_plan(&releases, &cluster, &kubeconfig, &docker);

        let first = plan.run(TeardownScope::All).await.unwrap();
        let removals_after_first: Vec<_> = releases.iter().map(|r| r.removals()).collect();
        let second = plan.run(TeardownScope::All).await.unwrap();

        assert_eq!(first.state, RunState::Completed);
        assert_eq!(second.state, RunState::Completed);
        assert_eq!(
            first.outcomes().iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![
                "helm-dex",
                "helm-ingress-nginx",
                "kind-cluster",
                "kubeconfig-entries",
                "docker-leftovers",
            ]
        );
        assert!(second.records.iter().all(|r| r.outcome == Outcome::Success));
        assert_eq!(removals_after_first, vec![1, 2]);
        assert_eq!(
            releases.iter().map(|r| r.removals()).collect::<Vec<_>>(),
            removals_after_first
        );
        assert!(!cluster.is_present());
        assert!(!kubeconfig.is_present());
        assert_eq!(docker.removals(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_failure_is_warning_not_abort() {
        let releases = vec![FakeResource::flaky("helm-dex", 10)];
        let cluster = FakeResource::present("kind-cluster");
        let kubeconfig = FakeResource::present("kubeconfig-entries");
        let docker = FakeResource::present("docker-leftovers");
        let plan = teardown_plan(&releases, &cluster, &kubeconfig, &docker);

        let report = plan.run(TeardownScope::ClusterOnly).await.unwrap();

        assert_eq!(report.state, RunState::CompletedWithWarnings);
        assert!(report.outcome("helm-dex").is_some_and(Outcome::is_failure));
        assert_eq!(report.outcome("kind-cluster"), Some(&Outcome::Success));
        assert_eq!(report.records.len(), 2);
        assert!(kubeconfig.is_present());
        assert!(docker.is_present());
    }
}
