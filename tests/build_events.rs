// tests/build_events.rs

mod common;
use crate::common::{request, Harness, ProjectBuilder, TargetBuilder, TaskSpecBuilder};

use std::error::Error;

use buildplan::engine::{BuildEvent, BuildStatus};
use buildplan::types::DependencyScope;

type TestResult = Result<(), Box<dyn Error>>;

fn compile(rule: &str, input: &str, output: &str) -> buildplan::config::TaskSpec {
    TaskSpecBuilder::process(rule).input(input).output(output).build()
}

/// Lib (two phases) <- App, plus an independent Tool target.
fn workspace() -> ProjectBuilder {
    ProjectBuilder::new()
        .with_target(
            TargetBuilder::new("Lib")
                .phase("headers", vec![compile("Copy lib.h", "lib.h", "out/include/lib.h")])
                .phase("sources", vec![compile("Compile lib.o", "lib.c", "out/lib.o")]),
        )
        .with_target(
            TargetBuilder::new("App")
                .depends_on("Lib")
                .phase("sources", vec![compile("Compile app.o", "app.c", "out/app.o")]),
        )
        .with_target(
            TargetBuilder::new("Tool").phase("sources", vec![compile("Compile tool.o", "tool.c", "out/tool.o")]),
        )
}

fn write_sources(h: &Harness) {
    for (file, text) in [("lib.h", "h"), ("lib.c", "lib"), ("app.c", "app"), ("tool.c", "tool")] {
        h.write(file, text);
    }
}

fn position(events: &[BuildEvent], pred: impl Fn(&BuildEvent) -> bool) -> usize {
    events.iter().position(pred).unwrap_or(usize::MAX)
}

fn target_started(target: &str) -> impl Fn(&BuildEvent) -> bool + '_ {
    move |e| matches!(e, BuildEvent::TargetStarted { target: t } if t == target)
}

fn target_completed(target: &str) -> impl Fn(&BuildEvent) -> bool + '_ {
    move |e| matches!(e, BuildEvent::TargetCompleted { target: t } if t == target)
}

#[tokio::test]
async fn event_stream_is_bracketed_and_ordered() -> TestResult {
    let h = Harness::new(workspace())?;
    write_sources(&h);

    let (result, delegate) = h.build(&request(&[])).await;
    assert!(result.succeeded(), "{:?}", result.diagnostics);
    let events = delegate.events();

    assert_eq!(events.first(), Some(&BuildEvent::BuildStarted));
    assert_eq!(
        events.last(),
        Some(&BuildEvent::BuildCompleted {
            status: BuildStatus::Succeeded
        })
    );

    // Phases run in order; dependencies finish before dependents start.
    delegate.assert_completed_before_started("Copy lib.h", "Compile lib.o");
    delegate.assert_completed_before_started("Compile lib.o", "Compile app.o");
    assert!(position(&events, target_completed("Lib")) < position(&events, target_started("App")));

    // Target gates bound their tasks.
    for (target, rule) in [("Lib", "Copy lib.h"), ("Lib", "Compile lib.o"), ("App", "Compile app.o"), ("Tool", "Compile tool.o")] {
        let start = position(&events, target_started(target));
        let end = position(&events, target_completed(target));
        let task_start = delegate.started_at(rule).ok_or("task never started")?;
        let task_end = delegate.completed_at(rule).ok_or("task never completed")?;
        assert!(start < task_start && task_start < task_end && task_end < end, "{rule} escaped {target}");
    }

    // Gates are never reported as work, and progress never overshoots.
    for event in &events {
        match event {
            BuildEvent::TaskStarted { rule_info, progress, .. }
            | BuildEvent::TaskCompleted { rule_info, progress, .. }
            | BuildEvent::TaskUpToDate { rule_info, progress, .. } => {
                assert!(!rule_info.starts_with("Gate"), "gate reported: {rule_info}");
                assert!(progress.started + progress.up_to_date <= progress.max);
                assert_eq!(progress.max, 4);
            }
            _ => {}
        }
    }
    assert_eq!(result.progress.started, 4);
    assert_eq!(result.progress.completed, 4);
    Ok(())
}

#[tokio::test]
async fn null_build_reports_every_task_up_to_date() -> TestResult {
    let h = Harness::new(workspace())?;
    write_sources(&h);
    h.build(&request(&[])).await;

    let (result, delegate) = h.build(&request(&[])).await;
    assert!(result.succeeded());
    assert!(delegate.started().is_empty());
    let mut up_to_date = delegate.up_to_date();
    up_to_date.sort();
    assert_eq!(
        up_to_date,
        vec!["Compile app.o", "Compile lib.o", "Compile tool.o", "Copy lib.h"]
    );
    assert!(h.executor.invocations().is_empty());
    Ok(())
}

#[tokio::test]
async fn serial_targets_complete_in_strict_order() -> TestResult {
    let h = Harness::new(workspace())?;
    write_sources(&h);

    let mut req = request(&[]);
    req.use_parallel_targets = false;
    let (result, delegate) = h.build(&req).await;
    assert!(result.succeeded());

    let events = delegate.events();
    let spans: Vec<(usize, usize)> = result
        .description
        .as_ref()
        .ok_or("no description")?
        .targets
        .iter()
        .map(|t| {
            (
                position(&events, target_started(t.name())),
                position(&events, target_completed(t.name())),
            )
        })
        .collect();
    let mut sorted = spans.clone();
    sorted.sort();
    for pair in sorted.windows(2) {
        assert!(pair[0].1 < pair[1].0, "targets overlapped: {spans:?}");
    }
    Ok(())
}

#[tokio::test]
async fn first_failure_stops_scheduling_new_work() -> TestResult {
    let h = Harness::new(workspace().jobs(1))?;
    write_sources(&h);
    h.executor.fail("Copy lib.h");

    let (result, delegate) = h.build(&request(&["App"])).await;
    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(delegate.started(), vec!["Copy lib.h"]);
    assert!(delegate
        .diagnostics()
        .iter()
        .any(|d| d.is_error() && d.message.contains("task 'Copy lib.h' failed")));
    assert!(matches!(
        delegate.events().last(),
        Some(BuildEvent::BuildCompleted {
            status: BuildStatus::Failed
        })
    ));
    Ok(())
}

#[tokio::test]
async fn keep_going_skips_only_dependents_of_the_failure() -> TestResult {
    let h = Harness::new(workspace())?;
    write_sources(&h);
    h.executor.fail("Compile lib.o");

    let mut req = request(&[]);
    req.continue_building_after_errors = true;
    let (result, delegate) = h.build(&req).await;

    assert_eq!(result.status, BuildStatus::Failed);
    let started = delegate.started();
    assert!(started.contains(&"Compile tool.o".to_string()));
    assert!(started.contains(&"Copy lib.h".to_string()));
    assert!(!started.contains(&"Compile app.o".to_string()));
    assert!(h.exists("out/tool.o"));
    Ok(())
}

#[tokio::test]
async fn targets_only_scope_excludes_dependencies() -> TestResult {
    let h = Harness::new(workspace())?;
    write_sources(&h);

    let mut req = request(&["App"]);
    req.dependency_scope = DependencyScope::TargetsOnly;
    let (result, _) = h.build(&req).await;
    assert!(result.succeeded());
    assert_eq!(result.executed_rules(), vec!["Compile app.o"]);

    let (workspace_scope, _) = h.build(&request(&["App"])).await;
    let mut rules = workspace_scope.executed_rules();
    rules.sort();
    assert_eq!(rules, vec!["Compile lib.o", "Copy lib.h"]);
    Ok(())
}

#[tokio::test]
async fn implicit_dependencies_order_targets() -> TestResult {
    let h = Harness::new(
        ProjectBuilder::new()
            .with_target(
                TargetBuilder::new("Gen").phase("gen", vec![compile("Generate api.h", "api.def", "out/api.h")]),
            )
            .with_target(
                TargetBuilder::new("User").phase("sources", vec![compile("Compile user.o", "out/api.h", "out/user.o")]),
            ),
    )?;
    h.write("api.def", "api");

    let mut req = request(&["User"]);
    req.use_implicit_dependencies = true;
    let (result, delegate) = h.build(&req).await;
    assert!(result.succeeded(), "{:?}", result.diagnostics);

    let description = result.description.as_ref().ok_or("no description")?;
    assert_eq!(description.target_dependencies.get("User"), Some(&vec!["Gen".to_string()]));
    let events = delegate.events();
    assert!(position(&events, target_completed("Gen")) < position(&events, target_started("User")));
    Ok(())
}

#[tokio::test]
async fn empty_target_adds_no_cycle() -> TestResult {
    let h = Harness::new(
        workspace().with_target(TargetBuilder::new("Empty").depends_on("App").phase("sign", vec![])),
    )?;
    write_sources(&h);

    let (result, delegate) = h.build(&request(&["Empty"])).await;
    assert!(result.succeeded(), "{:?}", result.diagnostics);
    let events = delegate.events();
    assert!(position(&events, target_completed("App")) < position(&events, target_started("Empty")));
    assert!(position(&events, target_completed("Empty")) < usize::MAX);
    Ok(())
}

#[tokio::test]
async fn duplicate_outputs_report_one_diagnostic_and_still_bracket() -> TestResult {
    let h = Harness::new(
        ProjectBuilder::new()
            .with_target(TargetBuilder::new("A").phase("p", vec![compile("Gen A", "a.in", "out/shared.txt")]))
            .with_target(TargetBuilder::new("B").phase("p", vec![compile("Gen B", "b.in", "out/shared.txt")]))
            .with_target(TargetBuilder::new("C").phase("p", vec![compile("Gen C", "c.in", "out/c.txt")])),
    )?;
    for f in ["a.in", "b.in", "c.in"] {
        h.write(f, f);
    }

    let (result, delegate) = h.build(&request(&[])).await;
    assert_eq!(result.status, BuildStatus::Failed);

    let errors: Vec<_> = delegate
        .diagnostics()
        .into_iter()
        .filter(|d| d.is_error())
        .collect();
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert!(errors[0].message.contains("Gen A"));
    assert!(errors[0].message.contains("Gen B"));

    let events = delegate.events();
    assert_eq!(events.first(), Some(&BuildEvent::BuildStarted));
    assert!(matches!(events.last(), Some(BuildEvent::BuildCompleted { .. })));
    assert!(h.executor.invocations().is_empty());

    // Unaffected targets still build when errors are tolerated.
    let mut req = request(&[]);
    req.continue_building_after_errors = true;
    let (tolerant, _) = h.build(&req).await;
    assert_eq!(tolerant.status, BuildStatus::Failed);
    assert_eq!(tolerant.executed_rules(), vec!["Gen C"]);
    Ok(())
}

#[tokio::test]
async fn mutators_chain_after_the_creator() -> TestResult {
    let h = Harness::new(ProjectBuilder::new().with_target(
        TargetBuilder::new("App")
            .phase("link", vec![compile("Ld app", "main.o", "out/app")])
            .phase(
                "post",
                vec![
                    TaskSpecBuilder::process("Strip app").input("out/app").output("out/app").build(),
                    TaskSpecBuilder::process("CodeSign app").input("out/app").output("out/app").build(),
                ],
            ),
    ))?;
    h.write("main.o", "obj");

    let (first, delegate) = h.build(&request(&[])).await;
    assert!(first.succeeded(), "{:?}", first.diagnostics);
    assert!(!first.diagnostics.iter().any(|d| d.is_error()));
    assert_eq!(first.executed_rules(), vec!["Ld app", "Strip app", "CodeSign app"]);
    delegate.assert_completed_before_started("Strip app", "CodeSign app");

    let (null, _) = h.build(&request(&[])).await;
    assert!(null.executed.is_empty(), "reran {:?}", null.executed_rules());

    h.write("main.o", "obj v2");
    let (relinked, _) = h.build(&request(&[])).await;
    assert_eq!(relinked.executed_rules(), vec!["Ld app", "Strip app", "CodeSign app"]);
    Ok(())
}

#[tokio::test]
async fn unknown_target_fails_with_bracketing_events() -> TestResult {
    let h = Harness::new(workspace())?;
    let (result, delegate) = h.build(&request(&["Missing"])).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert!(result.description.is_none());
    let events = delegate.events();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0], BuildEvent::BuildStarted);
    assert!(matches!(&events[1], BuildEvent::Diagnostic(d) if d.message.contains("Missing")));
    Ok(())
}
