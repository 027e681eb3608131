// tests/incremental.rs

mod common;
use crate::common::{request, Harness, ProjectBuilder, TargetBuilder, TaskSpecBuilder};

use std::error::Error;

use buildplan::config::ActionConfig;
use buildplan::engine::{BuildEvent, BuildStatus, TaskOutcome};
use buildplan::types::Severity;

type TestResult = Result<(), Box<dyn Error>>;

fn compile_and_link() -> ProjectBuilder {
    ProjectBuilder::new().with_target(
        TargetBuilder::new("App")
            .phase(
                "sources",
                vec![
                    TaskSpecBuilder::process("Compile main.o")
                        .input("main.c")
                        .output("out/main.o")
                        .build(),
                ],
            )
            .phase(
                "link",
                vec![
                    TaskSpecBuilder::process("Link app")
                        .input("out/main.o")
                        .output("out/app")
                        .build(),
                ],
            ),
    )
}

/// Write the first whitespace-separated word of the single input.
fn first_word(fs: &dyn buildplan::fs::FileSystem, req: &buildplan::exec::ProcessRequest) -> anyhow::Result<bool> {
    let text = fs.read_to_string(&req.inputs[0])?;
    let word = text.split_whitespace().next().unwrap_or("").to_string();
    fs.write(&req.outputs[0], word.as_bytes())?;
    Ok(true)
}

/// Copy the single input verbatim.
fn passthrough(fs: &dyn buildplan::fs::FileSystem, req: &buildplan::exec::ProcessRequest) -> anyhow::Result<bool> {
    let bytes = fs.read(&req.inputs[0])?;
    fs.write(&req.outputs[0], &bytes)?;
    Ok(true)
}

#[tokio::test]
async fn mtime_only_changes_do_not_rebuild() -> TestResult {
    let h = Harness::new(compile_and_link())?;
    h.write("main.c", "int main;");

    let (first, _) = h.build(&request(&[])).await;
    assert_eq!(first.executed_rules(), vec!["Compile main.o", "Link app"]);

    h.bump_mtime("main.c");
    h.bump_mtime("out/main.o");
    let (second, _) = h.build(&request(&[])).await;
    assert!(second.succeeded());
    assert!(second.executed.is_empty(), "reran {:?}", second.executed_rules());
    Ok(())
}

#[tokio::test]
async fn content_change_reruns_owner_and_affected_dependents() -> TestResult {
    let h = Harness::new(compile_and_link())?;
    h.write("main.c", "int main;");
    h.build(&request(&[])).await;

    h.write("main.c", "int main(void);");
    let (result, delegate) = h.build(&request(&[])).await;
    assert_eq!(result.executed_rules(), vec!["Compile main.o", "Link app"]);
    delegate.assert_completed_before_started("Compile main.o", "Link app");
    assert!(h.read("out/app").contains("int main(void);"));
    Ok(())
}

#[tokio::test]
async fn identical_intermediate_output_stops_propagation() -> TestResult {
    let h = Harness::new(compile_and_link())?;
    h.executor.on("Compile main.o", first_word);
    h.write("main.c", "int main;");
    h.build(&request(&[])).await;

    // Only the second word changes; the object file stays byte-identical.
    h.write("main.c", "int other;");
    let (result, _) = h.build(&request(&[])).await;
    assert_eq!(result.executed_rules(), vec!["Compile main.o"]);
    assert_eq!(result.up_to_date.len(), 1);
    Ok(())
}

#[tokio::test]
async fn missing_output_reruns_its_producer() -> TestResult {
    let h = Harness::new(compile_and_link())?;
    h.write("main.c", "int main;");
    h.build(&request(&[])).await;

    std::fs::remove_file(h.path("out/app"))?;
    let (result, _) = h.build(&request(&[])).await;
    assert_eq!(result.executed_rules(), vec!["Link app"]);
    assert!(h.exists("out/app"));
    Ok(())
}

#[tokio::test]
async fn externally_modified_output_is_regenerated() -> TestResult {
    let h = Harness::new(compile_and_link())?;
    h.write("main.c", "int main;");
    h.build(&request(&[])).await;

    let original = h.read("out/app");
    h.write("out/app", "tampered");
    let (result, _) = h.build(&request(&[])).await;
    assert_eq!(result.executed_rules(), vec!["Link app"]);
    assert_eq!(h.read("out/app"), original);
    Ok(())
}

#[tokio::test]
async fn tasks_without_outputs_always_run_with_advisory() -> TestResult {
    let h = Harness::new(ProjectBuilder::new().with_target(
        TargetBuilder::new("Tool").phase(
            "scripts",
            vec![TaskSpecBuilder::process("PhaseScript lint").input("src.txt").build()],
        ),
    ))?;
    h.write("src.txt", "x");

    for _ in 0..2 {
        let (result, delegate) = h.build(&request(&[])).await;
        assert!(result.succeeded());
        assert_eq!(result.executed_rules(), vec!["PhaseScript lint"]);
        let advisories: Vec<_> = delegate
            .diagnostics()
            .into_iter()
            .filter(|d| d.severity == Severity::Warning)
            .collect();
        assert_eq!(advisories.len(), 1);
        assert!(advisories[0].message.contains("has no declared outputs"));
        assert_eq!(advisories[0].task.as_deref(), Some("PhaseScript lint"));
    }
    Ok(())
}

#[tokio::test]
async fn byte_changing_settings_rebuild_and_agnostic_ones_do_not() -> TestResult {
    let h = Harness::new(ProjectBuilder::new().with_target(
        TargetBuilder::new("App").phase(
            "sources",
            vec![
                TaskSpecBuilder::new("Compile main.o")
                    .command(&["cc", "$(OPT)", "$(COLOR_DIAGNOSTICS)", "-c", "main.c"])
                    .input("main.c")
                    .output("out/main.o")
                    .build(),
            ],
        ),
    ))?;
    h.write("main.c", "int main;");

    let with = |pairs: &[(&str, &str)]| {
        let mut req = request(&[]);
        for (k, v) in pairs {
            req.parameters = req.parameters.clone().with_override(*k, *v);
        }
        req
    };

    let (first, _) = h.build(&with(&[("OPT", "-O0")])).await;
    assert_eq!(first.executed.len(), 1);

    let (agnostic, _) = h.build(&with(&[("OPT", "-O0"), ("COLOR_DIAGNOSTICS", "YES")])).await;
    assert!(agnostic.executed.is_empty());

    let (relevant, _) = h.build(&with(&[("OPT", "-O2")])).await;
    assert_eq!(relevant.executed_rules(), vec!["Compile main.o"]);
    Ok(())
}

/// S1 copies `src.txt` to `one.txt`; S2 copies `one.txt` to `two.txt`.
fn script_chain() -> ProjectBuilder {
    ProjectBuilder::new().with_target(
        TargetBuilder::new("Scripts")
            .phase(
                "first",
                vec![TaskSpecBuilder::process("PhaseScript S1").input("src.txt").output("one.txt").build()],
            )
            .phase(
                "second",
                vec![TaskSpecBuilder::process("PhaseScript S2").input("one.txt").output("two.txt").build()],
            ),
    )
}

#[tokio::test]
async fn script_chain_follows_bytes_not_mtimes() -> TestResult {
    let h = Harness::new(script_chain())?;
    h.executor.on("PhaseScript S1", passthrough);
    h.executor.on("PhaseScript S2", passthrough);
    h.write("src.txt", "alpha");
    h.build(&request(&[])).await;
    assert_eq!(h.read("two.txt"), "alpha");

    h.bump_mtime("one.txt");
    let (touched, _) = h.build(&request(&[])).await;
    assert!(touched.executed.is_empty(), "reran {:?}", touched.executed_rules());

    h.write("src.txt", "beta");
    let (changed, delegate) = h.build(&request(&[])).await;
    assert_eq!(changed.executed_rules(), vec!["PhaseScript S1", "PhaseScript S2"]);
    delegate.assert_completed_before_started("PhaseScript S1", "PhaseScript S2");
    assert_eq!(h.read("two.txt"), "beta");
    Ok(())
}

#[tokio::test]
async fn three_phase_chain_stops_where_content_stops_changing() -> TestResult {
    let h = Harness::new(
        ProjectBuilder::new().with_target(
            TargetBuilder::new("Scripts")
                .phase(
                    "one",
                    vec![TaskSpecBuilder::process("PhaseScript P1").input("src.txt").output("one.txt").build()],
                )
                .phase(
                    "two",
                    vec![TaskSpecBuilder::process("PhaseScript P2").input("one.txt").output("two.txt").build()],
                )
                .phase(
                    "three",
                    vec![TaskSpecBuilder::process("PhaseScript P3").input("two.txt").output("three.txt").build()],
                ),
        ),
    )?;
    h.executor.on("PhaseScript P1", passthrough);
    h.executor.on("PhaseScript P2", first_word);
    h.executor.on("PhaseScript P3", passthrough);
    h.write("src.txt", "hello world");
    h.build(&request(&[])).await;
    assert_eq!(h.read("three.txt"), "hello");

    // The leading token survives, so phase three's input is unchanged.
    h.write("src.txt", "hello there");
    let (tail_only, _) = h.build(&request(&[])).await;
    assert_eq!(tail_only.executed_rules(), vec!["PhaseScript P1", "PhaseScript P2"]);

    h.write("src.txt", "goodbye there");
    let (first_word_changed, _) = h.build(&request(&[])).await;
    assert_eq!(
        first_word_changed.executed_rules(),
        vec!["PhaseScript P1", "PhaseScript P2", "PhaseScript P3"]
    );
    assert_eq!(h.read("three.txt"), "goodbye");
    Ok(())
}

/// Link writes the bundle binary from the first line of `main.c`; two
/// scripts write inside and outside the bundle; CodeSign consumes the whole
/// bundle except its own signature directory.
fn signed_bundle() -> ProjectBuilder {
    ProjectBuilder::new().with_target(
        TargetBuilder::new("App")
            .phase(
                "link",
                vec![TaskSpecBuilder::process("Ld App.app/App").input("main.c").output("App.app/App").build()],
            )
            .phase(
                "scripts",
                vec![
                    TaskSpecBuilder::process("PhaseScript embed")
                        .input("embed.src")
                        .output("App.app/Resources/embed.txt")
                        .build(),
                    TaskSpecBuilder::process("PhaseScript outside")
                        .input("outside.src")
                        .output("other/outside.txt")
                        .build(),
                ],
            )
            .phase(
                "sign",
                vec![
                    TaskSpecBuilder::process("CodeSign App.app")
                        .input("App.app/")
                        .input("App.entitlements")
                        .output("App.app/_CodeSignature/CodeResources")
                        .exclude("_CodeSignature")
                        .build(),
                ],
            ),
    )
}

fn first_line(fs: &dyn buildplan::fs::FileSystem, req: &buildplan::exec::ProcessRequest) -> anyhow::Result<bool> {
    let text = fs.read_to_string(&req.inputs[0])?;
    fs.write(&req.outputs[0], text.lines().next().unwrap_or("").as_bytes())?;
    Ok(true)
}

async fn signed_bundle_harness() -> Result<Harness, Box<dyn Error>> {
    let h = Harness::new(signed_bundle())?;
    h.executor.on("Ld App.app/App", first_line);
    h.write("main.c", "int main;\n// comment");
    h.write("embed.src", "embedded");
    h.write("outside.src", "outside");
    h.write("App.entitlements", "<plist/>");

    let (first, _) = h.build(&request(&[])).await;
    assert!(first.succeeded(), "{:?}", first.diagnostics);
    assert_eq!(h.executor.count("CodeSign App.app"), 1);

    let (null, _) = h.build(&request(&[])).await;
    assert!(null.executed.is_empty(), "null build reran {:?}", null.executed_rules());
    Ok(h)
}

#[tokio::test]
async fn codesign_reruns_when_the_binary_changes() -> TestResult {
    let h = signed_bundle_harness().await?;
    h.write("main.c", "int main(void);\n// comment");
    let (result, _) = h.build(&request(&[])).await;
    assert_eq!(result.executed_rules(), vec!["Ld App.app/App", "CodeSign App.app"]);
    Ok(())
}

#[tokio::test]
async fn codesign_skips_byte_identical_relink() -> TestResult {
    let h = signed_bundle_harness().await?;
    h.write("main.c", "int main;\n// edited comment");
    let (result, _) = h.build(&request(&[])).await;
    assert_eq!(result.executed_rules(), vec!["Ld App.app/App"]);
    Ok(())
}

#[tokio::test]
async fn codesign_reruns_for_changes_inside_the_bundle() -> TestResult {
    let h = signed_bundle_harness().await?;
    h.write("embed.src", "embedded v2");
    let (result, _) = h.build(&request(&[])).await;
    assert_eq!(result.executed_rules(), vec!["PhaseScript embed", "CodeSign App.app"]);

    h.write("App.entitlements", "<plist>debug</plist>");
    let (result, _) = h.build(&request(&[])).await;
    assert_eq!(result.executed_rules(), vec!["CodeSign App.app"]);
    Ok(())
}

#[tokio::test]
async fn codesign_ignores_script_output_outside_the_bundle() -> TestResult {
    let h = signed_bundle_harness().await?;
    h.write("outside.src", "outside v2");
    let (result, _) = h.build(&request(&[])).await;
    assert_eq!(result.executed_rules(), vec!["PhaseScript outside"]);
    Ok(())
}

#[tokio::test]
async fn missing_input_fails_only_that_task() -> TestResult {
    let h = Harness::new(
        compile_and_link().with_target(
            TargetBuilder::new("Docs").phase(
                "docs",
                vec![TaskSpecBuilder::process("Render docs").input("README").output("out/docs.html").build()],
            ),
        ),
    )?;
    h.write("README", "docs");

    let mut req = request(&[]);
    req.continue_building_after_errors = true;
    let (result, delegate) = h.build(&req).await;

    assert_eq!(result.status, BuildStatus::Failed);
    assert_eq!(result.executed_rules(), vec!["Render docs"]);
    let errors: Vec<_> = delegate
        .diagnostics()
        .into_iter()
        .filter(|d| d.is_error())
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains(&h.path("main.c").display().to_string()));
    assert!(errors[0].message.contains("Compile main.o"));
    assert_eq!(delegate.started_at("Link app"), None);
    assert!(delegate.events().iter().any(|e| matches!(
        e,
        BuildEvent::TaskCompleted { rule_info, outcome: TaskOutcome::Failed(_), .. } if rule_info == "Compile main.o"
    )));
    Ok(())
}

#[tokio::test]
async fn failed_task_reruns_on_the_next_build() -> TestResult {
    let h = Harness::new(compile_and_link())?;
    h.write("main.c", "int main;");
    h.executor.fail("Link app");

    let (failed, _) = h.build(&request(&[])).await;
    assert_eq!(failed.status, BuildStatus::Failed);

    h.executor.on("Link app", passthrough);
    let (retry, _) = h.build(&request(&[])).await;
    assert!(retry.succeeded());
    assert_eq!(retry.executed_rules(), vec!["Link app"]);
    Ok(())
}

#[tokio::test]
async fn dry_run_reports_without_executing_or_recording() -> TestResult {
    let h = Harness::new(compile_and_link())?;
    h.write("main.c", "int main;");

    let mut dry = request(&[]);
    dry.use_dry_run = true;
    let (result, delegate) = h.build(&dry).await;
    assert!(result.succeeded(), "{:?}", result.diagnostics);
    assert_eq!(result.executed_rules(), vec!["Compile main.o", "Link app"]);
    assert_eq!(delegate.started(), vec!["Compile main.o", "Link app"]);
    assert!(h.executor.invocations().is_empty());
    assert!(!h.exists("out/app"));

    let (real, _) = h.build(&request(&[])).await;
    assert_eq!(real.executed_rules(), vec!["Compile main.o", "Link app"]);
    assert_eq!(h.executor.invocations().len(), 2);
    Ok(())
}

#[tokio::test]
async fn in_process_actions_are_incremental() -> TestResult {
    let h = Harness::new(ProjectBuilder::new().with_target(
        TargetBuilder::new("Bundle")
            .phase(
                "resources",
                vec![
                    TaskSpecBuilder::new("MkDir Bundle.app").action(ActionConfig::Mkdir).output("Bundle.app/").build(),
                    TaskSpecBuilder::new("WriteAuxiliaryFile Info.plist")
                        .action(ActionConfig::WriteFile)
                        .contents("name=$(TARGET_NAME)")
                        .output("Bundle.app/Info.plist")
                        .build(),
                    TaskSpecBuilder::new("Copy icon.png")
                        .action(ActionConfig::Copy)
                        .input("icon.png")
                        .output("Bundle.app/icon.png")
                        .build(),
                ],
            ),
    ))?;
    h.write("icon.png", "png");

    let (first, _) = h.build(&request(&[])).await;
    assert!(first.succeeded(), "{:?}", first.diagnostics);
    assert_eq!(h.read("Bundle.app/Info.plist"), "name=Bundle");
    assert_eq!(h.read("Bundle.app/icon.png"), "png");
    assert!(h.executor.invocations().is_empty());

    let description = first.description.ok_or("no description")?;
    assert_eq!(
        description.copied_path_map.get(&h.path("Bundle.app/icon.png")),
        Some(&h.path("icon.png"))
    );

    h.write("icon.png", "png v2");
    let (second, _) = h.build(&request(&[])).await;
    assert_eq!(second.executed_rules(), vec!["Copy icon.png"]);
    assert_eq!(h.read("Bundle.app/icon.png"), "png v2");
    Ok(())
}

#[tokio::test]
async fn injected_state_store_replaces_the_database_file() -> TestResult {
    use buildplan::engine::BuildService;
    use buildplan::incremental::{BuildStateStore, MemoryStateStore};
    use std::sync::Arc;

    let mut h = Harness::new(compile_and_link())?;
    let store = Arc::new(MemoryStateStore::new());
    h.service = BuildService::for_project(Arc::clone(&h.fs), h.executor.clone(), &h.project)
        .with_state_store(store.clone());
    h.write("main.c", "int main;");

    let (first, _) = h.build(&request(&[])).await;
    assert_eq!(first.executed_rules(), vec!["Compile main.o", "Link app"]);
    assert!(!h.project.state_db_path().exists());
    assert!(!store.load()?.tasks.is_empty());

    let (second, _) = h.build(&request(&[])).await;
    assert!(second.executed_rules().is_empty());
    Ok(())
}

#[tokio::test]
async fn reused_session_skips_rehashing_unchanged_files() -> TestResult {
    use buildplan::cache::SessionReuse;
    use buildplan::fs::{FileSystem, RealFileSystem};
    use crate::common::CountingFileSystem;
    use std::sync::Arc;

    let counting = Arc::new(CountingFileSystem::new(Arc::new(RealFileSystem)));
    let fs: Arc<dyn FileSystem> = counting.clone();
    let h = Harness::with_fs(compile_and_link(), fs)?;
    h.write("main.c", "int main;");

    let (first, _) = h.build(&request(&[])).await;
    assert_eq!(first.executed_rules(), vec!["Compile main.o", "Link app"]);

    // Files written moments ago are hashed again until their mtime settles.
    for rel in ["main.c", "out/main.o", "out/app"] {
        h.backdate(rel);
    }
    let (second, _) = h.build(&request(&[])).await;
    assert!(second.executed.is_empty(), "reran {:?}", second.executed_rules());
    assert_eq!(second.session, Some(SessionReuse::Reused));

    counting.reset();
    let (third, _) = h.build(&request(&[])).await;
    assert!(third.succeeded());
    assert!(third.executed.is_empty(), "reran {:?}", third.executed_rules());
    assert_eq!(third.session, Some(SessionReuse::Reused));
    assert_eq!(counting.files_opened(), 0);

    // A new process starts with an empty hash cache.
    let mut h = h;
    h.restart();
    counting.reset();
    let (after_restart, _) = h.build(&request(&[])).await;
    assert!(after_restart.executed.is_empty());
    assert!(counting.files_opened() > 0);
    Ok(())
}
