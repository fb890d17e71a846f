use std::time::Duration;

use cfg_if::cfg_if;
use indoc::indoc;
use mdrip::scanner::MSG_TIMEOUT;
use mdrip::{FileName, Label, Problem, Program, ProgramError, RunResult, Runner};

fn run_with(
    runner: &Runner,
    label: &str,
    timeout: Duration,
    documents: &[(&str, &str)],
) -> RunResult {
    let documents = documents
        .iter()
        .map(|(name, text)| (FileName::from(*name), text.to_string()))
        .collect();
    let program = Program::from_documents(timeout, Label::new(label), documents).unwrap();
    runner.run(&program).unwrap()
}

fn run_documents(label: &str, timeout: Duration, documents: &[(&str, &str)]) -> RunResult {
    run_with(&Runner::default(), label, timeout, documents)
}

fn run(label: &str, markdown: &str) -> RunResult {
    run_documents(label, Duration::from_secs(5), &[("doc.md", markdown)])
}

macro_rules! add_test {
    ($name:ident, $label:literal, $markdown:expr, $index:expr $(,)?) => {
        #[test]
        fn $name() {
            let expected: Option<usize> = $index;
            let result = run($label, $markdown);
            assert_eq!(result.index(), expected, "{result:?}");
            assert_eq!(result.succeeded(), expected.is_none(), "{result:?}");
        }
    };
}

cfg_if! {
    if #[cfg(unix)] {
        add_test!(
            all_succeed,
            "test",
            indoc! {r#"
                <!-- @test -->
                ```
                echo one
                ```
                <!-- @test -->
                ```
                echo two
                ```
            "#},
            None,
        );

        add_test!(
            first_fails,
            "test",
            "<!-- @test -->\n```\nfalse\n```\n",
            Some(0),
        );

        add_test!(
            second_fails,
            "test",
            indoc! {r#"
                <!-- @test -->
                ```
                echo fine
                ```
                <!-- @test -->
                ```
                ls /definitely/not/here
                echo unreachable
                ```
            "#},
            Some(1),
        );

        add_test!(
            exit_code_fails,
            "test",
            "<!-- @test -->\n```\nexit 3\n```\n",
            Some(0),
        );

        add_test!(
            nested_process_fails,
            "test",
            "<!-- @test -->\n```\nbash -c 'exit 1'\n```\n",
            Some(0),
        );

        add_test!(
            other_labels_are_not_run,
            "test",
            indoc! {r#"
                <!-- @broken -->
                ```
                false
                ```
                <!-- @test -->
                ```
                true
                ```
            "#},
            None,
        );

        add_test!(
            environment_carries_over,
            "test",
            indoc! {r#"
                <!-- @test -->
                ```
                export GREETING=hello
                ```
                <!-- @test -->
                ```
                test "$GREETING" = hello
                ```
            "#},
            None,
        );

        add_test!(
            sleep_label_still_runs,
            "test",
            "<!-- @test @sleep -->\n```\ntrue\n```\n",
            None,
        );

        add_test!(
            any_label_runs_everything,
            "",
            indoc! {r#"
                <!-- @a -->
                ```
                true
                ```
                <!-- @b -->
                ```
                false
                ```
            "#},
            Some(1),
        );

        #[test]
        fn failure_captures_only_its_own_output() {
            let result = run(
                "test",
                indoc! {r#"
                    <!-- @test -->
                    ```
                    echo from one
                    ```
                    <!-- @test -->
                    ```
                    echo from two
                    echo to stderr >&2
                    false
                    ```
                "#},
            );
            assert_eq!(result.index(), Some(1));
            assert_eq!(result.block().unwrap().code(), "echo from two\necho to stderr >&2\nfalse\n");
            assert_eq!(result.file_name().unwrap().as_str(), "doc.md");
            assert_eq!(result.output(), "from two\n");
            assert_eq!(result.message(), "to stderr\n");
            assert_eq!(result.problem(), Some(&Problem::Stderr("to stderr\n".into())));
        }

        #[test]
        fn failure_in_second_document() {
            let result = run_documents(
                "test",
                Duration::from_secs(5),
                &[
                    ("a.md", "<!-- @test -->\n```\ntrue\n```\n<!-- @test -->\n```\ntrue\n```\n"),
                    ("b.md", "<!-- @test -->\n```\nfalse\n```\n"),
                ],
            );
            assert_eq!(result.file_name().unwrap().as_str(), "b.md");
            assert_eq!(result.index(), Some(0));
        }

        #[test]
        fn silent_block_times_out() {
            let result = run_documents(
                "test",
                Duration::from_millis(300),
                &[("doc.md", "<!-- @test -->\n```\nsleep 2\n```\n")],
            );
            assert_eq!(result.index(), Some(0));
            assert!(matches!(result.problem(), Some(Problem::Timeout(_))), "{result:?}");
            assert!(result.message().contains(MSG_TIMEOUT));
            assert!(result.output().contains("A subprocess might still be running."));
        }

        #[test]
        fn quiet_stderr_does_not_fail_later_blocks() {
            let runner = Runner::default().with_stderr_timeout(Duration::from_secs(1));
            let result = run_with(
                &runner,
                "test",
                Duration::from_secs(10),
                &[(
                    "doc.md",
                    indoc! {r#"
                        <!-- @test -->
                        ```
                        sleep 2
                        ```
                        <!-- @test -->
                        ```
                        echo a >&2; sleep 0.3
                        echo b >&2; sleep 0.3
                        echo c >&2
                        ```
                    "#},
                )],
            );
            assert!(result.succeeded(), "{result:?}");
            assert_eq!(result.index(), None);
        }

        #[test]
        fn script_file_is_removed_after_every_run() {
            let dir = tempfile::tempdir().unwrap();
            let runner = Runner::default().with_temp_dir(dir.path());
            let leftovers = || std::fs::read_dir(dir.path()).unwrap().count();

            let passed = run_with(&runner, "test", Duration::from_secs(5), &[(
                "doc.md",
                "<!-- @test -->\n```\ntrue\n```\n",
            )]);
            assert!(passed.succeeded());
            assert_eq!(leftovers(), 0);

            let failed = run_with(&runner, "test", Duration::from_secs(5), &[(
                "doc.md",
                "<!-- @test -->\n```\nfalse\n```\n",
            )]);
            assert_eq!(failed.index(), Some(0));
            assert_eq!(leftovers(), 0);

            let timed_out = run_with(&runner, "test", Duration::from_millis(300), &[(
                "doc.md",
                "<!-- @test -->\n```\nsleep 2\n```\n",
            )]);
            assert!(matches!(timed_out.problem(), Some(Problem::Timeout(_))));
            assert_eq!(leftovers(), 0);
        }

        #[test]
        fn timed_out_shell_runs_no_further_blocks() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("reached");
            let second = format!("<!-- @test -->\n```\ntouch {}\n```\n", marker.display());
            let markdown = format!("<!-- @test -->\n```\nsleep 1\n```\n{second}");
            let result = run_documents("test", Duration::from_millis(200), &[("doc.md", markdown.as_str())]);
            assert_eq!(result.index(), Some(0));
            assert!(matches!(result.problem(), Some(Problem::Timeout(_))));
            std::thread::sleep(Duration::from_millis(500));
            assert!(!marker.exists());
        }

        #[test]
        fn successful_run_is_untouched() {
            let result = run(
                "test",
                indoc! {r#"
                    <!-- @test -->
                    ```
                    echo '# not a marker'
                    ```
                    <!-- @test -->
                    ```
                    for i in 1 2 3; do echo "$i"; done
                    ```
                    <!-- @test -->
                    ```
                    echo quiet >&2
                    ```
                "#},
            );
            assert!(result.succeeded());
            assert_eq!(result.index(), None);
            assert!(result.problem().is_none());
            assert!(result.block().is_none());
            assert_eq!(result.output(), "");
        }
    }
}

#[test]
fn no_matching_blocks_is_a_configuration_error() {
    let err = Program::from_documents(
        Duration::from_secs(1),
        Label::new("absent"),
        vec![("doc.md".into(), "<!-- @test -->\n```\ntrue\n```\n".into())],
    )
    .unwrap_err();
    assert_eq!(err, ProgramError::NoLabelledBlocks("absent".into()));
}
