//! 任务运行集成测试：脚本化模型驱动真实的 Shell 与文件系统

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use taskrun::config::AppConfig;
    use taskrun::llm::ScriptedLlmClient;
    use taskrun::memory::Role;
    use taskrun::observability::{RunEvent, StreamKind};
    use taskrun::protocol::{decode_step, Step};
    use taskrun::react::{RunOptions, RunOutcome, TaskRunner};
    use taskrun::tools::ActionDispatcher;
    use tokio_util::sync::CancellationToken;

    const WRITE_POEM: &str = "thought: Write the poem to a file.
action: file
input:
```
poems/rain.txt
Rain on the roof,
rain on the road.
```
";

    const SHOW_POEM: &str = "thought: Check the file contents.
action: shell
input:
```
cd poems
ls
cat rain.txt
```
";

    const FINISH: &str = "thought: The poem is written.
action: done
";

    #[tokio::test]
    async fn test_write_check_and_finish() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let mut config = AppConfig::default();
        config.run.workdir = root.clone();
        config.search.enabled = false;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = Arc::new(tx);
        let dispatcher = ActionDispatcher::from_config(&config, sink.clone())
            .await
            .unwrap();
        let llm = Arc::new(ScriptedLlmClient::new([WRITE_POEM, SHOW_POEM, FINISH]));

        let outcome = TaskRunner::new(llm.clone(), dispatcher)
            .with_sink(sink)
            .with_options(RunOptions::from_config(&config))
            .run("Write a two-line poem about rain", CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Completed {
                steps: 3,
                thought: "The poem is written.".to_string()
            }
        );
        assert_eq!(
            std::fs::read_to_string(root.join("poems/rain.txt")).unwrap(),
            "Rain on the roof,\nrain on the road."
        );

        // 最后一次请求里能看到 shell 的观察（默认保留末尾 5 行，未截断）
        let calls = llm.calls();
        let last_call = calls.last().unwrap();
        let observation = last_call
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .unwrap();
        match decode_step(&observation.content).unwrap() {
            Step::Observation(text) => {
                assert_eq!(text, "rain.txt\nRain on the roof,\nrain on the road.")
            }
            other => panic!("expected observation, got {:?}", other),
        }

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(events.contains(&RunEvent::ShellCommand {
            command: "cd poems".to_string()
        }));
        assert!(events.contains(&RunEvent::ShellLine {
            stream: StreamKind::Stdout,
            line: "rain on the road.".to_string()
        }));
        assert_eq!(
            events.last(),
            Some(&RunEvent::Finished {
                completed: true,
                steps: 3
            })
        );
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_an_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.run.workdir = dir.path().to_path_buf();
        config.run.max_steps = 2;
        config.search.enabled = false;

        let dispatcher = ActionDispatcher::from_config(&config, Arc::new(taskrun::observability::NoopSink))
            .await
            .unwrap();
        let llm = Arc::new(ScriptedLlmClient::repeating(SHOW_POEM));
        let outcome = TaskRunner::new(llm, dispatcher)
            .with_options(RunOptions::from_config(&config))
            .run("never finishes", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, RunOutcome::BudgetExhausted { steps: 2 });
    }
}
