//! 任务主循环
//!
//! AwaitReply -> Decode -> (Retry | Dispatch) -> Observe -> (Continue | Terminate)。
//! 无效回复（空回复、格式错误、未注册的动作）先连同纠正提示追加进历史让模型重答，
//! 拿到有效回复后回滚到本轮检查点，历史里只留下编码后的有效步骤与观察。
//! 无论以何种方式结束（完成、步数用尽、致命错误、取消），持久 Shell 都恰好关闭一次。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{RecoveryAction, RecoveryEngine, TaskError};
use crate::llm::LlmClient;
use crate::memory::{ConversationHistory, Message};
use crate::observability::{EventSink, NoopSink, RunEvent};
use crate::prompts::system_prompt;
use crate::protocol::{decode_step, encode_step, MalformedStep, Proposal, Step, STOP_SEQUENCES};
use crate::tools::{ActionDispatcher, DispatchResult};

/// 运行参数
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// 最多分发的动作数
    pub max_steps: usize,
    /// 单轮内连续无效回复的最大重试次数
    pub max_retries: usize,
    /// 单次模型请求超时
    pub llm_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_steps: 10,
            max_retries: 3,
            llm_timeout: Duration::from_secs(120),
        }
    }
}

impl RunOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_steps: config.run.max_steps,
            max_retries: config.run.max_retries,
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }
}

/// 运行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// 模型给出 done；steps 含 done 这一轮
    Completed { steps: usize, thought: String },
    /// 已分发 max_steps 个动作仍未完成
    BudgetExhausted { steps: usize },
}

/// 一次尝试的结果（致命错误走 Err）
enum Attempt {
    Done(Proposal),
    Dispatched(Proposal, DispatchResult),
    Retry { reply: String, error: TaskError },
}

/// 任务运行器
pub struct TaskRunner {
    llm: Arc<dyn LlmClient>,
    dispatcher: ActionDispatcher,
    recovery: RecoveryEngine,
    sink: Arc<dyn EventSink>,
    options: RunOptions,
}

impl TaskRunner {
    pub fn new(llm: Arc<dyn LlmClient>, dispatcher: ActionDispatcher) -> Self {
        Self {
            llm,
            dispatcher,
            recovery: RecoveryEngine::new(),
            sink: Arc::new(NoopSink),
            options: RunOptions::default(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// 执行任务直到完成、步数用尽、致命错误或取消；返回前总是关闭 Shell
    pub async fn run(mut self, task: &str, cancel: CancellationToken) -> Result<RunOutcome, TaskError> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TaskError::Cancelled),
            result = self.run_turns(task) => result,
        };
        self.dispatcher.shutdown().await;

        let (prompt, completion, total) = self.llm.token_usage();
        match &result {
            Ok(outcome) => {
                let (completed, steps) = match outcome {
                    RunOutcome::Completed { steps, .. } => (true, *steps),
                    RunOutcome::BudgetExhausted { steps } => (false, *steps),
                };
                tracing::info!(completed, steps, prompt, completion, total, "task finished");
                self.sink.emit(RunEvent::Finished { completed, steps });
            }
            Err(e) => tracing::warn!(error = %e, "task aborted"),
        }
        result
    }

    async fn run_turns(&mut self, task: &str) -> Result<RunOutcome, TaskError> {
        let mut history = ConversationHistory::new();
        history.push(Message::system(system_prompt(
            &self.dispatcher.available_actions(),
        )));
        history.push(Message::user(task));

        let mut steps = 0;
        loop {
            if steps >= self.options.max_steps {
                return Ok(RunOutcome::BudgetExhausted { steps });
            }
            let step = steps + 1;
            self.sink.emit(RunEvent::StepStarted {
                step,
                max_steps: self.options.max_steps,
            });

            let checkpoint = history.checkpoint();
            let mut retries = 0;
            let (proposal, result) = loop {
                match self.attempt(&history, step).await? {
                    Attempt::Done(proposal) => {
                        history.rollback(checkpoint);
                        history.push(Message::assistant(encode_step(&Step::Proposal(
                            proposal.clone(),
                        ))));
                        return Ok(RunOutcome::Completed {
                            steps: step,
                            thought: proposal.thought,
                        });
                    }
                    Attempt::Dispatched(proposal, result) => break (proposal, result),
                    Attempt::Retry { reply, error } => {
                        let prompt = match self.recovery.handle(&error) {
                            RecoveryAction::RetryWithPrompt(prompt) => prompt,
                            RecoveryAction::Abort => return Err(error),
                        };
                        if retries >= self.options.max_retries {
                            tracing::warn!(error = %error, "no valid reply after {} retries", retries);
                            return Err(TaskError::RetriesExhausted(retries));
                        }
                        retries += 1;
                        tracing::debug!(attempt = retries, reply = %reply, "invalid reply");
                        self.sink.emit(RunEvent::Retry {
                            attempt: retries,
                            reason: error.to_string(),
                        });
                        if !reply.trim().is_empty() {
                            history.push(Message::assistant(reply));
                        }
                        history.push(Message::user(prompt));
                    }
                }
            };

            let observation = result.observation().to_string();
            self.sink.emit(RunEvent::Observation {
                step,
                text: observation.clone(),
            });
            history.rollback(checkpoint);
            history.push(Message::assistant(encode_step(&Step::Proposal(proposal))));
            history.push(Message::user(encode_step(&Step::Observation(observation))));
            steps = step;
        }
    }

    /// 请求模型、解码、分发；可重试的问题以 Attempt::Retry 返回
    async fn attempt(&mut self, history: &ConversationHistory, step: usize) -> Result<Attempt, TaskError> {
        let reply = self.request(history).await?;
        if reply.trim().is_empty() {
            return Ok(Attempt::Retry {
                reply,
                error: TaskError::EmptyReply,
            });
        }

        let proposal = match decode_step(&reply) {
            Ok(Step::Proposal(proposal)) => proposal,
            Ok(Step::Observation(_)) => {
                return Ok(Attempt::Retry {
                    reply,
                    error: MalformedStep::MissingAction.into(),
                })
            }
            Err(e) => {
                return Ok(Attempt::Retry {
                    reply,
                    error: e.into(),
                })
            }
        };

        self.sink.emit(RunEvent::Proposal {
            step,
            thought: proposal.thought.clone(),
            action: proposal.action.to_string(),
            input: proposal.input.clone(),
        });
        if proposal.action.is_terminal() {
            return Ok(Attempt::Done(proposal));
        }

        match self.dispatcher.dispatch(&proposal).await? {
            DispatchResult::InvalidAction(name) => Ok(Attempt::Retry {
                reply,
                error: TaskError::InvalidAction(name),
            }),
            result => Ok(Attempt::Dispatched(proposal, result)),
        }
    }

    async fn request(&self, history: &ConversationHistory) -> Result<String, TaskError> {
        let timeout = self.options.llm_timeout;
        tracing::debug!(messages = history.len(), "requesting completion");
        match tokio::time::timeout(timeout, self.llm.complete(history.messages(), &STOP_SEQUENCES)).await {
            Ok(reply) => Ok(reply?),
            Err(_) => Err(TaskError::LlmTimeout(timeout.as_secs())),
        }
    }
}
