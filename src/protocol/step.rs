//! 单步协议编解码
//!
//! 模型回复是松散的文本：`thought:` / `action:` / `input:` 标记行，载荷放在一对 ``` 围栏之间。
//! decode_step 线性扫描各行提取字段并校验；encode_step 把 Step 渲染回写入历史的文本形态，
//! 让模型下一轮看到的自身输出与解析结果保持一致。

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// 载荷围栏：以此开头的行即为围栏行
pub const FENCE: &str = "```";

const THOUGHT_MARKER: &str = "thought:";
const ACTION_MARKER: &str = "action:";
const INPUT_MARKER: &str = "input:";
const OBSERVATION_MARKER: &str = "observation:";
const FEEDBACK_MARKER: &str = "feedback:";

/// 交给补全服务的停止序列：模型开始自己编造观察结果时由服务端截断
pub const STOP_SEQUENCES: [&str; 2] = [OBSERVATION_MARKER, FEEDBACK_MARKER];

/// 可识别的动作名；`done` 为终止动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    File,
    Shell,
    Python,
    Search,
    Cd,
    Done,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::File,
        ActionKind::Shell,
        ActionKind::Python,
        ActionKind::Search,
        ActionKind::Cd,
        ActionKind::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::File => "file",
            ActionKind::Shell => "shell",
            ActionKind::Python => "python",
            ActionKind::Search => "search",
            ActionKind::Cd => "cd",
            ActionKind::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionKind::Done)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = MalformedStep;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| MalformedStep::UnknownAction(s.to_string()))
    }
}

/// 协议错误：可恢复，由编排器要求模型重试
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedStep {
    #[error("action must be specified")]
    MissingAction,

    #[error("invalid action value: '{0}'")]
    UnknownAction(String),

    #[error("thought must be specified")]
    MissingThought,

    #[error("input must be specified")]
    MissingInput,

    #[error("input must not contain a line starting with ```")]
    FenceInInput,
}

/// 模型提出的一步：理由、动作、原样载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub thought: String,
    pub action: ActionKind,
    pub input: String,
}

impl Proposal {
    /// 构造并校验：非终止动作必须带非空 thought 与 input
    ///
    /// thought 被规整为单行（各行去首尾空白后以空格连接），载荷中不得出现围栏行，
    /// 保证 encode 后再 decode 得到同一个 Proposal。
    pub fn new(
        thought: impl Into<String>,
        action: ActionKind,
        input: impl Into<String>,
    ) -> Result<Self, MalformedStep> {
        let proposal = Self {
            thought: single_line(&thought.into()),
            action,
            input: input.into(),
        };
        proposal.validate()?;
        Ok(proposal)
    }

    fn validate(&self) -> Result<(), MalformedStep> {
        if self.input.lines().any(|line| line.starts_with(FENCE)) {
            return Err(MalformedStep::FenceInInput);
        }
        if self.action.is_terminal() {
            return Ok(());
        }
        if self.thought.is_empty() {
            return Err(MalformedStep::MissingThought);
        }
        if self.input.trim().is_empty() {
            return Err(MalformedStep::MissingInput);
        }
        Ok(())
    }
}

fn single_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 一轮的内容：要么是模型的提议，要么是执行后的观察，二者互斥
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Proposal(Proposal),
    Observation(String),
}

impl Step {
    pub fn observation(text: impl Into<String>) -> Self {
        Step::Observation(text.into())
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_step(self))
    }
}

/// 扫描得到的原始字段（未校验）
#[derive(Debug, Default)]
struct RawStep {
    thought: Option<String>,
    action: Option<String>,
    input: Option<String>,
    observation: Option<String>,
}

/// 解析模型回复
///
/// 标记按行首前缀匹配（区分大小写），同一标记重复出现时后者覆盖前者；
/// 提议与观察同时出现时以提议为准（观察是模型自行编造的）。
pub fn decode_step(text: &str) -> Result<Step, MalformedStep> {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut raw = RawStep::default();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if let Some(rest) = line.strip_prefix(THOUGHT_MARKER) {
            raw.thought = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(ACTION_MARKER) {
            raw.action = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(INPUT_MARKER) {
            let (body, next) = read_block(&lines, i + 1, rest);
            raw.input = Some(body);
            i = next;
            continue;
        } else if let Some(rest) = line
            .strip_prefix(OBSERVATION_MARKER)
            .or_else(|| line.strip_prefix(FEEDBACK_MARKER))
        {
            let (body, next) = read_block(&lines, i + 1, rest);
            raw.observation = Some(body);
            i = next;
            continue;
        }
        i += 1;
    }

    into_step(raw)
}

fn into_step(raw: RawStep) -> Result<Step, MalformedStep> {
    let Some(action) = raw.action else {
        return match (raw.thought, raw.observation) {
            (None, Some(observation)) => Ok(Step::Observation(observation)),
            _ => Err(MalformedStep::MissingAction),
        };
    };
    let action: ActionKind = action.parse()?;
    Proposal::new(
        raw.thought.unwrap_or_default(),
        action,
        raw.input.unwrap_or_default(),
    )
    .map(Step::Proposal)
}

/// 读取标记后的围栏块，返回 (载荷, 下一个待扫描行号)
///
/// 载荷为开围栏与下一条围栏之间的原样文本；没有闭围栏时一直读到结尾。
/// 标记后找不到开围栏（遇到下一个字段标记或结尾）时，退回使用标记行冒号后的内联文本。
fn read_block(lines: &[&str], start: usize, inline: &str) -> (String, usize) {
    let mut i = start;
    while i < lines.len() && !lines[i].starts_with(FENCE) {
        if is_field_marker(lines[i]) {
            return (inline.trim().to_string(), start);
        }
        i += 1;
    }
    if i == lines.len() {
        return (inline.trim().to_string(), start);
    }

    let body_start = i + 1;
    let mut end = body_start;
    while end < lines.len() && !lines[end].starts_with(FENCE) {
        end += 1;
    }
    let body = lines.get(body_start..end).unwrap_or_default().join("\n");
    let next = if end < lines.len() { end + 1 } else { end };
    (body, next)
}

fn is_field_marker(line: &str) -> bool {
    [
        THOUGHT_MARKER,
        ACTION_MARKER,
        INPUT_MARKER,
        OBSERVATION_MARKER,
        FEEDBACK_MARKER,
    ]
    .iter()
    .any(|marker| line.starts_with(marker))
}

/// 渲染为写回历史的文本；载荷只去掉一层首尾空行，保证往返稳定
pub fn encode_step(step: &Step) -> String {
    match step {
        Step::Proposal(p) => {
            let mut out = format!("{THOUGHT_MARKER} {}\n{ACTION_MARKER} {}\n", p.thought, p.action);
            if !(p.action.is_terminal() && p.input.is_empty()) {
                out.push_str(&fenced(INPUT_MARKER, &p.input));
            }
            out
        }
        Step::Observation(text) => fenced(OBSERVATION_MARKER, text),
    }
}

fn fenced(marker: &str, body: &str) -> String {
    format!("{marker}\n{FENCE}\n{}\n{FENCE}\n", trim_outer_newline(body))
}

fn trim_outer_newline(s: &str) -> &str {
    let s = s.strip_prefix('\n').unwrap_or(s);
    s.strip_suffix('\n').unwrap_or(s)
}
