//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TASKRUN__*` 覆盖（双下划线表示嵌套，如 `TASKRUN__RUN__MAX_STEPS=20`）。
//! 命令行参数最后覆盖（见 main.rs）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSection,
    pub run: RunSection,
    pub shell: ShellSection,
    pub python: PythonSection,
    pub search: SearchSection,
}

/// [llm] 段：模型、可选的兼容端点与单次请求超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    /// OpenAI 兼容端点；未设置时读 OPENAI_BASE_URL，再退回官方地址
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            timeout_secs: 120,
        }
    }
}

/// [run] 段：工作目录、步数与重试上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// 任务根目录，不存在时创建
    pub workdir: PathBuf,
    pub max_steps: usize,
    /// 连续无效回复（格式错误 / 未知动作 / 空回复）的最大重试次数
    pub max_retries: usize,
    /// 为 true 时 file / cd 的路径不得离开根目录
    pub confine_to_root: bool,
    /// cd 到不存在的目录时是否自动创建
    pub create_missing_dirs: bool,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("./workspace"),
            max_steps: 10,
            max_retries: 3,
            confine_to_root: true,
            create_missing_dirs: true,
        }
    }
}

/// [shell] 段：持久 Shell 的程序与参数、输出截断
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub program: String,
    pub args: Vec<String>,
    /// 成功时观察只保留 stdout 末尾行数，0 表示不截断
    pub tail_lines: usize,
    /// 关闭 stdin 后等待 Shell 退出的秒数，超时则强杀
    pub shutdown_grace_secs: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            program: "bash".to_string(),
            args: ["--noprofile", "--norc", "-o", "pipefail", "-s"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tail_lines: 5,
            shutdown_grace_secs: 3,
        }
    }
}

/// [python] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PythonSection {
    pub program: String,
}

impl Default for PythonSection {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
        }
    }
}

/// [search] 段：网页搜索端点与结果条数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    /// 关闭后不注册 search 动作
    pub enabled: bool,
    pub endpoint: String,
    pub max_results: usize,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://lite.duckduckgo.com/lite/".to_string(),
            max_results: 3,
            timeout_secs: 15,
            user_agent: "taskrun".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 TASKRUN__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（必须存在，可覆盖前面的键）
/// 3. 最后叠加环境变量 TASKRUN__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TASKRUN")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
