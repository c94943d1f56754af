//! 动作载荷子格式
//!
//! file / cd / search 的 input 是简单的 YAML 键值映射：
//! - file: `path` + `content`（通常为 `|` 块标量）；不是映射时退回「首行路径，其余为正文」
//! - cd: `dir`，或直接写路径
//! - search: `query`，或直接写查询文本

use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
    #[error("file path must be specified")]
    MissingPath,

    #[error("invalid file input: {0}")]
    InvalidFile(String),

    #[error("directory path must be specified")]
    MissingDir,

    #[error("query must be specified")]
    MissingQuery,
}

/// file 动作的载荷
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FilePayload {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub content: String,
}

impl FilePayload {
    pub fn parse(input: &str) -> Result<Self, PayloadError> {
        let yaml_error = match serde_yaml::from_str::<FilePayload>(input) {
            Ok(payload) if !payload.path.trim().is_empty() => {
                return Ok(Self {
                    path: payload.path.trim().to_string(),
                    content: payload.content,
                })
            }
            Ok(_) => return Err(PayloadError::MissingPath),
            Err(e) => e.to_string(),
        };

        let (first, rest) = input.split_once('\n').unwrap_or((input, ""));
        let path = first.trim();
        if path.starts_with("path:") {
            // 看起来是映射但解析失败，不能把整行当路径
            return Err(PayloadError::InvalidFile(yaml_error));
        }
        if path.is_empty() {
            return Err(PayloadError::MissingPath);
        }
        Ok(Self {
            path: path.to_string(),
            content: rest.to_string(),
        })
    }
}

/// 解析 cd 载荷，返回目标目录
pub fn parse_dir(input: &str) -> Result<String, PayloadError> {
    let dir = field_or_bare(input, "dir");
    if dir.is_empty() {
        return Err(PayloadError::MissingDir);
    }
    Ok(dir)
}

/// 解析 search 载荷，返回查询文本
pub fn parse_query(input: &str) -> Result<String, PayloadError> {
    let query = field_or_bare(input, "query");
    if query.is_empty() {
        return Err(PayloadError::MissingQuery);
    }
    Ok(query)
}

/// 取映射中的 key；不是映射、没有该键或解析失败时把整段输入当作值
fn field_or_bare(input: &str, key: &str) -> String {
    let raw = input.trim();
    let value = match serde_yaml::from_str::<Value>(input) {
        Ok(Value::Mapping(map)) => map
            .get(key)
            .and_then(scalar_to_string)
            .unwrap_or_else(|| bare_unless_keyed(raw, key)),
        Ok(other) => scalar_to_string(&other).unwrap_or_else(|| raw.to_string()),
        Err(_) => bare_unless_keyed(raw, key),
    };
    value.trim().to_string()
}

fn bare_unless_keyed(raw: &str, key: &str) -> String {
    match raw.strip_prefix(key) {
        Some(rest) if rest.starts_with(':') => String::new(),
        _ => raw.to_string(),
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_payload_yaml_block() {
        let input = "path: notes/todo.md\ncontent: |\n  # Todo\n  - write tests\n";
        let payload = FilePayload::parse(input).unwrap();
        assert_eq!(payload.path, "notes/todo.md");
        assert_eq!(payload.content, "# Todo\n- write tests\n");
    }

    #[test]
    fn test_file_payload_first_line_path() {
        let payload = FilePayload::parse("poem.txt\nRoses are red,\n  violets: blue\n").unwrap();
        assert_eq!(payload.path, "poem.txt");
        assert_eq!(payload.content, "Roses are red,\n  violets: blue\n");
    }

    #[test]
    fn test_file_payload_errors() {
        assert_eq!(FilePayload::parse(""), Err(PayloadError::MissingPath));
        assert_eq!(
            FilePayload::parse("content: hello"),
            Err(PayloadError::MissingPath)
        );
        assert!(matches!(
            FilePayload::parse("path: a.txt\ncontent: |\nnot indented"),
            Err(PayloadError::InvalidFile(_))
        ));
    }

    #[test]
    fn test_parse_dir_forms() {
        assert_eq!(parse_dir("dir: src/bin").unwrap(), "src/bin");
        assert_eq!(parse_dir("/tmp/work\n").unwrap(), "/tmp/work");
        assert_eq!(parse_dir("dir: ''"), Err(PayloadError::MissingDir));
        assert_eq!(parse_dir("   "), Err(PayloadError::MissingDir));
    }

    #[test]
    fn test_parse_query_forms() {
        assert_eq!(parse_query("query: tokio select macro").unwrap(), "tokio select macro");
        assert_eq!(parse_query("what is rust?").unwrap(), "what is rust?");
        assert_eq!(parse_query("rust: the language").unwrap(), "rust: the language");
        assert_eq!(parse_query("query: 2024").unwrap(), "2024");
        assert_eq!(parse_query("query:"), Err(PayloadError::MissingQuery));
    }
}
