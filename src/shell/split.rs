//! 多行 Shell 输入切分为语句
//!
//! shell 动作要逐条语句送入持久 Shell，才能在第一条失败处停下。
//! 物理行在以下情况会被合并进同一条语句：行尾反斜杠续行、引号未闭合、here-doc 正文未结束、
//! 复合命令未闭合（if/fi、for|while|until|select/done、case/esac、{ }、( )）、行尾为 | / && / ||。
//! 语句之外的空行与纯注释行被丢弃。这是启发式扫描，不是完整的 Shell 语法分析。
//!
//! 输入结束时仍未闭合的结构会让持久 Shell 一直等待后续输入，因此整段输入被拒绝。

use std::collections::VecDeque;

use thiserror::Error;

/// 输入在结构未闭合时结束
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IncompleteInput {
    #[error("unterminated {0} quote")]
    Quote(&'static str),

    #[error("`{0}` is never closed")]
    Block(&'static str),

    #[error("here-document is missing its `{0}` terminator line")]
    Heredoc(String),

    #[error("input ends with a line continuation or a dangling operator")]
    Continuation,
}

/// 未闭合的复合结构
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    If,
    Loop,
    Case,
    Brace,
    Paren,
}

impl Block {
    fn opener(self) -> &'static str {
        match self {
            Block::If => "if",
            Block::Loop => "do",
            Block::Case => "case",
            Block::Brace => "{",
            Block::Paren => "(",
        }
    }
}

#[derive(Debug, Clone)]
struct Heredoc {
    delimiter: String,
    strip_tabs: bool,
}

impl Heredoc {
    fn ends_at(&self, line: &str) -> bool {
        let line = line.trim_end_matches('\r');
        if self.strip_tabs {
            line.trim_start_matches('\t') == self.delimiter
        } else {
            line == self.delimiter
        }
    }
}

#[derive(Debug, Default)]
struct Splitter {
    statements: Vec<String>,
    current: Vec<String>,
    quote: Option<char>,
    blocks: Vec<Block>,
    pending_heredocs: VecDeque<Heredoc>,
    active_heredoc: Option<Heredoc>,
    continuation: bool,
    escaped_newline: bool,
    /// 刚读到 `function`，下一个词是函数名
    function_name: bool,
}

/// 将脚本切分为可逐条执行的语句
pub fn split_statements(script: &str) -> Result<Vec<String>, IncompleteInput> {
    let mut splitter = Splitter::default();
    for line in script.split('\n') {
        splitter.push_line(line);
    }
    splitter.finish()
}

impl Splitter {
    fn push_line(&mut self, line: &str) {
        if let Some(doc) = &self.active_heredoc {
            let ended = doc.ends_at(line);
            self.current.push(line.to_string());
            if ended {
                self.active_heredoc = self.pending_heredocs.pop_front();
                self.flush_if_complete();
            }
            return;
        }

        if self.current.is_empty() && is_blank_or_comment(line) {
            return;
        }

        self.current.push(line.to_string());
        self.scan(line);
        self.active_heredoc = self.pending_heredocs.pop_front();
        self.flush_if_complete();
    }

    fn flush_if_complete(&mut self) {
        let complete = self.quote.is_none()
            && self.blocks.is_empty()
            && self.active_heredoc.is_none()
            && self.pending_heredocs.is_empty()
            && !self.continuation;
        if complete {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.current.is_empty() {
            return;
        }
        let statement = self.current.join("\n");
        self.current.clear();
        if !statement.trim().is_empty() {
            self.statements.push(statement);
        }
    }

    fn finish(mut self) -> Result<Vec<String>, IncompleteInput> {
        if let Some(q) = self.quote {
            return Err(IncompleteInput::Quote(if q == '\'' { "single" } else { "double" }));
        }
        if let Some(doc) = self.active_heredoc.take().or_else(|| self.pending_heredocs.pop_front()) {
            return Err(IncompleteInput::Heredoc(doc.delimiter));
        }
        if let Some(block) = self.blocks.last() {
            return Err(IncompleteInput::Block(block.opener()));
        }
        if self.continuation {
            return Err(IncompleteInput::Continuation);
        }
        self.flush();
        Ok(self.statements)
    }

    /// 扫描一行，更新引号 / 复合结构 / here-doc / 续行状态
    fn scan(&mut self, line: &str) {
        let chars: Vec<char> = line.trim_end_matches('\r').chars().collect();
        let n = chars.len();
        let mut i = 0;
        let mut word = String::new();
        // 上一行以反斜杠续行时，本行仍处于同一条简单命令中间
        let mut command_pos = !self.escaped_newline;
        let mut trailing_op = false;
        self.escaped_newline = false;

        while i < n {
            let c = chars[i];
            match self.quote {
                Some('\'') => {
                    if c == '\'' {
                        self.quote = None;
                    }
                    word.push(c);
                    i += 1;
                    continue;
                }
                Some(_) => {
                    if c == '\\' {
                        word.push(c);
                        if let Some(next) = chars.get(i + 1) {
                            word.push(*next);
                        }
                        i += 2;
                        continue;
                    }
                    if c == '"' {
                        self.quote = None;
                    }
                    word.push(c);
                    i += 1;
                    continue;
                }
                None => {}
            }

            match c {
                '\\' => {
                    if i + 1 == n {
                        self.escaped_newline = true;
                    } else {
                        word.push(c);
                        word.push(chars[i + 1]);
                    }
                    trailing_op = false;
                    i += 2;
                }
                '\'' | '"' => {
                    self.quote = Some(c);
                    word.push(c);
                    trailing_op = false;
                    i += 1;
                }
                '#' if word.is_empty() => break,
                ' ' | '\t' => {
                    self.end_word(&mut word, &mut command_pos, &mut trailing_op);
                    i += 1;
                }
                ';' | '&' | '|' => {
                    self.end_word(&mut word, &mut command_pos, &mut trailing_op);
                    let start = i;
                    while i < n && matches!(chars[i], ';' | '&' | '|') {
                        i += 1;
                    }
                    let op: String = chars[start..i].iter().collect();
                    trailing_op = matches!(op.as_str(), "|" | "&&" | "||" | "|&");
                    command_pos = true;
                }
                '$' if chars.get(i + 1) == Some(&'(') => {
                    self.blocks.push(Block::Paren);
                    word.push_str("$(");
                    trailing_op = false;
                    i += 2;
                }
                // `name()`：函数定义头，其后的 `{` 处于命令位置
                '(' if chars.get(i + 1) == Some(&')') => {
                    self.end_word(&mut word, &mut command_pos, &mut trailing_op);
                    command_pos = true;
                    trailing_op = false;
                    i += 2;
                }
                '(' => {
                    self.end_word(&mut word, &mut command_pos, &mut trailing_op);
                    if self.blocks.last() != Some(&Block::Case) {
                        self.blocks.push(Block::Paren);
                    }
                    command_pos = true;
                    trailing_op = false;
                    i += 1;
                }
                ')' => {
                    self.end_word(&mut word, &mut command_pos, &mut trailing_op);
                    match self.blocks.last() {
                        Some(Block::Paren) => {
                            self.blocks.pop();
                            command_pos = false;
                        }
                        // case 分支模式结束，其后是命令
                        Some(Block::Case) => command_pos = true,
                        _ => {}
                    }
                    trailing_op = false;
                    i += 1;
                }
                '<' if chars.get(i + 1) == Some(&'<') => {
                    self.end_word(&mut word, &mut command_pos, &mut trailing_op);
                    i = self.read_heredoc(&chars, i);
                    trailing_op = false;
                }
                _ => {
                    word.push(c);
                    i += 1;
                }
            }
        }
        self.end_word(&mut word, &mut command_pos, &mut trailing_op);
        self.continuation = self.escaped_newline || trailing_op;
    }

    /// 处理 `<<` / `<<-`（`<<<` 为 here-string，忽略），返回跳过定界符后的位置
    fn read_heredoc(&mut self, chars: &[char], start: usize) -> usize {
        let n = chars.len();
        let mut i = start + 2;
        if chars.get(i) == Some(&'<') {
            return i + 1;
        }
        let strip_tabs = chars.get(i) == Some(&'-');
        if strip_tabs {
            i += 1;
        }
        while i < n && matches!(chars[i], ' ' | '\t') {
            i += 1;
        }
        let mut delimiter = String::new();
        while i < n && !matches!(chars[i], ' ' | '\t' | ';' | '&' | '|' | '<' | '>' | '(' | ')') {
            if !matches!(chars[i], '\'' | '"' | '\\') {
                delimiter.push(chars[i]);
            }
            i += 1;
        }
        if !delimiter.is_empty() {
            self.pending_heredocs.push_back(Heredoc {
                delimiter,
                strip_tabs,
            });
        }
        i
    }

    fn end_word(&mut self, word: &mut String, command_pos: &mut bool, trailing_op: &mut bool) {
        if word.is_empty() {
            return;
        }
        *trailing_op = false;
        if self.function_name {
            self.function_name = false;
            *command_pos = true;
            word.clear();
            return;
        }
        if *command_pos {
            match word.as_str() {
                "function" => self.function_name = true,
                "if" => self.blocks.push(Block::If),
                "for" | "while" | "until" | "select" => self.blocks.push(Block::Loop),
                "case" => self.blocks.push(Block::Case),
                "{" => self.blocks.push(Block::Brace),
                "fi" => self.close(Block::If),
                "done" => self.close(Block::Loop),
                "esac" => self.close(Block::Case),
                "}" => self.close(Block::Brace),
                _ => {}
            }
            *command_pos = matches!(
                word.as_str(),
                "if" | "then" | "else" | "elif" | "do" | "while" | "until" | "{" | "!" | "time"
            );
        }
        word.clear();
    }

    fn close(&mut self, block: Block) {
        if self.blocks.last() == Some(&block) {
            self.blocks.pop();
        }
    }
}

fn is_blank_or_comment(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_lines_are_separate_statements() {
        let statements = split_statements("mkdir -p out\ncd out\n\n# comment\ntouch a.txt\n").unwrap();
        assert_eq!(statements, vec!["mkdir -p out", "cd out", "touch a.txt"]);
    }

    #[test]
    fn test_backslash_and_pipe_continuation() {
        let script = "echo one \\\n  two\ncat file |\n  grep x &&\n  echo found";
        assert_eq!(
            split_statements(script).unwrap(),
            vec!["echo one \\\n  two", "cat file |\n  grep x &&\n  echo found"]
        );
    }

    #[test]
    fn test_compound_commands_stay_together() {
        let script = "if [ -f a ]; then\n  echo yes\nelse\n  echo no\nfi\nfor i in 1 2 3; do\n  echo $i\ndone\necho after";
        let statements = split_statements(script).unwrap();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("if") && statements[0].ends_with("fi"));
        assert!(statements[1].starts_with("for") && statements[1].ends_with("done"));
        assert_eq!(statements[2], "echo after");
    }

    #[test]
    fn test_one_line_loop_is_single_statement() {
        let statements = split_statements("for f in *.txt; do wc -l \"$f\"; done\nls").unwrap();
        assert_eq!(statements, vec!["for f in *.txt; do wc -l \"$f\"; done", "ls"]);
    }

    #[test]
    fn test_case_block() {
        let script = "case \"$1\" in\n  a|b) echo ab ;;\n  (c) echo c ;;\n  *) echo other ;;\nesac\necho next";
        let statements = split_statements(script).unwrap();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].ends_with("esac"));
    }

    #[test]
    fn test_heredoc_body_is_kept_verbatim() {
        let script = "cat <<'EOF' > notes.txt\nif this looks like code\n  # not a comment\n\nEOF\necho written";
        assert_eq!(
            split_statements(script).unwrap(),
            vec![
                "cat <<'EOF' > notes.txt\nif this looks like code\n  # not a comment\n\nEOF",
                "echo written"
            ]
        );
    }

    #[test]
    fn test_heredoc_with_tab_strip() {
        let script = "cat <<-END\n\tbody\n\tEND\nls";
        assert_eq!(split_statements(script).unwrap(), vec!["cat <<-END\n\tbody\n\tEND", "ls"]);
    }

    #[test]
    fn test_here_string_is_not_heredoc() {
        assert_eq!(split_statements("grep x <<< \"$v\"\nls").unwrap(), vec!["grep x <<< \"$v\"", "ls"]);
    }

    #[test]
    fn test_multiline_quotes_and_substitution() {
        let script = "echo \"first\nsecond\"\nx=$(\n  date\n)\necho '$(' done";
        assert_eq!(
            split_statements(script).unwrap(),
            vec!["echo \"first\nsecond\"", "x=$(\n  date\n)", "echo '$(' done"]
        );
    }

    #[test]
    fn test_brace_group_and_functions() {
        let script = "greet() {\n  echo hi\n}\n{ echo a; echo b; }\necho ${HOME}";
        assert_eq!(
            split_statements(script).unwrap(),
            vec!["greet() {\n  echo hi\n}", "{ echo a; echo b; }", "echo ${HOME}"]
        );
    }

    #[test]
    fn test_keywords_as_arguments_do_not_open_blocks() {
        assert_eq!(
            split_statements("echo if for case\necho done").unwrap(),
            vec!["echo if for case", "echo done"]
        );
    }

    #[test]
    fn test_function_definitions_stay_together() {
        let script = "greet() {\n  echo hi\n}\nfunction bye {\n  echo bye\n}\nshow () {\n  echo x\n}\ngreet";
        assert_eq!(
            split_statements(script).unwrap(),
            vec![
                "greet() {\n  echo hi\n}",
                "function bye {\n  echo bye\n}",
                "show () {\n  echo x\n}",
                "greet"
            ]
        );
    }

    #[test]
    fn test_incomplete_input_is_rejected() {
        assert_eq!(
            split_statements("echo don't panic"),
            Err(IncompleteInput::Quote("single"))
        );
        assert_eq!(
            split_statements("echo \"open\nls"),
            Err(IncompleteInput::Quote("double"))
        );
        assert_eq!(
            split_statements("if true; then\n  echo x"),
            Err(IncompleteInput::Block("if"))
        );
        assert_eq!(
            split_statements("cat <<EOF\nbody"),
            Err(IncompleteInput::Heredoc("EOF".to_string()))
        );
        assert_eq!(
            split_statements("echo a \\"),
            Err(IncompleteInput::Continuation)
        );
    }
}
