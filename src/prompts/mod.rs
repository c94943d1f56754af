//! 系统提示词（编译期嵌入），动作列表按已注册的动作生成

const SYSTEM_TEMPLATE: &str = include_str!("system.txt");

/// 用 (name, description) 列表填充系统提示词中的动作段落
pub fn system_prompt(actions: &[(&str, String)]) -> String {
    let list = actions
        .iter()
        .map(|(name, description)| format!("- {}: {}", name, description))
        .collect::<Vec<_>>()
        .join("\n");
    SYSTEM_TEMPLATE.replace("{actions}", &list)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lists_only_given_actions() {
        let prompt = system_prompt(&[("shell", "Run commands.".to_string())]);
        assert!(prompt.contains("- shell: Run commands."));
        assert!(prompt.contains("- done:"));
        assert!(!prompt.contains("- search:"));
        assert!(!prompt.contains("{actions}"));
    }
}
