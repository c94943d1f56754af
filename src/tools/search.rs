//! search 动作：向网页搜索端点提交查询，取前几条标题与摘要
//!
//! POST 表单到 DuckDuckGo Lite（可配置），请求带超时与 User-Agent；
//! 从返回的 HTML 中按 result-link / result-snippet 提取结果，用 html2text 转成纯文本。
//! 请求或解析失败作为普通失败观察返回。

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Url};

use crate::config::SearchSection;
use crate::core::TaskError;
use crate::protocol::{parse_query, ActionKind};
use crate::tools::{Action, ActionContext, DispatchResult};

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub summary: String,
}

pub struct SearchAction {
    client: Client,
    endpoint: String,
    origin: String,
    max_results: usize,
    link_re: Regex,
    snippet_re: Regex,
    tag_re: Regex,
}

/// html2text 的排版宽度；结果随后会合并空白，只需足够宽避免折行
const TEXT_WIDTH: usize = 10_000;

impl SearchAction {
    pub fn new(config: &SearchSection) -> Result<Self, TaskError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| TaskError::Config(format!("search client: {}", e)))?;
        let regex = |pattern: &str| {
            Regex::new(pattern).map_err(|e| TaskError::Config(format!("search pattern: {}", e)))
        };

        let origin = Url::parse(&config.endpoint)
            .map_err(|e| TaskError::Config(format!("search endpoint `{}`: {}", config.endpoint, e)))?
            .origin()
            .ascii_serialization();

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            origin,
            max_results: config.max_results,
            link_re: regex(r#"(?s)<a[^>]*class=['"]result-link['"][^>]*>(.*?)</a>"#)?,
            snippet_re: regex(r#"(?s)<td[^>]*class=['"]result-snippet['"][^>]*>(.*?)</td>"#)?,
            tag_re: regex(r"(?s)<[^>]*>")?,
        })
    }

    /// 从结果页 HTML 中提取至多 max_results 条结果
    pub fn parse_results(&self, html: &str) -> Vec<SearchHit> {
        let titles = self.link_re.captures_iter(html).map(|c| self.text_of(&c[1]));
        let summaries: Vec<String> = self
            .snippet_re
            .captures_iter(html)
            .map(|c| self.text_of(&c[1]))
            .collect();

        titles
            .enumerate()
            .filter(|(_, title)| !title.is_empty())
            .map(|(i, title)| SearchHit {
                title,
                summary: summaries.get(i).cloned().unwrap_or_default(),
            })
            .take(self.max_results)
            .collect()
    }

    /// HTML 片段转纯文本并合并空白；html2text 失败时退回简单去标签
    fn text_of(&self, fragment: &str) -> String {
        let text = html2text::config::plain_no_decorate()
            .string_from_read(fragment.as_bytes(), TEXT_WIDTH)
            .unwrap_or_else(|_| self.tag_re.replace_all(fragment, "").into_owned());
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    async fn fetch(&self, query: &str) -> Result<String, String> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Origin", &self.origin)
            .form(&[("q", query), ("kl", ""), ("df", "")])
            .send()
            .await
            .map_err(|e| format!("search request failed: {}", e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!(
                "failed to get search result (status: {})",
                status.as_u16()
            ));
        }
        response
            .text()
            .await
            .map_err(|e| format!("failed to read search result: {}", e))
    }
}

#[async_trait]
impl Action for SearchAction {
    fn kind(&self) -> ActionKind {
        ActionKind::Search
    }

    fn description(&self) -> &str {
        "Search the web. Input is `query: <text>`; returns the top results as `N. title: summary`."
    }

    async fn execute(
        &self,
        _ctx: &mut ActionContext,
        input: &str,
    ) -> Result<DispatchResult, TaskError> {
        let query = match parse_query(input) {
            Ok(query) => query,
            Err(e) => return Ok(DispatchResult::Failure(e.to_string())),
        };
        let html = match self.fetch(&query).await {
            Ok(html) => html,
            Err(msg) => {
                tracing::warn!(query = %query, "{}", msg);
                return Ok(DispatchResult::Failure(msg));
            }
        };

        let hits = self.parse_results(&html);
        tracing::debug!(query = %query, hits = hits.len(), "search finished");
        if hits.is_empty() {
            return Ok(DispatchResult::Success("No results found".to_string()));
        }
        let lines: Vec<String> = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| format!("{}. {}: {}", i + 1, hit.title, hit.summary))
            .collect();
        Ok(DispatchResult::Success(lines.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT_PAGE: &str = r#"
<table border="0">
  <tr>
    <td valign="top">1.&nbsp;</td>
    <td>
      <a rel="nofollow" href="https://www.rust-lang.org/" class='result-link'>Rust Programming <b>Language</b></a>
    </td>
  </tr>
  <tr>
    <td>&nbsp;&nbsp;&nbsp;</td>
    <td class='result-snippet'>
      A language empowering everyone to build reliable &amp; efficient software.
    </td>
  </tr>
  <tr>
    <td valign="top">2.&nbsp;</td>
    <td><a rel="nofollow" href="https://doc.rust-lang.org/book/" class='result-link'>The Rust Book</a></td>
  </tr>
  <tr>
    <td class='result-snippet'>It&#39;s the &quot;book&quot;.</td>
  </tr>
  <tr>
    <td><a href="https://example.com/" class='result-link'>Third</a></td>
  </tr>
  <tr>
    <td class='result-snippet'>third snippet</td>
  </tr>
  <tr>
    <td><a href="https://example.org/" class='result-link'>Fourth</a></td>
  </tr>
</table>
"#;

    fn action(max_results: usize) -> SearchAction {
        SearchAction::new(&SearchSection {
            max_results,
            ..SearchSection::default()
        })
        .unwrap()
    }

    #[test]
    fn test_parse_results() {
        let hits = action(3).parse_results(RESULT_PAGE);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "Rust Programming Language");
        assert_eq!(
            hits[0].summary,
            "A language empowering everyone to build reliable & efficient software."
        );
        assert_eq!(hits[1].title, "The Rust Book");
        assert_eq!(hits[1].summary, "It's the \"book\".");
        assert_eq!(hits[2].title, "Third");
    }

    #[test]
    fn test_parse_results_without_matches() {
        assert!(action(3).parse_results("<html><body>nothing</body></html>").is_empty());
    }

    #[test]
    fn test_named_entities_are_decoded() {
        let page = "<a class='result-link' href='#'>Caf&eacute; guide</a>\n\
                    <td class='result-snippet'>It&rsquo;s the &ldquo;best&rdquo; &copy;</td>";
        let hits = action(3).parse_results(page);
        assert_eq!(
            hits,
            vec![SearchHit {
                title: "Caf\u{e9} guide".to_string(),
                summary: "It\u{2019}s the \u{201c}best\u{201d} \u{a9}".to_string(),
            }]
        );
    }

    #[test]
    fn test_origin_from_endpoint() {
        let search = action(3);
        assert_eq!(search.origin, "https://lite.duckduckgo.com");

        let search = SearchAction::new(&SearchSection {
            endpoint: "http://localhost:8080/lite/".to_string(),
            ..SearchSection::default()
        })
        .unwrap();
        assert_eq!(search.origin, "http://localhost:8080");

        let bad = SearchAction::new(&SearchSection {
            endpoint: "not a url".to_string(),
            ..SearchSection::default()
        });
        assert!(matches!(bad, Err(TaskError::Config(_))));
    }
}
