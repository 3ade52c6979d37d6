//! 请求分析器
//!
//! 把一段对话归类为请求类型并估算输入 tokens。纯函数，不产生副作用，
//! 任何输入（包括空对话）都不会失败，最差退化为 SIMPLE + 最小 token 估算。

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// 消息角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
    #[serde(other)]
    Other,
}

/// 对话消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

/// 工具声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

impl ToolDeclaration {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            description: None,
            parameters: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// 声明本身占用的字符数（名称 + 描述 + 参数 schema）
    fn char_len(&self) -> usize {
        let params = self
            .parameters
            .as_ref()
            .map(|p| p.to_string().chars().count())
            .unwrap_or(0);
        self.name.chars().count()
            + self
                .description
                .as_deref()
                .map(|d| d.chars().count())
                .unwrap_or(0)
            + params
    }
}

/// 请求类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Simple,
    Complex,
    Reasoning,
    Creative,
    ToolHeavy,
}

impl RequestType {
    pub fn display_name(&self) -> &'static str {
        match self {
            RequestType::Simple => "SIMPLE",
            RequestType::Complex => "COMPLEX",
            RequestType::Reasoning => "REASONING",
            RequestType::Creative => "CREATIVE",
            RequestType::ToolHeavy => "TOOL_HEAVY",
        }
    }

    /// 基础复杂度，0.0 - 1.0
    fn base_complexity(&self) -> f64 {
        match self {
            RequestType::Simple => 0.1,
            RequestType::Creative => 0.4,
            RequestType::Complex => 0.5,
            RequestType::ToolHeavy => 0.6,
            RequestType::Reasoning => 0.8,
        }
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// 请求分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestAnalysis {
    /// 请求类型
    pub request_type: RequestType,
    /// 是否需要推理
    pub requires_reasoning: bool,
    /// 是否声明了工具
    pub has_tools: bool,
    /// 复杂度评分 (0.0 - 1.0)
    pub estimated_complexity: f64,
    /// 预估输入 tokens，始终 >= 1
    pub input_tokens: u32,
}

/// 分析器参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    /// 每 token 字符数
    pub chars_per_token: u32,
    /// 每条消息的固定开销
    pub message_overhead_tokens: u32,
    /// token 估算下限
    pub min_token_estimate: u32,
    /// 超过该字符数视为复杂请求
    pub complex_char_threshold: usize,
    /// 超过该消息数视为复杂请求
    pub complex_message_threshold: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            chars_per_token: 4,
            message_overhead_tokens: 4,
            min_token_estimate: 1,
            complex_char_threshold: 500,
            complex_message_threshold: 6,
        }
    }
}

fn reasoning_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let patterns = [
            r"(?i)\bstep[\s-]+by[\s-]+step\b",
            r"(?i)\bsolve[sd]?\b",
            r"(?i)\banaly[sz](e|es|is|ing)\b",
            r"(?i)\b(optimal|optimi[sz]e|maximi[sz]e|minimi[sz]e)\b",
            r"(?i)\b(prove|proof|derive|deduce)\b",
            r"(?i)\bshow (your|the) work\b",
            r"(?i)\bthink (it )?through\b",
            // 多步算式：1 + 2 * 3。连续的 - 或 / 是日期、电话号码，不算
            r"\d+(\.\d+)?\s*[+*×÷^]\s*\d+(\.\d+)?\s*[-+*/×÷^=]\s*\d+",
            r"\d+(\.\d+)?\s*-\s*\d+(\.\d+)?\s*[+*/×÷^=]\s*\d+",
            r"\d+(\.\d+)?\s*/\s*\d+(\.\d+)?\s*[-+*×÷^=]\s*\d+",
            // 含未知数的方程：x^2+5x+6=0
            r"(?i)\b\d*[a-z]\s*\^\s*\d+[^=\n]*=",
            r"(?i)\b\d+[a-z]\s*[-+]\s*\d+\s*=",
        ];
        patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

fn creative_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let patterns = [
            r"(?i)\b(write|compose|generate|create|draft|tell)\b.{0,40}\b(story|stories|poem|poems|song|lyrics|haiku|limerick|novel|fable|tale|screenplay|script|sonnet)\b",
            r"(?i)\b(compose|imagine|brainstorm)\b",
            r"(?i)\b(fiction|creative writing)\b",
        ];
        patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

fn tool_intent_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r"(?i)\b(search|look up|lookup|fetch|browse|call|invoke|execute|run|query|download|open|read the file|use the)\b",
            )
            .ok()
        })
        .as_ref()
}

fn multi_part_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?m)^\s*(\d+[.)]|[-*•])\s+\S").ok())
        .as_ref()
}

/// 工具数量达到该值时，无论内容如何都视为工具密集
const TOOL_HEAVY_COUNT: usize = 3;

/// 请求分析器
#[derive(Debug, Clone, Default)]
pub struct RequestAnalyzer {
    config: AnalyzerConfig,
}

impl RequestAnalyzer {
    /// 创建默认分析器
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用自定义参数创建
    pub fn with_config(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    /// 分析请求
    ///
    /// 分类优先级：推理 > 工具 > 创作 > 复杂 > 简单。
    pub fn analyze(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDeclaration],
        max_tokens: Option<u32>,
    ) -> RequestAnalysis {
        let text = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let input_tokens = self.estimate_tokens(messages, tools);
        let has_tools = !tools.is_empty();

        let request_type = if Self::matches_any(reasoning_patterns(), &text) {
            RequestType::Reasoning
        } else if has_tools && Self::is_tool_heavy(&text, tools) {
            RequestType::ToolHeavy
        } else if Self::matches_any(creative_patterns(), &text) {
            RequestType::Creative
        } else if self.is_complex(messages, &text) {
            RequestType::Complex
        } else {
            RequestType::Simple
        };

        let estimated_complexity = Self::complexity(request_type, &text, max_tokens);

        RequestAnalysis {
            request_type,
            requires_reasoning: request_type == RequestType::Reasoning,
            has_tools,
            estimated_complexity,
            input_tokens,
        }
    }

    /// 估算输入 tokens
    ///
    /// 字符数 / chars_per_token（向上取整）+ 每条消息开销 + 工具声明，至少为下限值。
    pub fn estimate_tokens(&self, messages: &[ChatMessage], tools: &[ToolDeclaration]) -> u32 {
        let chars_per_token = self.config.chars_per_token.max(1) as usize;
        let chars: usize = messages.iter().map(|m| m.content.chars().count()).sum::<usize>()
            + tools.iter().map(ToolDeclaration::char_len).sum::<usize>();

        let content_tokens = chars.div_ceil(chars_per_token);
        let overhead = messages
            .len()
            .saturating_mul(self.config.message_overhead_tokens as usize);
        let total = content_tokens.saturating_add(overhead);

        let floor = self.config.min_token_estimate.max(1);
        u32::try_from(total).unwrap_or(u32::MAX).max(floor)
    }

    fn matches_any(patterns: &[Regex], text: &str) -> bool {
        patterns.iter().any(|p| p.is_match(text))
    }

    fn is_tool_heavy(text: &str, tools: &[ToolDeclaration]) -> bool {
        if tools.len() >= TOOL_HEAVY_COUNT {
            return true;
        }
        let lower = text.to_lowercase();
        let names_tool = tools
            .iter()
            .any(|t| !t.name.is_empty() && lower.contains(&t.name.to_lowercase()));
        names_tool || tool_intent_pattern().is_some_and(|p| p.is_match(text))
    }

    fn is_complex(&self, messages: &[ChatMessage], text: &str) -> bool {
        let paragraphs = text
            .split("\n\n")
            .filter(|p| !p.trim().is_empty())
            .count();
        let list_items = multi_part_pattern()
            .map(|p| p.find_iter(text).count())
            .unwrap_or(0);
        let questions = text.matches('?').count();

        text.chars().count() > self.config.complex_char_threshold
            || messages.len() > self.config.complex_message_threshold
            || paragraphs >= 3
            || list_items >= 2
            || questions >= 2
            || text.contains("```")
    }

    fn complexity(request_type: RequestType, text: &str, max_tokens: Option<u32>) -> f64 {
        let length_factor = (text.chars().count() as f64 / 4000.0).min(0.15);
        let output_factor = max_tokens
            .map(|t| (t as f64 / 32_000.0).min(0.05))
            .unwrap_or(0.0);
        (request_type.base_complexity() + length_factor + output_factor).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(text: &str) -> RequestAnalysis {
        RequestAnalyzer::new().analyze(&[ChatMessage::user(text)], &[], None)
    }

    #[test]
    fn test_simple_greeting() {
        let analysis = analyze("Hello");
        assert_eq!(analysis.request_type, RequestType::Simple);
        assert!(!analysis.requires_reasoning);
        assert!(!analysis.has_tools);
        assert!(analysis.input_tokens >= 1);
    }

    #[test]
    fn test_reasoning_phrasing() {
        for text in [
            "solve: x^2+5x+6=0, show your work",
            "Walk me through it step by step",
            "Analyze the tradeoffs here",
            "What is the optimal batch size to maximize throughput",
            "what is 12 * 7 + 3 - 9",
        ] {
            let analysis = analyze(text);
            assert_eq!(analysis.request_type, RequestType::Reasoning, "{text}");
            assert!(analysis.requires_reasoning, "{text}");
        }
    }

    #[test]
    fn test_single_arithmetic_is_not_reasoning() {
        assert_eq!(analyze("what is 2 + 2").request_type, RequestType::Simple);
    }

    #[test]
    fn test_dates_and_phone_numbers_are_not_reasoning() {
        for text in [
            "Remind me on 2024-01-15",
            "Call me at 555-123-4567",
            "The meeting moved to 03/15/2024",
        ] {
            let analysis = analyze(text);
            assert_eq!(analysis.request_type, RequestType::Simple, "{text}");
            assert!(!analysis.requires_reasoning, "{text}");
        }
        assert_eq!(analyze("what is 10 - 4 * 3").request_type, RequestType::Reasoning);
    }

    #[test]
    fn test_creative_request() {
        let analysis = analyze("Write a short story about a lighthouse keeper");
        assert_eq!(analysis.request_type, RequestType::Creative);

        let analysis = analyze("Compose a haiku about autumn");
        assert_eq!(analysis.request_type, RequestType::Creative);
    }

    #[test]
    fn test_tool_heavy_request() {
        let tools = vec![ToolDeclaration::new("web_search")];
        let analysis = RequestAnalyzer::new().analyze(
            &[ChatMessage::user("Search for the latest release notes")],
            &tools,
            None,
        );
        assert!(analysis.has_tools);
        assert_eq!(analysis.request_type, RequestType::ToolHeavy);

        // 有工具但内容与工具无关，按内容分类
        let analysis =
            RequestAnalyzer::new().analyze(&[ChatMessage::user("Hi there")], &tools, None);
        assert!(analysis.has_tools);
        assert_eq!(analysis.request_type, RequestType::Simple);
    }

    #[test]
    fn test_complex_by_structure() {
        let text = "Please help with the following:\n1. Summarize the document\n2. List the risks\n3. Suggest next actions";
        assert_eq!(analyze(text).request_type, RequestType::Complex);

        let long = "lorem ipsum ".repeat(100);
        assert_eq!(analyze(&long).request_type, RequestType::Complex);
    }

    #[test]
    fn test_token_estimate() {
        let analyzer = RequestAnalyzer::new();
        // 400 字符 / 4 = 100，加上 1 条消息开销 4
        let messages = vec![ChatMessage::user("a".repeat(400))];
        assert_eq!(analyzer.estimate_tokens(&messages, &[]), 104);

        // 空输入也不会返回 0
        assert_eq!(analyzer.estimate_tokens(&[], &[]), 1);
        let analysis = analyzer.analyze(&[], &[], None);
        assert_eq!(analysis.request_type, RequestType::Simple);
        assert_eq!(analysis.input_tokens, 1);
    }

    #[test]
    fn test_degenerate_config_is_clamped() {
        let analyzer = RequestAnalyzer::with_config(AnalyzerConfig {
            chars_per_token: 0,
            message_overhead_tokens: 0,
            min_token_estimate: 0,
            ..AnalyzerConfig::default()
        });
        assert_eq!(analyzer.estimate_tokens(&[], &[]), 1);
        assert_eq!(
            analyzer.estimate_tokens(&[ChatMessage::user("abcd")], &[]),
            4
        );
    }

    #[test]
    fn test_message_role_unknown_value() {
        let msg: ChatMessage =
            serde_json::from_str(r#"{"role": "developer", "content": "hi"}"#).unwrap();
        assert_eq!(msg.role, MessageRole::Other);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_message() -> impl Strategy<Value = ChatMessage> {
        (
            prop_oneof![
                Just(MessageRole::System),
                Just(MessageRole::User),
                Just(MessageRole::Assistant),
            ],
            "[a-zA-Z0-9 .,!?\\n]{0,300}",
        )
            .prop_map(|(role, content)| ChatMessage::new(role, content))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_token_estimate_is_positive(messages in prop::collection::vec(arb_message(), 0..8)) {
            let analysis = RequestAnalyzer::new().analyze(&messages, &[], None);
            prop_assert!(analysis.input_tokens >= 1);
            prop_assert!((0.0..=1.0).contains(&analysis.estimated_complexity));
        }

        #[test]
        fn prop_analysis_is_deterministic(messages in prop::collection::vec(arb_message(), 0..8)) {
            let analyzer = RequestAnalyzer::new();
            prop_assert_eq!(
                analyzer.analyze(&messages, &[], None),
                analyzer.analyze(&messages, &[], None)
            );
        }

        #[test]
        fn prop_reasoning_flag_matches_type(messages in prop::collection::vec(arb_message(), 0..8)) {
            let analysis = RequestAnalyzer::new().analyze(&messages, &[], None);
            prop_assert_eq!(
                analysis.requires_reasoning,
                analysis.request_type == RequestType::Reasoning
            );
        }
    }
}
