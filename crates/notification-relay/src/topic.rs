//! 推送主题规范化
//!
//! 将记录的 target 字段映射为推送主题：转小写，空白串替换为单个下划线。
//! 不校验推送服务允许的字符集，非法主题在发送时由推送服务拒绝。

use std::sync::LazyLock;

use regex::Regex;

/// target 为空时的默认主题
pub const DEFAULT_TOPIC: &str = "all";

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

/// 根据 target 计算推送主题
///
/// 首尾空白先被去除，因此仅含空白的 target 与空值等价，返回 `default_topic`。
/// 去除首尾空白是有意为之，否则 `" Ops "` 会映射为 `_ops_`，与 `"Ops"` 分属两个主题。
pub fn normalize_topic(target: Option<&str>, default_topic: &str) -> String {
    let trimmed = target.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return default_topic.to_string();
    }

    WHITESPACE_RUN
        .replace_all(&trimmed.to_lowercase(), "_")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_normalization() {
        assert_eq!(normalize_topic(Some("Team Leads"), DEFAULT_TOPIC), "team_leads");
        assert_eq!(normalize_topic(Some("All Staff"), DEFAULT_TOPIC), "all_staff");
    }

    #[test]
    fn test_whitespace_runs_collapse() {
        assert_eq!(normalize_topic(Some("Night   Shift"), DEFAULT_TOPIC), "night_shift");
        assert_eq!(normalize_topic(Some("a \t\n b"), DEFAULT_TOPIC), "a_b");
    }

    #[test]
    fn test_empty_and_absent_use_default() {
        assert_eq!(normalize_topic(None, DEFAULT_TOPIC), "all");
        assert_eq!(normalize_topic(Some(""), DEFAULT_TOPIC), "all");
        assert_eq!(normalize_topic(Some("   "), DEFAULT_TOPIC), "all");
        assert_eq!(normalize_topic(None, "everyone"), "everyone");
    }

    #[test]
    fn test_surrounding_whitespace_trimmed() {
        assert_eq!(normalize_topic(Some("  Managers "), DEFAULT_TOPIC), "managers");
        // 不产生首尾下划线
        assert_eq!(normalize_topic(Some(" Ops "), DEFAULT_TOPIC), "ops");
        assert_eq!(normalize_topic(Some("\tNight Shift\n"), DEFAULT_TOPIC), "night_shift");
    }

    #[test]
    fn test_other_characters_untouched() {
        // 非法字符留给推送服务校验
        assert_eq!(normalize_topic(Some("R&D Team!"), DEFAULT_TOPIC), "r&d_team!");
    }
}
