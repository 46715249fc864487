pub fn truncate_utf8_prefix(value: &str, max_bytes: usize) -> String {
    if max_bytes == 0 {
        return String::new();
    }
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Single-line preview of a command for log metadata.
pub fn command_preview(command: &str, max_bytes: usize) -> String {
    let flattened = command.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.len() <= max_bytes {
        return flattened;
    }
    format!("{}...", truncate_utf8_prefix(&flattened, max_bytes))
}

#[cfg(test)]
mod tests {
    use super::{command_preview, truncate_utf8_prefix};

    #[test]
    fn truncate_utf8_prefix_handles_ascii() {
        assert_eq!(truncate_utf8_prefix("hello", 3), "hel");
    }

    #[test]
    fn truncate_utf8_prefix_does_not_split_utf8() {
        assert_eq!(truncate_utf8_prefix("a\u{1F600}b", 2), "a");
        assert_eq!(truncate_utf8_prefix("a\u{1F600}b", 5), "a\u{1F600}");
    }

    #[test]
    fn command_preview_flattens_and_truncates() {
        assert_eq!(command_preview("Get-Process\n  | Sort", 50), "Get-Process | Sort");
        assert_eq!(command_preview("abcdefgh", 4), "abcd...");
    }
}
