//! Line Normalizer (§4.2). Strips the Source-engine UDP wire prefix (four
//! `0xFF` bytes plus `log `) and locates the canonical `L ` line start.

/// Normalize a raw decoded datagram payload into a line starting with `L `,
/// or `None` if no such prefix can be found anywhere in the payload.
pub fn normalize(raw: &str) -> Option<String> {
    let trimmed = raw.trim_start();

    if trimmed.starts_with("L ") {
        return Some(trimmed.to_string());
    }

    if let Some(pos) = trimmed.find("L ") {
        return Some(trimmed[pos..].to_string());
    }

    // No canonical prefix found; hand back the trimmed string so the parser
    // can reject it explicitly rather than silently dropping it here.
    Some(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_prefixed_line_is_identity() {
        let line = "L 07/15/2024 - 22:33:10: \"a\" connected";
        assert_eq!(normalize(line).unwrap(), line);
    }

    #[test]
    fn strips_wire_prefix_before_canonical_line() {
        // four 0xFF bytes decode (lossy) to U+FFFD before the literal "log " prefix
        let raw = "\u{FFFD}\u{FFFD}\u{FFFD}\u{FFFD}log L 07/15/2024 - 22:33:10: \"a\" connected";
        let normalized = normalize(raw).unwrap();
        assert!(normalized.starts_with("L 07/15/2024"));
    }

    #[test]
    fn leading_whitespace_is_trimmed() {
        let line = "   L 07/15/2024 - 22:33:10: \"a\" connected";
        assert_eq!(normalize(line).unwrap(), line.trim_start());
    }

    #[test]
    fn no_l_prefix_returns_trimmed_string_for_rejection() {
        let raw = "garbage line with no prefix";
        assert_eq!(normalize(raw).unwrap(), raw);
    }
}
