use regex::Regex;
use std::sync::OnceLock;

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("valid caption tag regex"))
}

/// Flattens WebVTT/SRT captions into plain transcript text: cue numbers, timestamps,
/// inline tags and positioning settings are dropped, and repeated lines (common in
/// rolling auto-captions) are collapsed.
pub fn strip_caption_markup(content: &str) -> String {
    let normalized = content.replace("\r\n", "\n");
    let body = strip_webvtt_header(&normalized);

    let mut kept: Vec<String> = Vec::new();
    for raw in body.lines() {
        let line = raw.trim();
        if line.is_empty() || is_cue_number(line) || line.contains("-->") || is_cue_setting(line)
        {
            continue;
        }
        let text = decode_entities(tag_regex().replace_all(line, "").trim());
        if text.is_empty() {
            continue;
        }
        if kept.last().is_some_and(|prev| *prev == text) {
            continue;
        }
        kept.push(text);
    }
    kept.join(" ")
}

fn strip_webvtt_header(content: &str) -> &str {
    if !content.starts_with("WEBVTT") {
        return content;
    }
    match content.find("\n\n") {
        Some(idx) => &content[idx + 2..],
        None => "",
    }
}

fn is_cue_number(line: &str) -> bool {
    line.chars().all(|c| c.is_ascii_digit())
}

fn is_cue_setting(line: &str) -> bool {
    ["align:", "position:", "size:", "line:"]
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webvtt_auto_captions_collapse_to_text() {
        let vtt = "WEBVTT\nKind: captions\nLanguage: en\n\n\
00:00:00.000 --> 00:00:02.000 align:start position:0%\n\
<c>hello</c><00:00:00.500><c> friends</c>\n\n\
00:00:02.000 --> 00:00:04.000 align:start position:0%\n\
hello friends\n\
today we count &amp; sing\n";
        assert_eq!(
            strip_caption_markup(vtt),
            "hello friends today we count & sing"
        );
    }

    #[test]
    fn srt_cue_numbers_and_timestamps_are_removed() {
        let srt = "1\r\n00:00:01,000 --> 00:00:02,500\r\nOne little duck\r\n\r\n2\r\n00:00:02,500 --> 00:00:04,000\r\n<i>went out one day</i>\r\n";
        assert_eq!(strip_caption_markup(srt), "One little duck went out one day");
    }

    #[test]
    fn header_only_file_is_empty() {
        assert_eq!(strip_caption_markup("WEBVTT\n"), "");
    }
}
