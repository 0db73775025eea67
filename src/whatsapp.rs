use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

// Sentinel tokens standing in for WhatsApp formatting markers while the
// emphasis passes run. NUL-delimited, and NUL is stripped from the input
// before the pipeline starts, so they cannot occur in user text.
const LIST_ITEM: &str = "\x00LI\x00";
const BOLD_ITALIC_OPEN: &str = "\x00BIO\x00";
const BOLD_ITALIC_CLOSE: &str = "\x00BIC\x00";
const BOLD: &str = "\x00BD\x00";

/// Emoji prefix per header level (1-6), prepended to the bolded header
/// text. All levels are currently disabled (empty); levels past the end
/// of the table reuse the last entry.
const HEADER_PREFIXES: [&str; 6] = ["", "", "", "", "", ""];

struct Patterns {
    blockquote: Regex,
    escape: Regex,
    escaped_char: Regex,
    hr: Regex,
    link: Regex,
    strikethrough: Regex,
    heading: Regex,
    ordered_list: Regex,
    unordered_list: Regex,
    bold_italic_star: Regex,
    bold_italic_under: Regex,
    bold_star: Regex,
    bold_under: Regex,
    italic_star: Regex,
}

static RE: LazyLock<Patterns> = LazyLock::new(|| Patterns {
    blockquote: Regex::new(r"^>\s?(.*)$").unwrap(),
    escape: Regex::new(r"\\([\\`*_{}\[\]()#+.!|~>-])").unwrap(),
    escaped_char: Regex::new(r"\x00E([0-9A-F]{2})\x00").unwrap(),
    hr: Regex::new(r"^(\s*)[-_*]{3,}\s*$").unwrap(),
    link: Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").unwrap(),
    strikethrough: Regex::new(r"~~(.+?)~~").unwrap(),
    heading: Regex::new(r"^(#{1,6})\s+(.+)$").unwrap(),
    ordered_list: Regex::new(r"^(\s*\d+\.)\s+").unwrap(),
    unordered_list: Regex::new(r"^(\s*)[-*+]\s+").unwrap(),
    bold_italic_star: Regex::new(r"\*\*\*(.+?)\*\*\*").unwrap(),
    bold_italic_under: Regex::new(r"___(.+?)___").unwrap(),
    bold_star: Regex::new(r"\*\*(.+?)\*\*").unwrap(),
    bold_under: Regex::new(r"__(.+?)__").unwrap(),
    italic_star: Regex::new(r"\*(.+?)\*").unwrap(),
});

/// Fence state threaded through the line-by-line conversion fold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct ConvertState {
    in_code_block: bool,
}

/// Convert Markdown text to WhatsApp's formatting syntax.
///
/// WhatsApp uses `*bold*`, `_italic_`, `~strikethrough~` and
/// `*_bold italic_*`, and has no headers, links, or horizontal rules;
/// those are rewritten into plain-text equivalents. Fenced code block
/// contents pass through verbatim.
///
/// Total over all inputs. Not idempotent: feeding already-converted text
/// back in may change it further.
pub fn md_to_whatsapp(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let mut text = input.replace("\r\n", "\n");
    if text.contains('\x00') {
        // The sentinel tokens below are NUL-delimited; NUL in the input
        // would collide with them.
        warn!("stripping NUL bytes from converter input");
        text = text.replace('\x00', "");
    }

    let mut state = ConvertState::default();
    let mut lines = Vec::new();
    for raw in text.split('\n') {
        let (line, next) = convert_line(raw, state);
        lines.push(line);
        state = next;
    }

    render(&lines.join("\n"))
}

/// Transform one line under `state`, returning the new line and the state
/// to carry into the next line.
///
/// The passes run in a fixed order that later passes depend on: escapes
/// are hidden before any marker recognition, rules/links/strikethrough
/// and headers go before the list passes, and triple emphasis is consumed
/// before double before single.
fn convert_line(line: &str, state: ConvertState) -> (String, ConvertState) {
    let line = line.trim_end();

    // Fence lines toggle the state and pass through unmodified.
    if line.trim_start().starts_with("```") {
        return (
            line.to_string(),
            ConvertState {
                in_code_block: !state.in_code_block,
            },
        );
    }
    if state.in_code_block {
        return (line.to_string(), state);
    }

    let mut line = line.to_string();

    // Blockquotes: "> content" normalized, a bare ">" collapses to an
    // empty line. The quoted content still goes through the passes below.
    if let Some(caps) = RE.blockquote.captures(line.trim()) {
        let content = caps[1].trim().to_string();
        line = if content.is_empty() {
            String::new()
        } else {
            format!("> {}", content)
        };
    }

    // Escaped punctuation is hidden behind per-character sentinels so the
    // marker passes below cannot re-parse it; restored by render().
    line = RE
        .escape
        .replace_all(&line, |caps: &regex::Captures| {
            format!("\x00E{:02X}\x00", caps[1].as_bytes()[0])
        })
        .into_owned();

    line = RE.hr.replace(&line, "$1───").into_owned();
    line = RE.link.replace_all(&line, "$1 ($2)").into_owned();
    line = RE.strikethrough.replace_all(&line, "~$1~").into_owned();

    // Headers become a single bold unit. Emphasis markers never nest
    // inside a header; any the user supplied are dropped.
    if let Some(caps) = RE.heading.captures(&line) {
        let level = caps[1].len().min(HEADER_PREFIXES.len());
        let content = caps[2].trim().replace(['*', '_'], "");
        let prefix = HEADER_PREFIXES[level - 1];
        let prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{} ", prefix)
        };
        line = format!("{}{}{}{}", BOLD, prefix, content, BOLD);
    }

    // List markers, at line start only: ordered markers keep their number
    // with the spacing collapsed, unordered markers all become the same
    // list-item sentinel. Indentation stays untouched.
    line = RE.ordered_list.replace(&line, "$1 ").into_owned();
    line = RE
        .unordered_list
        .replace(&line, |caps: &regex::Captures| {
            format!("{}{} ", &caps[1], LIST_ITEM)
        })
        .into_owned();

    // Emphasis, widest markers first so *** is not misread as nested
    // **/*. Bold goes to sentinels so the italic pass cannot eat its
    // asterisks; underscore italic is already in WhatsApp form.
    for re in [&RE.bold_italic_star, &RE.bold_italic_under] {
        line = re
            .replace_all(&line, |caps: &regex::Captures| {
                format!("{}{}{}", BOLD_ITALIC_OPEN, &caps[1], BOLD_ITALIC_CLOSE)
            })
            .into_owned();
    }
    for re in [&RE.bold_star, &RE.bold_under] {
        line = re
            .replace_all(&line, |caps: &regex::Captures| {
                format!("{}{}{}", BOLD, &caps[1], BOLD)
            })
            .into_owned();
    }
    line = RE.italic_star.replace_all(&line, "_${1}_").into_owned();

    (line, state)
}

/// Resolve sentinel tokens into literal WhatsApp formatting characters
/// and restore escaped punctuation.
fn render(text: &str) -> String {
    let text = text.replace(LIST_ITEM, "*");
    let text = text.replace(BOLD_ITALIC_OPEN, "*_");
    let text = text.replace(BOLD_ITALIC_CLOSE, "_*");
    let text = text.replace(BOLD, "*");
    RE.escaped_char
        .replace_all(&text, |caps: &regex::Captures| {
            u32::from_str_radix(&caps[1], 16)
                .ok()
                .and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_default()
        })
        .into_owned()
}
