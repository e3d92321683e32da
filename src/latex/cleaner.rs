//! Source clean-up.
//!
//! Before extraction, comments can be dropped from translatable files: they
//! carry no output but cost translation tokens. After translation, `\end`
//! markers closing environments that were never opened are removed.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Environments whose lines are never touched
static PROTECTED_ENVIRONMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\begin\{(verbatim\*?|Verbatim\*?|BVerbatim|lstlisting|minted|filecontents\*?)\}")
        .expect("valid regex")
});

static BOOKTABS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*\\usepackage(?:\[[^\]]*\])?\{booktabs\}[^\n]*\n").expect("valid regex")
});

static COLORTBL_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*\\usepackage(?:\[[^\]]*\])?\{colortbl\}[^\n]*\n").expect("valid regex")
});

static ENVIRONMENT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\\(begin|end)\s*\{([^}\s]+)\}").expect("valid regex")
});

/// Environments whose stray `\end` markers are removed
const BALANCED_ENVIRONMENTS: &[&str] = &[
    "quote", "quotation", "itemize", "enumerate", "description", "definition", "theorem",
    "lemma", "proof", "corollary", "proposition", "remark", "abstract", "center",
];

/// Byte offset of the first unescaped `%` in a line
pub fn comment_start(line: &str) -> Option<usize> {
    let mut escaped = false;
    for (idx, byte) in line.bytes().enumerate() {
        match byte {
            b'\\' => escaped = !escaped,
            b'%' if !escaped => return Some(idx),
            _ => escaped = false,
        }
    }
    None
}

/// Remove every comment, keeping line breaks
pub fn strip_comments(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        match comment_start(line) {
            Some(idx) => {
                output.push_str(&line[..idx]);
                if line.ends_with('\n') {
                    output.push('\n');
                }
            }
            None => output.push_str(line),
        }
    }
    output
}

/// Clean a translatable file.
///
/// Outside verbatim-like blocks: comment-only lines and `comment` environments
/// are dropped and runs of blank lines collapse to one. For the entry file,
/// `booktabs` is also loaded after `colortbl`.
pub fn clean_source(content: &str, is_entry: bool) -> String {
    let mut output = String::with_capacity(content.len());
    let mut protected_end: Option<String> = None;
    let mut in_comment_env = false;
    let mut blank_run = 0usize;

    for line in content.split_inclusive('\n') {
        if let Some(end_marker) = &protected_end {
            if line.contains(end_marker.as_str()) {
                protected_end = None;
            }
            output.push_str(line);
            blank_run = 0;
            continue;
        }

        let trimmed = line.trim_start();
        if in_comment_env {
            if trimmed.starts_with("\\end{comment}") {
                in_comment_env = false;
            }
            continue;
        }
        if trimmed.starts_with("\\begin{comment}") {
            in_comment_env = !line.contains("\\end{comment}");
            continue;
        }
        if trimmed.starts_with('%') {
            continue;
        }

        if trimmed.trim_end().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }

        if let Some(captures) = PROTECTED_ENVIRONMENTS.captures(line) {
            let end_marker = format!("\\end{{{}}}", &captures[1]);
            let opened_at = captures.get(0).map(|m| m.end()).unwrap_or(0);
            if !line[opened_at..].contains(end_marker.as_str()) {
                protected_end = Some(end_marker);
            }
        }
        output.push_str(line);
    }

    if is_entry {
        output = reorder_booktabs(&output);
    }
    output
}

/// Load `booktabs` after `colortbl` so both table rule styles work
fn reorder_booktabs(content: &str) -> String {
    let (Some(booktabs), Some(colortbl)) = (BOOKTABS_LINE.find(content), COLORTBL_LINE.find(content)) else {
        return content.to_string();
    };
    if booktabs.start() > colortbl.start() {
        return content.to_string();
    }

    let mut output = String::with_capacity(content.len());
    output.push_str(&content[..booktabs.start()]);
    output.push_str(&content[booktabs.end()..colortbl.end()]);
    output.push_str(booktabs.as_str());
    output.push_str(&content[colortbl.end()..]);
    output
}

/// Per environment, how many more `\end` than `\begin` markers `content` has.
///
/// Commented-out markers are not counted.
pub fn surplus_ends(content: &str) -> BTreeMap<String, usize> {
    let text = strip_comments(content);
    let mut balance: BTreeMap<String, i64> = BTreeMap::new();
    for captures in ENVIRONMENT_MARKER.captures_iter(&text) {
        let name = &captures[2];
        if !BALANCED_ENVIRONMENTS.contains(&name) {
            continue;
        }
        let delta = if &captures[1] == "end" { 1 } else { -1 };
        *balance.entry(name.to_string()).or_default() += delta;
    }
    balance.into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(name, count)| (name, count as usize))
        .collect()
}

/// Remove the `\end` markers counted in `surplus` from `text`, latest first,
/// decrementing the counts. `None` when nothing was removed.
pub fn remove_surplus_ends(text: &str, surplus: &mut BTreeMap<String, usize>) -> Option<String> {
    let markers: Vec<(usize, usize, String)> = ENVIRONMENT_MARKER.captures_iter(text)
        .filter(|captures| &captures[1] == "end")
        .filter_map(|captures| captures.get(0).map(|m| (m.start(), m.end(), captures[2].to_string())))
        .collect();

    let mut removed = Vec::new();
    for (start, end, name) in markers.into_iter().rev() {
        if let Some(count) = surplus.get_mut(&name) {
            if *count > 0 {
                *count -= 1;
                removed.push(start..end);
            }
        }
    }
    if removed.is_empty() {
        return None;
    }

    // Ranges are in descending order, so earlier offsets stay valid
    let mut output = text.to_string();
    for range in removed {
        output.replace_range(range, "");
    }
    Some(output)
}

/// Drop `\end` markers of environments that were never opened, latest first
pub fn fix_environment_imbalance(content: &str) -> String {
    let mut surplus = surplus_ends(content);
    remove_surplus_ends(content, &mut surplus).unwrap_or_else(|| content.to_string())
}
