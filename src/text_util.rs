use std::path::Path;

/// Reduce HTML to its visible text.
///
/// Tags are dropped, `<script>` and `<style>` bodies are skipped, the common
/// entities are decoded and runs of whitespace collapse to one space. This is
/// meant for indexing, not rendering.
pub fn strip_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        out.push(' ');
        let tag = &rest[open..];
        let Some(close) = tag.find('>') else {
            rest = "";
            break;
        };

        let tag_name = tag[1..close]
            .split(|c: char| c.is_whitespace() || c == '/')
            .find(|s| !s.is_empty())
            .unwrap_or("")
            .to_ascii_lowercase();
        rest = &tag[close + 1..];

        if tag_name == "script" || tag_name == "style" {
            let end_tag = format!("</{tag_name}");
            rest = match find_ignore_case(rest, &end_tag) {
                Some(end) => {
                    let after = &rest[end..];
                    after.find('>').map_or("", |gt| &after[gt + 1..])
                }
                None => "",
            };
        }
    }
    out.push_str(rest);

    collapse_whitespace(&decode_entities(&out))
}

/// Title of a page: `<title>` for HTML, the first `# ` heading for markdown,
/// and the file stem otherwise.
pub fn page_title(content: &str, file_path: &Path) -> String {
    if let Some(start) = find_ignore_case(content, "<title>") {
        let after = &content[start + "<title>".len()..];
        if let Some(end) = find_ignore_case(after, "</title>") {
            let title = collapse_whitespace(&decode_entities(&after[..end]));
            if !title.is_empty() {
                return title;
            }
        }
    }

    for line in content.lines() {
        if let Some(heading) = line.trim().strip_prefix("# ") {
            let title = heading.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }

    file_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled")
        .to_string()
}

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack.to_ascii_lowercase().find(&needle.to_ascii_lowercase())
}
