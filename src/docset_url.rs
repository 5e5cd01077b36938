//! Virtual URLs addressing docset content.
//!
//! `dash-docset://<docset path>/<resource>[?q=<query>][#fragment]`, where
//! `<docset path>` is the docset's path relative to the data root. Plain
//! `file://` URLs pointing inside the data root are accepted as well.

use std::path::Path;

use percent_encoding::{
    AsciiSet,
    CONTROLS,
    percent_decode_str,
    utf8_percent_encode,
};

use crate::docset::Docset;

pub const SCHEME: &str = "dash-docset";

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

const QUERY: &AsciiSet = &SEGMENT.add(b'&').add(b'+').add(b'=');

/// A parsed docset URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocsetUrl {
    /// Decoded path relative to the data root, without a leading `/`.
    pub path: String,
    /// Decoded `q` parameter, if present and non-empty.
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl DocsetUrl {
    /// Parse `url`. Returns `None` for unknown schemes and malformed URLs.
    pub fn parse(url: &str, data_root: &Path) -> Option<Self> {
        let url = url.trim();
        let (without_fragment, fragment) = match url.split_once('#') {
            Some((head, frag)) => (head, Some(frag)),
            None => (url, None),
        };
        let (raw_path, raw_query) = match without_fragment.split_once('?') {
            Some((head, query)) => (head, Some(query)),
            None => (without_fragment, None),
        };

        let path = if let Some(rest) = strip_scheme(raw_path, SCHEME) {
            decode(rest)?
        } else if let Some(rest) = strip_scheme(raw_path, "file") {
            let absolute = decode(rest)?;
            let root = data_root.to_string_lossy();
            let root = root.trim_end_matches('/');
            let relative = absolute.strip_prefix(root)?;
            if !relative.starts_with('/') {
                return None;
            }
            relative.to_string()
        } else {
            return None;
        };

        let path = normalize(&path)?;
        let query = raw_query.and_then(query_param).filter(|q| !q.is_empty());
        let fragment = fragment
            .and_then(decode)
            .filter(|f| !f.is_empty());

        Some(Self {
            path,
            query,
            fragment,
        })
    }

    /// Path of the addressed resource inside `docset`.
    ///
    /// Empty when the URL addresses the docset itself.
    pub fn resource_in(&self, docset: &Docset) -> Option<String> {
        let own = docset.relative_path.trim_end_matches('/');
        let rest = self.path.strip_prefix(own)?;
        if rest.is_empty() {
            return Some(String::new());
        }
        rest.strip_prefix('/').map(str::to_string)
    }
}

/// Build the URL of `resource` inside `docset`.
pub fn docset_url(docset: &Docset, resource: &str) -> String {
    let (resource, fragment) = match resource.split_once('#') {
        Some((r, f)) => (r, Some(f)),
        None => (resource, None),
    };

    let mut url = format!("{SCHEME}://");
    let segments = docset
        .relative_path
        .split('/')
        .chain(resource.split('/'))
        .filter(|s| !s.is_empty());
    for (i, segment) in segments.enumerate() {
        if i > 0 {
            url.push('/');
        }
        url.extend(utf8_percent_encode(segment, SEGMENT));
    }
    if let Some(fragment) = fragment {
        url.push('#');
        url.extend(utf8_percent_encode(fragment, SEGMENT));
    }
    url
}

/// Build a search URL against `docset`.
pub fn search_url(docset: &Docset, query: &str) -> String {
    let mut url = docset_url(docset, "");
    url.push_str("?q=");
    url.extend(utf8_percent_encode(query, QUERY));
    url
}

fn strip_scheme<'a>(url: &'a str, scheme: &str) -> Option<&'a str> {
    let (head, rest) = url.split_once("://")?;
    head.eq_ignore_ascii_case(scheme).then_some(rest)
}

fn decode(raw: &str) -> Option<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .ok()
        .map(|s| s.into_owned())
}

/// Drop empty and `.` segments; reject `..` and empty paths.
fn normalize(path: &str) -> Option<String> {
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

fn query_param(raw: &str) -> Option<String> {
    raw.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        (key == "q").then(|| decode(&value.replace('+', " ")))?
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn docset(path: &str) -> Docset {
        Docset {
            identifier: "py".into(),
            name: "Python".into(),
            relative_path: path.into(),
            platform: String::new(),
            enabled: true,
        }
    }

    #[test]
    fn parses_docset_scheme() {
        let url = DocsetUrl::parse(
            "dash-docset://docsets/Python.docset/Contents/str.html#join",
            Path::new("/data"),
        )
        .unwrap();
        assert_eq!(url.path, "docsets/Python.docset/Contents/str.html");
        assert_eq!(url.fragment.as_deref(), Some("join"));
        assert_eq!(url.query, None);
    }

    #[test]
    fn parses_query_and_decodes() {
        let url = DocsetUrl::parse(
            "dash-docset://docsets/My%20Docs.docset?q=str+join%21",
            Path::new("/data"),
        )
        .unwrap();
        assert_eq!(url.path, "docsets/My Docs.docset");
        assert_eq!(url.query.as_deref(), Some("str join!"));
    }

    #[test]
    fn file_urls_inside_root_only() {
        let root = Path::new("/data/docshelf");
        let inside =
            DocsetUrl::parse("file:///data/docshelf/docsets/A.docset/x", root)
                .unwrap();
        assert_eq!(inside.path, "docsets/A.docset/x");

        assert!(DocsetUrl::parse("file:///elsewhere/A.docset", root).is_none());
        assert!(
            DocsetUrl::parse("file:///data/docshelfother/A.docset", root)
                .is_none()
        );
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        let root = Path::new("/data");
        assert!(DocsetUrl::parse("https://example.com/a", root).is_none());
        assert!(DocsetUrl::parse("not a url", root).is_none());
        assert!(DocsetUrl::parse("dash-docset://", root).is_none());
        assert!(DocsetUrl::parse("dash-docset://a/../b", root).is_none());
        assert!(DocsetUrl::parse("dash-docset://a/%ff", root).is_none());
    }

    #[test]
    fn resource_in_strips_docset_path() {
        let d = docset("docsets/Python.docset");
        let url = DocsetUrl::parse(
            "dash-docset://docsets/Python.docset/Contents/a.html",
            Path::new("/data"),
        )
        .unwrap();
        assert_eq!(url.resource_in(&d).as_deref(), Some("Contents/a.html"));

        let other = docset("docsets/Py.docset");
        assert_eq!(url.resource_in(&other), None);
    }

    #[test]
    fn built_urls_parse_back() {
        let d = docset("docsets/My Docs.docset");
        let url = docset_url(&d, "Contents/str type.html#join");
        assert_eq!(
            url,
            "dash-docset://docsets/My%20Docs.docset/Contents/str%20type.html#join"
        );

        let parsed = DocsetUrl::parse(&url, Path::new("/data")).unwrap();
        assert_eq!(
            parsed.resource_in(&d).as_deref(),
            Some("Contents/str type.html")
        );

        let search = search_url(&d, "a&b c");
        let parsed = DocsetUrl::parse(&search, Path::new("/data")).unwrap();
        assert_eq!(parsed.query.as_deref(), Some("a&b c"));
        assert_eq!(parsed.resource_in(&d).as_deref(), Some(""));
    }
}
