//! `==UserScript==` header parsing.

use std::sync::LazyLock;

use {regex::Regex, serde_json::Value};

use crate::types::Meta;

#[allow(clippy::expect_used)]
static HEADER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)==UserScript==\s*(.*)//\s*==/UserScript==").expect("header regex")
});

#[allow(clippy::expect_used)]
static ENTRY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)//\s*@(\S+)\s+(.*)$").expect("entry regex"));

/// Directives that may repeat and are always collected into arrays.
pub(crate) const ARRAY_KEYS: &[&str] = &[
    "include",
    "exclude",
    "match",
    "excludeMatch",
    "require",
    "grant",
];

const NAME_PREFIXES: &[&str] = &["IITC plugin: ", "IITC Plugin: "];

/// Parse the metadata block of a userscript.
///
/// Returns `None` when `code` has no `==UserScript==` block.
pub fn parse_meta(code: &str) -> Option<Meta> {
    let header = HEADER_RE.captures(code)?.get(1)?.as_str();
    let mut meta = Meta::new();

    for entry in ENTRY_RE.captures_iter(header) {
        let (Some(raw_key), Some(raw_value)) = (entry.get(1), entry.get(2)) else {
            continue;
        };
        let (key_name, locale) = match raw_key.as_str().split_once(':') {
            Some((name, locale)) => (name, Some(locale)),
            None => (raw_key.as_str(), None),
        };
        let camel = camel_case(key_name);
        let key = match locale {
            Some(locale) if !locale.is_empty() => format!("{camel}:{}", locale.to_lowercase()),
            _ => camel.clone(),
        };

        let mut value = raw_value.as_str().trim().to_string();
        if camel == "name" {
            for prefix in NAME_PREFIXES {
                value = value.replacen(prefix, "", 1);
            }
        }

        if ARRAY_KEYS.contains(&key.as_str()) {
            let slot = meta
                .entry(key)
                .or_insert_with(|| Value::Array(Vec::new()));
            if let Value::Array(items) = slot {
                items.push(Value::String(value));
            }
        } else {
            meta.insert(key, Value::String(value));
        }
    }

    if !meta.contains_key("homepageURL")
        && let Some(homepage) = meta.get("homepage").cloned()
    {
        meta.insert("homepageURL".into(), homepage);
    }

    Some(meta)
}

/// `run-at` → `runAt`, `exclude_match` → `excludeMatch`.
fn camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut chars = key.chars().peekable();
    while let Some(c) = chars.next() {
        if (c == '-' || c == '_')
            && let Some(&next) = chars.peek()
            && (next.is_alphanumeric() || next == '_')
        {
            chars.next();
            out.extend(next.to_uppercase());
            continue;
        }
        out.push(c);
    }
    out
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    const PLUGIN: &str = r#"// ==UserScript==
// @author         jonatkins
// @name           IITC plugin: Available AP statistics
// @name:ru        IITC plugin: Статистика AP
// @category       Info
// @version        0.4.3
// @description    Displays the per-team AP gains available in the current view.
// @id             ap-stats
// @namespace      https://github.com/IITC-CE/ingress-intel-total-conversion
// @match          https://intel.ingress.com/*
// @match          https://intel-x.ingress.com/*
// @run-at         document-end
// @grant          none
// @homepage       https://iitc.app
// ==/UserScript==

function wrapper(plugin_info) {}
"#;

    #[test]
    fn parses_plugin_header() {
        let meta = parse_meta(PLUGIN).unwrap();
        assert_eq!(meta["name"], "Available AP statistics");
        assert_eq!(meta["name:ru"], "Статистика AP");
        assert_eq!(meta["category"], "Info");
        assert_eq!(meta["id"], "ap-stats");
        assert_eq!(
            meta["match"],
            json!(["https://intel.ingress.com/*", "https://intel-x.ingress.com/*"])
        );
        assert_eq!(meta["grant"], json!(["none"]));
        assert_eq!(meta["runAt"], "document-end");
        assert_eq!(meta["homepageURL"], "https://iitc.app");
    }

    #[test]
    fn missing_block_is_none() {
        assert!(parse_meta("console.log('no header');").is_none());
        assert!(parse_meta("// ==UserScript==\n// @name x\n").is_none());
    }

    #[test]
    fn explicit_homepage_url_wins() {
        let code = "// ==UserScript==\n// @homepage a\n// @homepageURL b\n// ==/UserScript==\n";
        let meta = parse_meta(code).unwrap();
        assert_eq!(meta["homepageURL"], "b");
    }

    #[test]
    fn locale_is_lowercased() {
        let code = "// ==UserScript==\n// @description:ZH-CN 描述\n// ==/UserScript==\n";
        let meta = parse_meta(code).unwrap();
        assert_eq!(meta["description:zh-cn"], "描述");
    }

    #[test]
    fn crlf_values_are_trimmed() {
        let code = "// ==UserScript==\r\n// @id x\r\n// @name Y\r\n// ==/UserScript==\r\n";
        let meta = parse_meta(code).unwrap();
        assert_eq!(meta["id"], "x");
        assert_eq!(meta["name"], "Y");
    }

    #[rstest]
    #[case("name", "name")]
    #[case("run-at", "runAt")]
    #[case("exclude_match", "excludeMatch")]
    #[case("update-URL", "updateURL")]
    #[case("trailing-", "trailing-")]
    fn camel_cases_keys(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(camel_case(raw), expected);
    }
}
