//! Plugin identity.

/// Derive a plugin uid from its descriptor fields.
///
/// Takes the last two non-empty values of `[id, filename, name, namespace]`
/// and joins them with `+`. Returns `None` when fewer than two are present.
pub fn resolve_uid(
    id: Option<&str>,
    filename: Option<&str>,
    name: Option<&str>,
    namespace: Option<&str>,
) -> Option<String> {
    let present: Vec<&str> = [id, filename, name, namespace]
        .into_iter()
        .flatten()
        .filter(|v| !v.is_empty())
        .collect();
    match present.as_slice() {
        [.., a, b] => Some(format!("{a}+{b}")),
        _ => None,
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(Some("ap-stats"), None, Some("AP stats"), Some("ns"), Some("AP stats+ns"))]
    #[case(Some("ap-stats"), Some("ap-stats.user.js"), None, None, Some("ap-stats+ap-stats.user.js"))]
    #[case(None, None, Some("A"), Some("ns"), Some("A+ns"))]
    #[case(Some("x"), None, None, None, None)]
    #[case(None, None, Some("X"), None, None)]
    #[case(Some(""), Some(""), Some("X"), None, None)]
    #[case(None, None, None, None, None)]
    fn resolves(
        #[case] id: Option<&str>,
        #[case] filename: Option<&str>,
        #[case] name: Option<&str>,
        #[case] namespace: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        assert_eq!(
            resolve_uid(id, filename, name, namespace).as_deref(),
            expected
        );
    }
}
