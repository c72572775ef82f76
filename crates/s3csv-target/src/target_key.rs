//! Destination key resolution

/// Naming convention used when none is configured
pub const DEFAULT_NAMING_CONVENTION: &str = "{stream}-{timestamp}.csv";

/// Build the object key for a stream's buffer file
///
/// `{stream}`, `{timestamp}` and `{date}` are substituted literally. Slashes in
/// the template are kept, so templates can place objects in "folders". The
/// prefix is prepended to the last path component only.
///
/// ```
/// use s3csv_target::target_key::resolve;
///
/// let key = resolve("orders", "20210101T000000", "p_", Some("folder1/{stream}_{timestamp}.csv"));
/// assert_eq!(key, "folder1/p_orders_20210101T000000.csv");
/// ```
pub fn resolve(stream: &str, timestamp: &str, prefix: &str, naming_convention: Option<&str>) -> String {
    resolve_with_date(stream, timestamp, "", prefix, naming_convention)
}

/// Like [`resolve`], also substituting `{date}`
pub fn resolve_with_date(
    stream: &str,
    timestamp: &str,
    date: &str,
    prefix: &str,
    naming_convention: Option<&str>,
) -> String {
    let template = naming_convention
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_NAMING_CONVENTION);

    let key = template
        .replace("{stream}", stream)
        .replace("{timestamp}", timestamp)
        .replace("{date}", date);

    if prefix.is_empty() {
        return key;
    }

    match key.rsplit_once('/') {
        Some((folders, filename)) => format!("{}/{}{}", folders, prefix, filename),
        None => format!("{}{}", prefix, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: &str = "20210101T000000";

    #[test]
    fn test_default_convention() {
        assert_eq!(resolve("orders", TS, "", None), "orders-20210101T000000.csv");
        assert_eq!(resolve("orders", TS, "", Some("")), "orders-20210101T000000.csv");
        assert_eq!(
            resolve("orders", TS, "", Some("{stream}-{timestamp}.csv")),
            "orders-20210101T000000.csv"
        );
    }

    #[test]
    fn test_prefix_on_default_convention() {
        assert_eq!(resolve("orders", TS, "pre_", None), "pre_orders-20210101T000000.csv");
    }

    #[test]
    fn test_prefix_applies_to_filename_only() {
        assert_eq!(
            resolve("orders", TS, "p_", Some("folder1/{stream}_{timestamp}.csv")),
            "folder1/p_orders_20210101T000000.csv"
        );
        assert_eq!(
            resolve("the_stream", TS, "the_prefix__", Some("folder1/test_{stream}_test.csv")),
            "folder1/the_prefix__test_the_stream_test.csv"
        );
    }

    #[test]
    fn test_tokens_in_folders() {
        assert_eq!(
            resolve("orders", TS, "", Some("tester/{stream}/{timestamp}.csv")),
            "tester/orders/20210101T000000.csv"
        );
        assert_eq!(
            resolve("orders", TS, "x_", Some("tester/{stream}/{timestamp}.csv")),
            "tester/orders/x_20210101T000000.csv"
        );
    }

    #[test]
    fn test_repeated_tokens() {
        assert_eq!(
            resolve("a", TS, "", Some("{stream}/{stream}-{timestamp}.csv")),
            "a/a-20210101T000000.csv"
        );
    }

    #[test]
    fn test_date_token() {
        assert_eq!(
            resolve_with_date("orders", TS, "2021-01-01", "", Some("{date}/{stream}.csv")),
            "2021-01-01/orders.csv"
        );
    }
}
