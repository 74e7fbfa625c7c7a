// src/interception/filter.rs
//! Capture policy evaluation
//!
//! Pure function of the options and a request descriptor. Checks run in a
//! fixed order and the first failing one rejects:
//!
//! 1. host allow-list (exact, case-sensitive)
//! 2. method allow-list (case-insensitive)
//! 3. exact-path exclusions (percent-decoded path)
//! 4. path patterns anchored at the start of the path

use crate::utils::config::CaptureOptions;
use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use url::Url;

/// Decide whether a request is in scope for capture
pub fn should_capture(options: &CaptureOptions, method: &str, url: &Url) -> bool {
    if !options.filter_hosts.is_empty() {
        let Some(host) = hostname(url) else {
            return false;
        };
        if !options.filter_hosts.iter().any(|h| h == host) {
            return false;
        }
    }

    if !options.filter_methods.is_empty()
        && !options
            .filter_methods
            .iter()
            .any(|m| m.as_str().eq_ignore_ascii_case(method))
    {
        return false;
    }

    let path = decoded_path(url);

    if options.exclude_paths.contains(path.as_ref()) {
        return false;
    }

    !options
        .exclude_path_patterns
        .iter()
        .any(|pattern| pattern.is_match(&path))
}

/// Hostname without IPv6 brackets
pub fn hostname(url: &Url) -> Option<&str> {
    url.host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
}

/// Percent-decoded URL path
pub fn decoded_path(url: &Url) -> Cow<'_, str> {
    percent_decode_str(url.path()).decode_utf8_lossy()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_host_and_path_policy() {
        let options = CaptureOptions::builder("out")
            .filter_hosts(["api.example.com"])
            .exclude_paths(["/health"])
            .build()
            .unwrap();

        assert!(!should_capture(&options, "GET", &url("https://api.example.com/health")));
        assert!(should_capture(&options, "GET", &url("https://api.example.com/users")));
        assert!(!should_capture(&options, "GET", &url("https://cdn.example.com/users")));
    }

    #[test]
    fn test_method_allow_list_case_insensitive() {
        let options = CaptureOptions::builder("out")
            .filter_methods(["post", "PUT"])
            .build()
            .unwrap();

        assert!(should_capture(&options, "POST", &url("http://a/x")));
        assert!(should_capture(&options, "put", &url("http://a/x")));
        assert!(!should_capture(&options, "GET", &url("http://a/x")));
    }

    #[test]
    fn test_exact_path_uses_decoded_path() {
        let options = CaptureOptions::builder("out")
            .exclude_paths(["/a b"])
            .build()
            .unwrap();

        assert!(!should_capture(&options, "GET", &url("http://h/a%20b")));
        assert!(should_capture(&options, "GET", &url("http://h/a%20b/c")));
    }

    #[test]
    fn test_patterns_match_from_start() {
        let options = CaptureOptions::builder("out")
            .exclude_path_pattern(r"/static/")
            .exclude_path_pattern(r".*\.png$")
            .build()
            .unwrap();

        assert!(!should_capture(&options, "GET", &url("http://h/static/app.js")));
        assert!(!should_capture(&options, "GET", &url("http://h/img/logo.png")));
        assert!(should_capture(&options, "GET", &url("http://h/api/static/x")));
    }

    #[test]
    fn test_ipv6_host() {
        let options = CaptureOptions::builder("out")
            .filter_hosts(["::1"])
            .build()
            .unwrap();

        assert!(should_capture(&options, "GET", &url("http://[::1]:8080/x")));
    }

    proptest! {
        #[test]
        fn prop_unlisted_host_always_rejected(
            host in "[a-z]{1,12}\\.(com|net|org)",
            path in "/[a-z0-9/]{0,20}",
            method in prop::sample::select(vec!["GET", "POST", "DELETE", "patch"]),
        ) {
            let options = CaptureOptions::builder("out")
                .filter_hosts(["api.example.com"])
                .build()
                .unwrap();
            let target = Url::parse(&format!("https://{}{}", host, path)).unwrap();

            prop_assert!(!should_capture(&options, method, &target));
        }

        #[test]
        fn prop_no_policy_captures_everything(
            host in "[a-z]{1,12}\\.com",
            path in "/[a-z0-9/]{0,20}",
        ) {
            let options = CaptureOptions::builder("out").build().unwrap();
            let target = Url::parse(&format!("http://{}{}", host, path)).unwrap();

            prop_assert!(should_capture(&options, "GET", &target));
        }
    }
}
