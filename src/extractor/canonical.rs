use url::{Url, form_urlencoded};

/// Query parameters that only track the visitor and never select content.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "ref"];

/// Canonical form of an article URL: the dedup key and the URL the
/// assistant will cite.
///
/// Drops the fragment and tracking parameters and strips trailing slashes
/// (except for the root path). The url crate already lowercases scheme and
/// host and elides default ports. Applying it twice yields the same URL.
pub fn canonicalize(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_fragment(None);

    if canonical.query().is_some() {
        let pairs: Vec<(String, String)> = canonical.query_pairs().into_owned().collect();
        let kept: Vec<&(String, String)> = pairs.iter().filter(|(k, _)| !is_tracking(k)).collect();
        if kept.is_empty() {
            canonical.set_query(None);
        } else if kept.len() != pairs.len() {
            let mut serializer = form_urlencoded::Serializer::new(String::new());
            for (k, v) in kept {
                serializer.append_pair(k, v);
            }
            canonical.set_query(Some(&serializer.finish()));
        }
    }

    let path = canonical.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed }.to_string();
        canonical.set_path(&trimmed);
    }

    canonical
}

fn is_tracking(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}


#[cfg(feature = "fuzz")]
mod fuzz {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_canonicalize_is_idempotent(
            path in "(/[a-z0-9]{0,6}){0,4}/?",
            query in "([a-z_]{1,8}=[a-z0-9]{0,4}&?){0,4}",
        ) {
            let raw = format!("https://example.com{path}?{query}");
            if let Ok(url) = Url::parse(&raw) {
                let once = canonicalize(&url);
                prop_assert_eq!(canonicalize(&once), once);
            }
        }
    }
}
