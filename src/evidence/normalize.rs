use reqwest::Url;

/// Query parameters that only track the click and never change the page.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref_src", "mc_cid", "mc_eid"];

/// Canonical form of a URL, used as evidence identity.
///
/// Scheme and host are lowercased (the parser does this), `www.`, fragments,
/// default ports, tracking parameters and trailing slashes are dropped.
/// Anything unparsable falls back to its trimmed lowercase form.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_lowercase();
    };

    url.set_fragment(None);

    if let Some(bare) = url.host_str().and_then(|h| h.strip_prefix("www.")) {
        let bare = bare.to_string();
        let _ = url.set_host(Some(&bare));
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| keep_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }

    let rendered = url.to_string();
    if url.query().is_none() {
        rendered.trim_end_matches('/').to_string()
    } else {
        rendered
    }
}

fn keep_param(key: &str) -> bool {
    !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key)
}
