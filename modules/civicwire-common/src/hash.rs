use sha2::{Digest, Sha256};

/// Ingestion dedup key: a stable function of (title, url, external_id),
/// scoped per source by the store. Absent fields hash as empty strings so
/// presence or absence of a field changes the hash.
pub fn content_hash(title: &str, url: Option<&str>, external_id: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(url.unwrap_or("").as_bytes());
    hasher.update([0x1f]);
    hasher.update(external_id.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Downstream article dedup key: (title, url) scoped per region by the sink.
/// Independent from `content_hash` so the two dedup barriers stay decoupled.
pub fn article_hash(title: &str, url: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update([0x1f]);
    hasher.update(url.unwrap_or("").as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable() {
        let a = content_hash("City Commission Meeting", Some("https://example.gov/e/1"), Some("42"));
        let b = content_hash("City Commission Meeting", Some("https://example.gov/e/1"), Some("42"));
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_changes_with_any_input() {
        let base = content_hash("Title", Some("https://a"), Some("1"));
        assert_ne!(base, content_hash("Title!", Some("https://a"), Some("1")));
        assert_ne!(base, content_hash("Title", Some("https://b"), Some("1")));
        assert_ne!(base, content_hash("Title", Some("https://a"), Some("2")));
    }

    #[test]
    fn absent_fields_hash_differently_from_shifted_fields() {
        // A url must not collide with the same string as an external id.
        let with_url = content_hash("T", Some("x"), None);
        let with_id = content_hash("T", None, Some("x"));
        assert_ne!(with_url, with_id);
    }

    #[test]
    fn article_hash_independent_of_content_hash() {
        let content = content_hash("Title", Some("https://a"), None);
        let article = article_hash("Title", Some("https://a"));
        assert_ne!(content, article);
    }
}
