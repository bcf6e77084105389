//! Image de-duplication: one fetch and one [ImageItem] per normalized address.

use super::item::ImageItem;
use super::template::BROKEN_IMAGE;
use crate::scraper::{Fetch, FetchError};
use log::{debug, warn};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;

/// Hosts whose image URLs are only identified by their query string.
const QUERY_KEYED_PATTERNS: &[&str] = &[".gstatic.com/images?"];

/// Body served by the source's storage backend instead of a 404 for deleted images.
const MISSING_RESOURCE_SIGNATURE: &[u8] =
    b"<?xml version=\"1.0\" encoding=\"UTF-8\"?><Error><Code>NoSuchBucket";

const DEFAULT_EXTENSION: &str = ".jpg";

/// Cache of fetched images for one book, keyed by normalized address.
#[derive(Debug)]
pub struct ImageCache {
    base_origin: String,
    entries: HashMap<String, Arc<ImageItem>>,
    next_identity: usize,
}

impl ImageCache {
    /// `base_origin` (e.g. `https://www.royalroad.com`) is prefixed to site-relative addresses.
    pub fn new(base_origin: impl Into<String>) -> Self {
        Self {
            base_origin: base_origin.into().trim_end_matches('/').to_string(),
            entries: HashMap::new(),
            next_identity: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Absolute address with the query string stripped, unless the host needs it.
    pub fn normalize(&self, address: &str) -> String {
        let address = address.trim();
        let absolute = if address.starts_with("//") {
            format!("https:{}", address)
        } else if address.starts_with('/') {
            format!("{}{}", self.base_origin, address)
        } else {
            address.to_string()
        };
        if QUERY_KEYED_PATTERNS.iter().any(|p| absolute.contains(p)) {
            return absolute;
        }
        match absolute.split_once('?') {
            Some((head, _)) => head.to_string(),
            None => absolute,
        }
    }

    pub fn get(&self, address: &str) -> Option<Arc<ImageItem>> {
        self.entries.get(&self.normalize(address)).cloned()
    }

    /// Return the cached item for `address`, fetching and caching it on first sight.
    ///
    /// The flag is `true` when a new item was created. Fetch failures and missing-resource
    /// bodies are replaced by the broken-image placeholder, except a source outage, which is
    /// returned so the build stops.
    pub fn resolve(
        &mut self,
        address: &str,
        fetcher: &mut dyn Fetch,
    ) -> Result<(Arc<ImageItem>, bool), FetchError> {
        let normalized = self.normalize(address);
        if let Some(item) = self.entries.get(&normalized) {
            debug!("image cache hit: {}", normalized);
            return Ok((Arc::clone(item), false));
        }

        let bytes = match fetcher.fetch(&normalized) {
            Ok(bytes) if bytes.starts_with(MISSING_RESOURCE_SIGNATURE) => {
                warn!("Image missing at source: {}", normalized);
                BROKEN_IMAGE.to_vec()
            }
            Ok(bytes) => bytes,
            Err(e @ FetchError::ServiceUnavailable { .. }) => return Err(e),
            Err(e) => {
                warn!("Unable to retrieve image {}: {}", normalized, e);
                BROKEN_IMAGE.to_vec()
            }
        };

        let identity = self.next_identity;
        self.next_identity += 1;
        let item = Arc::new(ImageItem::new(
            identity,
            &extension_of(&normalized),
            bytes,
            normalized.clone(),
        ));
        self.entries.insert(normalized, Arc::clone(&item));
        Ok((item, true))
    }
}

/// Lower-cased extension (with dot) of the address path, ignoring the query string.
fn extension_of(address: &str) -> String {
    let path = match Url::parse(address) {
        Ok(url) => url.path().to_string(),
        Err(_) => address.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let segment = path.rsplit('/').next().unwrap_or_default();
    match segment.rfind('.') {
        Some(dot) if dot > 0 && dot + 1 < segment.len() => {
            let ext = &segment[dot..];
            if ext[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
                ext.to_ascii_lowercase()
            } else {
                DEFAULT_EXTENSION.to_string()
            }
        }
        _ => DEFAULT_EXTENSION.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epub::item::ResourceItem;

    /// Serves canned bodies and counts requests per URL.
    #[derive(Default)]
    struct CountingFetcher {
        calls: Vec<String>,
        body: Vec<u8>,
        fail: bool,
        outage: bool,
    }

    impl Fetch for CountingFetcher {
        fn fetch(&mut self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.calls.push(url.to_string());
            if self.outage {
                return Err(FetchError::ServiceUnavailable {
                    url: url.to_string(),
                });
            }
            if self.fail {
                return Err(FetchError::NotFound {
                    url: url.to_string(),
                });
            }
            Ok(self.body.clone())
        }
    }

    #[test]
    fn normalize_prefixes_origin_and_strips_query() {
        let cache = ImageCache::new("https://www.royalroad.com/");
        assert_eq!(
            cache.normalize("/dist/img/a.png?v=3"),
            "https://www.royalroad.com/dist/img/a.png"
        );
        assert_eq!(
            cache.normalize("https://cdn.example.com/b.jpg?time=1"),
            "https://cdn.example.com/b.jpg"
        );
        assert_eq!(
            cache.normalize("//cdn.example.com/c.gif"),
            "https://cdn.example.com/c.gif"
        );
    }

    #[test]
    fn normalize_keeps_query_for_query_keyed_hosts() {
        let cache = ImageCache::new("https://www.royalroad.com");
        let addr = "https://encrypted-tbn0.gstatic.com/images?q=tbn:abc";
        assert_eq!(cache.normalize(addr), addr);
    }

    #[test]
    fn resolve_twice_fetches_once_and_returns_same_item() -> Result<(), FetchError> {
        let mut cache = ImageCache::new("https://www.royalroad.com");
        let mut fetcher = CountingFetcher {
            body: vec![1, 2, 3],
            ..Default::default()
        };
        let (a, fresh_a) = cache.resolve("https://x.com/pic.png?size=1", &mut fetcher)?;
        let (b, fresh_b) = cache.resolve("https://x.com/pic.png?size=2", &mut fetcher)?;
        assert!(fresh_a);
        assert!(!fresh_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(fetcher.calls, vec!["https://x.com/pic.png"]);
        assert_eq!(a.name(), "Images/0.png");
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn resolve_assigns_increasing_identities() -> Result<(), FetchError> {
        let mut cache = ImageCache::new("https://www.royalroad.com");
        let mut fetcher = CountingFetcher::default();
        let (a, _) = cache.resolve("/a.png", &mut fetcher)?;
        let (b, _) = cache.resolve("/b.gif", &mut fetcher)?;
        let (c, _) = cache.resolve("/c", &mut fetcher)?;
        assert_eq!(a.name(), "Images/0.png");
        assert_eq!(b.name(), "Images/1.gif");
        assert_eq!(c.name(), "Images/2.jpg");
        assert_eq!(c.id_ref(), "img2");
        Ok(())
    }

    #[test]
    fn fetch_failure_substitutes_broken_image() -> Result<(), FetchError> {
        let mut cache = ImageCache::new("https://www.royalroad.com");
        let mut fetcher = CountingFetcher {
            fail: true,
            ..Default::default()
        };
        let (item, fresh) = cache.resolve("/gone.png", &mut fetcher)?;
        assert!(fresh);
        assert_eq!(item.data(), BROKEN_IMAGE);
        assert!(cache.get("/gone.png").is_some());
        Ok(())
    }

    #[test]
    fn missing_resource_signature_substitutes_broken_image() -> Result<(), FetchError> {
        let mut cache = ImageCache::new("https://www.royalroad.com");
        let mut body = MISSING_RESOURCE_SIGNATURE.to_vec();
        body.extend_from_slice(b"</Code></Error>");
        let mut fetcher = CountingFetcher {
            body,
            ..Default::default()
        };
        let (item, _) = cache.resolve("https://bucket.example.com/x.jpg", &mut fetcher)?;
        assert_eq!(item.data(), BROKEN_IMAGE);
        Ok(())
    }

    #[test]
    fn source_outage_is_returned_and_not_cached() {
        let mut cache = ImageCache::new("https://www.royalroad.com");
        let mut fetcher = CountingFetcher {
            outage: true,
            ..Default::default()
        };
        let result = cache.resolve("/cover.jpg", &mut fetcher);
        assert!(matches!(result, Err(FetchError::ServiceUnavailable { .. })));
        assert!(cache.is_empty());
    }

    #[test]
    fn extension_of_handles_odd_paths() {
        assert_eq!(extension_of("https://a.com/x/y.PNG"), ".png");
        assert_eq!(extension_of("https://a.com/x/y"), ".jpg");
        assert_eq!(extension_of("https://a.com/.hidden"), ".jpg");
        assert_eq!(extension_of("https://a.gstatic.com/images?q=tbn:x.png"), ".jpg");
        assert_eq!(extension_of("not a url/z.svg?x"), ".svg");
    }
}
