//! URL identity invariants that everything downstream leans on.

use axe_audit::urlnorm::{domain_of, is_crawlable, url_template, NormalizedUrl, UrlNormalizer};
use proptest::prelude::*;

#[test]
fn normalization_fixed_points() {
    let cases = [
        ("HTTPS://Example.COM/Path/", "https://example.com/Path"),
        ("e.test", "https://e.test/"),
        ("https://e.test/page#", "https://e.test/page"),
        ("https://e.test/app/#/route", "https://e.test/app/#/route"),
        ("https://e.test/a?b=2&a=1", "https://e.test/a?b=2&a=1"),
    ];
    for (raw, expected) in cases {
        let normalized = NormalizedUrl::parse(raw, false).unwrap();
        assert_eq!(normalized.as_str(), expected, "for input {raw}");
    }
}

proptest! {
    // normalize(normalize(u)) == normalize(u) over arbitrary host/path/query
    // shapes the generator can produce.
    #[test]
    fn normalization_is_idempotent(
        host in "[a-z][a-z0-9]{0,10}(\\.[a-z]{2,5}){1,2}",
        path in "(/[a-zA-Z0-9_-]{0,8}){0,4}/?",
        query in proptest::option::of("[a-z]{1,5}=[a-z0-9]{1,5}(&[a-z]{1,5}=[a-z0-9]{1,5}){0,2}"),
        fragment in proptest::option::of("[a-zA-Z0-9/_-]{0,10}"),
        strip_www in proptest::bool::ANY,
    ) {
        let mut raw = format!("https://{host}{path}");
        if let Some(query) = &query {
            raw.push('?');
            raw.push_str(query);
        }
        if let Some(fragment) = &fragment {
            raw.push('#');
            raw.push_str(fragment);
        }

        if let Ok(once) = NormalizedUrl::parse(&raw, strip_www) {
            let twice = NormalizedUrl::parse(once.as_str(), strip_www)
                .expect("canonical form must re-parse");
            prop_assert_eq!(once.as_str(), twice.as_str());
        }
    }
}

#[test]
fn page_identity_is_byte_equality() {
    let normalizer = UrlNormalizer::new(true);
    let a = normalizer.normalize("https://www.e.test/about/").unwrap();
    let b = normalizer.normalize("https://E.TEST/about").unwrap();
    assert_eq!(a, b);

    let c = normalizer.normalize("https://e.test/about#team").unwrap();
    assert_ne!(a, c);
}

#[test]
fn crawl_filters_and_helpers() {
    assert!(is_crawlable("https://e.test/catalog"));
    assert!(!is_crawlable("https://e.test/brochure.pdf"));
    assert!(!is_crawlable("tel:+123456"));

    assert_eq!(domain_of("https://www.shop.e.test/x"), Some("shop.e.test".into()));

    assert_eq!(
        url_template("https://e.test/product/9931/a-very-long-product-name"),
        "e.test:/product/{num}/{slug}"
    );
}
