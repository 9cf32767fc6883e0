use std::path::Path;

use pht_adapters::{extractor_for_version, ProfileExtractor, UniversalDataExtractor};

fn fixture(name: &str) -> String {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read_to_string(&path).expect("read fixture")
}

#[test]
fn captured_profile_page_yields_snapshot() {
    let page = fixture("profile_page.html");
    let snapshot = UniversalDataExtractor.extract(&page).expect("extract");

    assert_eq!(snapshot.identity_id, "6812345678901234567");
    assert_eq!(snapshot.handle, "alice.example");
    assert_eq!(snapshot.display_name, "Alice Example");
    assert_eq!(snapshot.extractor_version, "universal-data-v1");
    assert_eq!(snapshot.stats["followerCount"], 1520);
    assert_eq!(
        snapshot.user["avatarLarger"],
        "https://p16-sign-va.tiktokcdn.com/avatar.jpeg"
    );
}

#[test]
fn registry_extractor_matches_direct_extractor() {
    let page = fixture("profile_page.html");
    let via_registry = extractor_for_version("universal-data-v1")
        .expect("registered")
        .extract(&page)
        .expect("extract");
    let direct = UniversalDataExtractor.extract(&page).expect("extract");
    assert_eq!(via_registry, direct);
}
