#[test]
fn package_version_has_major_minor_patch() {
    let ver = env!("CARGO_PKG_VERSION");
    let parts: Vec<&str> = ver.split('.').collect();
    assert_eq!(parts.len(), 3, "version '{ver}' is not semver");
    assert!(parts.iter().all(|p| p.parse::<u64>().is_ok()));
}
