use std::path::Path;

use glimpse_agent::scanner::{self, find_scripts_fuzzy};
use pretty_assertions::assert_eq;
use regex::Regex;

use crate::harness::{fixture, fixture_with, FOO_JS};

#[test]
fn scan_records_hash_and_line_count() {
    let fx = fixture(&[("fixtures/foo.js", FOO_JS), ("fixtures/ignored.txt", "nope")]);

    let matches = fx.scan.find_scripts("fixtures/foo.js", &fx.config);
    assert_eq!(matches.len(), 1);

    let stats = fx.scan.stats(&matches[0]).expect("stats for scanned file");
    assert_eq!(stats.line_count, 3);
    assert_eq!(stats.hash.len(), 64);
    assert!(stats.hash.chars().all(|c| c.is_ascii_hexdigit()));

    // Non-matching files are not recorded.
    let txt_re = Regex::new(r"\.txt$").unwrap();
    assert!(fx.scan.select_stats(&txt_re).is_empty());
}

#[test]
fn select_files_relativizes_against_base() {
    let fx = fixture(&[
        ("out/app.js", "x\n"),
        ("out/app.js.map", r#"{"version":3,"sources":["app.ts"],"mappings":"AAAA"}"#),
    ]);

    let map_re = Regex::new(r"\.map$").unwrap();
    let files = fx.scan.select_files(&map_re, Path::new(fx.scan.base_dir()));
    assert_eq!(files, vec![Path::new("out/app.js.map").to_path_buf()]);
}

#[test]
fn fuzzy_resolution_through_full_scan() {
    let fx = fixture(&[
        ("lib/server.js", FOO_JS),
        ("lib/util/server.js", FOO_JS),
        ("routes/index.js", FOO_JS),
    ]);

    // Path suffix narrows to one file.
    let matches = fx.scan.find_scripts("util/server.js", &fx.config);
    assert_eq!(matches.len(), 1);
    assert!(matches[0].ends_with("lib/util/server.js"));

    // Bare basename is ambiguous.
    let matches = fx.scan.find_scripts("server.js", &fx.config);
    assert_eq!(matches.len(), 2);

    // Unique basename resolves even with a wrong directory hint.
    let matches = fx.scan.find_scripts("somewhere/else/index.js", &fx.config);
    assert_eq!(matches.len(), 1);
    assert!(matches[0].ends_with("routes/index.js"));
}

#[test]
fn repository_relative_paths_are_rebased() {
    let fx = fixture_with(&[("lib/app.js", FOO_JS)], |config| {
        config.app_path_relative_to_repository = Some("deploy/root".into());
    });

    let matches = fx.scan.find_scripts("deploy/root/lib/app.js", &fx.config);
    assert_eq!(matches.len(), 1);
    assert!(matches[0].ends_with("lib/app.js"));
}

#[test]
fn tree_digest_tracks_content_changes() {
    let dir = tempfile::tempdir().unwrap();
    let matcher = Regex::new(r"\.js$").unwrap();

    std::fs::write(dir.path().join("a.js"), "one\n").unwrap();
    let before = scanner::scan(dir.path(), &matcher).unwrap().tree_digest();

    std::fs::write(dir.path().join("a.js"), "two\n").unwrap();
    let after = scanner::scan(dir.path(), &matcher).unwrap().tree_digest();

    assert_ne!(before, after);
}

#[test]
fn ambiguous_basenames_resolve_to_nothing() {
    let files = &["/app/a/x.js", "/app/b/x.js"];
    assert!(find_scripts_fuzzy("c/x.js", files).is_empty());
    assert_eq!(find_scripts_fuzzy("x.js", files).len(), 2);
}
