//! Template store tests over real directories and zip archives.

mod common;

use std::collections::BTreeMap;
use std::path::Path;

use arcade_runtime::{OrchestratorError, TemplateLoadCause, TemplateSource, TemplateStore};
use assert_matches::assert_matches;
use common::{Harness, Method, Script, key, name, write_dir_template, write_zip_template};

const LEVEL: &[u8] = b"level data that compresses level data that compresses";

fn store() -> (tempfile::TempDir, TemplateStore) {
    let tmp = tempfile::tempdir().unwrap();
    let store = TemplateStore::new(tmp.path().join("templates"));
    store.ensure_root().unwrap();
    (tmp, store)
}

#[test]
fn missing_template_error_names_the_template() {
    let (tmp, store) = store();
    let err = store
        .materialize("ctf", &tmp.path().join("instance-0"))
        .unwrap_err();

    assert_eq!(err.template, "ctf");
    assert_matches!(err.cause, TemplateLoadCause::NotFound);
    assert_eq!(
        err.to_string(),
        "Failed to load template ctf: no template directory or archive found"
    );
}

#[test]
fn archive_extracts_stored_and_deflated_entries() {
    let (tmp, store) = store();
    write_zip_template(
        store.root(),
        "ctf",
        &[
            ("level.dat", LEVEL, Method::Deflate),
            ("region/", b"", Method::Store),
            ("region/r.0.0.mca", b"chunks", Method::Store),
            ("data/", b"", Method::Store),
        ],
    );
    let dest = tmp.path().join("instance-0");

    let done = store.materialize("ctf", &dest).unwrap();

    assert_eq!(done.files, 2);
    assert_matches!(&done.source, TemplateSource::Archive(p) if p.ends_with("ctf.zip"));
    assert_eq!(done.destination, dest);
    assert_eq!(std::fs::read(dest.join("level.dat")).unwrap(), LEVEL);
    assert_eq!(std::fs::read(dest.join("region/r.0.0.mca")).unwrap(), b"chunks");
    assert!(dest.join("data").is_dir());
}

#[test]
fn directory_is_preferred_over_archive() {
    let (tmp, store) = store();
    write_dir_template(store.root(), "duel");
    write_zip_template(store.root(), "duel", &[("from-zip.txt", b"zip", Method::Store)]);

    let done = store.materialize("duel", &tmp.path().join("instance-0")).unwrap();

    assert_eq!(done.source.kind(), "directory");
    assert!(!tmp.path().join("instance-0/from-zip.txt").exists());
    assert_eq!(store.list().unwrap(), vec!["duel".to_string()]);
}

/// Relative path to file bytes, with `None` for directories.
fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .map(|entry| {
            let entry = entry.unwrap();
            let relative = entry.path().strip_prefix(root).unwrap();
            let relative = relative.to_string_lossy().replace('\\', "/");
            let bytes = entry
                .file_type()
                .is_file()
                .then(|| std::fs::read(entry.path()).unwrap());
            (relative, bytes)
        })
        .collect()
}

#[test]
fn directory_and_archive_templates_materialize_identically() {
    let (tmp, store) = store();
    let tree: &[(&str, &[u8], Method)] = &[
        ("level.dat", LEVEL, Method::Deflate),
        ("session.lock", b"", Method::Store),
        ("region/", b"", Method::Store),
        ("region/r.0.0.mca", b"chunks", Method::Store),
        ("region/r.0.1.mca", LEVEL, Method::Deflate),
        ("data/", b"", Method::Store),
    ];
    let unpacked = store.root().join("duel");
    std::fs::create_dir_all(&unpacked).unwrap();
    for (path, bytes, _) in tree {
        match path.strip_suffix('/') {
            Some(dir) => std::fs::create_dir_all(unpacked.join(dir)).unwrap(),
            None => std::fs::write(unpacked.join(path), bytes).unwrap(),
        }
    }
    write_zip_template(store.root(), "ctf", tree);

    let from_dir = store.materialize("duel", &tmp.path().join("instance-0")).unwrap();
    let from_zip = store.materialize("ctf", &tmp.path().join("instance-1")).unwrap();

    assert_eq!(from_dir.source.kind(), "directory");
    assert_matches!(&from_zip.source, TemplateSource::Archive(_));
    let expected = snapshot(&from_dir.destination);
    assert_eq!(expected.get("data"), Some(&None));
    assert_eq!(expected.get("session.lock"), Some(&Some(Vec::new())));
    assert_eq!(snapshot(&from_zip.destination), expected);
}

#[test]
fn unsafe_entry_cannot_escape_destination() {
    let (tmp, store) = store();
    write_zip_template(
        store.root(),
        "evil",
        &[("../escaped.txt", b"gotcha", Method::Store)],
    );
    let dest = tmp.path().join("instances/instance-0");

    let result = store.materialize("evil", &dest);

    assert!(!tmp.path().join("instances/escaped.txt").exists());
    assert!(!tmp.path().join("escaped.txt").exists());
    if let Err(err) = result {
        assert_eq!(err.template, "evil");
        assert_matches!(err.cause, TemplateLoadCause::UnsafeEntry(_));
    }
}

#[test]
fn unsupported_compression_is_reported() {
    let (tmp, store) = store();
    write_zip_template(
        store.root(),
        "old",
        &[("level.dat", LEVEL, Method::Bzip2)],
    );
    let dest = tmp.path().join("instance-0");

    let err = store.materialize("old", &dest).unwrap_err();

    assert_matches!(
        &err.cause,
        TemplateLoadCause::UnsupportedCompression { entry, .. } if entry == "level.dat"
    );
    assert!(!dest.join("level.dat").exists());
}

#[test]
fn corrupt_archive_is_reported() {
    let (tmp, store) = store();
    std::fs::write(store.root().join("broken.zip"), b"definitely not a zip").unwrap();

    let err = store
        .materialize("broken", &tmp.path().join("instance-0"))
        .unwrap_err();

    assert_matches!(err.cause, TemplateLoadCause::Archive(_));
}

#[test]
fn archive_template_backs_a_running_instance() {
    let h = Harness::new();
    write_zip_template(
        h.template_root(),
        "ctf",
        &[
            ("level.dat", LEVEL, Method::Deflate),
            ("region/r.0.0.mca", b"chunks", Method::Deflate),
        ],
    );
    h.register(
        "ctf",
        Script {
            template: "ctf".to_string(),
            ..Script::default()
        },
    );

    let mut pending = h.orchestrator.start(name("flags"), key("ctf"));
    let record = h.drive(&mut pending).unwrap();

    assert!(h.host.is_mounted(record.environment().key.as_str()));
    assert_eq!(
        std::fs::read(h.instance_dir(record.id().get()).join("level.dat")).unwrap(),
        LEVEL
    );
}

#[test]
fn broken_archive_fails_the_start() {
    let h = Harness::new();
    write_zip_template(h.template_root(), "old", &[("level.dat", LEVEL, Method::Bzip2)]);
    h.register(
        "old",
        Script {
            template: "old".to_string(),
            ..Script::default()
        },
    );

    let mut pending = h.orchestrator.start(name("arena1"), key("old"));

    assert_matches!(
        h.drive(&mut pending),
        Err(OrchestratorError::TemplateLoad(e)) if e.template == "old"
    );
    assert!(!h.instance_dir(0).exists());
    assert!(h.orchestrator.live_ids().is_empty());
}
