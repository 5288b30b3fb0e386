use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use pagecache::preview::{
    CacheConfig, CacheCoordinator, CoordinatorState, DocumentSource, PREVIEW_SCALE, PageUpdate,
};
use pagecache::test_utils::{FakeBackend, FakeDoc};

fn coordinator(backend: &FakeBackend) -> CacheCoordinator {
    CacheCoordinator::new(backend.shared(), CacheConfig::default())
}

fn file_a() -> FakeDoc {
    FakeDoc::new().page("a0").page("a1").page("a2")
}

/// Write `doc` to a temp file and return a file-backed source for it
fn on_disk(dir: &tempfile::TempDir, name: &str, doc: &FakeDoc) -> DocumentSource {
    let path = dir.path().join(name);
    std::fs::write(&path, doc.to_bytes()).expect("write fake document");
    DocumentSource::File(path)
}

fn page_indices(updates: &[PageUpdate]) -> Vec<usize> {
    updates.iter().map(|u| u.page_index).collect()
}

fn content(coordinator: &CacheCoordinator, page: usize) -> Option<Vec<u8>> {
    coordinator.get_image_data(page).map(|a| a.bytes.to_vec())
}

#[test]
fn test_end_to_end_edit_cycle() {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = FakeBackend::new();
    let coordinator = coordinator(&backend);
    let source = on_disk(&dir, "a.fake", &file_a());

    // 1. open
    assert!(coordinator.open_session(source.clone()));
    assert_eq!(coordinator.get_current_total_pages(), 3);

    // 2. cold read renders into base
    let first = coordinator.get_image_data(0).expect("page 0 renders");
    assert_eq!(&first.bytes[..], &FakeDoc::expected_bytes("a0", PREVIEW_SCALE)[..]);
    assert_eq!(backend.renders(), 1);
    coordinator.get_image_data(1).expect("page 1 renders");

    // 3. diff: page 0 matches, page 1 differs, page 2 was never in base
    let edited = FakeDoc::new()
        .page("a0")
        .sized_page("edited", 595.0, 842.0)
        .page("a2")
        .to_bytes();
    let updates = coordinator.diff_and_update(&edited);
    assert_eq!(page_indices(&updates), vec![1, 2]);
    assert!(updates.iter().all(|u| u.total_pages == 3));
    assert_eq!((updates[0].width, updates[0].height), (595.0, 842.0));
    assert_eq!((updates[1].width, updates[1].height), (612.0, 792.0));
    assert!(updates[0].version < updates[1].version);
    assert_eq!(
        content(&coordinator, 1),
        Some(FakeDoc::expected_bytes("edited", PREVIEW_SCALE))
    );

    // 4. clearing the preview falls back to the stale base entry
    coordinator.clear_preview();
    assert_eq!(coordinator.get_current_total_pages(), 3);
    assert_eq!(
        content(&coordinator, 1),
        Some(FakeDoc::expected_bytes("a1", PREVIEW_SCALE))
    );

    // 5. empty submission is a no-op
    let generation = coordinator.generation();
    assert!(coordinator.diff_and_update(&[]).is_empty());
    assert_eq!(coordinator.state(), CoordinatorState::FileOnly);
    assert_eq!(coordinator.generation(), generation);

    // 6. reopening drops base, so page 0 renders again
    let renders_before = backend.renders();
    assert!(coordinator.open_session(source));
    coordinator.get_image_data(0).expect("page 0 renders again");
    assert_eq!(backend.renders(), renders_before + 1);
}

#[test]
fn test_second_identical_diff_is_empty() {
    let coordinator = coordinator(&FakeBackend::new());
    coordinator.open_session(file_a().source());
    coordinator.get_image_data(0).expect("warm base");
    let edited = FakeDoc::new().page("a0").page("x").page("a2").to_bytes();

    let first = coordinator.diff_and_update(&edited);
    assert_eq!(page_indices(&first), vec![1, 2]);

    assert!(
        coordinator.diff_and_update(&edited).is_empty(),
        "repeating an unchanged submission must report nothing"
    );
    assert_eq!(
        content(&coordinator, 1),
        Some(FakeDoc::expected_bytes("x", PREVIEW_SCALE))
    );
}

#[test]
fn test_every_changed_page_reported_once() {
    let coordinator = coordinator(&FakeBackend::new());
    coordinator.open_session(file_a().source());
    for page in 0..3 {
        coordinator.get_image_data(page).expect("warm base");
    }

    let edited = FakeDoc::new()
        .page("b0")
        .page("a1")
        .page("b2")
        .page("b3")
        .to_bytes();
    let updates = coordinator.diff_and_update(&edited);

    assert_eq!(page_indices(&updates), vec![0, 2, 3]);
    assert!(updates.iter().all(|u| u.total_pages == 4));
}

#[test]
fn test_unreported_pages_keep_their_content() {
    let coordinator = coordinator(&FakeBackend::new());
    coordinator.open_session(file_a().source());
    let before: Vec<_> = (0..3).map(|page| content(&coordinator, page)).collect();

    let edited = FakeDoc::new().page("a0").page("changed").page("a2").to_bytes();
    let updates = coordinator.diff_and_update(&edited);
    assert_eq!(page_indices(&updates), vec![1]);

    assert_eq!(content(&coordinator, 0), before[0]);
    assert_eq!(content(&coordinator, 2), before[2]);
}

#[test]
fn test_reverted_page_is_reported_and_served_from_base() {
    let coordinator = coordinator(&FakeBackend::new());
    coordinator.open_session(file_a().source());
    for page in 0..3 {
        coordinator.get_image_data(page).expect("warm base");
    }

    let edited = FakeDoc::new().page("a0").page("x").page("a2").to_bytes();
    assert_eq!(page_indices(&coordinator.diff_and_update(&edited)), vec![1]);

    let reverted = file_a().to_bytes();
    let updates = coordinator.diff_and_update(&reverted);

    assert_eq!(page_indices(&updates), vec![1], "the revert must reach the viewer");
    assert_eq!(
        content(&coordinator, 1),
        Some(FakeDoc::expected_bytes("a1", PREVIEW_SCALE))
    );
    assert!(
        coordinator.diff_and_update(&reverted).is_empty(),
        "a matching resubmission reports nothing"
    );
}

#[test]
fn test_regrown_pages_are_reported_once() {
    let coordinator = coordinator(&FakeBackend::new());
    coordinator.open_session(file_a().source());
    for page in 0..3 {
        coordinator.get_image_data(page).expect("warm base");
    }

    let shrunk = FakeDoc::new().page("a0").to_bytes();
    let signal = coordinator.diff_and_update(&shrunk);
    assert!(signal[0].is_structure_only());

    let regrown = coordinator.diff_and_update(&file_a().to_bytes());
    assert_eq!(page_indices(&regrown), vec![1, 2]);
    assert_eq!(coordinator.get_current_total_pages(), 3);
    assert!(coordinator.diff_and_update(&file_a().to_bytes()).is_empty());
}

#[test]
fn test_versions_increase_across_passes() {
    let coordinator = coordinator(&FakeBackend::new());
    coordinator.open_session(file_a().source());
    for page in 0..3 {
        coordinator.get_image_data(page).expect("warm base");
    }

    let edit = |first_page: &str| FakeDoc::new().page(first_page).page("a1").page("a2").to_bytes();
    let first = coordinator.diff_and_update(&edit("v1"));
    let second = coordinator.diff_and_update(&edit("v2"));

    assert_eq!(page_indices(&first), vec![0]);
    assert_eq!(page_indices(&second), vec![0]);
    assert!(second[0].version > first[0].version);
}

#[test]
fn test_shrink_without_changes_sends_one_signal() {
    let coordinator = coordinator(&FakeBackend::new());
    coordinator.open_session(file_a().source());
    for page in 0..3 {
        coordinator.get_image_data(page).expect("warm base");
    }

    let shrunk = FakeDoc::new().page("a0").page("a1").to_bytes();
    let updates = coordinator.diff_and_update(&shrunk);

    assert_eq!(updates.len(), 1);
    let signal = updates[0];
    assert_eq!(signal.page_index, 0);
    assert_eq!(signal.total_pages, 2);
    assert_eq!((signal.width, signal.height), (0.0, 0.0));
    assert_eq!(coordinator.get_current_total_pages(), 2);
    assert!(coordinator.get_image_data(2).is_none());
}

#[test]
fn test_readers_never_see_half_published_overlay() {
    let backend = FakeBackend::new().with_render_delay(Duration::from_millis(5));
    let coordinator = Arc::new(coordinator(&backend));
    coordinator.open_session(file_a().source());

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let coordinator = coordinator.clone();
        let done = done.clone();
        std::thread::spawn(move || {
            let mut saw_new_total = false;
            while !done.load(Ordering::SeqCst) {
                if coordinator.get_current_total_pages() == 5 {
                    saw_new_total = true;
                    for page in 3..5 {
                        assert!(
                            coordinator.get_image_data(page).is_some(),
                            "total grew to 5 but page {page} is missing"
                        );
                    }
                }
            }
            saw_new_total
        })
    };

    let edited = FakeDoc::new()
        .page("a0")
        .page("a1")
        .page("a2")
        .page("n3")
        .page("n4")
        .to_bytes();
    let updates = coordinator.diff_and_update(&edited);
    std::thread::sleep(Duration::from_millis(20));
    done.store(true, Ordering::SeqCst);

    assert_eq!(updates.len(), 5);
    assert!(reader.join().expect("reader thread"), "reader observed publish");
}

#[test]
fn test_opening_another_file_drops_overlay() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator = coordinator(&FakeBackend::new());
    coordinator.open_session(on_disk(&dir, "a.fake", &file_a()));
    let edited = (0..4).fold(FakeDoc::new(), |doc, _| doc.page("e"));
    coordinator.diff_and_update(&edited.to_bytes());
    assert_eq!(coordinator.state(), CoordinatorState::FileWithPreview);
    assert_eq!(coordinator.get_current_total_pages(), 4);

    let file_b = FakeDoc::new().page("b0").page("b1");
    assert!(coordinator.open_session(on_disk(&dir, "b.fake", &file_b)));

    assert_eq!(coordinator.state(), CoordinatorState::FileOnly);
    assert_eq!(coordinator.get_current_total_pages(), 2);
    assert_eq!(
        content(&coordinator, 1),
        Some(FakeDoc::expected_bytes("b1", PREVIEW_SCALE))
    );
}

#[test]
fn test_missing_file_cannot_be_opened() {
    let dir = tempfile::tempdir().expect("tempdir");
    let coordinator = coordinator(&FakeBackend::new());

    assert!(!coordinator.open_session(DocumentSource::File(dir.path().join("missing.fake"))));
    assert_eq!(coordinator.state(), CoordinatorState::Empty);
}

#[test]
fn test_updates_serialize_in_camel_case() {
    let coordinator = coordinator(&FakeBackend::new());
    coordinator.open_session(file_a().source());

    let updates = coordinator.diff_and_update(&FakeDoc::new().page("z").to_bytes());
    let json = serde_json::to_value(&updates).expect("serializes");

    let first = &json[0];
    assert_eq!(first["pageIndex"], 0);
    assert_eq!(first["totalPages"], 1);
    assert!(first["version"].as_i64().is_some());
    assert_eq!(first["width"], 612.0);
}

#[test]
fn test_rotated_page_reports_swapped_dimensions() {
    let coordinator = coordinator(&FakeBackend::new());
    coordinator.open_session(file_a().source());
    for page in 0..3 {
        coordinator.get_image_data(page).expect("warm base");
    }

    let edited = FakeDoc::new()
        .page("a0")
        .rotated_page("turned", 90)
        .page("a2")
        .to_bytes();
    let updates = coordinator.diff_and_update(&edited);

    assert_eq!(page_indices(&updates), vec![1]);
    assert_eq!((updates[0].width, updates[0].height), (792.0, 612.0));
    let artifact = coordinator.get_image_data(1).expect("overlay page");
    assert_eq!((artifact.size.width, artifact.size.height), (792.0, 612.0));
}
