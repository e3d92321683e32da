/*!
 * Tests for loading and writing source trees on disk
 */

use std::fs;

use texwai::latex::SourceTree;

use crate::common;

#[test]
fn test_sourceTree_writeThenLoad_shouldKeepNestedPaths() {
    let dir = tempfile::tempdir().unwrap();
    let tree = common::many_sections_tree(3);

    tree.write_to(dir.path()).unwrap();
    let loaded = SourceTree::load_dir(dir.path()).unwrap();

    assert_eq!(loaded, tree);
    assert!(dir.path().join("sections/s2.tex").is_file());
}

#[test]
fn test_sourceTree_loadDir_shouldKeepBinaryFiles() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("main.tex"), common::MAIN_TEX).unwrap();
    fs::write(dir.path().join("figure.png"), [0x89u8, 0x50, 0x4e, 0x47, 0xff, 0xfe]).unwrap();

    let loaded = SourceTree::load_dir(dir.path()).unwrap();

    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.get("figure.png"), Some(&[0x89u8, 0x50, 0x4e, 0x47, 0xff, 0xfe][..]));
    assert!(loaded.utf8("figure.png").is_none());
}

#[tokio::test]
async fn test_pipeline_onLoadedTree_shouldTranslateFromDisk() {
    let dir = tempfile::tempdir().unwrap();
    common::sample_tree().write_to(dir.path()).unwrap();
    let tree = tokio::task::spawn_blocking({
        let root = dir.path().to_path_buf();
        move || SourceTree::load_dir(root)
    })
    .await
    .unwrap()
    .unwrap();

    let result = common::pipeline(
        texwai::providers::mock::MockProvider::working(),
        texwai::compile::mock::MockCompiler::succeeding(),
    )
    .run("disk", tree)
    .await;

    assert!(result.is_success(), "{}", result.summary());
}
