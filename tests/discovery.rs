/*
 *  tests/discovery.rs
 *
 *  Integration tests for finding modules by short name
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
 */

use std::fs;
use std::path::{Path, PathBuf};

use plugheap::module::discovery::{self, MODULE_PATH_ENV};
use plugheap::{LoaderError, LoaderOptions, ModuleLoader};

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("plugheap-{}-{}", tag, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

// The only test in this binary that touches the environment
#[test]
fn test_environment_paths_searched_first() {
    let env_dir = scratch_dir("env");
    let cfg_dir = scratch_dir("cfg");
    let filename = discovery::module_filenames("shadowed").remove(0);
    fs::write(env_dir.join(&filename), b"").unwrap();
    fs::write(cfg_dir.join(&filename), b"").unwrap();

    unsafe { std::env::set_var(MODULE_PATH_ENV, &env_dir) };
    let paths = discovery::search_paths(&[cfg_dir.clone()]);
    unsafe { std::env::remove_var(MODULE_PATH_ENV) };

    assert_eq!(paths[0], env_dir);
    assert_eq!(paths[1], cfg_dir);
    assert_eq!(discovery::find_module_in("shadowed", &paths), Some(env_dir.join(&filename)));
}

#[test]
fn test_first_filename_variant_in_directory() {
    let dir = scratch_dir("variants");
    let names = discovery::module_filenames("variant");
    // Only the hyphenated form present
    fs::write(dir.join(&names[1]), b"").unwrap();

    assert_eq!(discovery::find_module_in("variant", &[dir.clone()]), Some(dir.join(&names[1])));
}

#[test]
fn test_open_by_name_not_found() {
    let loader = ModuleLoader::new(LoaderOptions {
        search_paths: vec![PathBuf::from("/nonexistent/plugheap")],
        strict_version: false,
    });

    match loader.open_by_name("definitely-not-a-module") {
        Err(LoaderError::NotFound { path, .. }) => {
            assert_eq!(path, Path::new("definitely-not-a-module"));
        }
        other => panic!("expected NotFound, got {:?}", other.map(|m| m.path().to_path_buf())),
    }
    assert!(loader.modules().is_empty());
}

#[test]
fn test_found_file_that_is_not_a_library() {
    let dir = scratch_dir("garbage");
    let filename = discovery::module_filenames("garbage").remove(0);
    fs::write(dir.join(&filename), b"not a shared library").unwrap();

    let loader = ModuleLoader::new(LoaderOptions {
        search_paths: vec![dir.clone()],
        strict_version: false,
    });

    assert!(matches!(loader.open_by_name("garbage"), Err(LoaderError::NotFound { .. })));
    assert!(loader.modules().is_empty());
}
