/*
 *  module/discovery.rs
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
 *
 *  Module discovery - maps short module names onto library files
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::path::{Path, PathBuf};
use log::debug;

/// Colon-separated directories (semicolon on Windows) searched before
/// anything configured
pub const MODULE_PATH_ENV: &str = "PLUGHEAP_MODULE_PATH";

/// Directories `open_by_name` walks, first match wins
///
/// `$PLUGHEAP_MODULE_PATH` entries lead, then `extra` (the `search_paths`
/// from config and `--search-path`), then cargo's output directories so a
/// freshly built module is found from the workspace root, then per-user and
/// system install locations.
pub fn search_paths(extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = std::env::var_os(MODULE_PATH_ENV)
        .map(|value| std::env::split_paths(&value).collect())
        .unwrap_or_default();

    paths.extend_from_slice(extra);
    paths.extend(["./target/release", "./target/debug"].map(PathBuf::from));

    if let Some(home) = dirs_next::home_dir() {
        paths.push(home.join(".local/lib/plugheap/modules"));
        paths.push(home.join(".plugheap/modules"));
    }

    paths.extend(["/usr/local/lib/plugheap/modules", "/usr/lib/plugheap/modules"].map(PathBuf::from));
    paths
}

/// Library file names a module called `name` may be built as
///
/// Cargo names a `plugheap-module-<name>` cdylib with an underscore, so
/// that spelling comes first; the hyphenated one covers hand-renamed files.
pub fn module_filenames(name: &str) -> Vec<String> {
    let (prefix, suffix) = (std::env::consts::DLL_PREFIX, std::env::consts::DLL_SUFFIX);
    ["_", "-"]
        .iter()
        .map(|sep| format!("{}plugheap{}{}{}", prefix, sep, name, suffix))
        .collect()
}

/// First existing module file for `name`, trying every directory in order
/// and every filename spelling within a directory
pub fn find_module_in(name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    let filenames = module_filenames(name);

    let found = search_paths
        .iter()
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| filenames.iter().map(move |filename| dir.join(filename)))
        .find(|candidate| candidate.is_file());

    match &found {
        Some(path) => debug!("Module {} resolved to {}", name, path.display()),
        None => debug!("Module {} not in any of {} directories", name, search_paths.len()),
    }
    found
}

/// True when `spec` names a file rather than a short module name
pub fn looks_like_path(spec: &str) -> bool {
    let path = Path::new(spec);
    path.components().count() > 1 || path.extension().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_paths_order() {
        let extra = vec![PathBuf::from("/opt/plugheap")];
        let paths = search_paths(&extra);

        let extra_pos = paths.iter().position(|p| p == Path::new("/opt/plugheap")).unwrap();
        let dev_pos = paths.iter().position(|p| p == Path::new("./target/release")).unwrap();
        assert!(extra_pos < dev_pos);
        assert_eq!(paths.last().unwrap(), Path::new("/usr/lib/plugheap/modules"));
    }

    #[test]
    fn test_module_filenames() {
        let names = module_filenames("counter");
        assert_eq!(names.len(), 2);

        #[cfg(target_os = "linux")]
        assert_eq!(names, ["libplugheap_counter.so", "libplugheap-counter.so"]);

        #[cfg(target_os = "macos")]
        assert_eq!(names, ["libplugheap_counter.dylib", "libplugheap-counter.dylib"]);

        #[cfg(target_os = "windows")]
        {
            assert!(names.contains(&"plugheap_counter.dll".to_string()));
        }
    }

    #[test]
    fn test_find_module_in_directory() {
        let dir = std::env::temp_dir().join(format!("plugheap-discovery-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let filename = module_filenames("scratch").remove(0);
        std::fs::write(dir.join(&filename), b"").unwrap();

        let found = find_module_in("scratch", &[PathBuf::from("/nonexistent"), dir.clone()]);
        assert_eq!(found, Some(dir.join(&filename)));
        assert_eq!(find_module_in("absent", &[dir.clone()]), None);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_looks_like_path() {
        assert!(looks_like_path("./libplugheap_counter.so"));
        assert!(looks_like_path("modules/counter"));
        assert!(looks_like_path("plugheap_counter.dll"));
        assert!(!looks_like_path("counter"));
    }
}
