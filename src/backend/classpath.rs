//! Classpath and Java runtime discovery for launched programs
//!
//! Maven, Gradle and IntelliJ output directories are searched under the
//! project root, followed by any jars in `lib/`.

use std::path::{Path, PathBuf};

/// Output directories searched under the project root, in classpath order
const OUTPUT_DIRS: &[&str] = &[
    "target/classes",
    "target/test-classes",
    "build/classes/java/main",
    "build/classes/kotlin/main",
    "build/resources/main",
    "out/production",
];

/// Build the classpath for a project from the directories that exist
pub fn resolve_classpath(project_root: &Path) -> Vec<PathBuf> {
    let mut classpath: Vec<PathBuf> = OUTPUT_DIRS
        .iter()
        .map(|dir| project_root.join(dir))
        .filter(|dir| dir.is_dir())
        .collect();

    classpath.extend(library_jars(&project_root.join("lib")));

    tracing::debug!(
        root = %project_root.display(),
        entries = classpath.len(),
        "Resolved classpath"
    );
    classpath
}

fn library_jars(lib_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(lib_dir) else {
        return Vec::new();
    };

    let mut jars: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "jar"))
        .collect();
    jars.sort();
    jars
}

/// Find the `java` executable, preferring `JAVA_HOME` over `PATH`
pub fn find_java_executable() -> Option<PathBuf> {
    std::env::var_os("JAVA_HOME")
        .and_then(|home| java_in_home(Path::new(&home)))
        .or_else(|| which::which("java").ok())
}

fn java_in_home(home: &Path) -> Option<PathBuf> {
    let name = if cfg!(windows) { "java.exe" } else { "java" };
    let candidate = home.join("bin").join(name);
    candidate.is_file().then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_existing_output_dirs_are_used() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("build/classes/java/main")).unwrap();
        std::fs::create_dir_all(root.path().join("target/classes")).unwrap();

        let classpath = resolve_classpath(root.path());
        assert_eq!(
            classpath,
            vec![
                root.path().join("target/classes"),
                root.path().join("build/classes/java/main"),
            ]
        );
    }

    #[test]
    fn test_library_jars_are_sorted_and_filtered() {
        let root = tempfile::tempdir().unwrap();
        let lib = root.path().join("lib");
        std::fs::create_dir_all(&lib).unwrap();
        for name in ["zeta.jar", "alpha.jar", "notes.txt"] {
            std::fs::write(lib.join(name), b"").unwrap();
        }

        let classpath = resolve_classpath(root.path());
        assert_eq!(classpath, vec![lib.join("alpha.jar"), lib.join("zeta.jar")]);
    }

    #[test]
    fn test_java_in_home_requires_binary() {
        let home = tempfile::tempdir().unwrap();
        assert!(java_in_home(home.path()).is_none());

        let bin = home.path().join("bin");
        std::fs::create_dir_all(&bin).unwrap();
        let name = if cfg!(windows) { "java.exe" } else { "java" };
        std::fs::write(bin.join(name), b"").unwrap();
        assert_eq!(java_in_home(home.path()), Some(bin.join(name)));
    }
}
