use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use uuid::Uuid;

use crate::catalog::Language;

/// Owner read/write, group and others read.
const SOURCE_PERMISSIONS: u32 = 0o644;

/// The filesystem artifacts staged for one job.
///
/// Every job gets its own subdirectory under the workspace root, named after
/// the job id, so concurrent submissions can never race on a file name and
/// a redelivered job overwrites its own directory instead of another job's.
#[derive(Debug)]
pub struct ArtifactSet {
    /// Per-job directory on the host
    pub dir: PathBuf,
    /// Name of the per-job directory (the job id)
    pub dir_name: String,
    /// Source file name inside the job directory
    pub source_name: String,
    /// Compiled binary name, referenced by compiled-language templates
    pub output_name: String,
    /// Java entry class (source stem for every other language)
    pub classname: String,
    /// Every path this job is expected to produce
    pub files: Vec<PathBuf>,
}

/// Owns the shared code directory mounted into every sandbox.
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Creates the workspace root and verifies it is writable.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create workspace at {}", root.display()))?;

        // The directory must be writable before any job is accepted
        let probe = root.join(".writable-probe");
        fs::write(&probe, b"")
            .with_context(|| format!("workspace {} is not writable", root.display()))?;
        let _ = fs::remove_file(&probe);

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Materializes the source of one job and enumerates the artifacts its
    /// execution will produce.
    pub fn prepare(&self, language: &Language, code: &str, job_id: &Uuid) -> Result<ArtifactSet> {
        let dir_name = job_id.to_string();
        let dir = self.root.join(&dir_name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create job directory for {job_id}"))?;

        let (source_name, classname) = if language.command_template.contains("{classname}") {
            let classname = extract_public_class(code).unwrap_or_else(|| {
                log::warn!(
                    "job {job_id}: no public class declaration found, falling back to `Main`"
                );
                "Main".to_string()
            });
            (format!("{classname}.{}", language.ext), classname)
        } else {
            let stem = Uuid::new_v4();
            (format!("{stem}.{}", language.ext), stem.to_string())
        };
        let output_name = format!("{}.out", Uuid::new_v4());

        let source_path = dir.join(&source_name);
        fs::write(&source_path, code)
            .with_context(|| format!("failed to write source file for job {job_id}"))?;
        fs::set_permissions(&source_path, fs::Permissions::from_mode(SOURCE_PERMISSIONS))
            .with_context(|| format!("failed to set source permissions for job {job_id}"))?;

        let mut files = vec![source_path];
        if language.command_template.contains("{output}") {
            files.push(dir.join(&output_name));
        }
        if language.command_template.contains("{classname}") {
            files.push(dir.join(format!("{classname}.class")));
        }

        Ok(ArtifactSet {
            dir,
            dir_name,
            source_name,
            output_name,
            classname,
            files,
        })
    }

    /// Best-effort removal of a job's artifacts. Missing files are fine;
    /// other I/O errors are logged and never propagated.
    pub fn cleanup(&self, artifacts: &ArtifactSet) {
        for path in &artifacts.files {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => log::warn!("failed to remove artifact {}: {e}", path.display()),
            }
        }

        // Compilers may drop outputs beside the enumerated set (e.g. inner
        // class files), so sweep the whole job directory.
        match fs::remove_dir_all(&artifacts.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!(
                "failed to remove job directory {}: {e}",
                artifacts.dir.display()
            ),
        }
    }
}

/// Extracts the first identifier following `public class`. The identifier
/// character class is deliberately narrow: the result is interpolated into a
/// shell command line and must never widen beyond `[A-Za-z0-9_]`.
fn extract_public_class(code: &str) -> Option<String> {
    static CLASS_RE: OnceLock<Regex> = OnceLock::new();
    let re = CLASS_RE
        .get_or_init(|| Regex::new(r"public\s+class\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap());
    re.captures(code).map(|captures| captures[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;

    struct WorkspaceGuard {
        workspace: Workspace,
    }

    impl WorkspaceGuard {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("runbox-test-{}", Uuid::new_v4()));
            Self {
                workspace: Workspace::new(root).unwrap(),
            }
        }
    }

    impl Drop for WorkspaceGuard {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(self.workspace.root());
        }
    }

    #[test]
    fn prepare_python_writes_source_with_expected_mode() {
        let guard = WorkspaceGuard::new();
        let catalog = Catalog::builtin().unwrap();
        let python = catalog.resolve("python").unwrap();
        let job_id = Uuid::new_v4();

        let artifacts = guard
            .workspace
            .prepare(python, "print('hi')", &job_id)
            .unwrap();

        assert_eq!(artifacts.dir_name, job_id.to_string());
        assert!(artifacts.source_name.ends_with(".py"));
        assert_eq!(artifacts.files.len(), 1);

        let source_path = &artifacts.files[0];
        assert_eq!(fs::read_to_string(source_path).unwrap(), "print('hi')");
        let mode = fs::metadata(source_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn prepare_java_uses_declared_class_name() {
        let guard = WorkspaceGuard::new();
        let catalog = Catalog::builtin().unwrap();
        let java = catalog.resolve("java").unwrap();
        let code = "public class Greeter { public static void main(String[] a) {} }";

        let artifacts = guard
            .workspace
            .prepare(java, code, &Uuid::new_v4())
            .unwrap();

        assert_eq!(artifacts.classname, "Greeter");
        assert_eq!(artifacts.source_name, "Greeter.java");
        assert!(
            artifacts
                .files
                .iter()
                .any(|p| p.ends_with("Greeter.class")),
            "class file companion missing from {:?}",
            artifacts.files
        );
    }

    #[test]
    fn prepare_java_falls_back_to_main() {
        let guard = WorkspaceGuard::new();
        let catalog = Catalog::builtin().unwrap();
        let java = catalog.resolve("java").unwrap();

        let artifacts = guard
            .workspace
            .prepare(java, "class hidden {}", &Uuid::new_v4())
            .unwrap();

        assert_eq!(artifacts.classname, "Main");
        assert_eq!(artifacts.source_name, "Main.java");
    }

    #[test]
    fn prepare_c_enumerates_compiled_binary() {
        let guard = WorkspaceGuard::new();
        let catalog = Catalog::builtin().unwrap();
        let c = catalog.resolve("c").unwrap();

        let artifacts = guard
            .workspace
            .prepare(c, "int main() { return 0; }", &Uuid::new_v4())
            .unwrap();

        assert_eq!(artifacts.files.len(), 2);
        assert!(artifacts.output_name.ends_with(".out"));
        assert!(
            artifacts
                .files
                .iter()
                .any(|p| p.ends_with(&artifacts.output_name))
        );
    }

    #[test]
    fn cleanup_removes_the_job_directory() {
        let guard = WorkspaceGuard::new();
        let catalog = Catalog::builtin().unwrap();
        let python = catalog.resolve("python").unwrap();

        let artifacts = guard
            .workspace
            .prepare(python, "print('bye')", &Uuid::new_v4())
            .unwrap();
        assert!(artifacts.dir.exists());

        guard.workspace.cleanup(&artifacts);
        assert!(!artifacts.dir.exists());

        // A second cleanup must be a no-op, not an error.
        guard.workspace.cleanup(&artifacts);
    }

    #[test]
    fn class_extraction_is_anchored_to_identifier_characters() {
        assert_eq!(
            extract_public_class("public class Foo_1 extends Bar {}"),
            Some("Foo_1".to_string())
        );
        assert_eq!(
            extract_public_class("public\n  class\n  Spaced {}"),
            Some("Spaced".to_string())
        );
        // `$(...)` must never survive extraction.
        assert_eq!(
            extract_public_class("public class $(reboot) {}"),
            None
        );
        assert_eq!(extract_public_class("publicclass Smushed {}"), None);
        assert_eq!(extract_public_class("print('no java here')"), None);
    }
}
