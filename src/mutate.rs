//! Configuration Mutator: make the project's `pom.xml` declare the trial's
//! profile and apply the project's static overrides before a build.

use std::path::Path;

use tracing::info;

use crate::checkout::WorkingTree;
use crate::config::Project;
use crate::error::{HarnessError, Result};
use crate::pom::{Document, NodeKey};
use crate::profile::{Profile, SKIP_JACOCO_PLUGIN};

const PROFILES_PATH: [&str; 2] = ["project", "profiles"];
const PLUGINS_PATH: [&str; 3] = ["project", "build", "plugins"];

/// Edits applied to the descriptor and tree, for logging.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Applied {
    pub profile_inserted: bool,
    pub jacoco_disabled: bool,
    pub override_inserted: bool,
    pub removed_tests: Vec<String>,
}

/// Add the profile fragment to `doc` unless a profile with its id exists.
pub fn with_profile(doc: &Document, profile: Profile) -> Result<Option<Document>> {
    let fragment = Document::parse_fragment(&profile.fragment())?;
    let key = NodeKey::child_text("profile", "id", &profile.profile_id());
    doc.insert_unless(&PROFILES_PATH, &fragment, &key)
}

/// Whether the project already wires in the stock JaCoCo plugin.
pub fn declares_jacoco(doc: &Document) -> bool {
    doc.find(&PLUGINS_PATH).is_some_and(|plugins| {
        plugins
            .elements()
            .filter(|p| p.name == "plugin")
            .any(|p| p.child("groupId").is_some_and(|g| g.text().trim() == "org.jacoco"))
    })
}

/// Add a plugin that switches the stock JaCoCo plugin off.
pub fn without_stock_jacoco(doc: &Document) -> Result<Option<Document>> {
    let fragment = Document::parse_fragment(SKIP_JACOCO_PLUGIN)?;
    doc.insert_unless(&PLUGINS_PATH, &fragment, &NodeKey::Identical)
}

/// Apply a project-specific `pom_config` fragment.
pub fn with_override(doc: &Document, kind: &str, content: &str) -> Result<Option<Document>> {
    let path: &[&str] = match kind {
        "plugin" => &PLUGINS_PATH,
        other => {
            return Err(HarnessError::Config(format!(
                "unsupported pom_config type '{other}'"
            )))
        }
    };
    let fragment = Document::parse_fragment(content)?;
    doc.insert_unless(path, &fragment, &NodeKey::Identical)
}

/// Delete test sources whose file name ends with one of `suffixes`.
pub fn remove_tests(test_root: &Path, suffixes: &[String]) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    if suffixes.is_empty() || !test_root.is_dir() {
        return Ok(removed);
    }
    let mut pending = vec![test_root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if suffixes.iter().any(|s| name.ends_with(s.as_str())) {
                std::fs::remove_file(&path)?;
                info!("Removed: {}", path.display());
                removed.push(path.display().to_string());
            }
        }
    }
    removed.sort();
    Ok(removed)
}

/// Bring the tree's descriptor into the shape the trial needs. The file is
/// written at most once and only when something changed, so running this
/// twice leaves the descriptor byte-for-byte stable.
pub fn configure(
    tree: &WorkingTree,
    project: &Project,
    revision: &str,
    profile: Profile,
) -> Result<Applied> {
    let pom_path = tree.pom();
    let original = Document::read(&pom_path)?;
    let mut doc = original.clone();
    let mut applied = Applied::default();

    if let Some(next) = with_profile(&doc, profile)? {
        doc = next;
        applied.profile_inserted = true;
    } else {
        info!("{}, already exists in pom.xml.", profile.profile_id());
    }

    if declares_jacoco(&doc) {
        if let Some(next) = without_stock_jacoco(&doc)? {
            info!("JaCoCo is a default build plugin for {}, skip it.", project.name);
            doc = next;
            applied.jacoco_disabled = true;
        }
    }

    if let Some(edit) = project.overrides.pom_edit_for(revision) {
        info!("Special config on POM for version {}", revision);
        if let Some(next) = with_override(&doc, &edit.kind, &edit.content)? {
            doc = next;
            applied.override_inserted = true;
        }
    }

    if doc != original {
        doc.write(&pom_path)?;
    }

    if !project.overrides.exclude_tests.is_empty() {
        info!("Need to exclude tests.");
        applied.removed_tests =
            remove_tests(&tree.join("src").join("test"), &project.overrides.exclude_tests)?;
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PomEdit, ProjectOverride};

    const POM: &str = "<?xml version=\"1.0\"?>
<project>
  <build>
    <plugins>
      <plugin>
        <groupId>org.jacoco</groupId>
        <artifactId>jacoco-maven-plugin</artifactId>
      </plugin>
    </plugins>
  </build>
</project>
";

    fn project(overrides: ProjectOverride) -> Project {
        Project {
            name: "demo".into(),
            url: "https://example.com/demo.git".into(),
            revisions: vec!["v1".into()],
            overrides,
        }
    }

    #[test]
    fn test_profile_insert_is_idempotent() {
        let doc = Document::parse(POM).unwrap();
        let once = with_profile(&doc, Profile::BJacoco).unwrap().unwrap();
        assert!(with_profile(&once, Profile::BJacoco).unwrap().is_none());

        // A different profile still goes in next to the first one.
        let both = with_profile(&once, Profile::IJacoco).unwrap().unwrap();
        let profiles = both.find(&PROFILES_PATH).unwrap();
        assert_eq!(profiles.elements().count(), 2);
    }

    #[test]
    fn test_stock_jacoco_detected_and_disabled_once() {
        let doc = Document::parse(POM).unwrap();
        assert!(declares_jacoco(&doc));
        let edited = without_stock_jacoco(&doc).unwrap().unwrap();
        assert!(edited.to_string().contains("<skip>true</skip>"));
        assert!(without_stock_jacoco(&edited).unwrap().is_none());

        let plain = Document::parse("<project><build/></project>").unwrap();
        assert!(!declares_jacoco(&plain));
    }

    #[test]
    fn test_unsupported_override_type() {
        let doc = Document::parse(POM).unwrap();
        let err = with_override(&doc, "dependency", "<dependency/>").unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_configure_twice_is_byte_stable() {
        let dir = tempfile::tempdir().unwrap();
        let tree = WorkingTree::new(dir.path());
        std::fs::write(tree.pom(), POM).unwrap();
        let project = project(ProjectOverride {
            name: "demo".into(),
            versions: Some(vec!["v1".into()]),
            pom_config: Some(PomEdit {
                kind: "plugin".into(),
                content: "<plugin><artifactId>extra</artifactId></plugin>".into(),
            }),
            ..Default::default()
        });

        let first = configure(&tree, &project, "v1", Profile::IJacoco).unwrap();
        assert!(first.profile_inserted);
        assert!(first.jacoco_disabled);
        assert!(first.override_inserted);
        let after_first = std::fs::read(tree.pom()).unwrap();

        let second = configure(&tree, &project, "v1", Profile::IJacoco).unwrap();
        assert_eq!(second, Applied::default());
        assert_eq!(std::fs::read(tree.pom()).unwrap(), after_first);

        let text = String::from_utf8(after_first).unwrap();
        assert_eq!(text.matches("<id>ijacocop</id>").count(), 1);
    }

    #[test]
    fn test_configure_rejects_unparseable_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let tree = WorkingTree::new(dir.path());
        std::fs::write(tree.pom(), "<project><build></project>").unwrap();
        let result = configure(&tree, &project(ProjectOverride::default()), "v1", Profile::RetestAll);
        assert!(matches!(result, Err(HarnessError::Xml { .. })));
    }

    #[test]
    fn test_remove_tests_by_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let tests = dir.path().join("src/test/java/org/demo");
        std::fs::create_dir_all(&tests).unwrap();
        std::fs::write(tests.join("FlakyTest.java"), "class FlakyTest {}").unwrap();
        std::fs::write(tests.join("StableTest.java"), "class StableTest {}").unwrap();

        let removed =
            remove_tests(&dir.path().join("src/test"), &["FlakyTest.java".to_string()]).unwrap();
        assert_eq!(removed.len(), 1);
        assert!(!tests.join("FlakyTest.java").exists());
        assert!(tests.join("StableTest.java").exists());
    }
}
