use proptest::prelude::*;
use workspace_tests::{
    member_dependencies, parse_manifest, read_manifest, shared_dependencies, workspace_members,
    workspace_root,
};

/// Workspace Dependency Consistency
///
/// For any crate in the workspace that uses a shared dependency, the dependency
/// should be declared with `workspace = true` to inherit the version from the
/// root workspace configuration.
#[cfg(test)]
mod workspace_dependency_tests {
    use super::*;

    fn root_manifest() -> toml::Table {
        read_manifest(&workspace_root().join("Cargo.toml")).unwrap()
    }

    #[test]
    fn test_workspace_lists_every_member() {
        let members = workspace_members(&root_manifest());
        assert_eq!(members, vec!["oauth-engine", "oauth-runner", "workspace-tests"]);

        for member in &members {
            let manifest = workspace_root().join(member).join("Cargo.toml");
            assert!(manifest.exists(), "member {} has no Cargo.toml", member);
        }
    }

    #[test]
    fn test_shared_stack_declared_once() {
        let shared = shared_dependencies(&root_manifest());
        for name in ["tokio", "serde", "tracing", "thiserror", "uuid", "proptest"] {
            assert!(shared.iter().any(|dep| dep == name), "{} missing from [workspace.dependencies]", name);
        }
    }

    proptest! {
        #[test]
        fn test_workspace_dependency_consistency(
            crate_name in prop::sample::select(vec!["oauth-engine", "oauth-runner", "workspace-tests"])
        ) {
            let root = root_manifest();
            let shared = shared_dependencies(&root);
            let manifest = read_manifest(&workspace_root().join(crate_name).join("Cargo.toml"))
                .map_err(proptest::test_runner::TestCaseError::fail)?;

            for (dep_name, inherits) in member_dependencies(&manifest) {
                if shared.contains(&dep_name) {
                    prop_assert!(
                        inherits,
                        "Crate '{}' uses dependency '{}' but does not inherit from workspace (missing 'workspace = true')",
                        crate_name,
                        dep_name
                    );
                }
            }
        }
    }

    #[test]
    fn test_workspace_dependency_consistency_unit() {
        let good = parse_manifest(
            r#"
[package]
name = "test-crate"
version.workspace = true

[dependencies]
tokio = { workspace = true }
serde.workspace = true
url = "2.5"
"#,
        )
        .unwrap();

        let deps = member_dependencies(&good);
        assert_eq!(deps.get("tokio"), Some(&true));
        assert_eq!(deps.get("serde"), Some(&true));
        assert_eq!(deps.get("url"), Some(&false));

        let bad = parse_manifest(
            r#"
[dependencies]
tokio = { workspace = true }

[dev-dependencies]
tokio = "1.0"
"#,
        )
        .unwrap();

        // A pinned copy in any section breaks inheritance
        assert_eq!(member_dependencies(&bad).get("tokio"), Some(&false));
    }
}
