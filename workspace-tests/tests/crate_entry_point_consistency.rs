use proptest::prelude::*;
use workspace_tests::{inherits_package_field, read_manifest, workspace_root};

/// Crate Entry Point Consistency
///
/// Library crates should have a `lib.rs` and binary crates a `main.rs`,
/// matching the targets declared in their Cargo.toml.
#[cfg(test)]
mod crate_entry_point_tests {
    use super::*;

    #[derive(Debug, Clone)]
    struct CrateInfo {
        name: String,
        declared_lib: Option<String>,
        declared_bins: Vec<String>,
        has_lib_rs: bool,
        has_main_rs: bool,
    }

    fn parse_crate_info(crate_name: &str) -> Result<CrateInfo, String> {
        let dir = workspace_root().join(crate_name);
        let manifest = read_manifest(&dir.join("Cargo.toml"))?;

        let declared_lib = manifest
            .get("lib")
            .and_then(|lib| lib.get("path"))
            .and_then(toml::Value::as_str)
            .map(str::to_string);
        let declared_bins = manifest
            .get("bin")
            .and_then(toml::Value::as_array)
            .map(|bins| {
                bins.iter()
                    .filter_map(|bin| bin.get("path").and_then(toml::Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(CrateInfo {
            name: crate_name.to_string(),
            declared_lib,
            declared_bins,
            has_lib_rs: dir.join("src/lib.rs").exists(),
            has_main_rs: dir.join("src/main.rs").exists(),
        })
    }

    #[test]
    fn test_engine_is_library_only() {
        let info = parse_crate_info("oauth-engine").unwrap();
        assert!(info.has_lib_rs);
        assert!(!info.has_main_rs);
        assert!(info.declared_bins.is_empty());
    }

    #[test]
    fn test_runner_declares_lib_and_bin() {
        let info = parse_crate_info("oauth-runner").unwrap();
        assert_eq!(info.declared_lib.as_deref(), Some("src/lib.rs"));
        assert_eq!(info.declared_bins, vec!["src/main.rs".to_string()]);
        assert!(info.has_lib_rs && info.has_main_rs);
    }

    proptest! {
        #[test]
        fn test_crate_entry_point_consistency(
            crate_name in prop::sample::select(vec!["oauth-engine", "oauth-runner", "workspace-tests"])
        ) {
            let info = parse_crate_info(crate_name)
                .map_err(proptest::test_runner::TestCaseError::fail)?;
            let dir = workspace_root().join(crate_name);

            prop_assert!(info.has_lib_rs || info.has_main_rs, "{} has no entry point", info.name);

            if let Some(path) = &info.declared_lib {
                prop_assert!(dir.join(path).exists(), "{} declares missing lib {}", info.name, path);
            }
            for path in &info.declared_bins {
                prop_assert!(dir.join(path).exists(), "{} declares missing bin {}", info.name, path);
            }

            let manifest = read_manifest(&dir.join("Cargo.toml"))
                .map_err(proptest::test_runner::TestCaseError::fail)?;
            prop_assert!(inherits_package_field(&manifest, "version"), "{} pins its own version", info.name);
            prop_assert!(inherits_package_field(&manifest, "edition"), "{} pins its own edition", info.name);
        }
    }
}
