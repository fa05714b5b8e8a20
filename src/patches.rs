//! Bug fixes for the vendored Meshtastic-arduino sources, re-applied after every
//! upstream refresh.
//!
//! Each [`Patch`] is a set of literal find-and-replace hunks plus a marker that is
//! only present once the patch has been applied, which makes applying idempotent.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::{info, warn};

pub const MT_PROTOCOL_CPP: &str = "mt_protocol.cpp";

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

/// A literal replacement of `old` by `new`.
#[derive(Clone, Copy, Debug)]
pub struct Hunk {
    pub old: &'static str,
    pub new: &'static str,
}

#[derive(Clone, Copy, Debug)]
pub struct Patch {
    pub name: &'static str,
    /// File name relative to the library directory.
    pub file: &'static str,
    /// Text that only exists in the patched file.
    pub marker: &'static str,
    pub hunks: &'static [Hunk],
    /// The `.patch` file to apply by hand when the hunks no longer match.
    pub reference: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatchOutcome {
    AlreadyApplied,
    Applied,
    /// Only some hunks matched; the file was left unchanged.
    Partial { applied: usize, total: usize },
    /// No hunk matched; the file was left unchanged.
    NotFound,
}

impl PatchOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::AlreadyApplied | Self::Applied)
    }
}

/// Missing `break` after the `rebooted_tag` case: the handler falls through into
/// `moduleConfig_tag` and crashes when the radio reboots.
pub const REBOOTED_TAG_FIX: Patch = Patch {
    name: "rebooted_tag break statement",
    file: MT_PROTOCOL_CPP,
    marker: "return true;  // Fix upstream bug: prevent fall-through to moduleConfig_tag",
    hunks: &[Hunk {
        old: r#"    case meshtastic_FromRadio_rebooted_tag: // 8
      Serial.println("*** Received rebooted_tag! ***");
      handleGcmRebooted();  // Notify callback that GCM has rebooted
      _mt_send_toRadio(toRadio);

    case  meshtastic_FromRadio_moduleConfig_tag: // 9"#,
        new: r#"    case meshtastic_FromRadio_rebooted_tag: // 8
      Serial.println("*** Received rebooted_tag! ***");
      handleGcmRebooted();  // Notify callback that GCM has rebooted
      _mt_send_toRadio(toRadio);
      return true;  // Fix upstream bug: prevent fall-through to moduleConfig_tag

    case  meshtastic_FromRadio_moduleConfig_tag: // 9"#,
    }],
    reference: "mt_protocol_rebooted_tag_fix.patch",
};

/// `node_report_callback` is invoked without a NULL check, which crashes when
/// the radio reconnects after the callback was cleared.
pub const NODE_REPORT_NULL_CHECK: Patch = Patch {
    name: "node_report_callback NULL check",
    file: MT_PROTOCOL_CPP,
    marker: "if (node_report_callback != NULL) {",
    hunks: &[
        // handle_node_info
        Hunk {
            old: "  node_report_callback(&node, MT_NR_IN_PROGRESS);
  return true;",
            new: "  if (node_report_callback != NULL) {
    node_report_callback(&node, MT_NR_IN_PROGRESS);
  }
  return true;",
        },
        // handle_config_complete_id, MT_NR_DONE
        Hunk {
            old: "    want_config_id = 0;
    node_report_callback(NULL, MT_NR_DONE);
    node_report_callback = NULL;",
            new: "    want_config_id = 0;
    if (node_report_callback != NULL) {
      node_report_callback(NULL, MT_NR_DONE);
    }
    node_report_callback = NULL;",
        },
        // handle_config_complete_id, MT_NR_INVALID
        Hunk {
            old: "  } else {
    node_report_callback(NULL, MT_NR_INVALID);  // but return true, since it was still a valid packet
  }",
            new: "  } else {
    if (node_report_callback != NULL) {
      node_report_callback(NULL, MT_NR_INVALID);  // but return true, since it was still a valid packet
    }
  }",
        },
    ],
    reference: "mt_protocol_node_report_callback_null_check.patch",
};

pub const ALL_PATCHES: &[Patch] = &[REBOOTED_TAG_FIX, NODE_REPORT_NULL_CHECK];

/// Apply `patch` to its file under `lib_dir`.
///
/// The file is written only when every hunk matched.
pub fn apply_patch(lib_dir: impl AsRef<Path>, patch: &Patch) -> Result<PatchOutcome, PatchError> {
    let path = lib_dir.as_ref().join(patch.file);

    info!("Applying {} fix...", patch.name);

    if !path.is_file() {
        return Err(PatchError::FileNotFound(path));
    }

    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;

    if content.contains(patch.marker) {
        info!("  Patch already applied");
        return Ok(PatchOutcome::AlreadyApplied);
    }

    let mut patched = content;
    let mut applied = 0;

    for hunk in patch.hunks {
        if patched.contains(hunk.old) {
            patched = patched.replace(hunk.old, hunk.new);
            applied += 1;
        }
    }

    let total = patch.hunks.len();

    let outcome = if applied == total {
        fs::write(&path, patched)
            .with_context(|| format!("Failed to write '{}'", path.display()))?;

        info!("  Successfully applied {} of {} hunk(s)", applied, total);
        PatchOutcome::Applied
    } else if applied > 0 {
        warn!(
            "  Only {}/{} hunks matched - {} may have changed upstream",
            applied, total, patch.file
        );
        PatchOutcome::Partial { applied, total }
    } else {
        warn!(
            "  Code pattern not found - {} may have changed upstream; apply {} by hand",
            patch.file, patch.reference
        );
        PatchOutcome::NotFound
    };

    Ok(outcome)
}

/// Outcomes of a run over several patches.
#[derive(Debug, Default)]
pub struct PatchReport {
    pub outcomes: Vec<(Patch, PatchOutcome)>,
    pub missing: Vec<PathBuf>,
    /// Reference `.patch` files for the patches that did not apply.
    pub manual: Vec<PathBuf>,
}

impl PatchReport {
    /// No missing file and no patch left unapplied.
    pub fn success(&self) -> bool {
        self.missing.is_empty() && self.outcomes.iter().all(|(_, o)| o.is_ok())
    }
}

/// Apply every patch in `patches`, carrying on past failures.
///
/// Patches that no longer match are listed with their reference file in `patches_dir`.
pub fn apply_all(
    lib_dir: impl AsRef<Path>,
    patches_dir: impl AsRef<Path>,
    patches: &[Patch],
) -> anyhow::Result<PatchReport> {
    let lib_dir = lib_dir.as_ref();
    let mut report = PatchReport::default();

    for patch in patches {
        match apply_patch(lib_dir, patch) {
            Ok(outcome) => {
                if !outcome.is_ok() {
                    report.manual.push(patches_dir.as_ref().join(patch.reference));
                }
                report.outcomes.push((*patch, outcome));
            }
            Err(PatchError::FileNotFound(path)) => {
                warn!("  File not found: {}", path.display());
                report.missing.push(path);
            }
            Err(PatchError::Io(e)) => return Err(e),
        }
    }

    if report.success() {
        info!("All patches applied successfully");
    } else {
        warn!("Some patches failed - review the output above");

        for file in &report.manual {
            warn!("  Apply by hand: {}", file.display());
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPSTREAM: &str = r#"bool handle_node_info(meshtastic_NodeInfo *nodeInfo) {
  mt_node_t node;
  node_report_callback(&node, MT_NR_IN_PROGRESS);
  return true;
}

bool handle_config_complete_id(uint32_t now, uint32_t config_complete_id) {
  if (config_complete_id == want_config_id) {
    want_config_id = 0;
    node_report_callback(NULL, MT_NR_DONE);
    node_report_callback = NULL;
  } else {
    node_report_callback(NULL, MT_NR_INVALID);  // but return true, since it was still a valid packet
  }
  return true;
}

bool handle_packet(uint32_t now, size_t payload_len) {
  switch (fromRadio.which_payload_variant) {
    case meshtastic_FromRadio_rebooted_tag: // 8
      Serial.println("*** Received rebooted_tag! ***");
      handleGcmRebooted();  // Notify callback that GCM has rebooted
      _mt_send_toRadio(toRadio);

    case  meshtastic_FromRadio_moduleConfig_tag: // 9
      return true;
  }
}
"#;

    fn lib_with(content: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(MT_PROTOCOL_CPP), content).unwrap();
        dir
    }

    #[test]
    fn test_apply_is_idempotent() {
        let lib = lib_with(UPSTREAM);
        let path = lib.path().join(MT_PROTOCOL_CPP);

        assert_eq!(apply_patch(lib.path(), &REBOOTED_TAG_FIX).unwrap(), PatchOutcome::Applied);
        let once = fs::read_to_string(&path).unwrap();
        assert!(once.contains(REBOOTED_TAG_FIX.marker));

        assert_eq!(
            apply_patch(lib.path(), &REBOOTED_TAG_FIX).unwrap(),
            PatchOutcome::AlreadyApplied
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), once);
    }

    #[test]
    fn test_null_check_patches_all_three_calls() {
        let lib = lib_with(UPSTREAM);

        let report = apply_all(lib.path(), lib.path().join("patches"), ALL_PATCHES).unwrap();
        assert!(report.success());
        assert!(report.manual.is_empty());

        let patched = fs::read_to_string(lib.path().join(MT_PROTOCOL_CPP)).unwrap();
        assert_eq!(patched.matches("if (node_report_callback != NULL) {").count(), 3);
        assert!(!patched.contains("\n  node_report_callback(&node"));
    }

    #[test]
    fn test_changed_upstream_leaves_file_alone() {
        let changed = "bool handle_packet() { return false; }\n";
        let lib = lib_with(changed);

        assert_eq!(apply_patch(lib.path(), &REBOOTED_TAG_FIX).unwrap(), PatchOutcome::NotFound);
        assert_eq!(
            fs::read_to_string(lib.path().join(MT_PROTOCOL_CPP)).unwrap(),
            changed
        );
    }

    #[test]
    fn test_unmatched_patch_points_at_reference_file() {
        let lib = lib_with("bool handle_packet() { return false; }\n");
        let patches_dir = lib.path().join("meshtastic_customizations").join("patches");

        let report = apply_all(lib.path(), &patches_dir, ALL_PATCHES).unwrap();

        assert!(!report.success());
        assert!(report.missing.is_empty());
        assert_eq!(
            report.manual,
            [
                patches_dir.join("mt_protocol_rebooted_tag_fix.patch"),
                patches_dir.join("mt_protocol_node_report_callback_null_check.patch"),
            ]
        );
    }

    #[test]
    fn test_partial_match_leaves_file_alone() {
        let partial = UPSTREAM.replace("    node_report_callback(NULL, MT_NR_DONE);\n", "");
        let lib = lib_with(&partial);

        assert_eq!(
            apply_patch(lib.path(), &NODE_REPORT_NULL_CHECK).unwrap(),
            PatchOutcome::Partial { applied: 2, total: 3 }
        );
        assert_eq!(
            fs::read_to_string(lib.path().join(MT_PROTOCOL_CPP)).unwrap(),
            partial
        );
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            apply_patch(dir.path(), &REBOOTED_TAG_FIX),
            Err(PatchError::FileNotFound(_))
        ));

        let report = apply_all(dir.path(), dir.path().join("patches"), ALL_PATCHES).unwrap();
        assert_eq!(report.missing.len(), 2);
        assert!(!report.success());
    }
}
