//! Fixes EEZ Studio Flow output that passes a third (animation) argument to
//! `lv_dropdown_set_selected`, which takes two in the LVGL version we build.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info};
use once_cell::sync::Lazy;
use regex::Regex;

/// `lv_dropdown_set_selected(<obj>, <index>, <anim>);` with any spacing.
static THREE_ARG_CALL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"lv_dropdown_set_selected\s*\(\s*([^,;]+?)\s*,\s*([^,;]+?)\s*,\s*[^,;)]+?\s*\)\s*;")
        .expect("Invalid lv_dropdown_set_selected regex")
});

/// The rewritten text and how many lines changed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fixed {
    pub text: String,
    pub replacements: usize,
}

/// Rewrite every three-argument call into `lv_dropdown_set_selected(A, B);`.
///
/// Only the call itself is replaced, so indentation, trailing comments and line
/// endings survive; lines without a match are passed through untouched.
pub fn fix_dropdown_calls(text: &str) -> Fixed {
    let mut out = String::with_capacity(text.len());
    let mut replacements = 0;

    for line in text.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);

        if THREE_ARG_CALL.is_match(body) {
            let rewritten = THREE_ARG_CALL.replace_all(body, "lv_dropdown_set_selected(${1}, ${2});");
            debug!("Rewrote '{}' as '{}'", body.trim(), rewritten.trim());

            out.push_str(&rewritten);
            out.push_str(ending);
            replacements += 1;
        } else {
            out.push_str(line);
        }
    }

    Fixed {
        text: out,
        replacements,
    }
}

/// Patch `path` in place, returning the number of rewritten calls.
///
/// The file is only written when something changed.
pub fn fix_dropdown_file(path: impl AsRef<Path>) -> Result<usize> {
    let path = path.as_ref();

    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read '{}'", path.display()))?;

    let fixed = fix_dropdown_calls(&text);

    if fixed.replacements > 0 {
        fs::write(path, fixed.text)
            .with_context(|| format!("Failed to write '{}'", path.display()))?;
    }

    info!(
        "Replacement complete. {} occurrence(s) modified.",
        fixed.replacements
    );

    Ok(fixed.replacements)
}

fn split_line_ending(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_args_become_two() {
        let src = "void tick() {\n    lv_dropdown_set_selected(objects.tone_select, value, LV_ANIM_OFF);\n}\n";

        let fixed = fix_dropdown_calls(src);

        assert_eq!(fixed.replacements, 1);
        assert_eq!(
            fixed.text,
            "void tick() {\n    lv_dropdown_set_selected(objects.tone_select, value);\n}\n"
        );
    }

    #[test]
    fn test_spacing_and_line_endings() {
        let src = "\tlv_dropdown_set_selected( obj ,  (uint16_t)idx ,LV_ANIM_ON ) ;\r\n  lv_dropdown_set_selected(a, b, c);";

        let fixed = fix_dropdown_calls(src);

        assert_eq!(fixed.replacements, 2);
        assert_eq!(
            fixed.text,
            "\tlv_dropdown_set_selected(obj, (uint16_t)idx);\r\n  lv_dropdown_set_selected(a, b);"
        );
    }

    #[test]
    fn test_other_lines_untouched() {
        let src = "lv_dropdown_set_selected(a, b);\nlv_dropdown_get_selected(a, b, c);\n// lv_dropdown_set_options(dd, opts);\n";

        let fixed = fix_dropdown_calls(src);

        assert_eq!(fixed.replacements, 0);
        assert_eq!(fixed.text, src);
    }

    #[test]
    fn test_comment_and_trailing_text_kept() {
        let src = "  // lv_dropdown_set_selected(a, b, c);\n  if (ok) lv_dropdown_set_selected(a, b, c); // sync\n";

        let fixed = fix_dropdown_calls(src);

        assert_eq!(fixed.replacements, 2);
        assert_eq!(
            fixed.text,
            "  // lv_dropdown_set_selected(a, b);\n  if (ok) lv_dropdown_set_selected(a, b); // sync\n"
        );
    }

    #[test]
    fn test_second_pass_is_noop() {
        let once = fix_dropdown_calls("  lv_dropdown_set_selected(dd, 3, LV_ANIM_OFF);\n");
        let twice = fix_dropdown_calls(&once.text);

        assert_eq!(twice.replacements, 0);
        assert_eq!(twice.text, once.text);
    }

    #[test]
    fn test_fix_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eez-flow.cpp");
        fs::write(
            &path,
            "lv_dropdown_set_selected(x, 1, LV_ANIM_OFF);\nlv_dropdown_set_selected(y, 2, LV_ANIM_OFF);\n",
        )
        .unwrap();

        assert_eq!(fix_dropdown_file(&path).unwrap(), 2);
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "lv_dropdown_set_selected(x, 1);\nlv_dropdown_set_selected(y, 2);\n"
        );
        assert!(fix_dropdown_file(dir.path().join("missing.cpp")).is_err());
    }
}
