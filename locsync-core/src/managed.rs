//! Markers identifying events this application manages.
//!
//! New events carry a private extended property. Older events were tagged
//! with a line in their description instead; reconciliation migrates them
//! to the property and strips the tag.

use std::collections::BTreeMap;

/// Private extended property set on managed events
pub const MANAGED_PROPERTY_KEY: &str = "locsync_managed";
pub const MANAGED_PROPERTY_VALUE: &str = "true";

/// Legacy description marker
pub const DESCRIPTION_TAG: &str = "Add-To-Locsync: true";

pub fn has_managed_property(props: &BTreeMap<String, String>) -> bool {
    props
        .get(MANAGED_PROPERTY_KEY)
        .is_some_and(|v| v == MANAGED_PROPERTY_VALUE)
}

pub fn has_description_tag(description: Option<&str>) -> bool {
    description.is_some_and(|d| d.contains(DESCRIPTION_TAG))
}

/// Remove the legacy tag from a description.
///
/// Only the tag text is removed, plus any whitespace it leaves at the end of
/// its line. A line left blank by the removal is dropped together with its
/// line break. Everything else, `\r\n` endings included, is kept as is.
pub fn strip_description_tag(description: &str) -> String {
    let mut stripped = String::with_capacity(description.len());
    for line in description.split_inclusive('\n') {
        let (body, ending) = split_line_ending(line);
        if !body.contains(DESCRIPTION_TAG) {
            stripped.push_str(line);
            continue;
        }

        let rest = body.replace(DESCRIPTION_TAG, "");
        if !rest.trim().is_empty() {
            stripped.push_str(rest.trim_end());
            stripped.push_str(ending);
        } else if ending.is_empty() {
            // Dropped the last line, so the break before it goes too
            let kept = split_line_ending(&stripped).0.len();
            stripped.truncate(kept);
        }
    }
    stripped
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
