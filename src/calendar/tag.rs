use crate::model::ResourceId;

/// Literal that precedes the resource id in an event description.
pub const RESOURCE_TAG_MARKER: &str = "ResourceID:";

/// What an event description says about ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Untagged,
    Resource(ResourceId),
    /// Marker present but not followed by exactly one decimal id.
    Malformed,
}

/// Append the ownership tag on its own line after the human-readable text.
pub fn tag_description(description: &str, resource_id: ResourceId) -> String {
    let description = description.trim_end();
    if description.is_empty() {
        format!("{RESOURCE_TAG_MARKER} {resource_id}")
    } else {
        format!("{description}\n\n{RESOURCE_TAG_MARKER} {resource_id}")
    }
}

/// Parse the ownership tag out of a description. Several markers naming
/// different ids are `Malformed`.
pub fn parse_tag(description: Option<&str>) -> Tag {
    let Some(description) = description else {
        return Tag::Untagged;
    };

    let mut found: Option<ResourceId> = None;
    for (pos, _) in description.match_indices(RESOURCE_TAG_MARKER) {
        let rest = description[pos + RESOURCE_TAG_MARKER.len()..].trim_start();
        let token = rest.split_whitespace().next().unwrap_or("");
        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Tag::Malformed;
        }
        let Ok(id) = token.parse::<ResourceId>() else {
            return Tag::Malformed;
        };
        match found {
            Some(prev) if prev != id => return Tag::Malformed,
            _ => found = Some(id),
        }
    }

    found.map_or(Tag::Untagged, Tag::Resource)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_description_parses_back() {
        let desc = tag_description("Booked by Ana (+5511999990000)", 42);
        assert_eq!(desc, "Booked by Ana (+5511999990000)\n\nResourceID: 42");
        assert_eq!(parse_tag(Some(&desc)), Tag::Resource(42));
    }

    #[test]
    fn empty_description_is_just_the_tag() {
        assert_eq!(tag_description("  ", 7), "ResourceID: 7");
    }

    #[test]
    fn untagged_descriptions() {
        assert_eq!(parse_tag(None), Tag::Untagged);
        assert_eq!(parse_tag(Some("")), Tag::Untagged);
        assert_eq!(parse_tag(Some("Holiday - clinic closed")), Tag::Untagged);
        assert_eq!(parse_tag(Some("resourceid: 4")), Tag::Untagged);
    }

    #[test]
    fn tag_without_space_after_marker() {
        assert_eq!(parse_tag(Some("ResourceID:12")), Tag::Resource(12));
    }

    #[test]
    fn malformed_tags() {
        assert_eq!(parse_tag(Some("ResourceID:")), Tag::Malformed);
        assert_eq!(parse_tag(Some("ResourceID: dr_smith")), Tag::Malformed);
        assert_eq!(parse_tag(Some("ResourceID: 12abc")), Tag::Malformed);
        assert_eq!(parse_tag(Some("ResourceID: 99999999999999999999999")), Tag::Malformed);
    }

    #[test]
    fn repeated_tags_must_agree() {
        assert_eq!(parse_tag(Some("ResourceID: 3\nResourceID: 3")), Tag::Resource(3));
        assert_eq!(parse_tag(Some("ResourceID: 3\nResourceID: 4")), Tag::Malformed);
    }
}
