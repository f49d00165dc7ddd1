/// Normalize a resource name so that equivalent spellings of a path produce the same key.
///
/// Whitespace around the whole name is trimmed, backslashes become forward slashes, and empty, `.` and `..`
/// segments are dropped. The result never starts or ends with a separator. Casing is preserved
/// here; it is ignored later when the name is hashed.
pub fn sanitize_resource_name(name: &str) -> String {
    let name = name.trim().replace('\\', "/");

    let mut sanitized = String::with_capacity(name.len());
    for segment in name.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            continue;
        }

        if !sanitized.is_empty() {
            sanitized.push('/');
        }
        sanitized.push_str(segment);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::sanitize_resource_name;

    #[test]
    fn already_clean_names_are_unchanged() {
        assert_eq!(
            sanitize_resource_name("Textures/Stone.png"),
            "Textures/Stone.png"
        );
        assert_eq!(sanitize_resource_name("Stone.png"), "Stone.png");
    }

    #[test]
    fn separators_are_normalized() {
        assert_eq!(
            sanitize_resource_name("  Textures\\Stone.png "),
            "Textures/Stone.png"
        );
        assert_eq!(
            sanitize_resource_name("/Textures//Stone.png"),
            "Textures/Stone.png"
        );
        assert_eq!(sanitize_resource_name("Textures/"), "Textures");
    }

    #[test]
    fn relative_segments_are_removed() {
        assert_eq!(
            sanitize_resource_name("./Textures/../Stone.png"),
            "Textures/Stone.png"
        );
        assert_eq!(
            sanitize_resource_name("..\\..\\Models\\Box.mdl"),
            "Models/Box.mdl"
        );
    }

    #[test]
    fn spaces_inside_the_name_are_kept() {
        assert_eq!(
            sanitize_resource_name(" Textures/ Stone.png"),
            "Textures/ Stone.png"
        );
        assert_eq!(
            sanitize_resource_name("Sounds /Big Explosion.wav "),
            "Sounds /Big Explosion.wav"
        );
    }

    #[test]
    fn blank_names_sanitize_to_empty() {
        assert_eq!(sanitize_resource_name(""), "");
        assert_eq!(sanitize_resource_name("   "), "");
        assert_eq!(sanitize_resource_name("./.."), "");
    }
}
