/// Scene and image identifiers.
///
/// Sequence numbers are zero-padded to a fixed width so that lexicographic
/// order of file names matches narrative order.

/// Width of the zero-padded sequence number.
pub const SEQUENCE_WIDTH: usize = 4;

const SCENE_PREFIX: &str = "scene-";

/// `scene_id(5)` → `"scene-0005"`.
pub fn scene_id(number: u32) -> String {
    format!("{}{:0width$}", SCENE_PREFIX, number, width = SEQUENCE_WIDTH)
}

/// Identifier for a generated storyboard image.
///
/// `board` is the storyboard within the scene and `index` the image within
/// the board's response, both 1-based; the suffixes are omitted when the
/// scene has a single board or the response a single image.
pub fn image_id(
    scene_number: u32,
    board: usize,
    total_boards: usize,
    index: usize,
    total_images: usize,
    extension: &str,
) -> String {
    let mut id = scene_id(scene_number);
    if total_boards > 1 {
        id.push_str(&format!("-{}", board));
    }
    if total_images > 1 {
        id.push_str(&format!("-{}", index));
    }
    format!("{}.{}", id, extension)
}

/// Extract the scene number from a scene or image identifier.
///
/// Accepts bare ids, suffixed image ids and paths:
/// `"boards/scene-0012-3.png"` → `Some(12)`.
pub fn parse_scene_number(id: &str) -> Option<u32> {
    let file_name = id.rsplit(['/', '\\']).next().unwrap_or(id);
    let rest = file_name.strip_prefix(SCENE_PREFIX)?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok().filter(|n| *n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_ids_are_padded() {
        assert_eq!(scene_id(5), "scene-0005");
        assert_eq!(scene_id(1234), "scene-1234");
        assert!(scene_id(9) < scene_id(10));
    }

    #[test]
    fn image_ids_follow_board_layout() {
        assert_eq!(image_id(3, 1, 1, 1, 1, "png"), "scene-0003.png");
        assert_eq!(image_id(3, 2, 4, 1, 1, "jpg"), "scene-0003-2.jpg");
        assert_eq!(image_id(3, 2, 4, 2, 2, "png"), "scene-0003-2-2.png");
    }

    #[test]
    fn parse_numbers_from_ids_and_paths() {
        assert_eq!(parse_scene_number("scene-0005"), Some(5));
        assert_eq!(parse_scene_number("scene-0012-3.png"), Some(12));
        assert_eq!(parse_scene_number("story/boards/scene-0001-1.jpg"), Some(1));
        assert_eq!(parse_scene_number("ref-sarah.jpg"), None);
        assert_eq!(parse_scene_number("scene-.md"), None);
        assert_eq!(parse_scene_number("scene-0000.md"), None);
    }
}
