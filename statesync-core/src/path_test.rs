use super::path::*;

#[test]
fn test_numeric_string_coercion() {
    assert_eq!(Segment::from("3"), Segment::Index(3));
    assert_eq!(Segment::from("0"), Segment::Index(0));
    assert_eq!(Segment::from("42"), Segment::Index(42));
    assert_eq!(Segment::from("03"), Segment::Key("03".to_string()));
    assert_eq!(Segment::from("3a"), Segment::Key("3a".to_string()));
    assert_eq!(Segment::from("-1"), Segment::Key("-1".to_string()));
    assert_eq!(Segment::from(""), Segment::Key(String::new()));
    assert_eq!(Segment::from("name"), Segment::Key("name".to_string()));
}

#[test]
fn test_string_and_integer_segments_record_identical_paths() {
    let by_string = Path::root().child("3");
    let by_index = Path::root().child(3u64);
    assert_eq!(by_string, by_index);
}

#[test]
fn test_segment_id_form() {
    assert_eq!(Segment::Index(3).as_id(), "3");
    assert_eq!(Segment::from("u1").as_id(), "u1");
}

#[test]
fn test_root_overlaps_everything() {
    let root = Path::root();
    assert!(root.overlaps(&Path::root()));
    assert!(root.overlaps(&Path::new(["a"])));
    assert!(root.overlaps(&Path::new(["a", "b", "c"])));
    assert!(Path::new(["a", "b", "c"]).overlaps(&root));
}

#[test]
fn test_overlap_is_the_prefix_relation() {
    let parent = Path::new(["u1"]);
    let child = Path::new(["u1", "name"]);
    let sibling = Path::new(["u1", "email"]);
    let other = Path::new(["u2"]);

    assert!(parent.overlaps(&child));
    assert!(child.overlaps(&parent));
    assert!(parent.overlaps(&parent));

    assert!(!child.overlaps(&sibling));
    assert!(!parent.overlaps(&other));
    assert!(!other.overlaps(&child));
}

#[test]
fn test_prefix_respects_segment_values() {
    assert!(Path::new(["a"]).is_prefix_of(&Path::new(["a", "b"])));
    assert!(!Path::new(["a", "b"]).is_prefix_of(&Path::new(["a"])));
    assert!(!Path::new(["a"]).is_prefix_of(&Path::new(["b", "a"])));
}

#[test]
fn test_child_and_join() {
    let base = Path::new(["users"]);
    assert_eq!(base.child("3"), Path::new(["users", "3"]));
    assert_eq!(
        base.join(&Path::new(["3", "name"])),
        Path::new(["users", "3", "name"])
    );
    // Building does not mutate the original
    assert_eq!(base, Path::new(["users"]));
}

#[test]
fn test_display() {
    assert_eq!(Path::root().to_string(), "$");
    assert_eq!(Path::new(["users", "3", "name"]).to_string(), "$.users.3.name");
}
