//! Property tests for the media path classifier.
//!
//! Arbitrary file names must always map onto a safe, rooted, deterministic
//! relative path.

use ferry_core::classify::{classify, parse, MediaKind, MAX_SEGMENT_BYTES, MOVIES_ROOT, TV_ROOT};
use proptest::prelude::*;

fn release_like_name() -> impl Strategy<Value = String> {
    (
        "[A-Za-z][A-Za-z .]{0,30}",
        0u32..40,
        0u32..300,
        prop::option::of("[A-Za-z0-9]{1,8}"),
        "(mkv|MP4|avi|srt)",
    )
        .prop_map(|(title, season, episode, quality, ext)| {
            let mut name = format!("{title}.S{season}E{episode}");
            if let Some(q) = quality {
                name.push_str(&format!(".[{q}]"));
            }
            // Without a real extension the marker itself would be read as one.
            name.push('.');
            name.push_str(&ext);
            name
        })
}

proptest! {
    #[test]
    fn always_rooted_and_non_empty(name in any::<String>()) {
        let path = classify(&name);
        let root = path.root();
        prop_assert!(root == TV_ROOT || root == MOVIES_ROOT);
        prop_assert!(path.segments().len() >= 2);
        for seg in path.segments() {
            prop_assert!(!seg.is_empty());
        }
    }

    #[test]
    fn segments_are_path_safe(name in any::<String>()) {
        let path = classify(&name);
        for seg in path.segments() {
            prop_assert!(!seg.contains(".."), "segment {:?}", seg);
            prop_assert!(!seg.contains('/'), "segment {:?}", seg);
            prop_assert!(!seg.contains('\\'), "segment {:?}", seg);
            prop_assert!(!seg.chars().any(char::is_control), "segment {:?}", seg);
        }
    }

    #[test]
    fn segments_fit_name_max(name in "\\PC{0,1200}") {
        for seg in classify(&name).segments() {
            prop_assert!(seg.len() <= MAX_SEGMENT_BYTES, "{} bytes: {:?}", seg.len(), seg);
        }
    }

    #[test]
    fn long_release_names_fit_name_max(
        name in "[日a-zé. ]{0,300}\\.S[0-9]{1,20}E[0-9]{1,20}\\.\\[\\PC{0,300}\\]\\.[a-z0-9]{1,10}"
    ) {
        for seg in classify(&name).segments() {
            prop_assert!(seg.len() <= MAX_SEGMENT_BYTES, "{} bytes: {:?}", seg.len(), seg);
        }
    }

    #[test]
    fn classification_is_deterministic(name in any::<String>()) {
        prop_assert_eq!(classify(&name), classify(&name));
    }

    #[test]
    fn display_round_trips_segments(name in any::<String>()) {
        let path = classify(&name);
        let rendered = path.to_string();
        let split: Vec<&str> = rendered.split('/').collect();
        prop_assert_eq!(split.len(), path.segments().len());
    }

    #[test]
    fn file_name_ends_with_lowercase_extension(name in any::<String>()) {
        let parsed = parse(&name);
        prop_assert_eq!(parsed.extension.to_lowercase(), parsed.extension.clone());
        prop_assert!(classify(&name).file_name().ends_with(&parsed.extension));
    }

    #[test]
    fn release_names_land_in_tv_shows(name in release_like_name()) {
        let parsed = parse(&name);
        prop_assert_eq!(parsed.kind, MediaKind::TvEpisode);

        let path = classify(&name);
        prop_assert_eq!(path.root(), TV_ROOT);
        prop_assert_eq!(path.segments().len(), 4);

        let season = parsed.season.unwrap_or_default();
        prop_assert_eq!(path.segments()[2].clone(), format!("Season {season:02}"));
    }
}
