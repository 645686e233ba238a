use crate::storage::items::ItemIdentity;
use crate::storage::models::MediaKind;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts", "m2ts", "vob",
];

lazy_static! {
    // Most specific first.
    static ref TV_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)^(.+?)[.\s_-]+s(\d{1,2})e(\d{1,2})").unwrap(),
        Regex::new(r"(?i)^(.+?)[.\s_-]+(\d{1,2})x(\d{1,2})").unwrap(),
        Regex::new(r"(?i)^(.+?)[.\s_-]+season\s*(\d{1,2})\s*episode\s*(\d{1,2})").unwrap(),
        Regex::new(r"(?i)^(.+?)[.\s_-]+s(\d{1,2})[.\s_-]*e(\d{1,2})").unwrap(),
    ];
    static ref MOVIE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"^(.+?)\s*\((\d{4})\)").unwrap(),
        Regex::new(r"^(.+?)[.\s_-]+(\d{4})(?:[.\s_-]|$)").unwrap(),
    ];
    static ref SEASON_FOLDER: Regex = Regex::new(r"(?i)^season\s*(\d+)").unwrap();
    static ref EXTENSION: Regex = Regex::new(r"\.[^.]+$").unwrap();
    static ref SEPARATORS: Regex = Regex::new(r"[._]").unwrap();
}

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map_or(false, |ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

/// Dots and underscores become spaces, whitespace collapses, words are capitalized.
pub fn clean_title(raw: &str) -> String {
    let spaced = SEPARATORS.replace_all(raw, " ");
    let collapsed = spaced.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut title = String::with_capacity(collapsed.len());
    let mut in_word = false;
    for c in collapsed.chars() {
        if c.is_alphanumeric() {
            if in_word {
                title.extend(c.to_lowercase());
            } else {
                title.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            title.push(c);
            in_word = false;
        }
    }
    title
}

/// Parse a bare file name into a title identity.
pub fn parse_filename(filename: &str) -> ItemIdentity {
    let name = EXTENSION.replace(filename, "");

    for pattern in TV_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&name) {
            let season = caps[2].parse().ok();
            let episode = caps[3].parse().ok();
            return ItemIdentity {
                kind: MediaKind::TvEpisode,
                title: Some(clean_title(&caps[1])),
                year: None,
                season,
                episode,
            };
        }
    }

    for pattern in MOVIE_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&name) {
            let year: i32 = match caps[2].parse() {
                Ok(year) => year,
                Err(_) => continue,
            };
            if (1900..=2100).contains(&year) {
                return ItemIdentity {
                    kind: MediaKind::Movie,
                    title: Some(clean_title(&caps[1])),
                    year: Some(year),
                    season: None,
                    episode: None,
                };
            }
        }
    }

    ItemIdentity {
        kind: MediaKind::Unknown,
        title: Some(clean_title(&name)),
        year: None,
        season: None,
        episode: None,
    }
}

/// Parse a path, falling back to `Season N` folder hints when the file name alone
/// says nothing.
pub fn parse_path(path: &Path) -> ItemIdentity {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut parsed = parse_filename(&filename);
    if parsed.kind != MediaKind::Unknown {
        return parsed;
    }

    let Some(parent) = path.parent() else {
        return parsed;
    };
    let parent_name = parent
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(caps) = SEASON_FOLDER.captures(&parent_name) {
        parsed.kind = MediaKind::TvEpisode;
        parsed.season = caps[1].parse().ok();
        if let Some(show) = parent.parent().and_then(|gp| gp.file_name()) {
            parsed.title = Some(clean_title(&show.to_string_lossy()));
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tv_episode() {
        let parsed = parse_filename("Breaking.Bad.S01E02.720p.mkv");
        assert_eq!(parsed.kind, MediaKind::TvEpisode);
        assert_eq!(parsed.title.as_deref(), Some("Breaking Bad"));
        assert_eq!(parsed.season, Some(1));
        assert_eq!(parsed.episode, Some(2));
    }

    #[test]
    fn test_parse_alternate_tv_forms() {
        let x = parse_filename("the_office 2x05.avi");
        assert_eq!((x.season, x.episode), (Some(2), Some(5)));
        assert_eq!(x.title.as_deref(), Some("The Office"));

        let long = parse_filename("Lost - Season 3 Episode 7.mp4");
        assert_eq!(long.kind, MediaKind::TvEpisode);
        assert_eq!((long.season, long.episode), (Some(3), Some(7)));

        let dotted = parse_filename("Fargo.S02.E04.mkv");
        assert_eq!((dotted.season, dotted.episode), (Some(2), Some(4)));
    }

    #[test]
    fn test_parse_movie() {
        let parsed = parse_filename("The Matrix (1999).mp4");
        assert_eq!(parsed.kind, MediaKind::Movie);
        assert_eq!(parsed.title.as_deref(), Some("The Matrix"));
        assert_eq!(parsed.year, Some(1999));

        let dotted = parse_filename("heat.1995.1080p.mkv");
        assert_eq!(dotted.kind, MediaKind::Movie);
        assert_eq!(dotted.title.as_deref(), Some("Heat"));
        assert_eq!(dotted.year, Some(1995));
    }

    #[test]
    fn test_implausible_year_is_unknown() {
        let parsed = parse_filename("Recording (0042).mkv");
        assert_eq!(parsed.kind, MediaKind::Unknown);
        assert_eq!(parsed.title.as_deref(), Some("Recording (0042)"));
    }

    #[test]
    fn test_season_folder_hint() {
        let parsed = parse_path(Path::new("/media/tv/the wire/Season 2/pilot.mkv"));
        assert_eq!(parsed.kind, MediaKind::TvEpisode);
        assert_eq!(parsed.season, Some(2));
        assert_eq!(parsed.episode, None);
        assert_eq!(parsed.title.as_deref(), Some("The Wire"));
    }

    #[test]
    fn test_video_extensions() {
        assert!(is_video_file(Path::new("a/b/Movie.MKV")));
        assert!(is_video_file(Path::new("clip.m2ts")));
        assert!(!is_video_file(Path::new("poster.jpg")));
        assert!(!is_video_file(Path::new("README")));
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("the.dark_knight  rises"), "The Dark Knight Rises");
    }
}
