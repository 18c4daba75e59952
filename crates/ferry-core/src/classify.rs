//! Media path classifier.
//!
//! Maps an arbitrary uploaded file name onto a media-server style relative
//! path:
//!
//! - `tv-shows/<Show (Year)>/Season NN/<Show> - sNNeNN [quality].ext`
//! - `movies/<Title> (Year) quality.ext`
//! - `movies/<Title> quality.ext` when nothing structured is recognised
//!
//! [`classify`] is total and pure: it never fails, touches no filesystem and
//! holds no state, so it can be called from any number of tasks at once.
//! Every segment it returns is free of path separators, `..`, control and
//! bidi formatting characters, and fits in [`MAX_SEGMENT_BYTES`]; callers still join the result onto their download root and
//! check containment (see [`crate::security::resolve_within`]).

use std::{fmt, path::PathBuf, sync::OnceLock};

use regex::Regex;

pub const TV_ROOT: &str = "tv-shows";
pub const MOVIES_ROOT: &str = "movies";

/// Longest name (extension excluded) that is pattern-matched; the rest is cut.
pub const MAX_NAME_CHARS: usize = 1024;

/// Upper bound on the UTF-8 length of any rendered segment (`NAME_MAX`).
pub const MAX_SEGMENT_BYTES: usize = 255;

// Worst case episode file: title + " - s<20>e<20>" + " [quality]" + ".<10>"
// = 120 + 45 + 67 + 11 = 243 bytes.
const MAX_TITLE_BYTES: usize = 120;
const MAX_QUALITY_BYTES: usize = 64;
const MAX_EXTENSION_LEN: usize = 10;
const UNKNOWN_TITLE: &str = "Unknown";

/// Characters dropped from quality tags on top of control characters.
const UNSAFE_SEGMENT_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    TvEpisode,
    Movie,
}

/// Structured view of a file name, produced on the way to a [`RelativePath`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedName {
    pub kind: MediaKind,
    /// Sanitized show or movie title, never empty.
    pub title: String,
    pub season: Option<u64>,
    pub episode: Option<u64>,
    pub year: Option<String>,
    pub quality: Option<String>,
    /// Lower-cased extension including the leading dot, or empty.
    pub extension: String,
}

/// Slash-separated destination relative to the download root.
///
/// Always starts with [`TV_ROOT`] or [`MOVIES_ROOT`] and always has at least
/// two segments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RelativePath {
    segments: Vec<String>,
}

impl RelativePath {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn root(&self) -> &str {
        self.segments.first().map(String::as_str).unwrap_or(MOVIES_ROOT)
    }

    pub fn file_name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.segments.iter().collect()
    }
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

/// Classify `filename` and render its destination path.
pub fn classify(filename: &str) -> RelativePath {
    parse(filename).to_relative_path()
}

/// Parse `filename` into its structured parts.
///
/// Priority: TV marker, then a 4-digit year, then the plain fallback.
pub fn parse(filename: &str) -> ParsedName {
    let (name, extension) = split_extension(filename);
    let name = truncate_chars(name, MAX_NAME_CHARS);
    let quality = extract_quality(name);

    if let Some(caps) = tv_marker().captures(name) {
        let season = parse_number(&caps[2]);
        let episode = parse_number(&caps[3]);
        if let (Some(season), Some(episode)) = (season, episode) {
            let show = clean_title(&caps[1]);
            let (title, year) = split_show_year(&show);
            return ParsedName {
                kind: MediaKind::TvEpisode,
                title: or_unknown(title),
                season: Some(season),
                episode: Some(episode),
                year,
                quality,
                extension,
            };
        }
    }

    if let Some(m) = four_digits().find(name) {
        let title = clean_title(&name[..m.start()]);
        if !title.is_empty() {
            return ParsedName {
                kind: MediaKind::Movie,
                title,
                season: None,
                episode: None,
                year: Some(m.as_str().to_string()),
                quality,
                extension,
            };
        }
    }

    ParsedName {
        kind: MediaKind::Movie,
        title: or_unknown(clean_title(name)),
        season: None,
        episode: None,
        year: None,
        quality,
        extension,
    }
}

impl ParsedName {
    pub fn to_relative_path(&self) -> RelativePath {
        let ext = &self.extension;
        let segments = match self.kind {
            MediaKind::TvEpisode => {
                let season = self.season.unwrap_or_default();
                let episode = self.episode.unwrap_or_default();
                let quality = self
                    .quality
                    .as_deref()
                    .map(|q| format!(" [{q}]"))
                    .unwrap_or_default();
                vec![
                    TV_ROOT.to_string(),
                    self.titled_with_year(),
                    format!("Season {season:02}"),
                    format!(
                        "{} - s{season:02}e{episode:02}{quality}{ext}",
                        self.title
                    ),
                ]
            }
            MediaKind::Movie => {
                let quality = self
                    .quality
                    .as_deref()
                    .map(|q| format!(" {q}"))
                    .unwrap_or_default();
                vec![
                    MOVIES_ROOT.to_string(),
                    format!("{}{quality}{ext}", self.titled_with_year()),
                ]
            }
        };
        RelativePath { segments }
    }

    fn titled_with_year(&self) -> String {
        match &self.year {
            Some(year) => format!("{} ({year})", self.title),
            None => self.title.clone(),
        }
    }
}

/// Turn release-style text into a filesystem-safe name.
///
/// Dots become spaces, anything that is not a word character, whitespace or
/// `-` is dropped, whitespace is normalized to plain spaces and the result
/// is trimmed.
pub fn sanitize(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '.' => Some(' '),
            c if c.is_whitespace() => Some(' '),
            c if c.is_alphanumeric() || c == '_' || c == '-' => Some(c),
            _ => None,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

fn tv_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(.*?)S([0-9]+)E([0-9]+)").expect("valid regex"))
}

fn four_digits() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]{4}").expect("valid regex"))
}

fn bracketed() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(.*?)\]").expect("valid regex"))
}

// Runs on sanitized text, so `(2019)` has already lost its parentheses.
fn show_year() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+?)\s+([0-9]{4})(?:\s|$)").expect("valid regex"))
}

fn split_extension(filename: &str) -> (&str, String) {
    let Some(idx) = filename.rfind('.') else {
        return (filename, String::new());
    };
    let (stem, ext) = (&filename[..idx], &filename[idx + 1..]);

    // Leading dots do not start an extension (`.bashrc`).
    if stem.trim_start_matches('.').is_empty() {
        return (filename, String::new());
    }
    if ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return (filename, String::new());
    }

    (stem, format!(".{}", ext.to_ascii_lowercase()))
}

fn extract_quality(name: &str) -> Option<String> {
    let caps = bracketed().captures(name)?;
    let mut quality: String = caps[1]
        .chars()
        .filter(|c| !c.is_control() && !is_format_char(*c) && !UNSAFE_SEGMENT_CHARS.contains(c))
        .collect();
    while quality.contains("..") {
        quality = quality.replace("..", ".");
    }
    let quality = truncate_bytes(&quality, MAX_QUALITY_BYTES)
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .to_string();
    (!quality.is_empty()).then_some(quality)
}

/// Invisible formatting and bidi controls that can disguise a file name.
fn is_format_char(c: char) -> bool {
    matches!(
        c,
        '\u{00AD}'
            | '\u{061C}'
            | '\u{180E}'
            | '\u{200B}'..='\u{200F}'
            | '\u{202A}'..='\u{202E}'
            | '\u{2060}'..='\u{2069}'
            | '\u{FEFF}'
    )
}

fn split_show_year(show: &str) -> (String, Option<String>) {
    match show_year().captures(show) {
        Some(caps) => (caps[1].trim().to_string(), Some(caps[2].to_string())),
        None => (show.to_string(), None),
    }
}

/// Parse a digit run as a plain integer; leading zeros are ignored.
fn parse_number(digits: &str) -> Option<u64> {
    let significant = digits.trim_start_matches('0');
    if significant.is_empty() {
        return Some(0);
    }
    significant.parse().ok()
}

fn clean_title(raw: &str) -> String {
    let sanitized = sanitize(raw);
    truncate_bytes(&sanitized, MAX_TITLE_BYTES).trim_end().to_string()
}

fn or_unknown(title: String) -> String {
    if title.is_empty() {
        UNKNOWN_TITLE.to_string()
    } else {
        title
    }
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
