//! Ordered entry model for HLS playlists.
//!
//! A [`Manifest`] keeps playlist-level directives apart from the ordered
//! [`ManifestEntry`] groups. Each entry is the run of tags leading up to a
//! URI line (or the trailing run of tags with no URI). Tags the model does
//! not understand are kept verbatim as [`Tag::Opaque`].

use regex::Regex;
use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;

static URI_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"URI="([^"]*)""#).expect("URI attribute regex is valid")
});

/// Byte range of the quoted `URI` attribute value in an attribute list.
pub(crate) fn uri_attribute_range(attrs: &str) -> Option<Range<usize>> {
    URI_ATTRIBUTE
        .captures(attrs)
        .and_then(|c| c.get(1))
        .map(|m| m.range())
}

/// One tag or comment line of a playlist.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Version(u32),
    TargetDuration(u64),
    MediaSequence(u64),
    DiscontinuitySequence(u64),
    PlaylistType(String),
    IndependentSegments,
    /// `#EXTINF:<duration>,<title>`
    Inf { duration: f64, title: String },
    ByteRange(String),
    Discontinuity,
    ProgramDateTime(String),
    /// Attribute-list tags, stored as the raw attribute string.
    Key(String),
    Map(String),
    DateRange(String),
    StreamInf(String),
    IFrameStreamInf(String),
    Media(String),
    SessionKey(String),
    /// Low-latency partial segment of the following (or in-progress) segment.
    Part(String),
    PreloadHint(String),
    RenditionReport(String),
    /// `#EXT-X-CUE-OUT[:<value>]`, value kept verbatim.
    CueOut(Option<String>),
    CueOutCont(String),
    CueIn,
    /// Any other tag or comment, copied through unchanged.
    Opaque(String),
}

/// Discriminant used when comparing tags by kind rather than value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Version,
    TargetDuration,
    MediaSequence,
    DiscontinuitySequence,
    PlaylistType,
    IndependentSegments,
    Inf,
    ByteRange,
    Discontinuity,
    ProgramDateTime,
    Key,
    Map,
    DateRange,
    StreamInf,
    IFrameStreamInf,
    Media,
    SessionKey,
    Part,
    PreloadHint,
    RenditionReport,
    CueOut,
    CueOutCont,
    CueIn,
    Opaque,
}

impl Tag {
    pub fn kind(&self) -> TagKind {
        match self {
            Self::Version(_) => TagKind::Version,
            Self::TargetDuration(_) => TagKind::TargetDuration,
            Self::MediaSequence(_) => TagKind::MediaSequence,
            Self::DiscontinuitySequence(_) => TagKind::DiscontinuitySequence,
            Self::PlaylistType(_) => TagKind::PlaylistType,
            Self::IndependentSegments => TagKind::IndependentSegments,
            Self::Inf { .. } => TagKind::Inf,
            Self::ByteRange(_) => TagKind::ByteRange,
            Self::Discontinuity => TagKind::Discontinuity,
            Self::ProgramDateTime(_) => TagKind::ProgramDateTime,
            Self::Key(_) => TagKind::Key,
            Self::Map(_) => TagKind::Map,
            Self::DateRange(_) => TagKind::DateRange,
            Self::StreamInf(_) => TagKind::StreamInf,
            Self::IFrameStreamInf(_) => TagKind::IFrameStreamInf,
            Self::Media(_) => TagKind::Media,
            Self::SessionKey(_) => TagKind::SessionKey,
            Self::Part(_) => TagKind::Part,
            Self::PreloadHint(_) => TagKind::PreloadHint,
            Self::RenditionReport(_) => TagKind::RenditionReport,
            Self::CueOut(_) => TagKind::CueOut,
            Self::CueOutCont(_) => TagKind::CueOutCont,
            Self::CueIn => TagKind::CueIn,
            Self::Opaque(_) => TagKind::Opaque,
        }
    }

    /// Tags that describe the playlist as a whole rather than one segment.
    pub fn is_directive(&self) -> bool {
        matches!(
            self.kind(),
            TagKind::Version
                | TagKind::TargetDuration
                | TagKind::MediaSequence
                | TagKind::DiscontinuitySequence
                | TagKind::PlaylistType
                | TagKind::IndependentSegments
                | TagKind::Media
                | TagKind::IFrameStreamInf
                | TagKind::SessionKey
        )
    }

    /// Value of the `URI` attribute for attribute-list tags that carry one.
    pub fn uri(&self) -> Option<&str> {
        let attrs = match self {
            Self::Key(a)
            | Self::Map(a)
            | Self::Media(a)
            | Self::IFrameStreamInf(a)
            | Self::SessionKey(a)
            | Self::Part(a)
            | Self::PreloadHint(a)
            | Self::RenditionReport(a) => a,
            _ => return None,
        };
        uri_attribute_range(attrs).map(|range| &attrs[range])
    }

    /// Tags whose effect outlives the segment they precede: boundary markers
    /// and the key/map state that applies to every following segment.
    pub fn outlives_segment(&self) -> bool {
        matches!(
            self.kind(),
            TagKind::Discontinuity | TagKind::CueOut | TagKind::CueIn | TagKind::Key | TagKind::Map
        )
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Version(v) => write!(f, "#EXT-X-VERSION:{v}"),
            Self::TargetDuration(d) => write!(f, "#EXT-X-TARGETDURATION:{d}"),
            Self::MediaSequence(s) => write!(f, "#EXT-X-MEDIA-SEQUENCE:{s}"),
            Self::DiscontinuitySequence(s) => write!(f, "#EXT-X-DISCONTINUITY-SEQUENCE:{s}"),
            Self::PlaylistType(t) => write!(f, "#EXT-X-PLAYLIST-TYPE:{t}"),
            Self::IndependentSegments => f.write_str("#EXT-X-INDEPENDENT-SEGMENTS"),
            Self::Inf { duration, title } => write!(f, "#EXTINF:{duration},{title}"),
            Self::ByteRange(r) => write!(f, "#EXT-X-BYTERANGE:{r}"),
            Self::Discontinuity => f.write_str("#EXT-X-DISCONTINUITY"),
            Self::ProgramDateTime(t) => write!(f, "#EXT-X-PROGRAM-DATE-TIME:{t}"),
            Self::Key(a) => write!(f, "#EXT-X-KEY:{a}"),
            Self::Map(a) => write!(f, "#EXT-X-MAP:{a}"),
            Self::DateRange(a) => write!(f, "#EXT-X-DATERANGE:{a}"),
            Self::StreamInf(a) => write!(f, "#EXT-X-STREAM-INF:{a}"),
            Self::IFrameStreamInf(a) => write!(f, "#EXT-X-I-FRAME-STREAM-INF:{a}"),
            Self::Media(a) => write!(f, "#EXT-X-MEDIA:{a}"),
            Self::SessionKey(a) => write!(f, "#EXT-X-SESSION-KEY:{a}"),
            Self::Part(a) => write!(f, "#EXT-X-PART:{a}"),
            Self::PreloadHint(a) => write!(f, "#EXT-X-PRELOAD-HINT:{a}"),
            Self::RenditionReport(a) => write!(f, "#EXT-X-RENDITION-REPORT:{a}"),
            Self::CueOut(Some(v)) => write!(f, "#EXT-X-CUE-OUT:{v}"),
            Self::CueOut(None) => f.write_str("#EXT-X-CUE-OUT"),
            Self::CueOutCont(v) => write!(f, "#EXT-X-CUE-OUT-CONT:{v}"),
            Self::CueIn => f.write_str("#EXT-X-CUE-IN"),
            Self::Opaque(line) => f.write_str(line),
        }
    }
}

/// One line-group of the playlist: the tags preceding a URI, plus the URI.
///
/// Only the final entry of a manifest may lack a URI.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ManifestEntry {
    pub tags: Vec<Tag>,
    pub uri: Option<String>,
}

impl ManifestEntry {
    pub fn segment(tags: Vec<Tag>, uri: impl Into<String>) -> Self {
        Self {
            tags,
            uri: Some(uri.into()),
        }
    }

    /// Whether this entry references a nested playlist (master playlist variant).
    pub fn is_variant(&self) -> bool {
        self.tags.iter().any(|t| t.kind() == TagKind::StreamInf)
    }

    pub fn has_tag(&self, kind: TagKind) -> bool {
        self.tags.iter().any(|t| t.kind() == kind)
    }
}

/// Parsed playlist: directives plus the ordered entry sequence.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Manifest {
    pub directives: Vec<Tag>,
    pub entries: Vec<ManifestEntry>,
    /// `#EXT-X-ENDLIST` was present.
    pub end_list: bool,
}

impl Manifest {
    pub fn version(&self) -> Option<u32> {
        self.directives.iter().find_map(|t| match t {
            Tag::Version(v) => Some(*v),
            _ => None,
        })
    }

    pub fn target_duration(&self) -> Option<u64> {
        self.directives.iter().find_map(|t| match t {
            Tag::TargetDuration(d) => Some(*d),
            _ => None,
        })
    }

    pub fn is_master(&self) -> bool {
        self.entries.iter().any(ManifestEntry::is_variant)
    }

    /// Entries that carry a URI, in playback order.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().filter_map(|e| e.uri.as_deref())
    }

    pub fn segment_count(&self) -> usize {
        self.uris().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_are_exposed_through_accessors() {
        let manifest = Manifest {
            directives: vec![Tag::Version(3), Tag::TargetDuration(10)],
            entries: vec![],
            end_list: true,
        };
        assert_eq!(manifest.version(), Some(3));
        assert_eq!(manifest.target_duration(), Some(10));
        assert!(!manifest.is_master());
    }

    #[test]
    fn cue_out_renders_with_and_without_value() {
        assert_eq!(Tag::CueOut(Some("30".into())).to_string(), "#EXT-X-CUE-OUT:30");
        assert_eq!(Tag::CueOut(None).to_string(), "#EXT-X-CUE-OUT");
    }

    #[test]
    fn extinf_renders_shortest_duration() {
        let tag = Tag::Inf {
            duration: 10.0,
            title: String::new(),
        };
        assert_eq!(tag.to_string(), "#EXTINF:10,");

        let tag = Tag::Inf {
            duration: 9.009,
            title: "intro".into(),
        };
        assert_eq!(tag.to_string(), "#EXTINF:9.009,intro");
    }

    #[test]
    fn uri_attribute_of_part_tags() {
        let part = Tag::Part("DURATION=1.0,URI=\"part1.mp4\",INDEPENDENT=YES".into());
        assert_eq!(part.uri(), Some("part1.mp4"));
        assert_eq!(Tag::Key("METHOD=NONE".into()).uri(), None);
        assert_eq!(Tag::CueIn.uri(), None);
    }

    #[test]
    fn variant_detection() {
        let entry = ManifestEntry::segment(
            vec![Tag::StreamInf("BANDWIDTH=800000".into())],
            "low/index.m3u8",
        );
        assert!(entry.is_variant());
        assert!(!ManifestEntry::segment(vec![], "seg1.ts").is_variant());
    }
}
