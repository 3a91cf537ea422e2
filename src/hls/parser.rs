use crate::error::{Result, SieveError};
use crate::hls::model::{Manifest, ManifestEntry, Tag};
use std::fmt::Write;
use std::str::FromStr;
use tracing::debug;

const HEADER: &str = "#EXTM3U";
const END_LIST: &str = "#EXT-X-ENDLIST";

/// Parse playlist text into a [`Manifest`].
///
/// Fails when the text does not start with `#EXTM3U` or when a known tag
/// carries a value that cannot be decoded. Unknown tags and comments are
/// kept as [`Tag::Opaque`].
pub fn parse(content: &str) -> Result<Manifest> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty());

    match lines.next() {
        Some((_, HEADER)) => {}
        Some((number, _)) => {
            return Err(SieveError::Parse(format!(
                "line {number}: expected {HEADER} header"
            )));
        }
        None => return Err(SieveError::Parse("empty playlist".to_string())),
    }

    let mut manifest = Manifest::default();
    let mut pending: Vec<Tag> = Vec::new();

    for (number, line) in lines {
        if !line.starts_with('#') {
            manifest.entries.push(ManifestEntry {
                tags: std::mem::take(&mut pending),
                uri: Some(line.to_string()),
            });
            continue;
        }

        if line == END_LIST {
            manifest.end_list = true;
            continue;
        }

        let tag = parse_tag(line).map_err(|e| SieveError::Parse(format!("line {number}: {e}")))?;
        if tag.is_directive() {
            manifest.directives.push(tag);
        } else {
            pending.push(tag);
        }
    }

    if !pending.is_empty() {
        manifest.entries.push(ManifestEntry {
            tags: pending,
            uri: None,
        });
    }

    debug!(
        "Parsed playlist: {} directives, {} entries",
        manifest.directives.len(),
        manifest.entries.len()
    );
    Ok(manifest)
}

/// Serialize a [`Manifest`] back to playlist text.
///
/// Output is deterministic: directives first, then entries in order, then
/// the end marker. Every line is newline-terminated.
pub fn serialize(manifest: &Manifest) -> String {
    let mut out = String::with_capacity(64 + manifest.entries.len() * 64);
    let _ = writeln!(out, "{HEADER}");

    for tag in &manifest.directives {
        let _ = writeln!(out, "{tag}");
    }
    for entry in &manifest.entries {
        for tag in &entry.tags {
            let _ = writeln!(out, "{tag}");
        }
        if let Some(uri) = &entry.uri {
            let _ = writeln!(out, "{uri}");
        }
    }
    if manifest.end_list {
        let _ = writeln!(out, "{END_LIST}");
    }
    out
}

fn parse_tag(line: &str) -> std::result::Result<Tag, String> {
    let (name, value) = match line.split_once(':') {
        Some((name, value)) => (name, Some(value)),
        None => (line, None),
    };

    let tag = match (name, value) {
        ("#EXT-X-VERSION", Some(v)) => Tag::Version(number(name, v)?),
        ("#EXT-X-TARGETDURATION", Some(v)) => Tag::TargetDuration(number(name, v)?),
        ("#EXT-X-MEDIA-SEQUENCE", Some(v)) => Tag::MediaSequence(number(name, v)?),
        ("#EXT-X-DISCONTINUITY-SEQUENCE", Some(v)) => Tag::DiscontinuitySequence(number(name, v)?),
        ("#EXT-X-PLAYLIST-TYPE", Some(v @ ("VOD" | "EVENT"))) => Tag::PlaylistType(v.to_string()),
        ("#EXT-X-INDEPENDENT-SEGMENTS", None) => Tag::IndependentSegments,
        ("#EXTINF", Some(v)) => parse_inf(v)?,
        ("#EXT-X-BYTERANGE", Some(v)) => Tag::ByteRange(non_empty(name, v)?),
        ("#EXT-X-DISCONTINUITY", None) => Tag::Discontinuity,
        ("#EXT-X-PROGRAM-DATE-TIME", Some(v)) => Tag::ProgramDateTime(non_empty(name, v)?),
        ("#EXT-X-KEY", Some(v)) => Tag::Key(non_empty(name, v)?),
        ("#EXT-X-MAP", Some(v)) => Tag::Map(non_empty(name, v)?),
        ("#EXT-X-DATERANGE", Some(v)) => Tag::DateRange(non_empty(name, v)?),
        ("#EXT-X-STREAM-INF", Some(v)) => Tag::StreamInf(non_empty(name, v)?),
        ("#EXT-X-I-FRAME-STREAM-INF", Some(v)) => Tag::IFrameStreamInf(non_empty(name, v)?),
        ("#EXT-X-MEDIA", Some(v)) => Tag::Media(non_empty(name, v)?),
        ("#EXT-X-SESSION-KEY", Some(v)) => Tag::SessionKey(non_empty(name, v)?),
        ("#EXT-X-PART", Some(v)) => Tag::Part(non_empty(name, v)?),
        ("#EXT-X-PRELOAD-HINT", Some(v)) => Tag::PreloadHint(non_empty(name, v)?),
        ("#EXT-X-RENDITION-REPORT", Some(v)) => Tag::RenditionReport(non_empty(name, v)?),
        ("#EXT-X-CUE-OUT", v) => Tag::CueOut(v.map(str::to_string)),
        ("#EXT-X-CUE-OUT-CONT", Some(v)) => Tag::CueOutCont(v.to_string()),
        ("#EXT-X-CUE-IN", None) => Tag::CueIn,
        (
            "#EXT-X-VERSION"
            | "#EXT-X-TARGETDURATION"
            | "#EXT-X-MEDIA-SEQUENCE"
            | "#EXT-X-DISCONTINUITY-SEQUENCE"
            | "#EXT-X-PLAYLIST-TYPE"
            | "#EXT-X-INDEPENDENT-SEGMENTS"
            | "#EXTINF"
            | "#EXT-X-BYTERANGE"
            | "#EXT-X-DISCONTINUITY"
            | "#EXT-X-PROGRAM-DATE-TIME"
            | "#EXT-X-KEY"
            | "#EXT-X-MAP"
            | "#EXT-X-DATERANGE"
            | "#EXT-X-STREAM-INF"
            | "#EXT-X-I-FRAME-STREAM-INF"
            | "#EXT-X-MEDIA"
            | "#EXT-X-SESSION-KEY"
            | "#EXT-X-PART"
            | "#EXT-X-PRELOAD-HINT"
            | "#EXT-X-RENDITION-REPORT"
            | "#EXT-X-CUE-OUT-CONT"
            | "#EXT-X-CUE-IN",
            _,
        ) => return Err(format!("malformed {} tag: {line}", &name[1..])),
        _ => Tag::Opaque(line.to_string()),
    };
    Ok(tag)
}

fn parse_inf(value: &str) -> std::result::Result<Tag, String> {
    let (duration, title) = value.split_once(',').unwrap_or((value, ""));
    let duration: f64 = duration
        .trim()
        .parse()
        .map_err(|_| format!("invalid EXTINF duration: {duration}"))?;
    if !duration.is_finite() || duration < 0.0 {
        return Err(format!("invalid EXTINF duration: {duration}"));
    }
    Ok(Tag::Inf {
        duration,
        title: title.to_string(),
    })
}

fn number<T: FromStr>(name: &str, value: &str) -> std::result::Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("invalid {} value: {value}", &name[1..]))
}

fn non_empty(name: &str, value: &str) -> std::result::Result<String, String> {
    if value.trim().is_empty() {
        return Err(format!("{} requires a value", &name[1..]));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXT-X-MEDIA-SEQUENCE:42

#EXTINF:10.0,
seg1.ts
#EXT-X-DISCONTINUITY
#EXT-X-CUE-OUT:30
#EXTINF:9.5,ad
ad_001.ts
#EXT-X-CUE-IN
#EXT-X-DISCONTINUITY
#EXT-X-PROGRAM-DATE-TIME:2026-01-01T00:00:10.000Z
#EXTINF:10,
seg2.ts
#EXT-X-ENDLIST
";

    #[test]
    fn parses_directives_and_entries_in_order() {
        let manifest = parse(MEDIA).unwrap();
        assert_eq!(manifest.version(), Some(3));
        assert_eq!(manifest.target_duration(), Some(10));
        assert!(manifest.end_list);
        assert_eq!(
            manifest.uris().collect::<Vec<_>>(),
            vec!["seg1.ts", "ad_001.ts", "seg2.ts"]
        );
        assert_eq!(
            manifest.entries[1].tags,
            vec![
                Tag::Discontinuity,
                Tag::CueOut(Some("30".into())),
                Tag::Inf {
                    duration: 9.5,
                    title: "ad".into()
                },
            ]
        );
    }

    #[test]
    fn round_trip_preserves_entries() {
        let manifest = parse(MEDIA).unwrap();
        let reparsed = parse(&serialize(&manifest)).unwrap();
        assert_eq!(manifest, reparsed);
    }

    #[test]
    fn serialize_is_deterministic() {
        let manifest = parse(MEDIA).unwrap();
        assert_eq!(serialize(&manifest), serialize(&manifest.clone()));
        assert!(serialize(&manifest).starts_with("#EXTM3U\n#EXT-X-VERSION:3\n"));
        assert!(serialize(&manifest).ends_with("seg2.ts\n#EXT-X-ENDLIST\n"));
    }

    #[test]
    fn unknown_tags_are_copied_through() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES\n# a comment\n#EXTINF:4,\nlive1.ts\n";
        let manifest = parse(text).unwrap();
        assert_eq!(
            manifest.entries[0].tags[0],
            Tag::Opaque("#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES".into())
        );
        let out = serialize(&manifest);
        assert!(out.contains("#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES\n"));
        assert!(out.contains("# a comment\n"));
    }

    #[test]
    fn low_latency_tags_are_typed() {
        let text = "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES\n#EXT-X-PART-INF:PART-TARGET=1.0\n#EXT-X-PART:DURATION=1.0,URI=\"seg1.part0.mp4\"\n#EXTINF:4,\nseg1.mp4\n#EXT-X-PART:DURATION=1.0,URI=\"seg2.part0.mp4\"\n#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"seg2.part1.mp4\"\n#EXT-X-RENDITION-REPORT:URI=\"../lo/index.m3u8\",LAST-MSN=2\n";
        let manifest = parse(text).unwrap();
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(
            manifest.entries[0].tags[2],
            Tag::Part("DURATION=1.0,URI=\"seg1.part0.mp4\"".into())
        );
        assert_eq!(
            manifest.entries[1].tags,
            vec![
                Tag::Part("DURATION=1.0,URI=\"seg2.part0.mp4\"".into()),
                Tag::PreloadHint("TYPE=PART,URI=\"seg2.part1.mp4\"".into()),
                Tag::RenditionReport("URI=\"../lo/index.m3u8\",LAST-MSN=2".into()),
            ]
        );
        assert_eq!(parse(&serialize(&manifest)).unwrap(), manifest);
        assert!(parse("#EXTM3U\n#EXT-X-PART:\n").is_err());
    }

    #[test]
    fn session_key_is_a_directive() {
        let text = "#EXTM3U\n#EXT-X-SESSION-KEY:METHOD=AES-128,URI=\"keys/k.key\"\n#EXT-X-STREAM-INF:BANDWIDTH=1\nlo.m3u8\n";
        let manifest = parse(text).unwrap();
        assert_eq!(
            manifest.directives,
            vec![Tag::SessionKey("METHOD=AES-128,URI=\"keys/k.key\"".into())]
        );
    }

    #[test]
    fn trailing_tags_form_uri_less_entry() {
        let text = "#EXTM3U\n#EXTINF:10,\nseg1.ts\n#EXT-X-CUE-OUT:20\n";
        let manifest = parse(text).unwrap();
        assert_eq!(manifest.entries.len(), 2);
        assert_eq!(manifest.entries[1].uri, None);
        assert_eq!(manifest.entries[1].tags, vec![Tag::CueOut(Some("20".into()))]);
        assert_eq!(parse(&serialize(&manifest)).unwrap(), manifest);
    }

    #[test]
    fn master_playlist_variants() {
        let text = "#EXTM3U\n#EXT-X-INDEPENDENT-SEGMENTS\n#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"en\",URI=\"audio/en.m3u8\"\n#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=1280x720\nhi/index.m3u8\n#EXT-X-STREAM-INF:BANDWIDTH=640000\nlo/index.m3u8\n";
        let manifest = parse(text).unwrap();
        assert!(manifest.is_master());
        assert_eq!(manifest.directives.len(), 2);
        assert_eq!(manifest.segment_count(), 2);
    }

    #[test]
    fn handles_crlf_and_bom() {
        let text = "\u{feff}#EXTM3U\r\n#EXTINF:6,\r\nseg1.ts\r\n";
        let manifest = parse(text).unwrap();
        assert_eq!(manifest.uris().collect::<Vec<_>>(), vec!["seg1.ts"]);
    }

    #[test]
    fn rejects_missing_header() {
        let err = parse("#EXTINF:10,\nseg1.ts\n").unwrap_err();
        assert_eq!(err.code(), "PARSE_ERROR");

        assert!(parse("<html>not found</html>").is_err());
        assert!(parse("").is_err());
        assert!(parse("\n\n").is_err());
    }

    #[test]
    fn rejects_malformed_known_tags() {
        assert!(parse("#EXTM3U\n#EXT-X-TARGETDURATION:ten\n").is_err());
        assert!(parse("#EXTM3U\n#EXTINF:abc,\nseg.ts\n").is_err());
        assert!(parse("#EXTM3U\n#EXTINF:-1,\nseg.ts\n").is_err());
        assert!(parse("#EXTM3U\n#EXTINF:inf,\nseg.ts\n").is_err());
        assert!(parse("#EXTM3U\n#EXT-X-DISCONTINUITY:1\n").is_err());
        assert!(parse("#EXTM3U\n#EXT-X-KEY:\n").is_err());
        assert!(parse("#EXTM3U\n#EXT-X-PLAYLIST-TYPE:LIVE\n").is_err());
    }

    #[test]
    fn extinf_without_comma_is_accepted() {
        let manifest = parse("#EXTM3U\n#EXTINF:5\nseg.ts\n").unwrap();
        assert_eq!(
            manifest.entries[0].tags[0],
            Tag::Inf {
                duration: 5.0,
                title: String::new()
            }
        );
    }
}
