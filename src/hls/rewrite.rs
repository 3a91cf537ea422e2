//! URI rewriting so playback keeps flowing through the proxy.
//!
//! Nested playlists (variants, renditions, rendition reports) are routed
//! back through `/proxy` so they get filtered too. Media segments, partial
//! segments, preload hints, keys and init maps resolve to absolute upstream
//! URLs, or to `/segment` when segment relaying is on.

use crate::hls::model::{Manifest, Tag, uri_attribute_range};
use url::{Url, form_urlencoded};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Playlist,
    Segment,
}

/// Where rewritten URIs point.
#[derive(Debug, Clone)]
pub struct RewritePolicy {
    /// Public origin of this proxy, without trailing slash.
    pub base_url: String,
    /// Route media segments through `/segment` instead of pointing at upstream.
    pub proxy_segments: bool,
}

impl RewritePolicy {
    pub fn new(base_url: &str, proxy_segments: bool) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            proxy_segments,
        }
    }

    /// Proxy URL that fetches and filters `target` through this service.
    pub fn playlist_url(&self, target: &str) -> String {
        format!("{}/proxy?url={}", self.base_url, encode(target))
    }

    pub fn segment_url(&self, target: &str) -> String {
        format!("{}/segment?url={}", self.base_url, encode(target))
    }

    fn route(&self, upstream: &Url, uri: &str, target: Target) -> Option<String> {
        let resolved = upstream.join(uri).ok()?;
        if !matches!(resolved.scheme(), "http" | "https") {
            return None;
        }
        Some(match target {
            Target::Playlist => self.playlist_url(resolved.as_str()),
            Target::Segment if self.proxy_segments => self.segment_url(resolved.as_str()),
            Target::Segment => resolved.into(),
        })
    }
}

fn encode(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

fn is_playlist_uri(uri: &str) -> bool {
    let path = uri.split(['?', '#']).next().unwrap_or(uri).to_ascii_lowercase();
    path.ends_with(".m3u8") || path.ends_with(".m3u")
}

/// Rewrite every URI in `manifest` relative to the upstream playlist URL.
///
/// URIs that do not resolve to http(s) (`skd://`, `data:`) are left as-is.
pub fn rewrite(mut manifest: Manifest, upstream: &Url, policy: &RewritePolicy) -> Manifest {
    for tag in &mut manifest.directives {
        rewrite_tag(tag, upstream, policy);
    }

    for entry in &mut manifest.entries {
        for tag in &mut entry.tags {
            rewrite_tag(tag, upstream, policy);
        }

        let variant = entry.is_variant();
        if let Some(uri) = entry.uri.as_mut() {
            let target = if variant || is_playlist_uri(uri) {
                Target::Playlist
            } else {
                Target::Segment
            };
            if let Some(routed) = policy.route(upstream, uri, target) {
                *uri = routed;
            }
        }
    }

    manifest
}

fn rewrite_tag(tag: &mut Tag, upstream: &Url, policy: &RewritePolicy) {
    let (attrs, target) = match tag {
        Tag::Key(attrs)
        | Tag::SessionKey(attrs)
        | Tag::Map(attrs)
        | Tag::Part(attrs)
        | Tag::PreloadHint(attrs) => (attrs, Target::Segment),
        Tag::Media(attrs) | Tag::IFrameStreamInf(attrs) | Tag::RenditionReport(attrs) => {
            (attrs, Target::Playlist)
        }
        _ => return,
    };

    let Some(range) = uri_attribute_range(attrs) else {
        return;
    };
    if let Some(routed) = policy.route(upstream, &attrs[range.clone()], target) {
        attrs.replace_range(range, &routed);
    }
}
