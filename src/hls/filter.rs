//! Ad segment removal.
//!
//! Entries whose URI matches any enabled [`FilterRule`] are dropped, and so
//! are partial-segment and preload-hint tags whose own URI matches. Tags on
//! a dropped entry that outlive it (boundary markers, key and map state) are
//! carried onto the next surviving entry and settled there, so the output
//! has no markers that only bounded removed content.

use crate::error::{Result, SieveError};
use crate::hls::model::{Manifest, ManifestEntry, Tag, TagKind};
use regex::{Regex, RegexBuilder};
use std::sync::Arc;
use tracing::debug;

/// Patterns used when none are configured.
pub const DEFAULT_PATTERNS: &[&str] = &[
    "/ad_/i",
    "/\\/ads?\\//i",
    "/advert/i",
    "/doubleclick/i",
    "/preroll|midroll|postroll/i",
];

/// A single URI pattern with an enable flag.
///
/// Patterns are either bare regular expressions (`ad_\d+\.ts`) or the
/// delimited form `/body/flags`, where flags are `i`, `m`, `s`, `x` and
/// `g` (accepted and ignored).
#[derive(Debug, Clone)]
pub struct FilterRule {
    source: String,
    regex: Regex,
    pub enabled: bool,
}

impl FilterRule {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = compile(pattern)?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
            enabled: true,
        })
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn pattern(&self) -> &str {
        &self.source
    }

    /// Whether the rule is enabled and its pattern matches anywhere in `uri`.
    pub fn matches(&self, uri: &str) -> bool {
        self.enabled && self.regex.is_match(uri)
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    let invalid = |reason: String| SieveError::Validation(format!("invalid ad pattern {pattern:?}: {reason}"));

    let delimited = pattern
        .strip_prefix('/')
        .and_then(|rest| rest.rsplit_once('/'))
        .filter(|(body, _)| !body.is_empty());

    let Some((body, flags)) = delimited else {
        return Regex::new(pattern).map_err(|e| invalid(e.to_string()));
    };

    let mut builder = RegexBuilder::new(body);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'g' => &mut builder,
            other => return Err(invalid(format!("unsupported flag '{other}'"))),
        };
    }
    builder.build().map_err(|e| invalid(e.to_string()))
}

/// Process-wide ad filter configuration, immutable after load.
#[derive(Debug, Clone)]
pub struct AdFilter {
    enabled: bool,
    rules: Arc<[FilterRule]>,
}

impl AdFilter {
    pub fn new(enabled: bool, rules: Vec<FilterRule>) -> Self {
        Self {
            enabled,
            rules: rules.into(),
        }
    }

    /// Compile every pattern in order; the first invalid one fails the load.
    pub fn from_patterns<S: AsRef<str>>(enabled: bool, patterns: &[S]) -> Result<Self> {
        let rules = patterns
            .iter()
            .map(|p| FilterRule::new(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(enabled, rules))
    }

    pub fn disabled() -> Self {
        Self::new(false, Vec::new())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn apply(&self, manifest: Manifest) -> Manifest {
        if !self.enabled {
            return manifest;
        }
        filter(manifest, &self.rules)
    }
}

fn is_ad(uri: &str, rules: &[FilterRule]) -> bool {
    rules.iter().any(|rule| rule.matches(uri))
}

/// Partial segments and preload hints name media of their own.
fn is_ad_part(tag: &Tag, rules: &[FilterRule]) -> bool {
    matches!(tag.kind(), TagKind::Part | TagKind::PreloadHint)
        && tag.uri().is_some_and(|uri| is_ad(uri, rules))
}

/// Remove every entry whose URI matches an enabled rule.
///
/// Pure function of its inputs. With no enabled rules, or when nothing
/// matches, the manifest is returned unchanged.
pub fn filter(mut manifest: Manifest, rules: &[FilterRule]) -> Manifest {
    if !rules.iter().any(|r| r.enabled) {
        return manifest;
    }

    let entries = std::mem::take(&mut manifest.entries);
    let mut kept: Vec<ManifestEntry> = Vec::with_capacity(entries.len());
    let mut carried: Vec<Tag> = Vec::new();
    let mut removed = 0usize;

    for mut entry in entries {
        if entry.uri.as_deref().is_some_and(|uri| is_ad(uri, rules)) {
            removed += 1;
            carried.extend(entry.tags.into_iter().filter(Tag::outlives_segment));
            continue;
        }

        let parts_before = entry.tags.len();
        entry.tags.retain(|t| !is_ad_part(t, rules));
        if entry.tags.len() != parts_before && entry.tags.is_empty() && entry.uri.is_none() {
            continue;
        }

        if !carried.is_empty() {
            let after_segment = kept.iter().any(|e| e.uri.is_some());
            let before_segment = entry.uri.is_some();
            entry.tags = settle(
                std::mem::take(&mut carried),
                std::mem::take(&mut entry.tags),
                after_segment,
                before_segment,
            );
            if entry.tags.is_empty() && entry.uri.is_none() {
                continue;
            }
        }
        kept.push(entry);
    }

    if removed > 0 {
        debug!("Removed {} ad entries", removed);
    }
    manifest.entries = kept;
    manifest
}

/// Merge tags carried from removed entries into the next surviving entry.
fn settle(carried: Vec<Tag>, own: Vec<Tag>, after_segment: bool, before_segment: bool) -> Vec<Tag> {
    let mut tags: Vec<(bool, Tag)> = carried
        .into_iter()
        .map(|t| (true, t))
        .chain(own.into_iter().map(|t| (false, t)))
        .collect();

    // A break opened inside removed content and closed here was all ads.
    if let Some(out) = tags.iter().position(|(c, t)| *c && t.kind() == TagKind::CueOut)
        && let Some(cue_in) = tags[out..].iter().position(|(_, t)| t.kind() == TagKind::CueIn)
    {
        tags.remove(out + cue_in);
        tags.remove(out);
    }

    // Discontinuities on both sides of the removed run cancel out.
    if has(&tags, TagKind::Discontinuity, true) {
        if has(&tags, TagKind::Discontinuity, false) {
            tags.retain(|(_, t)| t.kind() != TagKind::Discontinuity);
        } else {
            keep_first(&mut tags, TagKind::Discontinuity);
        }
    }

    if !after_segment {
        tags.retain(|(c, t)| !(*c && t.kind() == TagKind::Discontinuity));
    }
    if !before_segment {
        tags.retain(|(c, _)| !*c);
    }

    keep_first(&mut tags, TagKind::CueOut);
    keep_first(&mut tags, TagKind::CueIn);
    keep_last(&mut tags, TagKind::Key);
    keep_last(&mut tags, TagKind::Map);

    tags.into_iter().map(|(_, t)| t).collect()
}

fn has(tags: &[(bool, Tag)], kind: TagKind, carried: bool) -> bool {
    tags.iter().any(|(c, t)| *c == carried && t.kind() == kind)
}

fn keep_first(tags: &mut Vec<(bool, Tag)>, kind: TagKind) {
    let mut seen = false;
    tags.retain(|(_, t)| {
        if t.kind() != kind {
            return true;
        }
        !std::mem::replace(&mut seen, true)
    });
}

fn keep_last(tags: &mut Vec<(bool, Tag)>, kind: TagKind) {
    if let Some(last) = tags.iter().rposition(|(_, t)| t.kind() == kind) {
        let mut idx = 0;
        tags.retain(|(_, t)| {
            let keep = t.kind() != kind || idx == last;
            idx += 1;
            keep
        });
    }
}
