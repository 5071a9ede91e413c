//! Last.fm adapter: social metadata (tags, similar artists) and page links.
//!
//! Requires an API key; without one the adapter reports itself disabled.
//! Lookups prefer the canonical identifier when the entity already carries
//! one, and otherwise go by name with the returned record verified against
//! the shared scorer before anything is accepted.

use std::sync::Arc;

use serde_json::Value;

use crate::config::MatchingConfig;
use crate::matching::{accepts, field_score};
use crate::model::{EntityKind, LinkSet, ProviderError, ProviderKind};
use crate::pacing::ProviderPacer;
use crate::providers::{build_url, get_json, FetchRequest, ProviderAdapter};

const API_BASE_URL: &str = "https://ws.audioscrobbler.com/2.0/";

pub struct LastFmAdapter {
    agent: ureq::Agent,
    pacer: Arc<ProviderPacer>,
    matching: MatchingConfig,
    api_key: String,
}

/// Last.fm signals "not found" with an error object rather than an empty
/// body. That is a conclusive miss, not a transient failure.
fn is_not_found(payload: &Value) -> bool {
    payload["error"].as_i64().is_some()
}

fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Collects `container.tag[].name` into a JSON array string.
fn tags_json(container: &Value) -> Option<String> {
    let names: Vec<String> = container["tag"]
        .as_array()?
        .iter()
        .filter_map(|tag| non_empty(&tag["name"]))
        .collect();
    if names.is_empty() {
        return None;
    }
    serde_json::to_string(&names).ok()
}

/// Collects `similar.artist[].name` into a JSON array string.
fn similar_json(similar: &Value) -> Option<String> {
    let names: Vec<String> = similar["artist"]
        .as_array()?
        .iter()
        .filter_map(|artist| non_empty(&artist["name"]))
        .collect();
    if names.is_empty() {
        return None;
    }
    serde_json::to_string(&names).ok()
}

fn artist_patch(payload: &Value) -> LinkSet {
    let artist = &payload["artist"];
    LinkSet {
        lastfm_url: non_empty(&artist["url"]),
        tags: tags_json(&artist["tags"]),
        similar: similar_json(&artist["similar"]),
        ..LinkSet::default()
    }
}

fn album_patch(payload: &Value) -> LinkSet {
    let album = &payload["album"];
    LinkSet {
        lastfm_url: non_empty(&album["url"]),
        tags: tags_json(&album["tags"]),
        ..LinkSet::default()
    }
}

impl LastFmAdapter {
    pub fn new(
        agent: ureq::Agent,
        pacer: Arc<ProviderPacer>,
        matching: MatchingConfig,
        api_key: String,
    ) -> Self {
        Self {
            agent,
            pacer,
            matching,
            api_key,
        }
    }

    fn request(&self, method: &str, params: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let mut full: Vec<(&str, &str)> = vec![
            ("method", method),
            ("api_key", &self.api_key),
            ("format", "json"),
        ];
        full.extend_from_slice(params);
        let url = build_url(API_BASE_URL, &full);
        get_json(&self.agent, &self.pacer, self.kind(), &url, &[])
    }

    /// Name-based lookups can land on a different record than asked for;
    /// the returned name has to score like a match before we trust it.
    fn name_verified(&self, requested: &str, returned: &Value) -> bool {
        match non_empty(returned) {
            Some(name) => accepts(field_score(requested, &name), &self.matching),
            None => false,
        }
    }
}

impl ProviderAdapter for LastFmAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LastFm
    }

    fn enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn supports(&self, kind: EntityKind) -> bool {
        matches!(kind, EntityKind::Artist | EntityKind::Album)
    }

    fn fetch_detail(&self, request: &FetchRequest<'_>) -> Result<LinkSet, ProviderError> {
        match request.kind {
            EntityKind::Artist => {
                let payload = match request.canonical_id {
                    Some(mbid) => self.request("artist.getInfo", &[("mbid", mbid)])?,
                    None => self.request("artist.getInfo", &[("artist", request.name)])?,
                };
                if is_not_found(&payload) {
                    return Ok(LinkSet::default());
                }
                if request.canonical_id.is_none()
                    && !self.name_verified(request.name, &payload["artist"]["name"])
                {
                    return Ok(LinkSet::default());
                }
                Ok(artist_patch(&payload))
            }
            EntityKind::Album => {
                let payload = match (request.canonical_id, request.secondary) {
                    (Some(mbid), _) => self.request("album.getInfo", &[("mbid", mbid)])?,
                    (None, Some(artist)) => self.request(
                        "album.getInfo",
                        &[("artist", artist), ("album", request.name)],
                    )?,
                    // Album lookups are artist-scoped; without either key
                    // there is nothing safe to ask for.
                    (None, None) => return Ok(LinkSet::default()),
                };
                if is_not_found(&payload) {
                    return Ok(LinkSet::default());
                }
                if request.canonical_id.is_none()
                    && !self.name_verified(request.name, &payload["album"]["name"])
                {
                    return Ok(LinkSet::default());
                }
                Ok(album_patch(&payload))
            }
            EntityKind::Label | EntityKind::Track => Ok(LinkSet::default()),
        }
    }
}
