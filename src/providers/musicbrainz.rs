//! MusicBrainz adapter: the canonical-ID directory.
//!
//! Resolves MBIDs through the WS/2 search endpoints and builds the
//! deterministic entity URL once an MBID is known. Origin (area) comes from
//! the MBID lookup, never from a repeated name search.

use std::sync::Arc;

use serde_json::Value;

use crate::config::MatchingConfig;
use crate::matching::{accepts, early_stop};
use crate::model::{EntityKind, LinkSet, ProviderError, ProviderKind};
use crate::pacing::ProviderPacer;
use crate::providers::{
    best_candidate, build_url, get_json, Candidate, FetchRequest, ProviderAdapter, ResolvedId,
};

const WS_BASE_URL: &str = "https://musicbrainz.org/ws/2";
const ENTITY_BASE_URL: &str = "https://musicbrainz.org";
const SEARCH_LIMIT: &str = "8";

pub struct MusicBrainzAdapter {
    agent: ureq::Agent,
    pacer: Arc<ProviderPacer>,
    matching: MatchingConfig,
}

fn entity_path(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Artist => "artist",
        EntityKind::Album => "release-group",
        EntityKind::Label => "label",
        EntityKind::Track => "recording",
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', " "))
}

fn artist_query(name: &str) -> String {
    format!("artist:{}", quote(name))
}

fn album_query(artist: &str, album: &str) -> String {
    format!("releasegroup:{} AND artist:{}", quote(album), quote(artist))
}

/// Lucene queries tried in order, most precise first.
fn search_queries(kind: EntityKind, name: &str, secondary: Option<&str>) -> Vec<String> {
    let mut queries = Vec::new();
    match kind {
        EntityKind::Artist => queries.push(artist_query(name)),
        EntityKind::Label => queries.push(format!("label:{}", quote(name))),
        EntityKind::Album => {
            if let Some(artist) = secondary {
                queries.push(album_query(artist, name));
            }
            queries.push(format!("releasegroup:{}", quote(name)));
        }
        EntityKind::Track => {
            if let Some(album) = secondary {
                queries.push(format!(
                    "recording:{} AND release:{}",
                    quote(name),
                    quote(album)
                ));
            }
            queries.push(format!("recording:{}", quote(name)));
        }
    }
    queries.push(name.replace('"', " "));
    queries.dedup();
    queries
}

fn artist_credit_name(item: &Value) -> Option<String> {
    item["artist-credit"]
        .as_array()
        .and_then(|credits| credits.first())
        .and_then(|credit| credit["name"].as_str())
        .map(str::to_string)
}

/// Extracts scored-candidate inputs from one WS/2 search payload.
fn search_candidates(kind: EntityKind, payload: &Value) -> Vec<Candidate> {
    let (list_key, name_key) = match kind {
        EntityKind::Artist => ("artists", "name"),
        EntityKind::Album => ("release-groups", "title"),
        EntityKind::Label => ("labels", "name"),
        EntityKind::Track => ("recordings", "title"),
    };
    let mut out = Vec::new();
    let Some(items) = payload[list_key].as_array() else {
        return out;
    };
    for item in items {
        let Some(id) = item["id"].as_str().map(str::trim).filter(|id| !id.is_empty()) else {
            continue;
        };
        let Some(name) = item[name_key].as_str().map(str::trim).filter(|n| !n.is_empty()) else {
            continue;
        };
        out.push(Candidate {
            name: name.to_string(),
            secondary: artist_credit_name(item),
            canonical_id: Some(id.to_string()),
            url: Some(format!("{ENTITY_BASE_URL}/{}/{id}", entity_path(kind))),
        });
    }
    out
}

fn area_name(payload: &Value) -> Option<String> {
    ["area", "begin-area"].into_iter().find_map(|key| {
        payload[key]["name"]
            .as_str()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    })
}

impl MusicBrainzAdapter {
    pub fn new(agent: ureq::Agent, pacer: Arc<ProviderPacer>, matching: MatchingConfig) -> Self {
        Self {
            agent,
            pacer,
            matching,
        }
    }

    fn search(&self, kind: EntityKind, query: &str) -> Result<Vec<Candidate>, ProviderError> {
        let url = build_url(
            &format!("{WS_BASE_URL}/{}", entity_path(kind)),
            &[("query", query), ("fmt", "json"), ("limit", SEARCH_LIMIT)],
        );
        let payload = get_json(&self.agent, &self.pacer, self.kind(), &url, &[])?;
        Ok(search_candidates(kind, &payload))
    }
}

impl ProviderAdapter for MusicBrainzAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MusicBrainz
    }

    fn supports(&self, _kind: EntityKind) -> bool {
        true
    }

    fn search_artist(&self, name: &str) -> Result<Vec<Candidate>, ProviderError> {
        self.search(EntityKind::Artist, &artist_query(name))
    }

    fn search_album(&self, artist: &str, album: &str) -> Result<Vec<Candidate>, ProviderError> {
        self.search(EntityKind::Album, &album_query(artist, album))
    }

    /// Tries each search strategy in order, stopping early once a candidate
    /// clears the early-stop threshold, and returns the best candidate only
    /// when it clears the acceptance threshold.
    fn resolve_canonical_id(
        &self,
        kind: EntityKind,
        name: &str,
        secondary: Option<&str>,
    ) -> Result<Option<ResolvedId>, ProviderError> {
        let mut best: Option<(i32, Candidate)> = None;
        let mut last_error: Option<ProviderError> = None;
        for query in search_queries(kind, name, secondary) {
            let candidates = match self.search(kind, &query) {
                Ok(candidates) => candidates,
                Err(error) => {
                    // One failed strategy is not conclusive; try the next.
                    last_error = Some(error);
                    continue;
                }
            };
            if let Some((score, candidate)) = best_candidate(&candidates, name, secondary, &self.matching)
            {
                if best.as_ref().map_or(true, |(top, _)| score > *top) {
                    best = Some((score, candidate.clone()));
                }
            }
            if let Some((score, _)) = &best {
                if early_stop(*score, &self.matching) {
                    break;
                }
            }
        }

        match best {
            Some((score, candidate)) if accepts(score, &self.matching) => {
                Ok(candidate.canonical_id.map(|canonical_id| ResolvedId {
                    canonical_id,
                    score,
                }))
            }
            Some(_) => Ok(None),
            None => match last_error {
                Some(error) => Err(error),
                None => Ok(None),
            },
        }
    }

    fn fetch_detail(&self, request: &FetchRequest<'_>) -> Result<LinkSet, ProviderError> {
        let Some(mbid) = request.canonical_id else {
            // Without an MBID there is nothing deterministic to build;
            // resolution happens upstream, never here.
            return Ok(LinkSet::default());
        };
        let path = entity_path(request.kind);
        let mut patch = LinkSet {
            musicbrainz_url: Some(format!("{ENTITY_BASE_URL}/{path}/{mbid}")),
            ..LinkSet::default()
        };
        if matches!(request.kind, EntityKind::Artist | EntityKind::Label) {
            let url = build_url(&format!("{WS_BASE_URL}/{path}/{mbid}"), &[("fmt", "json")]);
            let payload = get_json(&self.agent, &self.pacer, self.kind(), &url, &[])?;
            patch.origin = area_name(&payload);
        }
        Ok(patch)
    }
}
