//! Discogs adapter: marketplace database links and production credits.
//!
//! Requires a personal access token; without one the adapter reports
//! itself disabled and the orchestrator skips it. Contributes the Discogs
//! page link, per-role production credits on albums, and the release count
//! on artists. Discogs has no MBID lookup, so resolution is always a name
//! search ranked by the shared scorer.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::config::MatchingConfig;
use crate::matching::accepts;
use crate::model::{EntityKind, LinkSet, ProviderError, ProviderKind};
use crate::pacing::ProviderPacer;
use crate::providers::{
    build_url, candidate_score, get_json, Candidate, FetchRequest, ProviderAdapter,
};

const API_BASE_URL: &str = "https://api.discogs.com";
const SITE_URL: &str = "https://www.discogs.com";
const SEARCH_PAGE_SIZE: &str = "8";

pub struct DiscogsAdapter {
    agent: ureq::Agent,
    pacer: Arc<ProviderPacer>,
    matching: MatchingConfig,
    token: String,
}

#[derive(Debug, Clone, PartialEq)]
struct SearchHit {
    id: i64,
    /// Release hits carry "Artist - Title"; artist and label hits carry
    /// the plain name.
    title: String,
}

fn search_hits(payload: &Value) -> Vec<SearchHit> {
    let Some(results) = payload["results"].as_array() else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|result| {
            let id = result["id"].as_i64()?;
            let title = result["title"].as_str()?.trim();
            if title.is_empty() {
                return None;
            }
            Some(SearchHit {
                id,
                title: title.to_string(),
            })
        })
        .collect()
}

/// Splits a release hit title into (artist, title).
fn split_release_title(title: &str) -> (Option<String>, String) {
    match title.split_once(" - ") {
        Some((artist, rest)) => (Some(artist.trim().to_string()), rest.trim().to_string()),
        None => (None, title.to_string()),
    }
}

/// Groups a release payload's extra artists by role into a JSON object of
/// role → names, in stable role order.
fn credits_json(payload: &Value) -> Option<String> {
    let credits = payload["extraartists"].as_array()?;
    let mut by_role: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for credit in credits {
        let Some(name) = credit["name"].as_str().map(str::trim).filter(|n| !n.is_empty()) else {
            continue;
        };
        let role = credit["role"]
            .as_str()
            .map(str::trim)
            .filter(|role| !role.is_empty())
            .unwrap_or("Uncredited");
        by_role
            .entry(role.to_string())
            .or_default()
            .push(name.to_string());
    }
    if by_role.is_empty() {
        return None;
    }
    serde_json::to_string(&by_role).ok()
}

fn pagination_items(payload: &Value) -> Option<i64> {
    payload["pagination"]["items"].as_i64()
}

fn artist_candidates(hits: Vec<SearchHit>) -> Vec<Candidate> {
    hits.into_iter()
        .map(|hit| Candidate {
            name: hit.title,
            secondary: None,
            canonical_id: None,
            url: Some(format!("{SITE_URL}/artist/{}", hit.id)),
        })
        .collect()
}

fn release_candidates(hits: Vec<SearchHit>) -> Vec<Candidate> {
    hits.into_iter()
        .map(|hit| {
            let (hit_artist, hit_name) = split_release_title(&hit.title);
            Candidate {
                name: hit_name,
                secondary: hit_artist,
                canonical_id: None,
                url: Some(format!("{SITE_URL}/release/{}", hit.id)),
            }
        })
        .collect()
}

impl DiscogsAdapter {
    pub fn new(
        agent: ureq::Agent,
        pacer: Arc<ProviderPacer>,
        matching: MatchingConfig,
        token: String,
    ) -> Self {
        Self {
            agent,
            pacer,
            matching,
            token,
        }
    }

    fn get(&self, url: &str) -> Result<Value, ProviderError> {
        let auth = format!("Discogs token={}", self.token);
        get_json(
            &self.agent,
            &self.pacer,
            self.kind(),
            url,
            &[("Authorization", &auth)],
        )
    }

    fn search(&self, params: &[(&str, &str)]) -> Result<Vec<SearchHit>, ProviderError> {
        let mut full: Vec<(&str, &str)> = params.to_vec();
        full.push(("per_page", SEARCH_PAGE_SIZE));
        let url = build_url(&format!("{API_BASE_URL}/database/search"), &full);
        let payload = self.get(&url)?;
        Ok(search_hits(&payload))
    }

    fn best_hit(
        &self,
        hits: Vec<SearchHit>,
        name: &str,
        secondary: Option<&str>,
        split_titles: bool,
    ) -> Option<SearchHit> {
        hits.into_iter()
            .map(|hit| {
                let (hit_artist, hit_name) = if split_titles {
                    split_release_title(&hit.title)
                } else {
                    (None, hit.title.clone())
                };
                let candidate = Candidate {
                    name: hit_name,
                    secondary: hit_artist,
                    canonical_id: None,
                    url: None,
                };
                (candidate_score(&candidate, name, secondary, &self.matching), hit)
            })
            .max_by_key(|(score, _)| *score)
            .filter(|(score, _)| accepts(*score, &self.matching))
            .map(|(_, hit)| hit)
    }

    fn artist_release_count(&self, artist_id: i64) -> Result<Option<i64>, ProviderError> {
        let url = build_url(
            &format!("{API_BASE_URL}/artists/{artist_id}/releases"),
            &[("per_page", "1")],
        );
        let payload = self.get(&url)?;
        Ok(pagination_items(&payload))
    }

    fn release_credits(&self, release_id: i64) -> Result<Option<String>, ProviderError> {
        let payload = self.get(&format!("{API_BASE_URL}/releases/{release_id}"))?;
        Ok(credits_json(&payload))
    }
}

impl ProviderAdapter for DiscogsAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Discogs
    }

    fn enabled(&self) -> bool {
        !self.token.trim().is_empty()
    }

    fn supports(&self, kind: EntityKind) -> bool {
        matches!(kind, EntityKind::Artist | EntityKind::Album | EntityKind::Label)
    }

    fn search_artist(&self, name: &str) -> Result<Vec<Candidate>, ProviderError> {
        let hits = self.search(&[("q", name), ("type", "artist")])?;
        Ok(artist_candidates(hits))
    }

    fn search_album(&self, artist: &str, album: &str) -> Result<Vec<Candidate>, ProviderError> {
        let hits = self.search(&[
            ("release_title", album),
            ("artist", artist),
            ("type", "release"),
        ])?;
        Ok(release_candidates(hits))
    }

    fn fetch_detail(&self, request: &FetchRequest<'_>) -> Result<LinkSet, ProviderError> {
        match request.kind {
            EntityKind::Artist => {
                let hits = self.search(&[("q", request.name), ("type", "artist")])?;
                let Some(hit) = self.best_hit(hits, request.name, None, false) else {
                    return Ok(LinkSet::default());
                };
                Ok(LinkSet {
                    discogs_url: Some(format!("{SITE_URL}/artist/{}", hit.id)),
                    release_count: self.artist_release_count(hit.id)?,
                    ..LinkSet::default()
                })
            }
            EntityKind::Album => {
                let mut params: Vec<(&str, &str)> =
                    vec![("release_title", request.name), ("type", "release")];
                if let Some(artist) = request.secondary {
                    params.push(("artist", artist));
                }
                let hits = self.search(&params)?;
                let Some(hit) = self.best_hit(hits, request.name, request.secondary, true) else {
                    return Ok(LinkSet::default());
                };
                Ok(LinkSet {
                    discogs_url: Some(format!("{SITE_URL}/release/{}", hit.id)),
                    credits: self.release_credits(hit.id)?,
                    ..LinkSet::default()
                })
            }
            EntityKind::Label => {
                let hits = self.search(&[("q", request.name), ("type", "label")])?;
                let Some(hit) = self.best_hit(hits, request.name, None, false) else {
                    return Ok(LinkSet::default());
                };
                Ok(LinkSet {
                    discogs_url: Some(format!("{SITE_URL}/label/{}", hit.id)),
                    ..LinkSet::default()
                })
            }
            EntityKind::Track => Ok(LinkSet::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::sync::Arc;

    use super::{
        artist_candidates, credits_json, pagination_items, release_candidates, search_hits,
        split_release_title, DiscogsAdapter,
    };
    use crate::config::MatchingConfig;
    use crate::pacing::ProviderPacer;
    use crate::providers::{new_agent, ProviderAdapter};

    fn adapter(token: &str) -> DiscogsAdapter {
        DiscogsAdapter::new(
            new_agent(),
            Arc::new(ProviderPacer::new(&[])),
            MatchingConfig::default(),
            token.to_string(),
        )
    }

    #[test]
    fn test_adapter_disabled_without_token() {
        assert!(!adapter("").enabled());
        assert!(adapter("abc").enabled());
    }

    #[test]
    fn test_search_hits_skip_malformed_results() {
        let payload = json!({
            "results": [
                {"id": 45, "title": "Radiohead"},
                {"title": "missing id"},
                {"id": 46, "title": "  "}
            ]
        });
        let hits = search_hits(&payload);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 45);
    }

    #[test]
    fn test_split_release_title() {
        assert_eq!(
            split_release_title("Radiohead - OK Computer"),
            (Some("Radiohead".to_string()), "OK Computer".to_string())
        );
        assert_eq!(split_release_title("Untitled"), (None, "Untitled".to_string()));
    }

    #[test]
    fn test_credits_json_groups_by_role() {
        let payload = json!({
            "extraartists": [
                {"name": "Nigel Godrich", "role": "Producer"},
                {"name": "Stanley Donwood", "role": "Artwork"},
                {"name": "Nigel Godrich", "role": "Mixed By"},
                {"name": "", "role": "Producer"}
            ]
        });
        let credits = credits_json(&payload).expect("credits present");
        let parsed: serde_json::Value = serde_json::from_str(&credits).expect("valid JSON");
        assert_eq!(parsed["Producer"], json!(["Nigel Godrich"]));
        assert_eq!(parsed["Artwork"], json!(["Stanley Donwood"]));
        assert_eq!(parsed["Mixed By"], json!(["Nigel Godrich"]));
    }

    #[test]
    fn test_credits_json_empty_when_no_extraartists() {
        assert_eq!(credits_json(&json!({})), None);
        assert_eq!(credits_json(&json!({"extraartists": []})), None);
    }

    #[test]
    fn test_pagination_items() {
        let payload = json!({"pagination": {"items": 412}});
        assert_eq!(pagination_items(&payload), Some(412));
        assert_eq!(pagination_items(&json!({})), None);
    }

    #[test]
    fn test_search_hits_map_to_candidates() {
        let hits = search_hits(&json!({
            "results": [{"id": 45, "title": "Radiohead"}]
        }));
        let artists = artist_candidates(hits);
        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].name, "Radiohead");
        assert!(artists[0].secondary.is_none());
        assert_eq!(
            artists[0].url.as_deref(),
            Some("https://www.discogs.com/artist/45")
        );

        let hits = search_hits(&json!({
            "results": [{"id": 9, "title": "Radiohead - OK Computer"}]
        }));
        let releases = release_candidates(hits);
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].name, "OK Computer");
        assert_eq!(releases[0].secondary.as_deref(), Some("Radiohead"));
        assert_eq!(
            releases[0].url.as_deref(),
            Some("https://www.discogs.com/release/9")
        );
    }

    #[test]
    fn test_best_hit_splits_release_titles_for_scoring() {
        let adapter = adapter("token");
        let hits = search_hits(&json!({
            "results": [
                {"id": 1, "title": "Tribute Ensemble - OK Computer"},
                {"id": 2, "title": "Radiohead - OK Computer"}
            ]
        }));
        let best = adapter
            .best_hit(hits, "OK Computer", Some("Radiohead"), true)
            .expect("accepted hit");
        assert_eq!(best.id, 2);
    }
}
