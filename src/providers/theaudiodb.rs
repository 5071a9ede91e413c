//! TheAudioDB adapter: catalog search with descriptive blurbs.
//!
//! Contributes the TheAudioDB page link, the English biography/description,
//! and the formed/release year. Prefers the `*-mb.php` MBID lookups once
//! the canonical ID is known; otherwise falls back to name search ranked by
//! the shared scorer. TheAudioDB serves empty or HTML bodies under load, so
//! payload parsing treats those as "no results" rather than errors.

use std::sync::Arc;

use serde_json::Value;

use crate::config::MatchingConfig;
use crate::matching::accepts;
use crate::model::{EntityKind, LinkSet, ProviderError, ProviderKind};
use crate::pacing::ProviderPacer;
use crate::providers::{
    build_url, candidate_score, get_text, Candidate, FetchRequest, ProviderAdapter,
};

const BASE_URL: &str = "https://www.theaudiodb.com/api/v1/json";
const SITE_URL: &str = "https://www.theaudiodb.com";

pub struct TheAudioDbAdapter {
    agent: ureq::Agent,
    pacer: Arc<ProviderPacer>,
    matching: MatchingConfig,
    api_key: String,
}

#[derive(Debug, Clone, PartialEq)]
struct ArtistEntry {
    name: String,
    biography: Option<String>,
    formed_year: Option<i64>,
    url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct AlbumEntry {
    name: String,
    artist: Option<String>,
    description: Option<String>,
    released_year: Option<i64>,
    url: Option<String>,
}

fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn year_of(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
        .filter(|year| *year > 0)
}

/// TheAudioDB returns empty bodies, HTML error pages, and truncated JSON
/// when saturated; all of those mean "no results" here.
fn parse_payload(body: &str) -> Result<Value, ProviderError> {
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.starts_with('<') {
        return Ok(Value::Null);
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(parsed) => Ok(parsed),
        Err(error) if error.is_eof() => Ok(Value::Null),
        Err(error) => Err(ProviderError::Transient(format!(
            "invalid JSON response: {error}"
        ))),
    }
}

fn artist_entries(payload: &Value) -> Vec<ArtistEntry> {
    let Some(items) = payload["artists"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let name = non_empty(&item["strArtist"])?;
            Some(ArtistEntry {
                name,
                biography: non_empty(&item["strBiographyEN"]),
                formed_year: year_of(&item["intFormedYear"]),
                url: non_empty(&item["idArtist"]).map(|id| format!("{SITE_URL}/artist/{id}")),
            })
        })
        .collect()
}

fn album_entries(payload: &Value) -> Vec<AlbumEntry> {
    let Some(items) = payload["album"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let name = non_empty(&item["strAlbum"])?;
            Some(AlbumEntry {
                name,
                artist: non_empty(&item["strArtist"]),
                description: non_empty(&item["strDescriptionEN"]),
                released_year: year_of(&item["intYearReleased"]),
                url: non_empty(&item["idAlbum"]).map(|id| format!("{SITE_URL}/album/{id}")),
            })
        })
        .collect()
}

fn artist_candidates(payload: &Value) -> Vec<Candidate> {
    artist_entries(payload)
        .into_iter()
        .map(|entry| Candidate {
            name: entry.name,
            secondary: None,
            canonical_id: None,
            url: entry.url,
        })
        .collect()
}

fn album_candidates(payload: &Value) -> Vec<Candidate> {
    album_entries(payload)
        .into_iter()
        .map(|entry| Candidate {
            name: entry.name,
            secondary: entry.artist,
            canonical_id: None,
            url: entry.url,
        })
        .collect()
}

fn artist_patch(entry: &ArtistEntry) -> LinkSet {
    LinkSet {
        theaudiodb_url: entry.url.clone(),
        biography: entry.biography.clone(),
        formed_year: entry.formed_year,
        ..LinkSet::default()
    }
}

fn album_patch(entry: &AlbumEntry) -> LinkSet {
    LinkSet {
        theaudiodb_url: entry.url.clone(),
        biography: entry.description.clone(),
        formed_year: entry.released_year,
        ..LinkSet::default()
    }
}

impl TheAudioDbAdapter {
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

    fn request(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<Value, ProviderError> {
        let url = build_url(&format!("{BASE_URL}/{}/{endpoint}", self.api_key), params);
        let body = get_text(&self.agent, &self.pacer, self.kind(), &url, &[])?;
        parse_payload(&body)
    }

    fn best_artist(&self, name: &str) -> Result<Option<ArtistEntry>, ProviderError> {
        let payload = self.request("search.php", &[("s", name)])?;
        let entries = artist_entries(&payload);
        Ok(self.pick_artist(entries, name))
    }

    fn pick_artist(&self, entries: Vec<ArtistEntry>, name: &str) -> Option<ArtistEntry> {
        entries
            .into_iter()
            .map(|entry| {
                let candidate = Candidate {
                    name: entry.name.clone(),
                    secondary: None,
                    canonical_id: None,
                    url: entry.url.clone(),
                };
                (candidate_score(&candidate, name, None, &self.matching), entry)
            })
            .max_by_key(|(score, _)| *score)
            .filter(|(score, _)| accepts(*score, &self.matching))
            .map(|(_, entry)| entry)
    }

    fn best_album(&self, artist: &str, album: &str) -> Result<Option<AlbumEntry>, ProviderError> {
        let payload = self.request("searchalbum.php", &[("s", artist), ("a", album)])?;
        let entries = album_entries(&payload);
        Ok(self.pick_album(entries, album, Some(artist)))
    }

    fn pick_album(
        &self,
        entries: Vec<AlbumEntry>,
        album: &str,
        artist: Option<&str>,
    ) -> Option<AlbumEntry> {
        entries
            .into_iter()
            .map(|entry| {
                let candidate = Candidate {
                    name: entry.name.clone(),
                    secondary: entry.artist.clone(),
                    canonical_id: None,
                    url: entry.url.clone(),
                };
                (candidate_score(&candidate, album, artist, &self.matching), entry)
            })
            .max_by_key(|(score, _)| *score)
            .filter(|(score, _)| accepts(*score, &self.matching))
            .map(|(_, entry)| entry)
    }
}

impl ProviderAdapter for TheAudioDbAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::TheAudioDb
    }

    fn enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn supports(&self, kind: EntityKind) -> bool {
        matches!(kind, EntityKind::Artist | EntityKind::Album)
    }

    fn search_artist(&self, name: &str) -> Result<Vec<Candidate>, ProviderError> {
        let payload = self.request("search.php", &[("s", name)])?;
        Ok(artist_candidates(&payload))
    }

    fn search_album(&self, artist: &str, album: &str) -> Result<Vec<Candidate>, ProviderError> {
        let payload = self.request("searchalbum.php", &[("s", artist), ("a", album)])?;
        Ok(album_candidates(&payload))
    }

    fn fetch_detail(&self, request: &FetchRequest<'_>) -> Result<LinkSet, ProviderError> {
        match request.kind {
            EntityKind::Artist => {
                // The MBID lookup is keyed, deterministic, and preferred.
                if let Some(mbid) = request.canonical_id {
                    let payload = self.request("artist-mb.php", &[("i", mbid)])?;
                    if let Some(entry) = artist_entries(&payload).into_iter().next() {
                        return Ok(artist_patch(&entry));
                    }
                }
                Ok(self
                    .best_artist(request.name)?
                    .map(|entry| artist_patch(&entry))
                    .unwrap_or_default())
            }
            EntityKind::Album => {
                if let Some(mbid) = request.canonical_id {
                    let payload = self.request("album-mb.php", &[("i", mbid)])?;
                    if let Some(entry) = album_entries(&payload).into_iter().next() {
                        return Ok(album_patch(&entry));
                    }
                }
                let Some(artist) = request.secondary else {
                    return Ok(LinkSet::default());
                };
                Ok(self
                    .best_album(artist, request.name)?
                    .map(|entry| album_patch(&entry))
                    .unwrap_or_default())
            }
            EntityKind::Label | EntityKind::Track => Ok(LinkSet::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use std::sync::Arc;

    use super::{
        album_candidates, album_entries, artist_candidates, artist_entries, parse_payload,
        TheAudioDbAdapter,
    };
    use crate::config::MatchingConfig;
    use crate::pacing::ProviderPacer;
    use crate::providers::new_agent;

    fn adapter() -> TheAudioDbAdapter {
        TheAudioDbAdapter::new(
            new_agent(),
            Arc::new(ProviderPacer::new(&[])),
            MatchingConfig::default(),
            "2".to_string(),
        )
    }

    #[test]
    fn test_parse_payload_tolerates_empty_and_html_bodies() {
        assert_eq!(parse_payload("").expect("empty body"), serde_json::Value::Null);
        assert_eq!(
            parse_payload("<html>rate limited</html>").expect("html body"),
            serde_json::Value::Null
        );
        assert!(parse_payload("{\"artists\": not json").is_err());
    }

    #[test]
    fn test_artist_entries_extract_fields() {
        let payload = json!({
            "artists": [{
                "strArtist": "Radiohead",
                "strBiographyEN": "Radiohead are an English rock band.",
                "intFormedYear": "1985",
                "idArtist": "111239"
            }]
        });
        let entries = artist_entries(&payload);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].formed_year, Some(1985));
        assert_eq!(
            entries[0].url.as_deref(),
            Some("https://www.theaudiodb.com/artist/111239")
        );
    }

    #[test]
    fn test_album_entries_skip_nameless_items() {
        let payload = json!({
            "album": [
                {"strAlbum": "", "idAlbum": "1"},
                {"strAlbum": "OK Computer", "strArtist": "Radiohead", "idAlbum": "2"}
            ]
        });
        let entries = album_entries(&payload);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].artist.as_deref(), Some("Radiohead"));
    }

    #[test]
    fn test_search_payloads_map_to_candidates() {
        let artists = artist_candidates(&json!({
            "artists": [{"strArtist": "Radiohead", "idArtist": "111239"}]
        }));
        assert_eq!(artists.len(), 1);
        assert_eq!(artists[0].name, "Radiohead");
        assert!(artists[0].secondary.is_none());
        assert_eq!(
            artists[0].url.as_deref(),
            Some("https://www.theaudiodb.com/artist/111239")
        );

        let albums = album_candidates(&json!({
            "album": [{"strAlbum": "OK Computer", "strArtist": "Radiohead", "idAlbum": "2"}]
        }));
        assert_eq!(albums.len(), 1);
        assert_eq!(albums[0].name, "OK Computer");
        assert_eq!(albums[0].secondary.as_deref(), Some("Radiohead"));
        assert_eq!(
            albums[0].url.as_deref(),
            Some("https://www.theaudiodb.com/album/2")
        );
    }

    #[test]
    fn test_pick_artist_rejects_low_scoring_candidates() {
        let adapter = adapter();
        let entries = artist_entries(&json!({
            "artists": [{"strArtist": "Completely Different", "idArtist": "9"}]
        }));
        assert_eq!(adapter.pick_artist(entries, "Radiohead"), None);
    }

    #[test]
    fn test_pick_album_prefers_matching_artist() {
        let adapter = adapter();
        let entries = album_entries(&json!({
            "album": [
                {"strAlbum": "OK Computer", "strArtist": "Tribute Ensemble", "idAlbum": "1"},
                {"strAlbum": "OK Computer", "strArtist": "Radiohead", "idAlbum": "2"}
            ]
        }));
        let best = adapter
            .pick_album(entries, "OK Computer", Some("Radiohead"))
            .expect("accepted candidate");
        assert_eq!(best.artist.as_deref(), Some("Radiohead"));
    }

    #[test]
    fn test_adapter_disabled_without_api_key() {
        use crate::providers::ProviderAdapter;
        let adapter = TheAudioDbAdapter::new(
            new_agent(),
            Arc::new(ProviderPacer::new(&[])),
            MatchingConfig::default(),
            String::new(),
        );
        assert!(!adapter.enabled());
    }
}
