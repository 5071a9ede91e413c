//! External metadata provider adapters.
//!
//! One adapter per source. Each adapter owns its credential requirement,
//! request pacing, and response shape, ranks its own search candidates with
//! the shared scorer, and surfaces results as a partial [`LinkSet`] patch.

pub mod discogs;
pub mod lastfm;
pub mod musicbrainz;
pub mod rym;
pub mod theaudiodb;

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::config::{Config, MatchingConfig};
use crate::matching::{combined_score, field_score};
use crate::model::{EntityKind, LinkSet, ProviderError, ProviderKind};
use crate::pacing::ProviderPacer;

pub const USER_AGENT: &str =
    "melodex/0.1.0 (https://github.com/melodex/melodex; catalog reconciliation)";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_secs(7);

/// One scored search result from a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub name: String,
    /// Artist name on album candidates, when the provider reports one.
    pub secondary: Option<String>,
    pub canonical_id: Option<String>,
    pub url: Option<String>,
}

/// An accepted canonical-ID resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedId {
    pub canonical_id: String,
    pub score: i32,
}

/// Everything an adapter needs to describe one entity.
#[derive(Debug, Clone, Copy)]
pub struct FetchRequest<'a> {
    pub kind: EntityKind,
    pub name: &'a str,
    /// Parent display name: the album's artist or the track's album.
    pub secondary: Option<&'a str>,
    /// Canonical ID when already resolved; adapters that can build a
    /// deterministic lookup from it must prefer that over re-searching.
    pub canonical_id: Option<&'a str>,
}

/// Capability contract every provider adapter implements.
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// False when required credentials are absent; the orchestrator treats
    /// a disabled adapter as a skip, never an error.
    fn enabled(&self) -> bool {
        true
    }

    fn supports(&self, kind: EntityKind) -> bool;

    fn search_artist(&self, _name: &str) -> Result<Vec<Candidate>, ProviderError> {
        Ok(Vec::new())
    }

    fn search_album(&self, _artist: &str, _album: &str) -> Result<Vec<Candidate>, ProviderError> {
        Ok(Vec::new())
    }

    /// Resolves the provider-independent canonical ID for an entity. Only
    /// the canonical-ID directory implements this.
    fn resolve_canonical_id(
        &self,
        _kind: EntityKind,
        _name: &str,
        _secondary: Option<&str>,
    ) -> Result<Option<ResolvedId>, ProviderError> {
        Ok(None)
    }

    /// Fetches this provider's link/descriptive fields for one entity as a
    /// partial link set. An empty patch means "no result", never an error.
    fn fetch_detail(&self, request: &FetchRequest<'_>) -> Result<LinkSet, ProviderError>;
}

/// Scores one candidate against the queried names: the title component is
/// the name match, the artist component falls back to the title match when
/// either side has no secondary name.
pub fn candidate_score(
    candidate: &Candidate,
    name: &str,
    secondary: Option<&str>,
    matching: &MatchingConfig,
) -> i32 {
    let title = field_score(name, &candidate.name);
    let artist = match (secondary, candidate.secondary.as_deref()) {
        (Some(query), Some(found)) => field_score(query, found),
        _ => title,
    };
    combined_score(title, artist, matching)
}

/// Picks the highest-scoring candidate.
pub fn best_candidate<'a>(
    candidates: &'a [Candidate],
    name: &str,
    secondary: Option<&str>,
    matching: &MatchingConfig,
) -> Option<(i32, &'a Candidate)> {
    candidates
        .iter()
        .map(|candidate| (candidate_score(candidate, name, secondary, matching), candidate))
        .max_by_key(|(score, _)| *score)
}

/// Shared blocking HTTP client with the adapters' timeout profile.
pub fn new_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout_read(READ_TIMEOUT)
        .timeout_write(READ_TIMEOUT)
        .build()
}

/// Issues a paced GET and returns the raw body. Throttling responses map
/// to `RateLimited`; every other network failure is a soft `Transient`
/// error attributed by the caller.
pub fn get_text(
    agent: &ureq::Agent,
    pacer: &ProviderPacer,
    provider: ProviderKind,
    url: &str,
    headers: &[(&str, &str)],
) -> Result<String, ProviderError> {
    pacer.wait(provider);
    let mut request = agent
        .get(url)
        .set("User-Agent", USER_AGENT)
        .set("Accept", "application/json");
    for (header, value) in headers {
        request = request.set(header, value);
    }
    let response = request.call().map_err(|error| classify_failure(&error))?;
    let mut body = String::new();
    response
        .into_reader()
        .read_to_string(&mut body)
        .map_err(|error| ProviderError::Transient(format!("failed to read response: {error}")))?;
    Ok(body)
}

/// Paced GET with strict JSON parsing.
pub fn get_json(
    agent: &ureq::Agent,
    pacer: &ProviderPacer,
    provider: ProviderKind,
    url: &str,
    headers: &[(&str, &str)],
) -> Result<Value, ProviderError> {
    let body = get_text(agent, pacer, provider, url, headers)?;
    serde_json::from_str(&body)
        .map_err(|error| ProviderError::Transient(format!("invalid JSON response: {error}")))
}

fn classify_failure(error: &ureq::Error) -> ProviderError {
    match error {
        ureq::Error::Status(429, _) => ProviderError::RateLimited(error.to_string()),
        _ => ProviderError::Transient(format!("request failed: {error}")),
    }
}

/// Builds a query string from key/value pairs with percent-encoded values.
pub fn build_url(base: &str, params: &[(&str, &str)]) -> String {
    let mut url = base.to_string();
    for (index, (key, value)) in params.iter().enumerate() {
        url.push(if index == 0 { '?' } else { '&' });
        url.push_str(key);
        url.push('=');
        url.push_str(urlencoding::encode(value).as_ref());
    }
    url
}

/// Constructs the full adapter set in reconciliation priority order:
/// canonical-ID directory first, deterministic slug generator last.
pub fn build_adapters(
    config: &Config,
    pacer: Arc<ProviderPacer>,
) -> Vec<Box<dyn ProviderAdapter>> {
    let agent = new_agent();
    let matching = config.matching.clone();
    vec![
        Box::new(musicbrainz::MusicBrainzAdapter::new(
            agent.clone(),
            Arc::clone(&pacer),
            matching.clone(),
        )),
        Box::new(theaudiodb::TheAudioDbAdapter::new(
            agent.clone(),
            Arc::clone(&pacer),
            matching.clone(),
            config.providers.theaudiodb.api_key.clone(),
        )),
        Box::new(discogs::DiscogsAdapter::new(
            agent.clone(),
            Arc::clone(&pacer),
            matching.clone(),
            config.providers.discogs.token.clone(),
        )),
        Box::new(lastfm::LastFmAdapter::new(
            agent,
            pacer,
            matching,
            config.providers.lastfm.api_key.clone(),
        )),
        Box::new(rym::RymAdapter),
    ]
}

/// Builds the pacer from configured per-provider intervals. The slug
/// generator makes no network calls and is never paced.
pub fn build_pacer(config: &Config) -> Arc<ProviderPacer> {
    Arc::new(ProviderPacer::new(&[
        (
            ProviderKind::MusicBrainz,
            Duration::from_millis(config.providers.musicbrainz.min_interval_ms),
        ),
        (
            ProviderKind::TheAudioDb,
            Duration::from_millis(config.providers.theaudiodb.min_interval_ms),
        ),
        (
            ProviderKind::Discogs,
            Duration::from_millis(config.providers.discogs.min_interval_ms),
        ),
        (
            ProviderKind::LastFm,
            Duration::from_millis(config.providers.lastfm.min_interval_ms),
        ),
    ]))
}
