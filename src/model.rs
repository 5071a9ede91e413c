//! Shared catalog entity types, the per-provider link set, and the typed
//! error taxonomy used across the reconciliation engine.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

/// Catalog entity kinds, one persisted table each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Artist,
    Album,
    Label,
    Track,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Artist,
        EntityKind::Album,
        EntityKind::Label,
        EntityKind::Track,
    ];

    /// Table name for the kind.
    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Artist => "artists",
            EntityKind::Album => "albums",
            EntityKind::Label => "labels",
            EntityKind::Track => "tracks",
        }
    }

    /// Parent-relation column, when the kind has one.
    pub fn parent_column(self) -> Option<&'static str> {
        match self {
            EntityKind::Album => Some("artist_id"),
            EntityKind::Track => Some("album_id"),
            EntityKind::Artist | EntityKind::Label => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityKind::Artist => "artist",
            EntityKind::Album => "album",
            EntityKind::Label => "label",
            EntityKind::Track => "track",
        };
        write!(f, "{label}")
    }
}

/// External metadata providers, in reconciliation priority order.
/// The canonical-ID directory always runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderKind {
    MusicBrainz,
    TheAudioDb,
    Discogs,
    LastFm,
    Rym,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::MusicBrainz,
        ProviderKind::TheAudioDb,
        ProviderKind::Discogs,
        ProviderKind::LastFm,
        ProviderKind::Rym,
    ];

    /// The link-set columns this provider owns. Each column has exactly one
    /// owning provider so a later provider in the pass never clobbers an
    /// earlier one.
    pub fn fields(self) -> &'static [&'static str] {
        match self {
            ProviderKind::MusicBrainz => &["canonical_id", "musicbrainz_url", "origin"],
            ProviderKind::TheAudioDb => &["theaudiodb_url", "biography", "formed_year"],
            ProviderKind::Discogs => &["discogs_url", "credits", "release_count"],
            ProviderKind::LastFm => &["lastfm_url", "tags", "similar"],
            ProviderKind::Rym => &["rym_url"],
        }
    }

    /// Config/CLI name for the provider.
    pub fn config_name(self) -> &'static str {
        match self {
            ProviderKind::MusicBrainz => "musicbrainz",
            ProviderKind::TheAudioDb => "theaudiodb",
            ProviderKind::Discogs => "discogs",
            ProviderKind::LastFm => "lastfm",
            ProviderKind::Rym => "rym",
        }
    }

    pub fn from_config_name(name: &str) -> Option<ProviderKind> {
        ProviderKind::ALL
            .into_iter()
            .find(|kind| kind.config_name() == name.trim().to_ascii_lowercase())
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.config_name())
    }
}

/// Which entities a reconciliation run selects.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// All entities, re-fetching fields that are already populated.
    Force,
    /// Entities with at least one null field among enabled providers.
    #[default]
    MissingOnly,
    /// Entities touched within the staleness window.
    Recent,
    /// Entities not touched within the staleness window.
    Stale,
}

/// Per-entity, per-provider nullable link and descriptive fields.
///
/// Column names double as the field vocabulary used by the skip rule, the
/// `MissingOnly` selection SQL, and the run summary.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkSet {
    pub canonical_id: Option<String>,
    pub musicbrainz_url: Option<String>,
    pub origin: Option<String>,
    pub theaudiodb_url: Option<String>,
    pub biography: Option<String>,
    pub formed_year: Option<i64>,
    pub discogs_url: Option<String>,
    pub credits: Option<String>,
    pub release_count: Option<i64>,
    pub lastfm_url: Option<String>,
    pub tags: Option<String>,
    pub similar: Option<String>,
    pub rym_url: Option<String>,
}

/// All link-set columns in persisted order.
pub const LINK_FIELDS: [&str; 13] = [
    "canonical_id",
    "musicbrainz_url",
    "origin",
    "theaudiodb_url",
    "biography",
    "formed_year",
    "discogs_url",
    "credits",
    "release_count",
    "lastfm_url",
    "tags",
    "similar",
    "rym_url",
];

impl LinkSet {
    /// Returns whether the named field currently holds a value.
    pub fn is_set(&self, field: &str) -> bool {
        match field {
            "canonical_id" => self.canonical_id.is_some(),
            "musicbrainz_url" => self.musicbrainz_url.is_some(),
            "origin" => self.origin.is_some(),
            "theaudiodb_url" => self.theaudiodb_url.is_some(),
            "biography" => self.biography.is_some(),
            "formed_year" => self.formed_year.is_some(),
            "discogs_url" => self.discogs_url.is_some(),
            "credits" => self.credits.is_some(),
            "release_count" => self.release_count.is_some(),
            "lastfm_url" => self.lastfm_url.is_some(),
            "tags" => self.tags.is_some(),
            "similar" => self.similar.is_some(),
            "rym_url" => self.rym_url.is_some(),
            _ => false,
        }
    }

    /// Applies a fetched patch: a non-null fetched value replaces the stored
    /// one, an empty fetch never erases an existing value.
    pub fn merge(&mut self, patch: &LinkSet) {
        fn keep<T: Clone>(target: &mut Option<T>, incoming: &Option<T>) {
            if let Some(value) = incoming {
                *target = Some(value.clone());
            }
        }
        keep(&mut self.canonical_id, &patch.canonical_id);
        keep(&mut self.musicbrainz_url, &patch.musicbrainz_url);
        keep(&mut self.origin, &patch.origin);
        keep(&mut self.theaudiodb_url, &patch.theaudiodb_url);
        keep(&mut self.biography, &patch.biography);
        keep(&mut self.formed_year, &patch.formed_year);
        keep(&mut self.discogs_url, &patch.discogs_url);
        keep(&mut self.credits, &patch.credits);
        keep(&mut self.release_count, &patch.release_count);
        keep(&mut self.lastfm_url, &patch.lastfm_url);
        keep(&mut self.tags, &patch.tags);
        keep(&mut self.similar, &patch.similar);
        keep(&mut self.rym_url, &patch.rym_url);
    }

    /// Applies a fetched patch without touching fields that already hold a
    /// value. This is the merge used by every policy except `Force`.
    pub fn fill_missing(&mut self, patch: &LinkSet) {
        fn fill<T: Clone>(target: &mut Option<T>, incoming: &Option<T>) {
            if target.is_none() {
                if let Some(value) = incoming {
                    *target = Some(value.clone());
                }
            }
        }
        fill(&mut self.canonical_id, &patch.canonical_id);
        fill(&mut self.musicbrainz_url, &patch.musicbrainz_url);
        fill(&mut self.origin, &patch.origin);
        fill(&mut self.theaudiodb_url, &patch.theaudiodb_url);
        fill(&mut self.biography, &patch.biography);
        fill(&mut self.formed_year, &patch.formed_year);
        fill(&mut self.discogs_url, &patch.discogs_url);
        fill(&mut self.credits, &patch.credits);
        fill(&mut self.release_count, &patch.release_count);
        fill(&mut self.lastfm_url, &patch.lastfm_url);
        fill(&mut self.tags, &patch.tags);
        fill(&mut self.similar, &patch.similar);
        fill(&mut self.rym_url, &patch.rym_url);
    }
}

/// One selectable catalog entity together with its current link set.
#[derive(Debug, Clone)]
pub struct EntityRow {
    pub id: i64,
    pub kind: EntityKind,
    pub name: String,
    /// Parent display name (album's artist, track's album), when any.
    pub parent_name: Option<String>,
    pub links: LinkSet,
}

/// Options accepted by a single reconcile invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub policy: SelectionPolicy,
    pub staleness_days: u32,
    pub disabled_providers: HashSet<ProviderKind>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            policy: SelectionPolicy::MissingOnly,
            staleness_days: 30,
            disabled_providers: HashSet::new(),
        }
    }
}

/// Adapter-level failures. `Disabled` is a skip, never an error; the other
/// variants are soft-fails attributed to (entity, provider, field).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("provider disabled: missing credentials")]
    Disabled,
    #[error("provider rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("transient provider failure: {0}")]
    Transient(String),
}

/// Storage failures. Contention is retried with bounded backoff; a schema
/// mismatch routes to the explicit repair path.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage contention: {0}")]
    Contention(String),
    #[error("persisted schema mismatch: {0}")]
    Schema(String),
    #[error("storage failure: {0}")]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(error: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(inner, _) = &error {
            if matches!(
                inner.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ) {
                return StoreError::Contention(error.to_string());
            }
        }
        StoreError::Sqlite(error)
    }
}

/// One counted soft failure, attributed to a specific tuple.
#[derive(Debug, Clone)]
pub struct FieldFailure {
    pub kind: EntityKind,
    pub entity_id: i64,
    pub entity_name: String,
    pub provider: ProviderKind,
    pub field: &'static str,
    pub error: String,
}

/// Resolved / left-unresolved / failed tallies for one (provider, field).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FieldCounts {
    pub resolved: u32,
    pub unresolved: u32,
    pub failed: u32,
}

/// Aggregated outcome of one reconciliation run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub counts: BTreeMap<(ProviderKind, &'static str), FieldCounts>,
    pub failures: Vec<FieldFailure>,
    pub entities_processed: u32,
    pub entities_persisted: u32,
    pub entities_failed: u32,
}

impl RunSummary {
    pub fn record_resolved(&mut self, provider: ProviderKind, field: &'static str) {
        self.counts.entry((provider, field)).or_default().resolved += 1;
    }

    pub fn record_unresolved(&mut self, provider: ProviderKind, field: &'static str) {
        self.counts.entry((provider, field)).or_default().unresolved += 1;
    }

    pub fn record_failure(&mut self, failure: FieldFailure) {
        self.counts
            .entry((failure.provider, failure.field))
            .or_default()
            .failed += 1;
        self.failures.push(failure);
    }

    /// Folds a worker's partial summary into this one.
    pub fn absorb(&mut self, other: RunSummary) {
        for (key, counts) in other.counts {
            let entry = self.counts.entry(key).or_default();
            entry.resolved += counts.resolved;
            entry.unresolved += counts.unresolved;
            entry.failed += counts.failed;
        }
        self.failures.extend(other.failures);
        self.entities_processed += other.entities_processed;
        self.entities_persisted += other.entities_persisted;
        self.entities_failed += other.entities_failed;
    }

    /// Human-readable per-provider/per-field report.
    pub fn render(&self) -> String {
        let mut out = format!(
            "entities: {} processed, {} persisted, {} failed\n",
            self.entities_processed, self.entities_persisted, self.entities_failed
        );
        for ((provider, field), counts) in &self.counts {
            out.push_str(&format!(
                "  {provider}/{field}: {} resolved, {} unresolved, {} failed\n",
                counts.resolved, counts.unresolved, counts.failed
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::{EntityKind, LinkSet, ProviderKind, RunSummary, LINK_FIELDS};

    #[test]
    fn test_merge_replaces_with_fresh_values_and_never_erases() {
        let mut stored = LinkSet {
            biography: Some("old blurb".to_string()),
            formed_year: Some(1991),
            ..LinkSet::default()
        };
        let patch = LinkSet {
            biography: Some("new blurb".to_string()),
            theaudiodb_url: Some("https://www.theaudiodb.com/artist/1".to_string()),
            ..LinkSet::default()
        };
        stored.merge(&patch);
        assert_eq!(stored.biography.as_deref(), Some("new blurb"));
        assert_eq!(stored.formed_year, Some(1991));
        assert_eq!(
            stored.theaudiodb_url.as_deref(),
            Some("https://www.theaudiodb.com/artist/1")
        );
    }

    #[test]
    fn test_every_provider_field_is_a_known_link_field() {
        for provider in ProviderKind::ALL {
            for field in provider.fields() {
                assert!(
                    LINK_FIELDS.contains(field),
                    "{provider} owns unknown field {field}"
                );
            }
        }
    }

    #[test]
    fn test_provider_field_ownership_is_disjoint() {
        let mut seen = std::collections::HashSet::new();
        for provider in ProviderKind::ALL {
            for field in provider.fields() {
                assert!(seen.insert(*field), "field {field} has two owners");
            }
        }
    }

    #[test]
    fn test_is_set_tracks_merge() {
        let mut links = LinkSet::default();
        assert!(!links.is_set("tags"));
        links.merge(&LinkSet {
            tags: Some("[\"shoegaze\"]".to_string()),
            ..LinkSet::default()
        });
        assert!(links.is_set("tags"));
    }

    #[test]
    fn test_summary_absorb_accumulates_counts() {
        let mut left = RunSummary::default();
        left.record_resolved(ProviderKind::MusicBrainz, "canonical_id");
        left.entities_processed = 2;

        let mut right = RunSummary::default();
        right.record_resolved(ProviderKind::MusicBrainz, "canonical_id");
        right.record_unresolved(ProviderKind::LastFm, "tags");
        right.entities_processed = 3;

        left.absorb(right);
        let canonical = left.counts[&(ProviderKind::MusicBrainz, "canonical_id")];
        assert_eq!(canonical.resolved, 2);
        assert_eq!(left.counts[&(ProviderKind::LastFm, "tags")].unresolved, 1);
        assert_eq!(left.entities_processed, 5);
    }

    #[test]
    fn test_parent_columns() {
        assert_eq!(EntityKind::Album.parent_column(), Some("artist_id"));
        assert_eq!(EntityKind::Track.parent_column(), Some("album_id"));
        assert_eq!(EntityKind::Artist.parent_column(), None);
    }
}
