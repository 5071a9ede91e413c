//! RateYourMusic adapter: deterministic page URLs built from name slugs.
//!
//! RYM has no public API, but its page URLs follow a predictable slug
//! scheme, so this adapter is pure computation. No network calls, no
//! pacing, always enabled.

use crate::matching::normalize;
use crate::model::{EntityKind, LinkSet, ProviderError, ProviderKind};
use crate::providers::{FetchRequest, ProviderAdapter};

const SITE_URL: &str = "https://rateyourmusic.com";

pub struct RymAdapter;

/// Lowercased, punctuation stripped, spaces hyphenated.
fn slug(name: &str) -> String {
    normalize(name).replace(' ', "-")
}

impl ProviderAdapter for RymAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Rym
    }

    fn supports(&self, kind: EntityKind) -> bool {
        matches!(kind, EntityKind::Artist | EntityKind::Album | EntityKind::Label)
    }

    fn fetch_detail(&self, request: &FetchRequest<'_>) -> Result<LinkSet, ProviderError> {
        let name_slug = slug(request.name);
        if name_slug.is_empty() {
            return Ok(LinkSet::default());
        }
        let url = match request.kind {
            EntityKind::Artist => format!("{SITE_URL}/artist/{name_slug}"),
            EntityKind::Album => {
                // Album pages are nested under the artist slug.
                let Some(artist_slug) = request.secondary.map(slug).filter(|s| !s.is_empty())
                else {
                    return Ok(LinkSet::default());
                };
                format!("{SITE_URL}/release/album/{artist_slug}/{name_slug}/")
            }
            EntityKind::Label => format!("{SITE_URL}/label/{name_slug}"),
            EntityKind::Track => return Ok(LinkSet::default()),
        };
        Ok(LinkSet {
            rym_url: Some(url),
            ..LinkSet::default()
        })
    }
}
