//! Retrieval mode correction.
//!
//! Users often pick a mode that does not match the link they paste (a single
//! video link with the "post" mode, an account link with "one"). The backend's
//! URL classification decides which mode actually fits.

use crate::backend::{ContentBackend, UrlKind};
use crate::error::Error;

/// Mode the executor will enumerate with
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct ModeChoice {
    pub(super) mode: String,
    /// The requested mode, when it was substituted
    pub(super) corrected_from: Option<String>,
}

/// Pick the mode for `url`, preferring the dedicated single-item mode for single items
pub(super) fn choose_mode(
    backend: &dyn ContentBackend,
    url: &str,
    requested: &str,
) -> Result<ModeChoice, Error> {
    let single = backend.single_item_mode();
    let corrected = match backend.classify_url(url) {
        UrlKind::SingleItem if requested != single => Some(single.to_string()),
        UrlKind::Listing if requested == single => Some(backend.listing_mode().to_string()),
        UrlKind::Special(mode) if mode != requested && backend.supports_mode(&mode) => Some(mode),
        _ => None,
    };

    let choice = match corrected {
        Some(mode) => ModeChoice {
            mode,
            corrected_from: Some(requested.to_string()),
        },
        None => ModeChoice {
            mode: requested.to_string(),
            corrected_from: None,
        },
    };

    if !backend.supports_mode(&choice.mode) {
        return Err(Error::UnsupportedMode {
            platform: backend.platform().to_string(),
            mode: choice.mode,
        });
    }
    Ok(choice)
}
