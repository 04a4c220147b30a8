//! Table formatting helpers for CLI output.

use a3s_catalog_core::catalog::{reasons, TYPE_PROGRESSING, TYPE_SERVING};
use a3s_catalog_core::{Catalog, ConditionStatus};
use comfy_table::{ContentArrangement, Table};

/// Create a styled table with the given headers.
pub fn new_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.load_preset(comfy_table::presets::NOTHING);
    table.set_header(headers);
    table
}

/// Format a chrono timestamp as a relative "ago" string.
pub fn format_ago(dt: &chrono::DateTime<chrono::Utc>) -> String {
    format_ago_from(dt, chrono::Utc::now())
}

fn format_ago_from(dt: &chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) -> String {
    let duration = now.signed_duration_since(*dt);

    let secs = duration.num_seconds();
    if secs < 0 {
        return "just now".to_string();
    }

    if secs < 60 {
        return format!("{secs} seconds ago");
    }

    let mins = duration.num_minutes();
    if mins < 60 {
        return format!("{mins} minutes ago");
    }

    let hours = duration.num_hours();
    if hours < 24 {
        return format!("{hours} hours ago");
    }

    let days = duration.num_days();
    if days < 30 {
        return format!("{days} days ago");
    }

    let months = days / 30;
    if months < 12 {
        return format!("{months} months ago");
    }

    let years = days / 365;
    format!("{years} years ago")
}

/// One-word state of a catalog for listings.
///
/// `Serving` while content is available, otherwise the reason of the
/// failing condition, or `Pending` before the first sync.
pub fn catalog_state(catalog: &Catalog) -> String {
    let serving = catalog.status.condition(TYPE_SERVING);
    if serving.is_some_and(|c| c.status == ConditionStatus::True) {
        return "Serving".to_string();
    }
    if let Some(progressing) = catalog
        .status
        .condition(TYPE_PROGRESSING)
        .filter(|c| c.reason != reasons::SUCCEEDED)
    {
        return progressing.reason.clone();
    }
    serving
        .map(|c| c.reason.clone())
        .unwrap_or_else(|| "Pending".to_string())
}
