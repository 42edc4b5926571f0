//! Directory listing rendering. Aggregates the rows the [`Store`] already
//! collapsed into one entry per child name, formats them the way a typical
//! Apache/nginx-style generated index page does, and hands them to a
//! `sailfish` template.

use sailfish::TemplateSimple;
use time::OffsetDateTime;

use crate::store::ListingEntry;

const DATE_FORMAT: &[time::format_description::FormatItem<'static>] =
    time::macros::format_description!("[day]-[month repr:short]-[year] [hour]:[minute]");

#[derive(TemplateSimple)]
#[template(path = "listing.stpl")]
struct ListingTemplate {
    title: String,
    parent: Option<String>,
    entries: Vec<ListingRow>,
}

struct ListingRow {
    href: String,
    display_name: String,
    padding: String,
    modified: String,
    size_display: String,
}

/// Renders the directory listing for `rel_path` under a distribution's base path.
///
/// `entries` must already be sorted lexicographically by name; callers do the
/// sort once, after merging publication/version/remote-size contributions,
/// since that merge needs the unsorted list to dedupe by name.
pub fn render_listing(title: &str, has_parent: bool, entries: &[ListingEntry]) -> Result<String, sailfish::RenderError> {
    let widest_name = entries.iter().map(|e| e.name.len()).max().unwrap_or(0).max(8);
    let rows = entries
        .iter()
        .map(|entry| {
            let padding = " ".repeat(widest_name.saturating_sub(entry.name.len()) + 2);
            ListingRow {
                href: entry.name.clone(),
                display_name: entry.name.clone(),
                padding,
                modified: format_modified(entry.last_modified),
                size_display: entry
                    .size
                    .map(human_size)
                    .unwrap_or_else(|| "-".to_string()),
            }
        })
        .collect();

    (ListingTemplate {
        title: title.to_string(),
        parent: has_parent.then(|| "../".to_string()),
        entries: rows,
    })
    .render_once()
}

fn format_modified(at: OffsetDateTime) -> String {
    at.format(DATE_FORMAT).unwrap_or_else(|_| at.to_string())
}

/// `ls -h`-style size.
fn human_size(bytes: i64) -> String {
    const UNITS: &[&str] = &["B", "K", "M", "G", "T"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes}{}", UNITS[0])
    } else {
        format!("{size:.1}{}", UNITS[unit])
    }
}

#[test]
fn test_human_size() {
    assert_eq!(human_size(512), "512B");
    assert_eq!(human_size(2048), "2.0K");
    assert_eq!(human_size(5 * 1024 * 1024), "5.0M");
}

#[test]
fn test_render_listing_has_parent_link() {
    let entries = vec![ListingEntry {
        name: "pool/".to_string(),
        last_modified: OffsetDateTime::now_utc(),
        size: None,
    }];
    let html = render_listing("/pulp/content/repo/", true, &entries).unwrap();
    assert!(html.contains("../"));
    assert!(html.contains("pool/"));
}
