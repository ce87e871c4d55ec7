//! Book page search on the metadata host.

use super::{Lookup, RemoteConnection};
use crate::asin::Asin;
use crate::error::LookupError;
use regex::Regex;
use std::sync::LazyLock;
use url::form_urlencoded;

/// Shown when an ASIN search has no hits.
const NO_RESULTS_MARKER: &str = "did not return any results";

static BOOK_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href="([^"]*/books/[^"]+)""#).unwrap());

/// Searches the metadata host by ASIN and returns the first book page link.
///
/// A search without results is `NotFound`, not an error.
pub async fn search_book_url(
    conn: &mut RemoteConnection,
    asin: &Asin,
) -> Result<Lookup<String>, LookupError> {
    let query: String = form_urlencoded::Serializer::new(String::new())
        .append_pair("Keywords", asin.as_str())
        .finish();
    let page = conn.fetch_page(&format!("/search/books?{}", query)).await?;
    Ok(extract_book_url(&page))
}

fn extract_book_url(page: &str) -> Lookup<String> {
    if page.contains(NO_RESULTS_MARKER) {
        return Lookup::NotFound;
    }

    BOOK_URL_REGEX
        .captures(page)
        .map(|caps| caps[1].to_string())
        .map_or(Lookup::NotFound, Lookup::Found)
}
