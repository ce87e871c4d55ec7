//! ASIN search on the store host.

use super::{Lookup, RemoteConnection};
use crate::asin::Asin;
use crate::error::LookupError;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::form_urlencoded;

/// Kindle store department filter prepended to the keyword query.
const SEARCH_PATH: &str = "/s/ref=sr_qz_back?sf=qz&rh=i%3Adigital-text%2Cn%3A154606011%2Ck%3A";

/// Shown when a keyword search has no hits.
const NO_MATCH_MARKER: &str = "did not match any products";

/// Either of these next to the no-match marker means results were still shown.
const FALLBACK_MARKERS: &[&str] = &["Did you mean:", "so we searched in All Departments"];

static ASIN_ATTR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-asin="([A-Za-z0-9]+)""#).unwrap());

/// Searches the store for `"{title} - {author}"` and returns the first ASIN
/// in the results.
pub async fn search_identifier(
    conn: &mut RemoteConnection,
    title: &str,
    author: &str,
) -> Result<Lookup<Asin>, LookupError> {
    let page = conn.fetch_page(&search_path(title, author)).await?;
    Ok(extract_identifier(&page))
}

fn search_path(title: &str, author: &str) -> String {
    let keywords = format!("{} - {}", title, author);
    let encoded: String = form_urlencoded::byte_serialize(keywords.as_bytes()).collect();
    format!("{}{}&keywords={}", SEARCH_PATH, encoded, encoded)
}

/// Pulls the first valid `data-asin` out of a search result page.
///
/// Only the results column is searched when the page has one.
fn extract_identifier(page: &str) -> Lookup<Asin> {
    if page.contains(NO_MATCH_MARKER) && !FALLBACK_MARKERS.iter().any(|m| page.contains(m)) {
        return Lookup::NotFound;
    }

    let doc = Html::parse_document(page);
    let results_selector = Selector::parse("#resultsCol").unwrap();
    let columns: Vec<String> = doc.select(&results_selector).map(|el| el.html()).collect();
    let haystacks: Vec<&str> = if columns.is_empty() {
        vec![page]
    } else {
        columns.iter().map(String::as_str).collect()
    };

    haystacks
        .into_iter()
        .flat_map(|html| ASIN_ATTR_REGEX.captures_iter(html))
        .filter_map(|caps| Asin::parse(&caps[1]))
        .next()
        .map_or(Lookup::NotFound, Lookup::Found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RemoteConfig;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_first_asin() {
        let page = r#"<div data-asin="B000123456"></div><div data-asin="B000999999"></div>"#;
        assert_eq!(
            extract_identifier(page),
            Lookup::Found(Asin::parse("B000123456").unwrap())
        );
    }

    #[test]
    fn test_extract_prefers_results_column() {
        let page = r#"<div data-asin="AD00000001"></div>
            <div id="resultsCol"><li data-asin="B000123456"></li></div>"#;
        assert_eq!(
            extract_identifier(page).found().unwrap().as_str(),
            "B000123456"
        );
    }

    #[test]
    fn test_extract_skips_invalid_values() {
        let page = r#"<li data-asin="123"></li><li data-asin="B000123456"></li>"#;
        assert_eq!(
            extract_identifier(page).found().unwrap().as_str(),
            "B000123456"
        );
    }

    #[test]
    fn test_no_match_marker() {
        let page = r#"Your search did not match any products. <div data-asin="B000123456">"#;
        assert_eq!(extract_identifier(page), Lookup::NotFound);
    }

    #[test]
    fn test_no_match_with_suggestion_still_reads_results() {
        let page = r#"did not match any products. Did you mean: <div data-asin="B000123456">"#;
        assert!(extract_identifier(page).found().is_some());
    }

    #[test]
    fn test_search_path_encodes_keywords() {
        let path = search_path("The Book", "A. Writer");
        assert!(path.starts_with(SEARCH_PATH));
        assert!(path.ends_with("The+Book+-+A.+Writer&keywords=The+Book+-+A.+Writer"));
    }

    #[tokio::test]
    async fn test_search_identifier() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/s/ref=sr_qz_back"))
            .and(query_param("keywords", "The Book - A. Writer"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"<div data-asin="B000123456">"#),
            )
            .mount(&server)
            .await;

        let config = RemoteConfig {
            retry_delay_ms: 0,
            ..RemoteConfig::default()
        };
        let mut conn = RemoteConnection::open(&server.uri(), &config).unwrap();
        let found = search_identifier(&mut conn, "The Book", "A. Writer")
            .await
            .unwrap();
        assert_eq!(found.found().unwrap().as_str(), "B000123456");
    }
}
